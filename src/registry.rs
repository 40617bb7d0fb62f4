//! Tool registry: one namespace over every connected server's tools
//!
//! Name collisions are resolved first-registered-wins. Later descriptors with
//! a name already present are rejected and reported as [`Collision`]s, never
//! merged. Servers register in configuration order, so "first" is stable.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::DiscoveryError;
use crate::protocol::ToolDescriptor;

/// A tool together with the name of the server that owns it
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub server: String,
}

/// A rejected duplicate tool name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub tool: String,
    /// Server whose descriptor was kept
    pub kept: String,
    /// Server whose descriptor was rejected
    pub rejected: String,
}

/// Name to descriptor mapping, in registration order
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from per-server discovery results
    ///
    /// Failed servers contribute nothing; the failure is logged.
    pub fn from_discovery<I>(results: I) -> Self
    where
        I: IntoIterator<Item = (String, Result<Vec<ToolDescriptor>, DiscoveryError>)>,
    {
        let mut registry = Self::new();
        for (server, result) in results {
            match result {
                Ok(tools) => {
                    registry.register(&server, tools);
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "Discovery failed, server contributes no tools");
                }
            }
        }
        registry
    }

    /// Register a server's tools, returning the names that were rejected
    pub fn register(&mut self, server: &str, tools: Vec<ToolDescriptor>) -> Vec<Collision> {
        let mut collisions = Vec::new();

        for descriptor in tools {
            if let Some(&existing) = self.index.get(&descriptor.name) {
                let collision = Collision {
                    tool: descriptor.name,
                    kept: self.tools[existing].server.clone(),
                    rejected: server.to_string(),
                };
                warn!(
                    tool = %collision.tool,
                    kept = %collision.kept,
                    rejected = %collision.rejected,
                    "Duplicate tool name rejected"
                );
                collisions.push(collision);
                continue;
            }

            info!(server = %server, tool = %descriptor.name, "Registered tool");
            self.index.insert(descriptor.name.clone(), self.tools.len());
            self.tools.push(RegisteredTool {
                descriptor,
                server: server.to_string(),
            });
        }

        collisions
    }

    /// Remove every tool owned by `server`, returning how many were removed
    pub fn remove_server(&mut self, server: &str) -> usize {
        let before = self.tools.len();
        self.tools.retain(|tool| tool.server != server);
        let removed = before - self.tools.len();

        if removed > 0 {
            self.index = self
                .tools
                .iter()
                .enumerate()
                .map(|(i, tool)| (tool.descriptor.name.clone(), i))
                .collect();
            info!(server = %server, removed, "Removed tools of disconnected server");
        }
        removed
    }

    pub fn lookup(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// All descriptors, in registration order
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.descriptor.name.clone()).collect()
    }

    /// Names of servers that own at least one tool
    pub fn servers(&self) -> Vec<String> {
        let mut servers: Vec<String> = Vec::new();
        for tool in &self.tools {
            if !servers.contains(&tool.server) {
                servers.push(tool.server.clone());
            }
        }
        servers
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
