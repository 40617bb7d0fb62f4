//! Dispatcher - routes tool calls to the worker that owns the tool

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::agent::ToolInvoker;
use crate::connection::{Connection, RequestError};
use crate::error::{DispatchError, InvokeError};
use crate::protocol::{Frame, ToolDescriptor};
use crate::registry::ToolRegistry;

/// Routes invocations through the registry to per-server connections
pub struct Dispatcher {
    registry: RwLock<ToolRegistry>,
    connections: HashMap<String, Arc<Connection>>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: ToolRegistry,
        connections: impl IntoIterator<Item = (String, Arc<Connection>)>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            registry: RwLock::new(registry),
            connections: connections.into_iter().collect(),
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Drop the tools of every server whose channel has closed
    ///
    /// Returns the names of the servers that were pruned.
    pub fn prune_disconnected(&self) -> Vec<String> {
        let closed: Vec<String> = {
            let registry = self.registry.read();
            registry
                .servers()
                .into_iter()
                .filter(|server| {
                    self.connections
                        .get(server)
                        .map_or(true, |conn| conn.is_closed())
                })
                .collect()
        };

        if !closed.is_empty() {
            let mut registry = self.registry.write();
            for server in &closed {
                warn!(server = %server, "Worker disconnected, removing its tools");
                registry.remove_server(server);
            }
        }
        closed
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.read().names()
    }

    /// Invoke `tool` on its owning worker, waiting at most `timeout`
    #[instrument(skip(self, arguments))]
    pub async fn call(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<String, DispatchError> {
        let server = self
            .registry
            .read()
            .lookup(tool)
            .map(|entry| entry.server.clone())
            .ok_or_else(|| DispatchError::ToolNotFound(tool.to_string()))?;

        let connection = self
            .connections
            .get(&server)
            .ok_or_else(|| DispatchError::Disconnected { server: server.clone() })?;

        debug!(server = %server, "Dispatching tool call");
        let name = tool.to_string();
        let reply = connection
            .request(
                move |id| Frame::CallRequest {
                    id,
                    tool: name,
                    arguments,
                },
                timeout,
            )
            .await;

        match reply {
            Ok(Frame::CallResponse { content, .. }) => {
                info!(server = %server, "Tool call completed");
                Ok(content)
            }
            Ok(Frame::CallError { message, .. }) => Err(DispatchError::ToolFailed {
                tool: tool.to_string(),
                message,
            }),
            Ok(other) => Err(DispatchError::ToolFailed {
                tool: tool.to_string(),
                message: format!("unexpected {} reply", other.kind()),
            }),
            Err(RequestError::Timeout(timeout)) => {
                warn!(server = %server, "Tool call timed out, result will be discarded");
                Err(DispatchError::Timeout {
                    tool: tool.to_string(),
                    timeout,
                })
            }
            Err(RequestError::Closed) => {
                self.prune_disconnected();
                Err(DispatchError::Disconnected { server })
            }
            Err(RequestError::Malformed(reason)) => Err(DispatchError::ToolFailed {
                tool: tool.to_string(),
                message: format!("malformed reply: {reason}"),
            }),
            Err(RequestError::Transport(e)) => Err(DispatchError::Transport(e)),
        }
    }
}

#[async_trait]
impl ToolInvoker for Dispatcher {
    fn tools(&self) -> Vec<ToolDescriptor> {
        self.prune_disconnected();
        self.registry.read().descriptors()
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, InvokeError> {
        Ok(self.call(name, arguments, self.call_timeout).await?)
    }
}
