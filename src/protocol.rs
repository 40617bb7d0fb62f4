//! Wire protocol shared by the orchestrator and its workers
//!
//! Every frame is a JSON object tagged by `kind` and carries the correlation
//! id of the request it belongs to.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Correlation id, allocated by the requesting side of a connection
pub type CallId = u64;

/// JSON type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
}

impl ParamType {
    /// JSON-Schema type name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }
}

/// A single named, typed tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl ParamSpec {
    /// Required parameter
    pub fn required(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: true,
        }
    }
}

/// Advertised description of a callable tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParamSpec>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a parameter
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    /// Render the parameter list as a JSON-Schema object
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({
                    "type": param.kind.as_str(),
                    "description": param.description,
                }),
            );
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A framed protocol message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    DiscoveryRequest {
        id: CallId,
    },
    DiscoveryResponse {
        id: CallId,
        tools: Vec<ToolDescriptor>,
    },
    CallRequest {
        id: CallId,
        tool: String,
        #[serde(default)]
        arguments: Value,
    },
    CallResponse {
        id: CallId,
        content: String,
    },
    CallError {
        id: CallId,
        message: String,
    },
}

impl Frame {
    /// Correlation id of this frame
    pub fn id(&self) -> CallId {
        match self {
            Self::DiscoveryRequest { id }
            | Self::DiscoveryResponse { id, .. }
            | Self::CallRequest { id, .. }
            | Self::CallResponse { id, .. }
            | Self::CallError { id, .. } => *id,
        }
    }

    /// Wire name of the frame kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DiscoveryRequest { .. } => "discovery_request",
            Self::DiscoveryResponse { .. } => "discovery_response",
            Self::CallRequest { .. } => "call_request",
            Self::CallResponse { .. } => "call_response",
            Self::CallError { .. } => "call_error",
        }
    }

    /// Whether this frame answers a request rather than making one
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryResponse { .. } | Self::CallResponse { .. } | Self::CallError { .. }
        )
    }
}

/// How the orchestrator talks to a server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Framed messages over the child's stdin/stdout
    #[default]
    Stdio,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
        }
    }
}

/// Launch description of one worker server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique server name
    pub name: String,
    /// Executable to run
    pub command: String,
    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub transport: TransportKind,
}

impl ServerDescriptor {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            transport: TransportKind::Stdio,
        }
    }

    /// Command line for log output
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
