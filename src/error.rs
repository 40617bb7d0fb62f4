//! Conclave error types
//!
//! Each boundary has its own error enum so callers can branch on the kind of
//! failure instead of parsing text. Only [`ConclaveError`] aborts a session.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that abort an orchestration session
#[derive(Debug, Error)]
pub enum ConclaveError {
    /// Configuration could not be built
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Every configured server failed to launch or connect
    #[error("No servers connected ({failed} failed)")]
    NoServers { failed: usize },

    /// Servers connected but none advertised a tool
    #[error("No tools loaded from any server")]
    NoTools,

    /// Reasoning oracle failure
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// I/O error on the console or process table
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors, fatal before any process is spawned
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required credential is not set
    #[error("{0} environment variable not set")]
    MissingCredential(&'static str),

    /// Config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Config is structurally valid but unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Worker process launch failures, reported per server
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The executable could not be started
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The child came up without the piped stream we asked for
    #[error("Worker process has no {0} pipe")]
    MissingPipe(&'static str),
}

/// Framing and channel errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame exceeded the maximum line length
    #[error("Frame exceeds {max} bytes")]
    FrameTooLong { max: usize },

    /// A line was not a valid frame
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The peer closed the channel
    #[error("Channel closed")]
    Closed,
}

/// Capability discovery failures; the server then contributes no tools
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No discovery response within the deadline
    #[error("Discovery timed out after {0:?}")]
    Timeout(Duration),

    /// Transport failed during the handshake
    #[error("Discovery transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The worker answered with something other than a tool list
    #[error("Unexpected discovery reply: {0}")]
    UnexpectedReply(String),
}

/// Tool invocation failures, surfaced to the agent loop as tool-result turns
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No server advertises the tool
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// The call did not complete within its timeout
    #[error("Tool call `{tool}` timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    /// The worker's channel closed mid-call
    #[error("Worker `{server}` disconnected")]
    Disconnected { server: String },

    /// The worker reported a failure
    #[error("Tool `{tool}` failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// The request could not be written
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failures raised by in-process leaf tools
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool name not present in the local table
    #[error("Unknown tool: {0}")]
    Unknown(String),

    /// A required argument is absent
    #[error("Missing argument `{0}`")]
    MissingArgument(String),

    /// An argument has the wrong JSON type
    #[error("Argument `{name}` must be a {expected}")]
    InvalidArgument { name: String, expected: &'static str },
}

/// Reasoning oracle failures
#[derive(Debug, Error)]
pub enum OracleError {
    /// HTTP request failed
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the API
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The response could not be interpreted as a decision
    #[error("Unusable oracle response: {0}")]
    InvalidResponse(String),
}

/// Failure of one tool invocation, at either tier
#[derive(Debug, Error)]
pub enum InvokeError {
    /// Remote dispatch failure
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Local tool failure
    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl InvokeError {
    /// Short machine-readable kind for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Dispatch(DispatchError::ToolNotFound(_)) | Self::Tool(ToolError::Unknown(_)) => "tool_not_found",
            Self::Dispatch(DispatchError::Timeout { .. }) => "tool_call_timeout",
            Self::Dispatch(DispatchError::Disconnected { .. }) => "transport_disconnect",
            Self::Dispatch(DispatchError::ToolFailed { .. }) => "tool_call_error",
            Self::Dispatch(DispatchError::Transport(_)) => "transport_error",
            Self::Tool(_) => "invalid_arguments",
        }
    }
}
