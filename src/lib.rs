//! # Conclave
//!
//! Two-tier agent dispatch: an orchestrator discovers the tools exposed by a
//! set of worker processes and drives a bounded reason-act loop over them.
//! Each worker runs the same loop over its own in-process tools and exposes
//! the result as a single tool.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            ORCHESTRATOR                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐               │
//! │  │  Agent Loop  │──│  Dispatcher  │──│ Tool Registry│               │
//! │  └──────┬───────┘  └──────┬───────┘  └──────────────┘               │
//! │         │ Oracle          │ Connections (stdio frames)              │
//! └─────────┼─────────────────┼─────────────────────────────────────────┘
//!           │          ┌──────┴──────────────┐
//!           ▼          ▼                     ▼
//!     ┌──────────┐  ┌─────────────┐     ┌─────────────┐
//!     │ Reasoning│  │ Math Worker │     │ Text Worker │
//!     │  Oracle  │  │ Agent Loop  │     │ Agent Loop  │
//!     └──────────┘  └──┬───────┬──┘     └──┬───────┬──┘
//!                      ▼       ▼           ▼       ▼
//!                    add   multiply   reverse   count
//! ```
//!
//! ## Key Concepts
//!
//! - **Frame**: one newline-delimited JSON message with a correlation id
//! - **Connection**: request/response correlation over one worker's channel
//! - **Registry**: the union of every worker's tools, first server wins
//! - **Agent**: oracle + tool invoker + iteration cap

pub mod agent;
pub mod channel;
pub mod codec;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod oracle;
pub mod orchestrator;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod tools;
pub mod worker;

pub use agent::{Agent, AgentOutcome, OutcomeStatus, ToolInvoker};
pub use channel::{memory_pair, TransportChannel};
pub use config::{Config, OracleKind};
pub use connection::Connection;
pub use dispatcher::Dispatcher;
pub use error::{ConclaveError, ConfigError, DispatchError, OracleError};
pub use oracle::{Decision, ReasoningOracle};
pub use orchestrator::{run_console, Orchestrator};
pub use process::{ProcessManager, ShutdownReport};
pub use protocol::{CallId, Frame, ServerDescriptor, ToolDescriptor};
pub use registry::ToolRegistry;
pub use worker::{WorkerKind, WorkerServer};
