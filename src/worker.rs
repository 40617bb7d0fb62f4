//! Worker agent - the leaf tier
//!
//! A worker runs its own agent loop over a fixed local toolset and exposes
//! the loop's final answer as a single tool. It speaks the frame protocol on
//! any pair of async streams: its own stdin/stdout when launched as a
//! process, an in-memory pipe in tests.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::agent::Agent;
use crate::channel::{FrameReceiver, FrameSender};
use crate::codec::Inbound;
use crate::config::Config;
use crate::error::{ToolError, TransportError};
use crate::oracle::ReasoningOracle;
use crate::protocol::{CallId, Frame, ParamSpec, ParamType, ToolDescriptor};
use crate::tools::LocalToolset;

/// The built-in worker specialities
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerKind {
    /// Arithmetic over `add` and `multiply`
    Math,
    /// String handling over `reverse_string` and `count_words`
    Text,
}

impl WorkerKind {
    /// Name of the single tool this worker exposes
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Math => "solve_math_problem",
            Self::Text => "process_text_request",
        }
    }

    fn input_param(&self) -> &'static str {
        match self {
            Self::Math => "problem",
            Self::Text => "request",
        }
    }

    /// Descriptor advertised during discovery
    pub fn exposed_tool(&self) -> ToolDescriptor {
        match self {
            Self::Math => ToolDescriptor::new(
                self.tool_name(),
                "Solves a given mathematical problem described in natural language, \
                 using addition and multiplication.",
            )
            .param(ParamSpec::required(
                self.input_param(),
                ParamType::String,
                "The mathematical problem to solve, e.g. 'What is 5 plus 7?'",
            )),
            Self::Text => ToolDescriptor::new(
                self.tool_name(),
                "Processes a given text request described in natural language, \
                 such as reversing a string or counting its words.",
            )
            .param(ParamSpec::required(
                self.input_param(),
                ParamType::String,
                "The text request, e.g. 'Reverse the string hello'",
            )),
        }
    }

    pub fn toolset(&self) -> LocalToolset {
        match self {
            Self::Math => LocalToolset::math(),
            Self::Text => LocalToolset::text(),
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            Self::Math => {
                "You are a Math Agent. Solve the user's arithmetic problem using only the \
                 add and multiply tools, one operation per call. Reply with the numeric \
                 result and nothing else."
            }
            Self::Text => {
                "You are a Text Agent. Handle the user's request using only the \
                 reverse_string and count_words tools. Reply with the tool's result and \
                 nothing else."
            }
        }
    }

    /// Answer prefix used when the inner loop fails
    fn failure_prefix(&self) -> &'static str {
        match self {
            Self::Math => "Math Agent could not solve the problem:",
            Self::Text => "Text Agent could not process the request:",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Math => write!(f, "math"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// Serves one worker kind over the frame protocol
pub struct WorkerServer {
    kind: WorkerKind,
    agent: Arc<Agent>,
}

impl WorkerServer {
    pub fn new(kind: WorkerKind, oracle: Arc<dyn ReasoningOracle>, config: &Config) -> Self {
        let agent = Agent::new(
            format!("{kind}-agent"),
            oracle,
            Arc::new(kind.toolset()),
            config.agent.max_iterations,
        )
        .with_system_prompt(kind.system_prompt());

        Self {
            kind,
            agent: Arc::new(agent),
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Serve requests until the peer closes its end
    ///
    /// Calls run concurrently; on end of input the server waits for calls
    /// already in flight before returning.
    #[instrument(skip_all, fields(worker = %self.kind))]
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut receiver = FrameReceiver::new(reader);
        let sender = Arc::new(Mutex::new(FrameSender::new(writer)));
        let mut calls = JoinSet::new();
        info!("Worker ready");

        loop {
            let inbound = match receiver.receive().await {
                Ok(Some(inbound)) => inbound,
                Ok(None) => break,
                Err(e) => return Err(e),
            };
            while calls.try_join_next().is_some() {}

            match inbound {
                Inbound::Frame(Frame::DiscoveryRequest { id }) => {
                    debug!(call_id = id, "Discovery request");
                    let reply = Frame::DiscoveryResponse {
                        id,
                        tools: vec![self.kind.exposed_tool()],
                    };
                    sender.lock().await.send(reply).await?;
                }
                Inbound::Frame(Frame::CallRequest { id, tool, arguments }) => {
                    let kind = self.kind;
                    let agent = Arc::clone(&self.agent);
                    let sender = Arc::clone(&sender);
                    calls.spawn(async move {
                        let reply = handle_call(kind, &agent, id, &tool, &arguments).await;
                        let mut sender = sender.lock().await;
                        if let Err(e) = sender.send(reply).await {
                            warn!(call_id = id, error = %e, "Failed to send reply");
                            let fallback = Frame::CallError {
                                id,
                                message: format!("reply could not be sent: {e}"),
                            };
                            if let Err(e) = sender.send(fallback).await {
                                warn!(call_id = id, error = %e, "Failed to send call error");
                            }
                        }
                    });
                }
                Inbound::Frame(other) => {
                    warn!(kind = other.kind(), call_id = other.id(), "Ignoring unexpected frame");
                }
                Inbound::Malformed { id: Some(id), reason } => {
                    warn!(call_id = id, reason = %reason, "Malformed request");
                    let reply = Frame::CallError {
                        id,
                        message: format!("malformed request: {reason}"),
                    };
                    sender.lock().await.send(reply).await?;
                }
                Inbound::Malformed { id: None, reason } => {
                    warn!(reason = %reason, "Skipping unreadable line");
                }
            }
        }

        info!(in_flight = calls.len(), "Input closed");
        while calls.join_next().await.is_some() {}
        Ok(())
    }
}

async fn handle_call(kind: WorkerKind, agent: &Agent, id: CallId, tool: &str, arguments: &Value) -> Frame {
    let input = match call_input(kind, tool, arguments) {
        Ok(input) => input,
        Err(e) => {
            warn!(call_id = id, tool = %tool, error = %e, "Rejecting call");
            return Frame::CallError {
                id,
                message: e.to_string(),
            };
        }
    };

    info!(call_id = id, tool = %tool, "Handling call");
    let content = match agent.run(input).await {
        Ok(outcome) => {
            debug!(call_id = id, status = %outcome.status, tool_calls = outcome.tool_calls, "Inner loop finished");
            outcome.answer
        }
        Err(e) => {
            warn!(call_id = id, error = %e, "Inner loop failed");
            format!("{} {e}", kind.failure_prefix())
        }
    };
    Frame::CallResponse { id, content }
}

fn call_input<'a>(kind: WorkerKind, tool: &str, arguments: &'a Value) -> Result<&'a str, ToolError> {
    if tool != kind.tool_name() {
        return Err(ToolError::Unknown(tool.to_string()));
    }
    let param = kind.input_param();
    arguments
        .get(param)
        .ok_or_else(|| ToolError::MissingArgument(param.to_string()))?
        .as_str()
        .ok_or_else(|| ToolError::InvalidArgument {
            name: param.to_string(),
            expected: "string",
        })
}
