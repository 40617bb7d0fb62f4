//! Orchestrator - the top tier
//!
//! Startup launches every configured worker, runs discovery against all of
//! them concurrently and builds the registry before the first request is
//! served. Requests then run through the top-level agent loop with the
//! dispatcher as its invoker.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, instrument, warn};

use crate::agent::{Agent, AgentOutcome, OutcomeStatus, ToolInvoker};
use crate::config::Config;
use crate::discovery::discover_all;
use crate::dispatcher::Dispatcher;
use crate::error::{ConclaveError, OracleError};
use crate::oracle::ReasoningOracle;
use crate::process::{ProcessManager, ShutdownReport};
use crate::registry::ToolRegistry;

pub const SYSTEM_PROMPT: &str = "You are an orchestrator agent. You do not solve problems yourself. \
     Delegate each request to the specialist tool best suited to it, passing the user's request \
     through in natural language, and report the tool's result back to the user. If no tool can \
     handle the request, say that it cannot be fulfilled.";

/// The top-level session: worker processes, dispatcher and agent loop
pub struct Orchestrator {
    processes: ProcessManager,
    dispatcher: Arc<Dispatcher>,
    agent: Agent,
}

impl Orchestrator {
    /// Launch workers, discover their tools and build the top-level agent
    ///
    /// Fails with [`ConclaveError::NoServers`] when nothing could be launched
    /// and [`ConclaveError::NoTools`] when nothing was discovered; any worker
    /// already started is shut down first.
    #[instrument(skip_all, fields(servers = config.servers.len()))]
    pub async fn start(config: &Config, oracle: Arc<dyn ReasoningOracle>) -> Result<Self, ConclaveError> {
        let mut processes = ProcessManager::new(config.agent.shutdown_drain());
        let report = processes.connect_all(&config.servers);
        if report.connected.is_empty() {
            processes.shutdown().await;
            return Err(ConclaveError::NoServers {
                failed: report.failures.len(),
            });
        }

        let discovered = discover_all(&report.connected, config.agent.discovery_timeout()).await;
        let registry = ToolRegistry::from_discovery(discovered);
        if registry.is_empty() {
            error!("No tools loaded from any server");
            processes.shutdown().await;
            return Err(ConclaveError::NoTools);
        }
        info!(tools = ?registry.names(), "Tools loaded");

        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            report.connected,
            config.agent.call_timeout(),
        ));
        let invoker: Arc<dyn ToolInvoker> = dispatcher.clone();
        let agent = Agent::new("orchestrator", oracle, invoker, config.agent.max_iterations)
            .with_system_prompt(SYSTEM_PROMPT);

        Ok(Self {
            processes,
            dispatcher,
            agent,
        })
    }

    /// Run one user request to completion
    pub async fn handle_request(&self, request: &str) -> Result<AgentOutcome, OracleError> {
        self.agent.run(request).await
    }

    /// Tools currently routable
    pub fn tool_names(&self) -> Vec<String> {
        self.dispatcher.prune_disconnected();
        self.dispatcher.tool_names()
    }

    /// Worker processes still running
    pub fn live_workers(&mut self) -> usize {
        self.processes.live_count()
    }

    /// Process ids of every worker launched at startup
    pub fn worker_pids(&self) -> Vec<u32> {
        self.processes.workers().iter().filter_map(|w| w.pid).collect()
    }

    /// Stop every worker; safe to call more than once
    pub async fn shutdown(&mut self) -> ShutdownReport {
        self.processes.shutdown().await
    }
}

/// Interactive request loop
///
/// Reads one request per line until `quit` (any case) or end of input.
/// Blank lines are ignored. An oracle failure is reported and the loop
/// carries on with the next request.
pub async fn run_console<I, O>(orchestrator: &Orchestrator, input: I, mut output: O) -> Result<(), ConclaveError>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(b"You: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            info!("Input closed");
            break;
        };
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        if request.eq_ignore_ascii_case("quit") {
            break;
        }

        let reply = match orchestrator.handle_request(request).await {
            Ok(outcome) => {
                if outcome.status == OutcomeStatus::LoopLimitExceeded {
                    warn!(tool_calls = outcome.tool_calls, "Request hit the iteration limit");
                }
                outcome.answer
            }
            Err(e) => {
                error!(error = %e, "Request failed");
                format!("An error occurred: {e}")
            }
        };
        output.write_all(format!("Orchestrator: {reply}\n").as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}
