//! Agent loop - the reason-act cycle shared by the orchestrator and workers
//!
//! The loop asks a [`ReasoningOracle`] what to do next, runs the requested
//! tool through a [`ToolInvoker`], records the result and asks again, until
//! the oracle answers or the iteration cap is hit. The orchestrator injects
//! the remote [`Dispatcher`](crate::dispatcher::Dispatcher) as its invoker;
//! workers inject a [`LocalToolset`](crate::tools::LocalToolset).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::conversation::{Conversation, ToolCall, Turn};
use crate::error::{InvokeError, OracleError};
use crate::oracle::{Decision, ReasoningOracle};
use crate::protocol::ToolDescriptor;

/// Capability-invocation interface shared by both tiers
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Tools currently available
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Invoke a tool by name
    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, InvokeError>;
}

/// State of the loop
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingDecision,
    ExecutingTool(ToolCall),
    Done,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    /// The oracle produced a final answer
    Completed,
    /// The iteration cap was hit; the answer is best-effort
    LoopLimitExceeded,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::LoopLimitExceeded => write!(f, "loop limit exceeded"),
        }
    }
}

/// Result of one run of the loop
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub answer: String,
    pub status: OutcomeStatus,
    /// Tool calls executed
    pub tool_calls: usize,
    /// Oracle queries made
    pub oracle_queries: usize,
    pub conversation: Conversation,
}

impl AgentOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// An agent: an oracle, a way to invoke tools, and an iteration cap
pub struct Agent {
    name: String,
    oracle: Arc<dyn ReasoningOracle>,
    invoker: Arc<dyn ToolInvoker>,
    system_prompt: Option<String>,
    max_iterations: usize,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        oracle: Arc<dyn ReasoningOracle>,
        invoker: Arc<dyn ToolInvoker>,
        max_iterations: usize,
    ) -> Self {
        let name = name.into();
        debug!(agent = %name, max_iterations, "Creating agent");
        Self {
            name,
            oracle,
            invoker,
            system_prompt: None,
            max_iterations,
        }
    }

    /// Seed every conversation with a system turn
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Run the loop for one request
    ///
    /// Tool failures never end the run; they are recorded as error results
    /// for the oracle to react to. Only an oracle failure is returned as an
    /// error.
    #[instrument(skip(self, request), fields(agent = %self.name))]
    pub async fn run(&self, request: &str) -> Result<AgentOutcome, OracleError> {
        let mut conversation = Conversation::new();
        if let Some(prompt) = &self.system_prompt {
            conversation.push(Turn::system(prompt.clone()));
        }
        conversation.push(Turn::user(request));
        info!(request_id = %conversation.id(), "Agent processing request");

        let mut state = LoopState::AwaitingDecision;
        let mut tool_calls = 0usize;
        let mut oracle_queries = 0usize;

        loop {
            state = match state {
                LoopState::AwaitingDecision => {
                    let tools = self.invoker.tools();
                    oracle_queries += 1;
                    match self.oracle.decide(&conversation, &tools).await? {
                        Decision::FinalAnswer(answer) => {
                            conversation.push(Turn::assistant(answer));
                            LoopState::Done
                        }
                        Decision::ToolCall { name, arguments } => {
                            if tool_calls >= self.max_iterations {
                                warn!(
                                    request_id = %conversation.id(),
                                    max_iterations = self.max_iterations,
                                    "Iteration cap reached without a final answer"
                                );
                                let answer = self.partial_answer(&conversation);
                                return Ok(AgentOutcome {
                                    answer,
                                    status: OutcomeStatus::LoopLimitExceeded,
                                    tool_calls,
                                    oracle_queries,
                                    conversation,
                                });
                            }
                            tool_calls += 1;
                            let call = ToolCall {
                                id: format!("call_{tool_calls}"),
                                name,
                                arguments,
                            };
                            conversation.push(Turn::tool_call(call.clone()));
                            LoopState::ExecutingTool(call)
                        }
                    }
                }
                LoopState::ExecutingTool(call) => {
                    debug!(request_id = %conversation.id(), tool = %call.name, "Executing tool");
                    match self.invoker.invoke(&call.name, call.arguments.clone()).await {
                        Ok(content) => {
                            conversation.push(Turn::tool_result(&call.id, content, false));
                        }
                        Err(e) => {
                            warn!(
                                request_id = %conversation.id(),
                                tool = %call.name,
                                kind = e.kind(),
                                error = %e,
                                "Tool call failed"
                            );
                            conversation.push(Turn::tool_result(&call.id, format!("Error: {e}"), true));
                        }
                    }
                    LoopState::AwaitingDecision
                }
                LoopState::Done => break,
            };
        }

        let answer = conversation
            .last()
            .map(|turn| turn.content.clone())
            .unwrap_or_default();
        info!(request_id = %conversation.id(), tool_calls, "Agent finished");

        Ok(AgentOutcome {
            answer,
            status: OutcomeStatus::Completed,
            tool_calls,
            oracle_queries,
            conversation,
        })
    }

    fn partial_answer(&self, conversation: &Conversation) -> String {
        let mut answer = format!(
            "Stopped after {} tool calls without reaching a final answer.",
            self.max_iterations
        );
        if let Some(last) = conversation.last_tool_result() {
            answer.push_str(" Last tool result: ");
            answer.push_str(&last.content);
        }
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::error::{DispatchError, ToolError};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Oracle that replays a fixed script, then repeats its last decision
    struct ScriptedOracle {
        script: Mutex<VecDeque<Decision>>,
        last: Mutex<Option<Decision>>,
        queries: Mutex<usize>,
        seen_tools: Mutex<Vec<usize>>,
    }

    impl ScriptedOracle {
        fn new(script: Vec<Decision>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                queries: Mutex::new(0),
                seen_tools: Mutex::new(Vec::new()),
            })
        }

        fn queries(&self) -> usize {
            *self.queries.lock()
        }
    }

    #[async_trait]
    impl ReasoningOracle for ScriptedOracle {
        async fn decide(
            &self,
            _conversation: &Conversation,
            tools: &[ToolDescriptor],
        ) -> Result<Decision, OracleError> {
            *self.queries.lock() += 1;
            self.seen_tools.lock().push(tools.len());
            let next = self.script.lock().pop_front();
            let decision = match next {
                Some(decision) => decision,
                None => self
                    .last
                    .lock()
                    .clone()
                    .ok_or_else(|| OracleError::InvalidResponse("script exhausted".into()))?,
            };
            *self.last.lock() = Some(decision.clone());
            Ok(decision)
        }
    }

    /// Invoker with one `echo` tool; anything else is not found
    struct EchoInvoker {
        calls: Mutex<Vec<String>>,
    }

    impl EchoInvoker {
        fn new() -> Arc<Self> {
            Arc::new(Self { calls: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ToolInvoker for EchoInvoker {
        fn tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor::new("echo", "Echo text")]
        }

        async fn invoke(&self, name: &str, arguments: Value) -> Result<String, InvokeError> {
            self.calls.lock().push(name.to_string());
            match name {
                "echo" => Ok(arguments["text"].as_str().unwrap_or_default().to_string()),
                "slow" => Err(DispatchError::Timeout {
                    tool: name.into(),
                    timeout: Duration::from_millis(10),
                }
                .into()),
                other => Err(ToolError::Unknown(other.into()).into()),
            }
        }
    }

    fn echo_call(text: &str) -> Decision {
        Decision::ToolCall {
            name: "echo".into(),
            arguments: json!({ "text": text }),
        }
    }

    // === Completion Tests ===

    #[tokio::test]
    async fn test_direct_answer() {
        let oracle = ScriptedOracle::new(vec![Decision::FinalAnswer("hello".into())]);
        let agent = Agent::new("test", oracle.clone(), EchoInvoker::new(), 4);

        let outcome = agent.run("hi").await.unwrap();
        assert_eq!(outcome.answer, "hello");
        assert!(outcome.is_complete());
        assert_eq!(outcome.tool_calls, 0);
        assert_eq!(oracle.queries(), 1);
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let oracle = ScriptedOracle::new(vec![echo_call("cba"), Decision::FinalAnswer("cba".into())]);
        let invoker = EchoInvoker::new();
        let agent = Agent::new("test", oracle.clone(), invoker.clone(), 4)
            .with_system_prompt("You echo.");

        let outcome = agent.run("reverse abc").await.unwrap();
        assert_eq!(outcome.answer, "cba");
        assert_eq!(outcome.tool_calls, 1);
        assert_eq!(*invoker.calls.lock(), vec!["echo"]);

        let roles: Vec<Role> = outcome.conversation.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        let result = &outcome.conversation.turns()[3];
        assert_eq!(result.content, "cba");
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(*oracle.seen_tools.lock(), vec![1, 1]);
    }

    // === Error Surfacing Tests ===

    #[tokio::test]
    async fn test_tool_errors_become_turns() {
        let oracle = ScriptedOracle::new(vec![
            Decision::ToolCall { name: "sort".into(), arguments: json!({}) },
            Decision::ToolCall { name: "slow".into(), arguments: json!({}) },
            Decision::FinalAnswer("I cannot do that.".into()),
        ]);
        let agent = Agent::new("test", oracle, EchoInvoker::new(), 4);

        let outcome = agent.run("sort 3 1 2").await.unwrap();
        assert!(outcome.is_complete());
        assert_eq!(outcome.answer, "I cannot do that.");

        let errors: Vec<&Turn> = outcome
            .conversation
            .turns()
            .iter()
            .filter(|t| t.role == Role::Tool)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|t| t.is_error));
        assert!(errors[0].content.contains("Unknown tool"));
        assert!(errors[1].content.contains("timed out"));
    }

    #[tokio::test]
    async fn test_oracle_error_propagates() {
        let oracle = ScriptedOracle::new(vec![]);
        let agent = Agent::new("test", oracle, EchoInvoker::new(), 4);

        let err = agent.run("anything").await.unwrap_err();
        assert!(matches!(err, OracleError::InvalidResponse(_)));
    }

    // === Iteration Cap Tests ===

    #[tokio::test]
    async fn test_loop_limit_bounds_oracle_queries() {
        for max in [0usize, 1, 3, 7] {
            let oracle = ScriptedOracle::new(vec![echo_call("again")]);
            let invoker = EchoInvoker::new();
            let agent = Agent::new("test", oracle.clone(), invoker.clone(), max);

            let outcome = agent.run("loop forever").await.unwrap();
            assert_eq!(outcome.status, OutcomeStatus::LoopLimitExceeded);
            assert_eq!(outcome.tool_calls, max);
            assert_eq!(invoker.calls.lock().len(), max);
            assert_eq!(oracle.queries(), max + 1);
            assert_eq!(outcome.oracle_queries, max + 1);
        }
    }

    #[tokio::test]
    async fn test_loop_limit_partial_answer() {
        let oracle = ScriptedOracle::new(vec![echo_call("partial")]);
        let agent = Agent::new("test", oracle, EchoInvoker::new(), 2);

        let outcome = agent.run("go").await.unwrap();
        assert!(!outcome.is_complete());
        assert!(outcome.answer.contains("Stopped after 2 tool calls"));
        assert!(outcome.answer.ends_with("partial"));
    }
}
