//! Reasoning oracle boundary
//!
//! Given the conversation so far and the tools on offer, an oracle picks the
//! next action: call a tool or give the final answer. Anything implementing
//! [`ReasoningOracle`] can drive an [`Agent`](crate::agent::Agent).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{OracleKind, OracleSettings};
use crate::conversation::Conversation;
use crate::error::{ConfigError, OracleError};
use crate::protocol::ToolDescriptor;

mod heuristic;
mod openai;

pub use heuristic::HeuristicOracle;
pub use openai::OpenAiOracle;

/// The oracle's choice for the next step
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    ToolCall { name: String, arguments: Value },
    FinalAnswer(String),
}

#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn decide(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
    ) -> Result<Decision, OracleError>;
}

/// Build the oracle described by the settings
pub fn build(settings: &OracleSettings) -> Result<Arc<dyn ReasoningOracle>, ConfigError> {
    match settings.kind {
        OracleKind::OpenAi => Ok(Arc::new(OpenAiOracle::new(settings)?)),
        OracleKind::Heuristic => Ok(Arc::new(HeuristicOracle::new())),
    }
}
