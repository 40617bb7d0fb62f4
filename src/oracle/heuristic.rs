//! Deterministic keyword oracle
//!
//! Understands four kinds of request: adding or multiplying two numbers,
//! reversing text and counting words. When a tool with the matching local
//! name is on offer (worker tier) it calls it with parsed arguments;
//! otherwise it forwards the whole request to the tool whose description
//! names the right domain (orchestrator tier). Once a tool result is in, it
//! answers with it.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{Decision, ReasoningOracle};
use crate::conversation::{Conversation, Role};
use crate::error::OracleError;
use crate::protocol::{ParamType, ToolDescriptor};

/// Answer given when no tool fits the request
pub const CANNOT_FULFIL: &str = "I'm sorry, I can't fulfil that request with the tools available.";

#[derive(Debug, Clone, PartialEq)]
enum Intent {
    Add(f64, f64),
    Multiply(f64, f64),
    Reverse(String),
    CountWords(String),
}

impl Intent {
    fn parse(request: &str) -> Option<Self> {
        let lower = request.to_lowercase();

        if lower.contains("reverse") {
            let text = quoted(request).or_else(|| text_after(request, "reverse"))?;
            return Some(Self::Reverse(text));
        }
        if lower.contains("how many words") || (lower.contains("count") && lower.contains("word")) {
            let text = quoted(request).or_else(|| text_after(request, " in "))?;
            return Some(Self::CountWords(text));
        }

        let numbers = numbers(request);
        let (a, b) = match numbers.as_slice() {
            [a, b, ..] => (*a, *b),
            _ => return None,
        };
        if ["multipl", "product", "times"].iter().any(|k| lower.contains(k)) {
            return Some(Self::Multiply(a, b));
        }
        if ["add", "sum", "plus", "+"].iter().any(|k| lower.contains(k)) {
            return Some(Self::Add(a, b));
        }
        None
    }

    /// Name of the local tool that implements this intent
    fn local_tool(&self) -> &'static str {
        match self {
            Self::Add(..) => "add",
            Self::Multiply(..) => "multiply",
            Self::Reverse(_) => "reverse_string",
            Self::CountWords(_) => "count_words",
        }
    }

    /// Word a remote tool's description must contain to handle this intent
    fn domain(&self) -> &'static str {
        match self {
            Self::Add(..) | Self::Multiply(..) => "math",
            Self::Reverse(_) | Self::CountWords(_) => "text",
        }
    }

    fn arguments(&self) -> Value {
        match self {
            Self::Add(a, b) | Self::Multiply(a, b) => json!({ "a": a, "b": b }),
            Self::Reverse(text) | Self::CountWords(text) => json!({ "text": text }),
        }
    }
}

/// First quoted span, ignoring apostrophes inside words
fn quoted(request: &str) -> Option<String> {
    let chars: Vec<char> = request.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let opens = (c == '\'' || c == '"') && (i == 0 || !chars[i - 1].is_alphanumeric());
        if opens {
            let close = (i + 1..chars.len()).find(|&j| {
                chars[j] == c && chars.get(j + 1).map_or(true, |next| !next.is_alphanumeric())
            });
            if let Some(j) = close {
                let inner: String = chars[i + 1..j].iter().collect();
                if !inner.is_empty() {
                    return Some(inner);
                }
            }
        }
        i += 1;
    }
    None
}

/// Text following `marker`, minus filler words and trailing punctuation
/// Text following the first case-insensitive match of an ASCII `marker`
fn text_after(request: &str, marker: &str) -> Option<String> {
    let (found, _) = request
        .char_indices()
        .find(|&(i, _)| starts_with_ignore_case(&request[i..], marker))?;
    let mut rest = request.get(found + marker.len()..)?.trim();
    for filler in ["the phrase ", "the string ", "the word ", "the text ", "the "] {
        if starts_with_ignore_case(rest, filler) {
            rest = rest.get(filler.len()..)?.trim_start();
            break;
        }
    }
    let rest = rest.trim_end_matches(|c: char| matches!(c, '?' | '!' | '.'));
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn numbers(request: &str) -> Vec<f64> {
    request
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_matches(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.')))
        .filter(|token| token.chars().any(|c| c.is_ascii_digit()))
        .filter_map(|token| token.trim_end_matches('.').parse().ok())
        .collect()
}

pub struct HeuristicOracle;

impl HeuristicOracle {
    pub fn new() -> Self {
        Self
    }

    fn route(request: &str, tools: &[ToolDescriptor]) -> Decision {
        let Some(intent) = Intent::parse(request) else {
            debug!("No recognised intent");
            return Decision::FinalAnswer(CANNOT_FULFIL.to_string());
        };

        if tools.iter().any(|t| t.name == intent.local_tool()) {
            return Decision::ToolCall {
                name: intent.local_tool().to_string(),
                arguments: intent.arguments(),
            };
        }

        let remote = tools
            .iter()
            .find(|t| t.description.to_lowercase().contains(intent.domain()));
        match remote {
            Some(tool) => {
                let param = tool
                    .parameters
                    .iter()
                    .find(|p| p.kind == ParamType::String)
                    .map_or("request", |p| p.name.as_str());
                Decision::ToolCall {
                    name: tool.name.clone(),
                    arguments: json!({ param: request }),
                }
            }
            None => {
                debug!(intent = ?intent, "No tool handles intent");
                Decision::FinalAnswer(CANNOT_FULFIL.to_string())
            }
        }
    }
}

impl Default for HeuristicOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReasoningOracle for HeuristicOracle {
    async fn decide(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
    ) -> Result<Decision, OracleError> {
        if let Some(last) = conversation.last().filter(|t| t.role == Role::Tool) {
            let answer = if last.is_error {
                format!("I couldn't complete that request. {}", last.content)
            } else {
                last.content.clone()
            };
            return Ok(Decision::FinalAnswer(answer));
        }

        let request = conversation
            .last_user()
            .map(|t| t.content.as_str())
            .unwrap_or_default();
        Ok(Self::route(request, tools))
    }
}
