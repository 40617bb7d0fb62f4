//! OpenAI chat-completions oracle with function tools

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{Decision, ReasoningOracle};
use crate::config::{OracleSettings, API_KEY_VAR};
use crate::conversation::{Conversation, Role, Turn};
use crate::error::{ConfigError, OracleError};
use crate::protocol::ToolDescriptor;

pub struct OpenAiOracle {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiOracle {
    pub fn new(settings: &OracleSettings) -> Result<Self, ConfigError> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or(ConfigError::MissingCredential(API_KEY_VAR))?;
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key,
            model: settings.model.clone(),
        })
    }

    fn message(turn: &Turn) -> Value {
        match (turn.role, &turn.tool_call) {
            (Role::Assistant, Some(call)) => json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    },
                }],
            }),
            (Role::Tool, _) => json!({
                "role": "tool",
                "tool_call_id": turn.tool_call_id,
                "content": turn.content,
            }),
            (role, _) => json!({
                "role": role,
                "content": turn.content,
            }),
        }
    }

    /// Request body for one decision
    pub fn request_body(&self, conversation: &Conversation, tools: &[ToolDescriptor]) -> Value {
        let messages: Vec<Value> = conversation.turns().iter().map(Self::message).collect();
        let mut body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": messages,
        });
        if !tools.is_empty() {
            let tools: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.input_schema(),
                        },
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }

    /// Interpret a chat-completions response body
    pub fn parse_decision(body: &Value) -> Result<Decision, OracleError> {
        let message = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| OracleError::InvalidResponse("missing choices[0].message".into()))?;

        if let Some(call) = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .and_then(|calls| calls.first())
        {
            let function = call
                .get("function")
                .ok_or_else(|| OracleError::InvalidResponse("tool call without function".into()))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| OracleError::InvalidResponse("tool call without name".into()))?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) if raw.trim().is_empty() => json!({}),
                Some(Value::String(raw)) => serde_json::from_str(raw).map_err(|e| {
                    OracleError::InvalidResponse(format!("tool arguments are not JSON: {e}"))
                })?,
                Some(other) => other.clone(),
                None => json!({}),
            };
            return Ok(Decision::ToolCall {
                name: name.to_string(),
                arguments,
            });
        }

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Decision::FinalAnswer(content))
    }
}

#[async_trait]
impl ReasoningOracle for OpenAiOracle {
    async fn decide(
        &self,
        conversation: &Conversation,
        tools: &[ToolDescriptor],
    ) -> Result<Decision, OracleError> {
        let body = self.request_body(conversation, tools);
        debug!(model = %self.model, turns = conversation.len(), tools = tools.len(), "Querying oracle");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await?;
        Self::parse_decision(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ToolCall;
    use crate::protocol::{ParamSpec, ParamType};

    fn oracle() -> OpenAiOracle {
        let settings = OracleSettings {
            api_key: Some("sk-test".into()),
            base_url: "http://localhost:9/v1/".into(),
            ..Default::default()
        };
        OpenAiOracle::new(&settings).unwrap()
    }

    #[test]
    fn test_requires_api_key() {
        let err = OpenAiOracle::new(&OracleSettings::default()).err().unwrap();
        assert!(matches!(err, ConfigError::MissingCredential(_)));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        assert_eq!(oracle().endpoint, "http://localhost:9/v1/chat/completions");
    }

    #[test]
    fn test_request_body_shape() {
        let mut conversation = Conversation::new();
        conversation.push(Turn::system("sys"));
        conversation.push(Turn::user("add 2 and 3"));
        conversation.push(Turn::tool_call(ToolCall {
            id: "call_1".into(),
            name: "solve_math_problem".into(),
            arguments: json!({"problem": "add 2 and 3"}),
        }));
        conversation.push(Turn::tool_result("call_1", "5", false));
        let tools = vec![ToolDescriptor::new("solve_math_problem", "Solves math")
            .param(ParamSpec::required("problem", ParamType::String, "problem"))];

        let body = oracle().request_body(&conversation, &tools);

        assert_eq!(body["model"], "gpt-4o");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["tool_calls"][0]["function"]["arguments"], "{\"problem\":\"add 2 and 3\"}");
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["parameters"]["required"], json!(["problem"]));
    }

    #[test]
    fn test_parse_tool_call() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "abc",
                        "type": "function",
                        "function": {"name": "add", "arguments": "{\"a\":2,\"b\":3}"}
                    }]
                }
            }]
        });

        let decision = OpenAiOracle::parse_decision(&body).unwrap();
        assert_eq!(
            decision,
            Decision::ToolCall { name: "add".into(), arguments: json!({"a": 2, "b": 3}) }
        );
    }

    #[test]
    fn test_parse_final_answer() {
        let body = json!({"choices": [{"message": {"content": "The answer is 5."}}]});
        assert_eq!(
            OpenAiOracle::parse_decision(&body).unwrap(),
            Decision::FinalAnswer("The answer is 5.".into())
        );
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        let body = json!({
            "choices": [{"message": {"tool_calls": [{"function": {"name": "add", "arguments": "{oops"}}]}}]
        });
        assert!(matches!(
            OpenAiOracle::parse_decision(&body),
            Err(OracleError::InvalidResponse(_))
        ));
        assert!(OpenAiOracle::parse_decision(&json!({})).is_err());
    }
}
