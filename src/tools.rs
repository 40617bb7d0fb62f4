//! Statically declared local tool tables used by worker agents
//!
//! Each table is built at construction time from (descriptor, handler)
//! pairs. Discovery serializes the descriptors; invocation is a direct call.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::agent::ToolInvoker;
use crate::error::{InvokeError, ToolError};
use crate::protocol::{ParamSpec, ParamType, ToolDescriptor};

/// Handler of a local tool
pub type ToolHandler = fn(&Value) -> Result<String, ToolError>;

/// A tool implemented in-process
#[derive(Clone)]
pub struct LocalTool {
    pub descriptor: ToolDescriptor,
    handler: ToolHandler,
}

impl LocalTool {
    pub fn new(descriptor: ToolDescriptor, handler: ToolHandler) -> Self {
        Self { descriptor, handler }
    }

    pub fn call(&self, arguments: &Value) -> Result<String, ToolError> {
        (self.handler)(arguments)
    }
}

/// A fixed table of local tools
#[derive(Clone, Default)]
pub struct LocalToolset {
    tools: Vec<LocalTool>,
}

impl LocalToolset {
    pub fn new(tools: Vec<LocalTool>) -> Self {
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&LocalTool> {
        self.tools.iter().find(|t| t.descriptor.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.descriptor.name.as_str()).collect()
    }

    /// `add` and `multiply`
    pub fn math() -> Self {
        let operands = |tool: ToolDescriptor| {
            tool.param(ParamSpec::required("a", ParamType::Number, "First operand"))
                .param(ParamSpec::required("b", ParamType::Number, "Second operand"))
        };
        Self::new(vec![
            LocalTool::new(operands(ToolDescriptor::new("add", "Adds two numbers.")), add),
            LocalTool::new(operands(ToolDescriptor::new("multiply", "Multiplies two numbers.")), multiply),
        ])
    }

    /// `reverse_string` and `count_words`
    pub fn text() -> Self {
        let text_param = |tool: ToolDescriptor| {
            tool.param(ParamSpec::required("text", ParamType::String, "Input text"))
        };
        Self::new(vec![
            LocalTool::new(
                text_param(ToolDescriptor::new("reverse_string", "Reverses a given string.")),
                reverse_string,
            ),
            LocalTool::new(
                text_param(ToolDescriptor::new(
                    "count_words",
                    "Counts the number of words in a given string.",
                )),
                count_words,
            ),
        ])
    }
}

#[async_trait]
impl ToolInvoker for LocalToolset {
    fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<String, InvokeError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        debug!(tool = %name, arguments = %arguments, "Executing local tool");
        Ok(tool.call(&arguments)?)
    }
}

fn number_arg(arguments: &Value, name: &str) -> Result<f64, ToolError> {
    let value = arguments
        .get(name)
        .ok_or_else(|| ToolError::MissingArgument(name.to_string()))?;
    match value {
        Value::Number(n) => n.as_f64(),
        // Oracles sometimes quote numbers
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ToolError::InvalidArgument {
        name: name.to_string(),
        expected: "number",
    })
}

fn string_arg<'a>(arguments: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(name)
        .ok_or_else(|| ToolError::MissingArgument(name.to_string()))?
        .as_str()
        .ok_or_else(|| ToolError::InvalidArgument {
            name: name.to_string(),
            expected: "string",
        })
}

/// Render a number without a trailing `.0` when it is integral
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn add(arguments: &Value) -> Result<String, ToolError> {
    let a = number_arg(arguments, "a")?;
    let b = number_arg(arguments, "b")?;
    Ok(format_number(a + b))
}

fn multiply(arguments: &Value) -> Result<String, ToolError> {
    let a = number_arg(arguments, "a")?;
    let b = number_arg(arguments, "b")?;
    Ok(format_number(a * b))
}

fn reverse_string(arguments: &Value) -> Result<String, ToolError> {
    Ok(string_arg(arguments, "text")?.chars().rev().collect())
}

fn count_words(arguments: &Value) -> Result<String, ToolError> {
    Ok(string_arg(arguments, "text")?.split_whitespace().count().to_string())
}
