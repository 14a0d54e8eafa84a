//! Tool specs and tool-call wire types.
//!
//! The runtime exposes a deliberately small tool surface: `execute_script`
//! and `attempt_completion`, plus whatever tools individual components
//! declare. Tool calls arrive from the model in the OpenAI "function_call"
//! wire shape and are parsed into [`ToolCallResult`] before dispatch.

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Name of the tool that runs a script against the merged workspace state.
pub const EXECUTE_SCRIPT: &str = "execute_script";

/// Name of the tool that ends the agent loop.
pub const ATTEMPT_COMPLETION: &str = "attempt_completion";

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Always `"function"`
    #[serde(rename = "type")]
    pub kind: String,

    pub function: FunctionSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".into(),
            function: FunctionSpec {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// A tool call as emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallWire {
    pub id: String,

    pub call_id: String,

    /// Always `"function_call"`
    #[serde(rename = "type", default = "default_call_type")]
    pub kind: String,

    pub name: String,

    /// Arguments as JSON text
    pub arguments: String,
}

fn default_call_type() -> String {
    "function_call".into()
}

impl ToolCallWire {
    pub fn new(name: impl Into<String>, arguments: &serde_json::Value) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            call_id: format!("call_{id}"),
            id,
            kind: default_call_type(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the JSON argument text. Blank arguments parse as `{}`.
    pub fn parse(&self) -> Result<ToolCallResult, ToolError> {
        let tool_params = if self.arguments.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&self.arguments).map_err(|e| {
                ToolError::InvalidArguments(format!(
                    "arguments for '{}' are not valid JSON: {e}",
                    self.name
                ))
            })?
        };
        Ok(ToolCallResult {
            tool_name: self.name.clone(),
            tool_params,
        })
    }
}

/// A parsed tool call: a named action with JSON parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool_name: String,
    pub tool_params: serde_json::Value,
}

impl ToolCallResult {
    /// Whether this is the completion tool.
    pub fn is_completion(&self) -> bool {
        self.tool_name == ATTEMPT_COMPLETION
    }

    /// The completion payload's `result` text, if this is a completion call.
    pub fn completion_text(&self) -> Option<String> {
        if !self.is_completion() {
            return None;
        }
        Some(match self.tool_params.get("result") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_spec_serializes_function_shape() {
        let spec = ToolSpec::function(
            EXECUTE_SCRIPT,
            "Run a script",
            serde_json::json!({"type": "object"}),
        );
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "execute_script");
    }

    #[test]
    fn wire_call_parses_arguments() {
        let wire: ToolCallWire = serde_json::from_value(serde_json::json!({
            "id": "fc_1",
            "call_id": "call_1",
            "type": "function_call",
            "name": "execute_script",
            "arguments": "{\"script\": \"count.value = 5\"}"
        }))
        .unwrap();
        let call = wire.parse().unwrap();
        assert_eq!(call.tool_name, "execute_script");
        assert_eq!(call.tool_params["script"], "count.value = 5");
        assert!(!call.is_completion());
    }

    #[test]
    fn blank_arguments_parse_as_empty_object() {
        let wire = ToolCallWire {
            id: "1".into(),
            call_id: "1".into(),
            kind: "function_call".into(),
            name: ATTEMPT_COMPLETION.into(),
            arguments: " ".into(),
        };
        let call = wire.parse().unwrap();
        assert!(call.tool_params.as_object().unwrap().is_empty());
        assert_eq!(call.completion_text().as_deref(), Some(""));
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        let wire = ToolCallWire {
            id: "1".into(),
            call_id: "1".into(),
            kind: "function_call".into(),
            name: EXECUTE_SCRIPT.into(),
            arguments: "{not json".into(),
        };
        assert!(matches!(wire.parse(), Err(ToolError::InvalidArguments(_))));
    }

    #[test]
    fn completion_text_extracts_result() {
        let call = ToolCallResult {
            tool_name: ATTEMPT_COMPLETION.into(),
            tool_params: serde_json::json!({"result": "all done"}),
        };
        assert_eq!(call.completion_text().as_deref(), Some("all done"));
    }
}
