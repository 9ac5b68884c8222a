// Tool DTOs shared between the runtime and the inference transport

use serde::{Deserialize, Serialize};

/// A tool exposed to the LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (used by the LLM to invoke it)
    pub name: String,
    /// Tool description for the LLM
    pub description: String,
    /// JSON schema for tool arguments
    pub parameters: serde_json::Value,
}

/// Tool call from an LLM response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique id for this tool call
    pub id: String,
    /// Tool name to execute
    pub name: String,
    /// Arguments as JSON
    pub arguments: serde_json::Value,
}

/// Tool execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool call id this result corresponds to
    pub tool_call_id: String,
    /// Result data (success)
    pub result: Option<serde_json::Value>,
    /// Error message (failure)
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_call_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_constructors() {
        let ok = ToolResult::ok("call_1", serde_json::json!({"done": true}));
        assert!(!ok.is_error());

        let err = ToolResult::err("call_2", "nope");
        assert!(err.is_error());
        assert_eq!(err.error.as_deref(), Some("nope"));
    }
}
