// Tool registry and dispatcher
//
// Tools are named, schema-validated functions exposed to the LLM. The
// dispatcher validates arguments against the declared JSON schema before
// invoking anything; on violation the implementation is never called and
// `{error}` goes back to the LLM. Tools never throw - internal errors are
// logged and replaced with a generic message.
//
// Implementations receive a trimmed AgentHandle capability set rather
// than the session itself, which keeps the tool layer acyclic.

mod app;
mod common;
mod schema;
mod workflow;

pub use app::app_tools;
pub use common::common_tools;
pub use schema::validate_arguments;
pub use workflow::{workflow_tools, TOOL_CONFIGURE_WORKFLOW_METADATA, TOOL_GENERATE_FILES};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::error;

use codeforge_contracts::{SessionEvent, ToolCall, ToolDefinition, ToolResult};

use crate::error::Result;
use crate::sandbox::{ExecuteCommandsResponse, LogsResponse};
use crate::state::{FileRecord, WorkflowMetadata};

// ============================================================================
// AgentHandle - trimmed capability surface handed to tools
// ============================================================================

/// What a tool may do to the session. App-only and workflow-only
/// capabilities default to a tool-visible error so each variant only
/// overrides its own set.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// Files from the generated map (all files when `paths` is empty)
    async fn read_files(&self, paths: &[String]) -> Vec<FileRecord>;

    /// Run commands in the session's sandbox instance
    async fn exec_commands(&self, commands: &[String]) -> ExecuteCommandsResponse;

    /// Sandbox logs
    async fn get_logs(&self, reset: bool) -> LogsResponse;

    /// Deploy the current file map to the sandbox preview; returns the URL
    async fn deploy_preview(&self) -> Result<String>;

    /// Broadcast an event to the session's clients
    async fn broadcast(&self, event: SessionEvent);

    /// Rename the project (validated); returns the accepted name
    async fn rename_project(&self, name: &str) -> Result<String>;

    /// Queue a user-style request for the next safe merge point
    async fn queue_user_request(&self, text: String);

    /// Record a feedback note on the project-updates accumulator
    async fn record_feedback(&self, text: String);

    /// Block until the in-flight generation settles
    async fn wait_for_generation(&self);

    /// Block until the in-flight deep-debug session settles
    async fn wait_for_debug(&self);

    /// Run the deep-debug assistant; returns the transcript
    async fn deep_debug(&self, issue: String, focus_paths: Vec<String>) -> Result<String>;

    /// Read-only view of the embedded git store (safe subset)
    async fn git_info(&self) -> Value;

    /// External web search; unavailable unless a backend is configured
    async fn web_search(&self, _query: &str) -> Result<Value> {
        Err(crate::error::AgentError::validation(
            "web search backend not configured",
        ))
    }

    // App-only capabilities

    async fn alter_blueprint(&self, _patch: Value) -> Result<()> {
        Err(crate::error::AgentError::validation(
            "alter_blueprint is only available on app sessions",
        ))
    }

    async fn regenerate_file(&self, _path: String) -> Result<FileRecord> {
        Err(crate::error::AgentError::validation(
            "regenerate_file is only available on app sessions",
        ))
    }

    // Workflow-only capabilities

    async fn generate_files(&self, _files: Vec<FileRecord>) -> Result<()> {
        Err(crate::error::AgentError::validation(
            "generate_files is only available on workflow sessions",
        ))
    }

    async fn configure_workflow_metadata(&self, _metadata: WorkflowMetadata) -> Result<()> {
        Err(crate::error::AgentError::validation(
            "configure_workflow_metadata is only available on workflow sessions",
        ))
    }
}

// ============================================================================
// Tool execution result
// ============================================================================

/// Result of a tool execution.
///
/// `ToolError` is safe to show to the LLM; `InternalError` is logged and
/// replaced with a generic message so system details never leak into the
/// model transcript.
#[derive(Debug)]
pub enum ToolExecutionResult {
    Success(Value),
    ToolError(String),
    InternalError(String),
}

impl ToolExecutionResult {
    pub fn success(value: impl Into<Value>) -> Self {
        ToolExecutionResult::Success(value.into())
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::ToolError(message.into())
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::InternalError(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolExecutionResult::Success(_))
    }

    pub fn into_tool_result(self, tool_call_id: &str, tool_name: &str) -> ToolResult {
        match self {
            ToolExecutionResult::Success(value) => ToolResult::ok(tool_call_id, value),
            ToolExecutionResult::ToolError(message) => ToolResult::err(tool_call_id, message),
            ToolExecutionResult::InternalError(message) => {
                error!(
                    tool_name = %tool_name,
                    tool_call_id = %tool_call_id,
                    error = %message,
                    "Tool internal error (details hidden from LLM)"
                );
                ToolResult::err(
                    tool_call_id,
                    "An internal error occurred while executing the tool",
                )
            }
        }
    }
}

/// Fold a handle capability result into a tool outcome: validation errors
/// are the tool's fault (visible), everything else stays internal.
pub(crate) fn from_capability<T, F>(result: Result<T>, on_ok: F) -> ToolExecutionResult
where
    F: FnOnce(T) -> Value,
{
    match result {
        Ok(value) => ToolExecutionResult::Success(on_ok(value)),
        Err(crate::error::AgentError::Validation(msg)) => ToolExecutionResult::ToolError(msg),
        Err(crate::error::AgentError::Cancelled) => {
            ToolExecutionResult::ToolError("operation was cancelled".to_string())
        }
        Err(e) => ToolExecutionResult::InternalError(e.to_string()),
    }
}

// ============================================================================
// SessionTool trait
// ============================================================================

/// A named, schema-validated function exposed to the LLM
#[async_trait]
pub trait SessionTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the tool's arguments
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult;

    /// Called before `execute`, after schema validation passed
    async fn on_start(&self, _handle: &dyn AgentHandle, _arguments: &Value) {}

    /// Called after `execute` with the outcome
    async fn on_complete(
        &self,
        _handle: &dyn AgentHandle,
        _arguments: &Value,
        _result: &ToolResult,
    ) {
    }

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

// ============================================================================
// ToolRegistry
// ============================================================================

/// Per-context collection of tools with the dispatch contract
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn SessionTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool; a tool with the same name is replaced.
    pub fn register(&mut self, tool: impl SessionTool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn SessionTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn merge(&mut self, other: ToolRegistry) {
        self.tools.extend(other.tools);
    }

    /// Remove a tool (used to keep self-waiting tools out of the loop
    /// that would deadlock on them)
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn SessionTool>> {
        self.tools.remove(name)
    }

    /// Definitions for the inference request
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Dispatch one tool call: validate, fire hooks, execute.
    pub async fn dispatch(&self, handle: &dyn AgentHandle, tool_call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&tool_call.name) else {
            return ToolResult::err(
                &tool_call.id,
                format!("Unknown tool: {}", tool_call.name),
            );
        };

        if let Err(violation) =
            validate_arguments(&tool.parameters_schema(), &tool_call.arguments)
        {
            return ToolResult::err(
                &tool_call.id,
                format!("Invalid arguments for {}: {}", tool_call.name, violation),
            );
        }

        tool.on_start(handle, &tool_call.arguments).await;
        let result = tool
            .execute(handle, tool_call.arguments.clone())
            .await
            .into_tool_result(&tool_call.id, &tool_call.name);
        tool.on_complete(handle, &tool_call.arguments, &result).await;
        result
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NullAgentHandle;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl SessionTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo back the provided message"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "message": {"type": "string"}
                },
                "required": ["message"],
                "additionalProperties": false
            })
        }

        async fn execute(&self, _handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
            let message = arguments.get("message").and_then(|v| v.as_str()).unwrap_or("");
            ToolExecutionResult::success(json!({"echoed": message}))
        }
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let handle = NullAgentHandle::default();

        let result = registry
            .dispatch(
                &handle,
                &ToolCall {
                    id: "call_1".to_string(),
                    name: "echo".to_string(),
                    arguments: json!({"message": "hi"}),
                },
            )
            .await;

        assert!(result.error.is_none());
        assert_eq!(result.result.unwrap()["echoed"], "hi");
    }

    #[tokio::test]
    async fn test_dispatch_schema_violation_skips_implementation() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let handle = NullAgentHandle::default();

        let result = registry
            .dispatch(
                &handle,
                &ToolCall {
                    id: "call_2".to_string(),
                    name: "echo".to_string(),
                    arguments: json!({"message": 42}),
                },
            )
            .await;

        let error = result.error.unwrap();
        assert!(error.contains("Invalid arguments"), "{error}");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tool() {
        let registry = ToolRegistry::new();
        let handle = NullAgentHandle::default();

        let result = registry
            .dispatch(
                &handle,
                &ToolCall {
                    id: "call_3".to_string(),
                    name: "nonexistent".to_string(),
                    arguments: json!({}),
                },
            )
            .await;

        assert!(result.error.unwrap().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_internal_error_is_masked() {
        let result = ToolExecutionResult::internal_error("connection string leaked")
            .into_tool_result("call_4", "secret_tool");
        assert_eq!(
            result.error.unwrap(),
            "An internal error occurred while executing the tool"
        );
    }
}
