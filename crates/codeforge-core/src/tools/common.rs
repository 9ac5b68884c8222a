// Common tool set
//
// Tools available to every session regardless of project type.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{from_capability, AgentHandle, SessionTool, ToolExecutionResult, ToolRegistry};

/// Registry with the tools shared by both project variants
pub fn common_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(ReadFiles);
    registry.register(ExecCommands);
    registry.register(WebSearch);
    registry.register(Feedback);
    registry.register(QueueRequest);
    registry.register(GetLogs);
    registry.register(DeployPreview);
    registry.register(WaitForGeneration);
    registry.register(WaitForDebug);
    registry.register(RenameProject);
    registry.register(Git);
    registry.register(DeepDebugger);
    registry
}

struct ReadFiles;

#[async_trait]
impl SessionTool for ReadFiles {
    fn name(&self) -> &str {
        "read_files"
    }

    fn description(&self) -> &str {
        "Read generated project files. Omit paths to read every file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Relative file paths to read"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let paths: Vec<String> = arguments
            .get("paths")
            .and_then(|p| p.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let files = handle.read_files(&paths).await;
        let listing: Vec<Value> = files
            .iter()
            .map(|f| {
                json!({
                    "path": f.file_path,
                    "purpose": f.file_purpose,
                    "contents": f.file_contents,
                })
            })
            .collect();
        ToolExecutionResult::success(json!({"files": listing}))
    }
}

struct ExecCommands;

#[async_trait]
impl SessionTool for ExecCommands {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute shell commands in the project's sandbox instance."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "commands": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["commands"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let commands: Vec<String> = arguments
            .get("commands")
            .and_then(|c| c.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if commands.is_empty() {
            return ToolExecutionResult::tool_error("commands must not be empty");
        }

        let response = handle.exec_commands(&commands).await;
        if !response.success {
            return ToolExecutionResult::tool_error(
                response.error.unwrap_or_else(|| "command execution failed".to_string()),
            );
        }
        let results: Vec<Value> = response
            .results
            .iter()
            .map(|r| {
                json!({
                    "command": r.command,
                    "exit_code": r.exit_code,
                    "stdout": r.stdout,
                    "stderr": r.stderr,
                })
            })
            .collect();
        ToolExecutionResult::success(json!({"results": results}))
    }
}

struct WebSearch;

#[async_trait]
impl SessionTool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for up-to-date documentation or examples."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"}
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or("");
        from_capability(handle.web_search(query).await, |results| {
            json!({"results": results})
        })
    }
}

struct Feedback;

#[async_trait]
impl SessionTool for Feedback {
    fn name(&self) -> &str {
        "feedback"
    }

    fn description(&self) -> &str {
        "Record a project-update note that will be surfaced to the user."
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

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let message = arguments
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        handle.record_feedback(message).await;
        ToolExecutionResult::success(json!({"recorded": true}))
    }
}

struct QueueRequest;

#[async_trait]
impl SessionTool for QueueRequest {
    fn name(&self) -> &str {
        "queue_request"
    }

    fn description(&self) -> &str {
        "Queue a follow-up request to apply at the next safe merge point."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {"type": "string"}
            },
            "required": ["request"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let request = arguments
            .get("request")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        handle.queue_user_request(request).await;
        ToolExecutionResult::success(json!({"queued": true}))
    }
}

struct GetLogs;

#[async_trait]
impl SessionTool for GetLogs {
    fn name(&self) -> &str {
        "get_logs"
    }

    fn description(&self) -> &str {
        "Fetch recent logs from the sandbox preview."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reset": {"type": "boolean"}
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let reset = arguments
            .get("reset")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let response = handle.get_logs(reset).await;
        if !response.success {
            return ToolExecutionResult::tool_error(
                response.error.unwrap_or_else(|| "failed to fetch logs".to_string()),
            );
        }
        ToolExecutionResult::success(json!({"logs": response.logs}))
    }
}

struct DeployPreview;

#[async_trait]
impl SessionTool for DeployPreview {
    fn name(&self) -> &str {
        "deploy_preview"
    }

    fn description(&self) -> &str {
        "Deploy the current files to the sandbox preview and return its URL."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, _arguments: Value) -> ToolExecutionResult {
        from_capability(handle.deploy_preview().await, |url| {
            json!({"preview_url": url})
        })
    }
}

struct WaitForGeneration;

#[async_trait]
impl SessionTool for WaitForGeneration {
    fn name(&self) -> &str {
        "wait_for_generation"
    }

    fn description(&self) -> &str {
        "Wait until the in-flight generation finishes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, _arguments: Value) -> ToolExecutionResult {
        handle.wait_for_generation().await;
        ToolExecutionResult::success(json!({"status": "generation_settled"}))
    }
}

struct WaitForDebug;

#[async_trait]
impl SessionTool for WaitForDebug {
    fn name(&self) -> &str {
        "wait_for_debug"
    }

    fn description(&self) -> &str {
        "Wait until the in-flight deep-debug session finishes."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, _arguments: Value) -> ToolExecutionResult {
        handle.wait_for_debug().await;
        ToolExecutionResult::success(json!({"status": "debug_settled"}))
    }
}

struct RenameProject;

#[async_trait]
impl SessionTool for RenameProject {
    fn name(&self) -> &str {
        "rename_project"
    }

    fn description(&self) -> &str {
        "Rename the project. Names are lowercase alphanumeric with - and _."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"}
            },
            "required": ["name"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let name = arguments.get("name").and_then(|v| v.as_str()).unwrap_or("");
        from_capability(handle.rename_project(name).await, |accepted| {
            json!({"project_name": accepted})
        })
    }
}

struct Git;

#[async_trait]
impl SessionTool for Git {
    fn name(&self) -> &str {
        "git"
    }

    fn description(&self) -> &str {
        "Inspect the project's version history (read-only)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["log", "status", "head"]
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, _arguments: Value) -> ToolExecutionResult {
        // All safe subcommands map onto the same read-only summary
        ToolExecutionResult::success(handle.git_info().await)
    }
}

struct DeepDebugger;

#[async_trait]
impl SessionTool for DeepDebugger {
    fn name(&self) -> &str {
        "deep_debugger"
    }

    fn description(&self) -> &str {
        "Run the deep-debug assistant over current runtime errors and files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "issue": {"type": "string"},
                "focus_paths": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["issue"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let issue = arguments
            .get("issue")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let focus_paths: Vec<String> = arguments
            .get("focus_paths")
            .and_then(|p| p.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        from_capability(handle.deep_debug(issue, focus_paths).await, |transcript| {
            json!({"transcript": transcript})
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_set_contents() {
        let registry = common_tools();
        for name in [
            "read_files",
            "exec",
            "web_search",
            "feedback",
            "queue_request",
            "get_logs",
            "deploy_preview",
            "wait_for_generation",
            "wait_for_debug",
            "rename_project",
            "git",
            "deep_debugger",
        ] {
            assert!(registry.has(name), "missing common tool {name}");
        }
    }
}
