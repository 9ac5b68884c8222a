// App-only tools

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{from_capability, AgentHandle, SessionTool, ToolExecutionResult, ToolRegistry};

/// Registry with the tools only app sessions expose
pub fn app_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(AlterBlueprint);
    registry.register(RegenerateFile);
    registry
}

struct AlterBlueprint;

#[async_trait]
impl SessionTool for AlterBlueprint {
    fn name(&self) -> &str {
        "alter_blueprint"
    }

    fn description(&self) -> &str {
        "Patch the project blueprint (title, description or phase list)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "patch": {
                    "type": "object",
                    "description": "Partial blueprint; provided fields replace current ones"
                }
            },
            "required": ["patch"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let patch = arguments.get("patch").cloned().unwrap_or(json!({}));
        from_capability(handle.alter_blueprint(patch).await, |_| {
            json!({"updated": true})
        })
    }
}

struct RegenerateFile;

#[async_trait]
impl SessionTool for RegenerateFile {
    fn name(&self) -> &str {
        "regenerate_file"
    }

    fn description(&self) -> &str {
        "Regenerate one project file from its purpose and current blueprint."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"}
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let path = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        from_capability(handle.regenerate_file(path).await, |file| {
            json!({
                "path": file.file_path,
                "purpose": file.file_purpose,
                "contents": file.file_contents,
            })
        })
    }
}
