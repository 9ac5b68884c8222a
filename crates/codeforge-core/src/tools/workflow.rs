// Workflow-only tools
//
// The workflow controller's dialogue hinges on these two: generate_files
// must produce src/index.ts, configure_workflow_metadata merges the
// metadata record (per-field union, no deletion).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{from_capability, AgentHandle, SessionTool, ToolExecutionResult, ToolRegistry};
use crate::state::{FileRecord, WorkflowMetadata};

pub const TOOL_GENERATE_FILES: &str = "generate_files";
pub const TOOL_CONFIGURE_WORKFLOW_METADATA: &str = "configure_workflow_metadata";

/// Registry with the tools only workflow sessions expose
pub fn workflow_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(GenerateFiles);
    registry.register(ConfigureWorkflowMetadata);
    registry
}

struct GenerateFiles;

#[async_trait]
impl SessionTool for GenerateFiles {
    fn name(&self) -> &str {
        TOOL_GENERATE_FILES
    }

    fn description(&self) -> &str {
        "Write workflow source files. The entry module must be src/index.ts."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": {"type": "string"},
                            "purpose": {"type": "string"},
                            "contents": {"type": "string"}
                        },
                        "required": ["path", "contents"]
                    }
                }
            },
            "required": ["files"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let Some(items) = arguments.get("files").and_then(|f| f.as_array()) else {
            return ToolExecutionResult::tool_error("files must be an array");
        };
        let files: Vec<FileRecord> = items
            .iter()
            .filter_map(|item| {
                let path = item.get("path")?.as_str()?;
                let contents = item.get("contents")?.as_str()?;
                let purpose = item
                    .get("purpose")
                    .and_then(|p| p.as_str())
                    .unwrap_or("workflow source");
                Some(FileRecord::new(path, contents, purpose))
            })
            .collect();
        if files.is_empty() {
            return ToolExecutionResult::tool_error("files must not be empty");
        }

        let count = files.len();
        from_capability(handle.generate_files(files).await, move |_| {
            json!({"written": count})
        })
    }
}

struct ConfigureWorkflowMetadata;

#[async_trait]
impl SessionTool for ConfigureWorkflowMetadata {
    fn name(&self) -> &str {
        TOOL_CONFIGURE_WORKFLOW_METADATA
    }

    fn description(&self) -> &str {
        "Declare or update workflow metadata: name, description, params \
         schema, env vars, secrets and resource bindings (kv, r2, d1, \
         queue, ai). Updates merge with previously declared metadata."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "description": {"type": "string"},
                "params_schema": {"type": "object"},
                "env_vars": {"type": "object"},
                "secrets": {"type": "object"},
                "resources": {
                    "type": "object",
                    "description": "Binding name -> {kind, resource_name?}"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, handle: &dyn AgentHandle, arguments: Value) -> ToolExecutionResult {
        let metadata: WorkflowMetadata = match serde_json::from_value(arguments) {
            Ok(metadata) => metadata,
            Err(e) => {
                return ToolExecutionResult::tool_error(format!("invalid metadata: {e}"));
            }
        };
        from_capability(
            handle.configure_workflow_metadata(metadata).await,
            |_| json!({"configured": true}),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_set_contents() {
        let registry = workflow_tools();
        assert!(registry.has(TOOL_GENERATE_FILES));
        assert!(registry.has(TOOL_CONFIGURE_WORKFLOW_METADATA));
        assert_eq!(registry.len(), 2);
    }
}
