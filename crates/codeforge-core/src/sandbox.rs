// Sandbox client contract
//
// Thin facade over the external sandbox execution service. Every call
// returns a response struct carrying `success` plus an optional `error`
// string - no error type crosses this boundary. Implementations fold
// transport failures into `success: false`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use codeforge_contracts::{LintIssue, RuntimeErrorReport};

/// A file pushed to or read from the sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxFile {
    pub path: String,
    pub contents: String,
}

/// Output of one executed command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BasicResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateInstanceResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetFilesResponse {
    pub success: bool,
    #[serde(default)]
    pub files: Vec<SandboxFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteCommandsResponse {
    pub success: bool,
    #[serde(default)]
    pub results: Vec<CommandOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogsResponse {
    pub success: bool,
    #[serde(default)]
    pub logs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticAnalysisResponse {
    pub success: bool,
    #[serde(default)]
    pub issues: Vec<LintIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeErrorsResponse {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<RuntimeErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviewStatusResponse {
    pub success: bool,
    #[serde(default)]
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Capability set of the external sandbox service
#[async_trait]
pub trait SandboxClient: Send + Sync {
    async fn create_instance(&self, project_name: &str) -> CreateInstanceResponse;

    async fn get_files(&self, instance_id: &str, paths: &[String]) -> GetFilesResponse;

    async fn execute_commands(
        &self,
        instance_id: &str,
        commands: &[String],
        timeout_secs: Option<u64>,
    ) -> ExecuteCommandsResponse;

    async fn get_logs(
        &self,
        instance_id: &str,
        reset: bool,
        duration_seconds: Option<u64>,
    ) -> LogsResponse;

    async fn run_static_analysis(
        &self,
        instance_id: &str,
        files: Option<&[String]>,
    ) -> StaticAnalysisResponse;

    async fn fetch_runtime_errors(&self, instance_id: &str, clear: bool)
        -> RuntimeErrorsResponse;

    async fn update_project_name(&self, instance_id: &str, name: &str) -> BasicResponse;

    /// Push files and (re)deploy the preview
    async fn deploy(&self, instance_id: &str, files: &[SandboxFile]) -> BasicResponse;

    async fn preview_status(&self, instance_id: &str) -> PreviewStatusResponse;
}
