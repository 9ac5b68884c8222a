// Outbound session events
//
// The closed set of events a session broadcasts to its attached client
// channels. Frames are serialized as `{"type": "...", ...payload}`.
// Per-channel ordering is FIFO; ordering across channels is not defined.

use serde::{Deserialize, Serialize};

use crate::messages::ConversationMessage;

/// A runtime error captured from the sandbox preview
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeErrorReport {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// A single static-analysis finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintIssue {
    pub file_path: String,
    pub message: String,
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

/// Events broadcast from a session to its clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    GenerationStarted,
    GenerationCompleted,
    GenerationStopped,
    GenerationResumed,

    PhaseGenerating {
        phase_name: String,
    },
    PhaseGenerated {
        phase_name: String,
        description: String,
    },
    PhaseImplementing {
        phase_name: String,
    },
    PhaseImplemented {
        phase_name: String,
        file_count: usize,
    },

    FileGenerating {
        file_path: String,
    },
    FileChunkGenerated {
        file_path: String,
        chunk: String,
    },
    FileGenerated {
        file_path: String,
        file_purpose: String,
    },

    DeploymentStarted,
    DeploymentCompleted {
        preview_url: String,
    },
    DeploymentFailed {
        error: String,
    },

    CloudflareDeploymentStarted,
    CloudflareDeploymentCompleted {
        deployment_url: String,
    },
    CloudflareDeploymentError {
        error: String,
    },
    PreviewForceRefresh,

    RuntimeErrorFound {
        errors: Vec<RuntimeErrorReport>,
    },
    StaticAnalysisResults {
        issues: Vec<LintIssue>,
    },

    ConversationCleared,
    ConversationState {
        full: Vec<ConversationMessage>,
        running: Vec<ConversationMessage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        deep_debug_session: Option<String>,
    },
    ProjectNameUpdated {
        project_name: String,
    },
    ModelConfigsInfo {
        configs: serde_json::Value,
    },

    GithubExportStarted,
    GithubExportProgress {
        progress: u8,
        message: String,
    },
    GithubExportCompleted {
        repository_url: String,
    },
    GithubExportError {
        error: String,
    },

    TextDelta {
        conversation_id: String,
        delta: String,
    },
    Error {
        error: String,
    },
}

impl SessionEvent {
    pub fn error(message: impl Into<String>) -> Self {
        SessionEvent::Error {
            error: message.into(),
        }
    }

    pub fn text_delta(conversation_id: impl Into<String>, delta: impl Into<String>) -> Self {
        SessionEvent::TextDelta {
            conversation_id: conversation_id.into(),
            delta: delta.into(),
        }
    }

    pub fn deployment_completed(preview_url: impl Into<String>) -> Self {
        SessionEvent::DeploymentCompleted {
            preview_url: preview_url.into(),
        }
    }

    pub fn file_generated(file_path: impl Into<String>, file_purpose: impl Into<String>) -> Self {
        SessionEvent::FileGenerated {
            file_path: file_path.into(),
            file_purpose: file_purpose.into(),
        }
    }

    /// Wire name of the event, for logging and test assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::GenerationStarted => "generation_started",
            SessionEvent::GenerationCompleted => "generation_completed",
            SessionEvent::GenerationStopped => "generation_stopped",
            SessionEvent::GenerationResumed => "generation_resumed",
            SessionEvent::PhaseGenerating { .. } => "phase_generating",
            SessionEvent::PhaseGenerated { .. } => "phase_generated",
            SessionEvent::PhaseImplementing { .. } => "phase_implementing",
            SessionEvent::PhaseImplemented { .. } => "phase_implemented",
            SessionEvent::FileGenerating { .. } => "file_generating",
            SessionEvent::FileChunkGenerated { .. } => "file_chunk_generated",
            SessionEvent::FileGenerated { .. } => "file_generated",
            SessionEvent::DeploymentStarted => "deployment_started",
            SessionEvent::DeploymentCompleted { .. } => "deployment_completed",
            SessionEvent::DeploymentFailed { .. } => "deployment_failed",
            SessionEvent::CloudflareDeploymentStarted => "cloudflare_deployment_started",
            SessionEvent::CloudflareDeploymentCompleted { .. } => {
                "cloudflare_deployment_completed"
            }
            SessionEvent::CloudflareDeploymentError { .. } => "cloudflare_deployment_error",
            SessionEvent::PreviewForceRefresh => "preview_force_refresh",
            SessionEvent::RuntimeErrorFound { .. } => "runtime_error_found",
            SessionEvent::StaticAnalysisResults { .. } => "static_analysis_results",
            SessionEvent::ConversationCleared => "conversation_cleared",
            SessionEvent::ConversationState { .. } => "conversation_state",
            SessionEvent::ProjectNameUpdated { .. } => "project_name_updated",
            SessionEvent::ModelConfigsInfo { .. } => "model_configs_info",
            SessionEvent::GithubExportStarted => "github_export_started",
            SessionEvent::GithubExportProgress { .. } => "github_export_progress",
            SessionEvent::GithubExportCompleted { .. } => "github_export_completed",
            SessionEvent::GithubExportError { .. } => "github_export_error",
            SessionEvent::TextDelta { .. } => "text_delta",
            SessionEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = SessionEvent::deployment_completed("https://preview.example");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "deployment_completed");
        assert_eq!(json["preview_url"], "https://preview.example");
    }

    #[test]
    fn test_kind_matches_tag() {
        let event = SessionEvent::error("boom");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
    }

    #[test]
    fn test_conversation_state_omits_empty_debug_session() {
        let event = SessionEvent::ConversationState {
            full: vec![],
            running: vec![],
            deep_debug_session: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("deep_debug_session").is_none());
    }
}
