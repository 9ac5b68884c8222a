// Session DTOs and bootstrap types
// Note: the full session state lives in codeforge-core; these are the
// public shapes exposed over the REST surface.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Project variant, fixed at session creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    App,
    Workflow,
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectType::App => write!(f, "app"),
            ProjectType::Workflow => write!(f, "workflow"),
        }
    }
}

/// Generation mode selected by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    #[default]
    Deterministic,
    Smart,
}

/// Request to open a new session
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    /// The natural-language request to build from
    #[schema(example = "make a counter")]
    pub query: String,
    /// Project variant to generate
    pub project_type: ProjectType,
    /// Scaffold template override
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub agent_mode: AgentMode,
}

/// Public view of a session
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub project_name: String,
    pub project_type: ProjectType,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

/// One item of the newline-delimited JSON bootstrap stream returned by
/// session creation. The stream closes once the session is ready.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BootstrapItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
}

impl BootstrapItem {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn ready(agent_id: Uuid, websocket_url: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id),
            websocket_url: Some(websocket_url.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_type_wire_format() {
        let req: CreateSessionRequest =
            serde_json::from_str(r#"{"query":"make a counter","project_type":"app"}"#).unwrap();
        assert_eq!(req.project_type, ProjectType::App);
        assert_eq!(req.agent_mode, AgentMode::Deterministic);
    }

    #[test]
    fn test_bootstrap_item_skips_empty_fields() {
        let item = BootstrapItem::message("allocating sandbox");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["message"], "allocating sandbox");
        assert!(json.get("agent_id").is_none());
        assert!(json.get("websocket_url").is_none());
    }
}
