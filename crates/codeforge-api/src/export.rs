// GitHub export route
//
// The session-channel `github_export` frame is deprecated; publishing
// happens through this REST surface instead. The route wraps the
// in-process export with the external export client and records the
// repository URL on the session index.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use codeforge_core::GithubPushRequest;

use crate::sessions::AppState;

/// Request to export a session to GitHub
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExportRequest {
    /// Repository to create or push to
    #[schema(example = "my-counter-app")]
    pub repository_name: String,
    #[serde(default)]
    pub private: bool,
}

/// Successful export
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ExportResponse {
    pub repository_url: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions/:session_id/export", post(export_session))
        .with_state(state)
}

/// POST /v1/sessions/{session_id}/export - Publish the session to GitHub
#[utoipa::path(
    post,
    path = "/v1/sessions/{session_id}/export",
    params(
        ("session_id" = Uuid, Path, description = "Session ID")
    ),
    request_body = ExportRequest,
    responses(
        (status = 200, description = "Exported", body = ExportResponse),
        (status = 404, description = "Session not found"),
        (status = 503, description = "Export API not configured"),
        (status = 502, description = "Export failed")
    ),
    tag = "sessions"
)]
pub async fn export_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ExportRequest>,
) -> Result<Json<ExportResponse>, StatusCode> {
    let Some(export_client) = state.export_client.clone() else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    let agent = state
        .registry
        .get(session_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let repository_url = agent
        .push_to_github(
            export_client.as_ref(),
            state.session_index.as_ref(),
            GithubPushRequest {
                repository_name: req.repository_name,
                private: req.private,
                user_id: agent.user_id().to_string(),
            },
        )
        .await
        .map_err(|e| {
            tracing::error!(session_id = %session_id, error = %e, "GitHub export failed");
            StatusCode::BAD_GATEWAY
        })?;

    Ok(Json(ExportResponse { repository_url }))
}
