// Session HTTP routes
//
// Session creation answers a newline-delimited JSON stream of bootstrap
// items (progress messages, then the agent id + websocket URL) and
// closes once the session is ready.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use codeforge_contracts::{BootstrapItem, CreateSessionRequest, SessionInfo};
use codeforge_core::lifecycle::SessionInit;

use crate::registry::SessionRegistry;

/// App state for session routes
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    /// Advertised host for websocket URLs (e.g. "localhost:9000")
    pub public_host: String,
    /// Export API client; absent when EXPORT_API_URL is not configured
    pub export_client: Option<Arc<dyn codeforge_core::ExportClient>>,
    pub session_index: Option<Arc<dyn codeforge_core::SessionIndexBackend>>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:session_id", get(get_session))
        .with_state(state)
}

/// POST /v1/sessions - Open a session; streams bootstrap progress
#[utoipa::path(
    post,
    path = "/v1/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Newline-delimited JSON bootstrap stream", body = BootstrapItem),
        (status = 500, description = "Internal server error")
    ),
    tag = "sessions"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Response, StatusCode> {
    let session_id = Uuid::now_v7();
    let agent_id = Uuid::now_v7();
    tracing::info!(
        session_id = %session_id,
        project_type = %req.project_type,
        "Creating session"
    );

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<BootstrapItem>();
    let registry = state.registry.clone();
    let public_host = state.public_host.clone();

    tokio::spawn(async move {
        let _ = tx.send(BootstrapItem::message("provisioning session"));

        let init = SessionInit {
            session_id,
            query: req.query,
            project_type: req.project_type,
            hostname: public_host.clone(),
            template_name: req.template_name,
            agent_mode: req.agent_mode,
            user_id: String::new(),
            agent_id,
        };
        match registry.create(init).await {
            Ok(agent) => {
                let info = agent.session_info().await;
                let _ = tx.send(BootstrapItem::message(format!(
                    "project {} ready",
                    info.project_name
                )));
                let _ = tx.send(BootstrapItem::ready(
                    session_id,
                    format!("ws://{public_host}/v1/sessions/{session_id}/ws"),
                ));
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Session creation failed");
                let _ = tx.send(BootstrapItem::message(format!("session creation failed: {e}")));
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|item| {
        let line = serde_json::to_string(&item).unwrap_or_default();
        Ok::<_, Infallible>(format!("{line}\n"))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// GET /v1/sessions/{session_id} - Public session view
#[utoipa::path(
    get,
    path = "/v1/sessions/{session_id}",
    params(
        ("session_id" = Uuid, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Session found", body = SessionInfo),
        (status = 404, description = "Session not found")
    ),
    tag = "sessions"
)]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionInfo>, StatusCode> {
    let agent = state
        .registry
        .get(session_id)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(Json(agent.session_info().await))
}
