// Codeforge API server
// Decision: per-session agents live in-process; the registry rehydrates
// them from Postgres after a restart

mod channel;
mod export;
mod registry;
mod sessions;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use codeforge_core::{OpenAiInferenceClient, SessionBackends, SessionClients};
use codeforge_sandbox::{
    EnvSecretsProvider, HttpDeployClient, HttpExportClient, HttpSandboxClient,
};
use codeforge_storage::{
    Database, PgConversationBackend, PgSessionIndexBackend, PgStateBackend, PgVcsBackend,
};

use registry::SessionRegistry;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        sessions::create_session,
        sessions::get_session,
        export::export_session,
    ),
    components(schemas(
        codeforge_contracts::CreateSessionRequest,
        codeforge_contracts::SessionInfo,
        codeforge_contracts::BootstrapItem,
        codeforge_contracts::ProjectType,
        codeforge_contracts::AgentMode,
        export::ExportRequest,
        export::ExportResponse,
    )),
    tags(
        (name = "sessions", description = "Session bootstrap and inspection")
    ),
    info(
        title = "Codeforge API",
        version = "0.3.0",
        description = "Hosts per-session code-generation agents",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codeforge_api=debug,codeforge_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("codeforge-api starting...");

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let db = Database::from_url(&database_url)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to run migrations")?;
    tracing::info!("Connected to database");

    let backends = SessionBackends {
        conversation: Arc::new(PgConversationBackend::new(db.clone())),
        state: Arc::new(PgStateBackend::new(db.clone())),
        vcs: Arc::new(PgVcsBackend::new(db.clone())),
    };
    let clients = SessionClients {
        sandbox: Arc::new(
            HttpSandboxClient::from_env().context("Failed to configure sandbox client")?,
        ),
        inference: Arc::new(
            OpenAiInferenceClient::from_env().context("Failed to configure inference client")?,
        ),
        deploy: Arc::new(
            HttpDeployClient::from_env().context("Failed to configure deploy client")?,
        ),
        secrets: Arc::new(EnvSecretsProvider::new()),
    };

    // Export is optional - the server runs without the export API
    let export_client: Option<Arc<dyn codeforge_core::ExportClient>> =
        match HttpExportClient::from_env() {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                tracing::warn!("Export API not configured: {e}. GitHub export disabled.");
                None
            }
        };
    let session_index: Arc<dyn codeforge_core::SessionIndexBackend> =
        Arc::new(PgSessionIndexBackend::new(db.clone()));

    let registry = Arc::new(SessionRegistry::new(db, backends, clients));
    let public_host =
        std::env::var("PUBLIC_HOST").unwrap_or_else(|_| "localhost:9000".to_string());
    let state = sessions::AppState {
        registry,
        public_host,
        export_client,
        session_index: Some(session_index),
    };

    let app = Router::new()
        .route("/health", get(health))
        .merge(sessions::routes(state.clone()))
        .merge(export::routes(state.clone()))
        .merge(channel::routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = "0.0.0.0:9000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
