// GitHub export client

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use codeforge_core::export::{ExportClient, GitExport, GithubPushRequest};
use codeforge_core::{AgentError, Result};

/// reqwest-backed export API client (pushes raw git objects)
#[derive(Clone)]
pub struct HttpExportClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    repository_url: String,
}

impl HttpExportClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from the `EXPORT_API_URL` environment variable
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("EXPORT_API_URL")
            .map_err(|_| anyhow::anyhow!("EXPORT_API_URL environment variable required"))?;
        Ok(Self::new(base_url))
    }
}

#[async_trait]
impl ExportClient for HttpExportClient {
    async fn push(&self, request: &GithubPushRequest, export: &GitExport) -> Result<String> {
        let url = format!("{}/v1/github/push", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "request": request,
                "export": export,
            }))
            .send()
            .await
            .map_err(|e| AgentError::storage(format!("export request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::storage(format!(
                "export API error ({status}): {text}"
            )));
        }

        let body: PushResponse = response
            .json()
            .await
            .map_err(|e| AgentError::storage(format!("export response decode failed: {e}")))?;
        Ok(body.repository_url)
    }
}
