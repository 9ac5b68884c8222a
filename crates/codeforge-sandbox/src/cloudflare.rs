// Cloudflare deploy client and secrets provider

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use codeforge_core::deploy::{
    CloudDeployResponse, CloudflareCredentials, DeployClient, SecretsProvider,
};
use codeforge_core::sandbox::SandboxFile;

const PREVIEW_EXPIRED_CODE: &str = "PREVIEW_EXPIRED";

/// reqwest-backed deployment API client
#[derive(Clone)]
pub struct HttpDeployClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DeployApiResponse {
    success: bool,
    #[serde(default)]
    deployment_url: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpDeployClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from the `DEPLOY_API_URL` environment variable
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("DEPLOY_API_URL")
            .map_err(|_| anyhow::anyhow!("DEPLOY_API_URL environment variable required"))?;
        Ok(Self::new(base_url))
    }
}

#[async_trait]
impl DeployClient for HttpDeployClient {
    async fn deploy(
        &self,
        project_name: &str,
        files: &[SandboxFile],
        credentials: &CloudflareCredentials,
    ) -> CloudDeployResponse {
        let url = format!("{}/v1/deployments", self.base_url);
        let result = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", credentials.api_token))
            .json(&json!({
                "account_id": credentials.account_id,
                "project_name": project_name,
                "files": files,
            }))
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Deploy API request failed");
                return CloudDeployResponse {
                    success: false,
                    deployment_url: None,
                    preview_expired: false,
                    error: Some(format!("deploy request failed: {e}")),
                };
            }
        };

        match response.json::<DeployApiResponse>().await {
            Ok(body) => CloudDeployResponse {
                success: body.success,
                deployment_url: body.deployment_url,
                preview_expired: body.code.as_deref() == Some(PREVIEW_EXPIRED_CODE),
                error: body.error,
            },
            Err(e) => CloudDeployResponse {
                success: false,
                deployment_url: None,
                preview_expired: false,
                error: Some(format!("deploy response decode failed: {e}")),
            },
        }
    }
}

/// Secrets provider backed by process environment.
///
/// The deployment credentials are operator-scoped here; a per-user
/// secrets service can replace this by implementing SecretsProvider.
#[derive(Default, Clone)]
pub struct EnvSecretsProvider;

impl EnvSecretsProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecretsProvider for EnvSecretsProvider {
    async fn get_cloudflare_credentials(&self, _user_id: &str) -> Option<CloudflareCredentials> {
        let account_id = std::env::var("CLOUDFLARE_ACCOUNT_ID").ok()?;
        let api_token = std::env::var("CLOUDFLARE_API_TOKEN").ok()?;
        Some(CloudflareCredentials {
            account_id,
            api_token,
        })
    }
}
