// HTTP sandbox client
//
// Facade over the sandbox execution service. Every method resolves to a
// response struct with `success`/`error`; HTTP and decode failures are
// folded in rather than raised.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use codeforge_core::sandbox::{
    BasicResponse, CreateInstanceResponse, ExecuteCommandsResponse, GetFilesResponse,
    LogsResponse, PreviewStatusResponse, RuntimeErrorsResponse, SandboxClient, SandboxFile,
    StaticAnalysisResponse,
};

/// reqwest-backed sandbox service client
#[derive(Clone)]
pub struct HttpSandboxClient {
    client: Client,
    base_url: String,
}

impl HttpSandboxClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Create from the `SANDBOX_SERVICE_URL` environment variable
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = std::env::var("SANDBOX_SERVICE_URL")
            .map_err(|_| anyhow::anyhow!("SANDBOX_SERVICE_URL environment variable required"))?;
        Ok(Self::new(base_url))
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("sandbox request failed: {e}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("sandbox error ({status}): {text}"));
        }
        response
            .json::<R>()
            .await
            .map_err(|e| format!("sandbox response decode failed: {e}"))
    }
}

/// Log and fold a transport error into the default response shape
macro_rules! fold_err {
    ($result:expr, $response:ty) => {
        match $result {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "Sandbox call failed");
                <$response>::default().with_error(error)
            }
        }
    };
}

trait WithError {
    fn with_error(self, error: String) -> Self;
}

macro_rules! impl_with_error {
    ($($response:ty),+ $(,)?) => {
        $(impl WithError for $response {
            fn with_error(mut self, error: String) -> Self {
                self.success = false;
                self.error = Some(error);
                self
            }
        })+
    };
}

impl_with_error!(
    BasicResponse,
    CreateInstanceResponse,
    GetFilesResponse,
    ExecuteCommandsResponse,
    LogsResponse,
    StaticAnalysisResponse,
    RuntimeErrorsResponse,
    PreviewStatusResponse,
);

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    async fn create_instance(&self, project_name: &str) -> CreateInstanceResponse {
        fold_err!(
            self.post("/v1/instances", &json!({"project_name": project_name}))
                .await,
            CreateInstanceResponse
        )
    }

    async fn get_files(&self, instance_id: &str, paths: &[String]) -> GetFilesResponse {
        fold_err!(
            self.post(
                &format!("/v1/instances/{instance_id}/files/read"),
                &json!({"paths": paths}),
            )
            .await,
            GetFilesResponse
        )
    }

    async fn execute_commands(
        &self,
        instance_id: &str,
        commands: &[String],
        timeout_secs: Option<u64>,
    ) -> ExecuteCommandsResponse {
        fold_err!(
            self.post(
                &format!("/v1/instances/{instance_id}/exec"),
                &json!({"commands": commands, "timeout_secs": timeout_secs}),
            )
            .await,
            ExecuteCommandsResponse
        )
    }

    async fn get_logs(
        &self,
        instance_id: &str,
        reset: bool,
        duration_seconds: Option<u64>,
    ) -> LogsResponse {
        fold_err!(
            self.post(
                &format!("/v1/instances/{instance_id}/logs"),
                &json!({"reset": reset, "duration_seconds": duration_seconds}),
            )
            .await,
            LogsResponse
        )
    }

    async fn run_static_analysis(
        &self,
        instance_id: &str,
        files: Option<&[String]>,
    ) -> StaticAnalysisResponse {
        fold_err!(
            self.post(
                &format!("/v1/instances/{instance_id}/analysis"),
                &json!({"files": files}),
            )
            .await,
            StaticAnalysisResponse
        )
    }

    async fn fetch_runtime_errors(&self, instance_id: &str, clear: bool) -> RuntimeErrorsResponse {
        fold_err!(
            self.post(
                &format!("/v1/instances/{instance_id}/runtime-errors"),
                &json!({"clear": clear}),
            )
            .await,
            RuntimeErrorsResponse
        )
    }

    async fn update_project_name(&self, instance_id: &str, name: &str) -> BasicResponse {
        fold_err!(
            self.post(
                &format!("/v1/instances/{instance_id}/name"),
                &json!({"name": name}),
            )
            .await,
            BasicResponse
        )
    }

    async fn deploy(&self, instance_id: &str, files: &[SandboxFile]) -> BasicResponse {
        fold_err!(
            self.post(
                &format!("/v1/instances/{instance_id}/deploy"),
                &json!({"files": files}),
            )
            .await,
            BasicResponse
        )
    }

    async fn preview_status(&self, instance_id: &str) -> PreviewStatusResponse {
        fold_err!(
            self.post(
                &format!("/v1/instances/{instance_id}/preview-status"),
                &json!({}),
            )
            .await,
            PreviewStatusResponse
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = HttpSandboxClient::new("https://sandbox.internal/");
        assert_eq!(client.base_url, "https://sandbox.internal");
    }

    #[tokio::test]
    async fn test_unreachable_service_folds_into_error() {
        // Port 9 (discard) refuses connections immediately
        let client = HttpSandboxClient::new("http://127.0.0.1:9");
        let response = client.create_instance("demo").await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("sandbox request failed"));
    }
}
