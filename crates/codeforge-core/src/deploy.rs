// Deployment manager
//
// Sequences sandbox deploys, bootstrap-command execution, dependency
// sync, preview readiness and external Cloudflare deploys. Sandbox
// deploys are serialized per session behind an async mutex: at most one
// is in flight, later callers queue. The manager owns no durable state -
// everything goes through the state store and file manager it was built
// with.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use codeforge_contracts::{LintIssue, RuntimeErrorReport, SessionEvent};

use crate::error::{AgentError, Result};
use crate::events::EventBus;
use crate::files::FileManager;
use crate::sandbox::{SandboxClient, SandboxFile};
use crate::state::{FileRecord, SessionState};
use crate::state_store::StateStore;

/// Commands that change installed dependencies and require a
/// package.json sync afterwards
const DEPENDENCY_COMMAND_MARKERS: [&str; 4] = ["install", " add ", "remove", "uninstall"];

const PREVIEW_POLL_INTERVAL: Duration = Duration::from_millis(500);
const PREVIEW_POLL_ATTEMPTS: usize = 60;

/// Cloudflare API credentials from the secrets provider
#[derive(Debug, Clone)]
pub struct CloudflareCredentials {
    pub account_id: String,
    pub api_token: String,
}

/// Optional lookup against the secrets provider
#[async_trait]
pub trait SecretsProvider: Send + Sync {
    async fn get_cloudflare_credentials(&self, user_id: &str) -> Option<CloudflareCredentials>;
}

/// Outcome of an external deploy call
#[derive(Debug, Clone, Default)]
pub struct CloudDeployResponse {
    pub success: bool,
    pub deployment_url: Option<String>,
    /// The deploy API reported PREVIEW_EXPIRED
    pub preview_expired: bool,
    pub error: Option<String>,
}

/// Contract for the external deployment API
#[async_trait]
pub trait DeployClient: Send + Sync {
    async fn deploy(
        &self,
        project_name: &str,
        files: &[SandboxFile],
        credentials: &CloudflareCredentials,
    ) -> CloudDeployResponse;
}

/// Lifecycle hooks fired around deploys. All default to no-ops.
#[async_trait]
pub trait DeployObserver: Send + Sync {
    async fn on_started(&self) {}
    async fn on_completed(&self, _preview_url: &str) {}
    async fn on_error(&self, _error: &str) {}
    /// After bootstrap commands ran; the manager syncs package.json next
    async fn on_after_setup_commands(&self) {}
    /// The external deploy reported an expired preview
    async fn on_preview_expired(&self) {}
}

/// The default no-op observer
pub struct NoopDeployObserver;

#[async_trait]
impl DeployObserver for NoopDeployObserver {}

pub struct DeploymentManager<S: SessionState> {
    state: Arc<StateStore<S>>,
    files: Arc<FileManager<S>>,
    sandbox: Arc<dyn SandboxClient>,
    deploy_client: Arc<dyn DeployClient>,
    secrets: Arc<dyn SecretsProvider>,
    events: Arc<EventBus>,
    /// Serializes sandbox deploys for this session
    deploy_lock: Mutex<()>,
    /// Instances whose bootstrap commands already ran
    bootstrapped: RwLock<HashSet<String>>,
    preview_url: RwLock<Option<String>>,
}

impl<S: SessionState> DeploymentManager<S> {
    pub fn new(
        state: Arc<StateStore<S>>,
        files: Arc<FileManager<S>>,
        sandbox: Arc<dyn SandboxClient>,
        deploy_client: Arc<dyn DeployClient>,
        secrets: Arc<dyn SecretsProvider>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            state,
            files,
            sandbox,
            deploy_client,
            secrets,
            events,
            deploy_lock: Mutex::new(()),
            bootstrapped: RwLock::new(HashSet::new()),
            preview_url: RwLock::new(None),
        }
    }

    /// Cached preview URL from the last successful sandbox deploy
    pub async fn preview_url(&self) -> Option<String> {
        self.preview_url.read().await.clone()
    }

    /// Deploy to the sandbox.
    ///
    /// `files` are committed and pushed; with `redeploy` the entire
    /// generated map is pushed instead. Bootstrap commands run once per
    /// instance; dependency drift is synced back into the file map.
    pub async fn deploy_to_sandbox(
        &self,
        files: Vec<FileRecord>,
        redeploy: bool,
        commit_message: Option<&str>,
        clear_logs: bool,
        token: &CancellationToken,
        observer: &dyn DeployObserver,
    ) -> Result<String> {
        let _serialized = self.deploy_lock.lock().await;
        if token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        observer.on_started().await;
        self.events.broadcast(SessionEvent::DeploymentStarted).await;

        match self
            .deploy_to_sandbox_inner(files, redeploy, commit_message, clear_logs, token, observer)
            .await
        {
            Ok(url) => {
                observer.on_completed(&url).await;
                self.events
                    .broadcast(SessionEvent::deployment_completed(url.clone()))
                    .await;
                Ok(url)
            }
            Err(AgentError::Cancelled) => Err(AgentError::Cancelled),
            Err(e) => {
                let message = e.to_string();
                observer.on_error(&message).await;
                self.events
                    .broadcast(SessionEvent::DeploymentFailed {
                        error: message.clone(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn deploy_to_sandbox_inner(
        &self,
        files: Vec<FileRecord>,
        redeploy: bool,
        commit_message: Option<&str>,
        clear_logs: bool,
        token: &CancellationToken,
        observer: &dyn DeployObserver,
    ) -> Result<String> {
        let instance_id = self.ensure_instance().await?;

        if clear_logs {
            let _ = self.sandbox.get_logs(&instance_id, true, None).await;
        }

        let saved_paths: Vec<String> = files.iter().map(|f| f.file_path.clone()).collect();
        if !files.is_empty() {
            let message = commit_message.unwrap_or("update generated files");
            self.files.save_generated_files(files, message).await?;
        }
        if token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        // Push the provided files; the entire map on redeploy (or when
        // nothing specific was provided)
        let snapshot = self.state.get().await;
        let push: Vec<SandboxFile> = snapshot
            .base()
            .generated_files_map
            .values()
            .filter(|f| redeploy || saved_paths.is_empty() || saved_paths.contains(&f.file_path))
            .map(|f| SandboxFile {
                path: f.file_path.clone(),
                contents: f.file_contents.clone(),
            })
            .collect();

        let response = self.sandbox.deploy(&instance_id, &push).await;
        if !response.success {
            return Err(AgentError::sandbox(
                response
                    .error
                    .unwrap_or_else(|| "sandbox deploy failed".to_string()),
            ));
        }
        if token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        self.run_bootstrap_commands(&instance_id).await;
        observer.on_after_setup_commands().await;
        self.sync_package_json(&instance_id).await;

        let url = self.wait_for_preview_on(&instance_id, token).await?;
        *self.preview_url.write().await = Some(url.clone());
        Ok(url)
    }

    async fn ensure_instance(&self) -> Result<String> {
        let snapshot = self.state.get().await;
        if let Some(id) = &snapshot.base().sandbox_instance_id {
            return Ok(id.clone());
        }

        let response = self
            .sandbox
            .create_instance(&snapshot.base().project_name)
            .await;
        let instance_id = match (response.success, response.instance_id) {
            (true, Some(id)) => id,
            _ => {
                return Err(AgentError::sandbox(
                    response
                        .error
                        .unwrap_or_else(|| "failed to create sandbox instance".to_string()),
                ))
            }
        };

        info!(instance_id = %instance_id, "Sandbox instance created");
        self.state
            .update(|s| s.base_mut().sandbox_instance_id = Some(instance_id.clone()))
            .await;
        Ok(instance_id)
    }

    /// Persisted bootstrap commands run once per instance
    async fn run_bootstrap_commands(&self, instance_id: &str) {
        {
            let done = self.bootstrapped.read().await;
            if done.contains(instance_id) {
                return;
            }
        }

        let commands = self.state.get().await.base().commands_history.clone();
        if !commands.is_empty() {
            let response = self
                .sandbox
                .execute_commands(instance_id, &commands, None)
                .await;
            if !response.success {
                warn!(
                    instance_id = %instance_id,
                    error = response.error.as_deref().unwrap_or("unknown"),
                    "Bootstrap commands failed"
                );
            }
        }
        self.bootstrapped
            .write()
            .await
            .insert(instance_id.to_string());
    }

    /// Read back package.json and fold sandbox-installed dependency drift
    /// into the file map
    async fn sync_package_json(&self, instance_id: &str) {
        let response = self
            .sandbox
            .get_files(instance_id, &["package.json".to_string()])
            .await;
        if !response.success {
            return;
        }
        let Some(package_json) = response.files.into_iter().find(|f| f.path == "package.json")
        else {
            return;
        };

        let snapshot = self.state.get().await;
        if snapshot.base().last_package_json.as_deref() == Some(package_json.contents.as_str()) {
            return;
        }

        info!("package.json drifted in sandbox; syncing into file map");
        let record = FileRecord::new(
            "package.json",
            package_json.contents.clone(),
            "project manifest",
        );
        if let Err(e) = self
            .files
            .save_generated_file(record, "sync package.json from sandbox")
            .await
        {
            warn!(error = %e, "Failed to sync package.json");
            return;
        }
        self.state
            .update(|s| s.base_mut().last_package_json = Some(package_json.contents.clone()))
            .await;
    }

    /// Run commands in the sandbox, recording them in the bootstrap
    /// history and syncing package.json when they touch dependencies.
    pub async fn execute_commands(
        &self,
        commands: &[String],
    ) -> crate::sandbox::ExecuteCommandsResponse {
        let snapshot = self.state.get().await;
        let Some(instance_id) = snapshot.base().sandbox_instance_id.clone() else {
            return crate::sandbox::ExecuteCommandsResponse {
                success: false,
                results: Vec::new(),
                error: Some("no sandbox instance".to_string()),
            };
        };

        let response = self
            .sandbox
            .execute_commands(&instance_id, commands, None)
            .await;

        if response.success {
            let commands_vec: Vec<String> = commands.to_vec();
            self.state
                .update(|s| s.base_mut().record_commands(&commands_vec))
                .await;

            let touches_deps = commands.iter().any(|cmd| {
                DEPENDENCY_COMMAND_MARKERS
                    .iter()
                    .any(|marker| cmd.contains(marker))
            });
            if touches_deps {
                self.sync_package_json(&instance_id).await;
            }
        }
        response
    }

    /// Bounded wait until the preview reports ready
    pub async fn wait_for_preview(&self, token: &CancellationToken) -> Result<String> {
        let snapshot = self.state.get().await;
        let instance_id = snapshot
            .base()
            .sandbox_instance_id
            .clone()
            .ok_or_else(|| AgentError::deployment("no sandbox instance"))?;
        self.wait_for_preview_on(&instance_id, token).await
    }

    async fn wait_for_preview_on(
        &self,
        instance_id: &str,
        token: &CancellationToken,
    ) -> Result<String> {
        for _ in 0..PREVIEW_POLL_ATTEMPTS {
            if token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let status = self.sandbox.preview_status(instance_id).await;
            if status.success && status.ready {
                if let Some(url) = status.preview_url {
                    return Ok(url);
                }
            }
            tokio::select! {
                _ = token.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(PREVIEW_POLL_INTERVAL) => {}
            }
        }
        Err(AgentError::deployment("preview did not become ready"))
    }

    /// Run static analysis over `files` (or the whole project)
    pub async fn run_static_analysis(&self, files: Option<&[String]>) -> Result<Vec<LintIssue>> {
        let snapshot = self.state.get().await;
        let instance_id = snapshot
            .base()
            .sandbox_instance_id
            .clone()
            .ok_or_else(|| AgentError::deployment("no sandbox instance"))?;

        let response = self.sandbox.run_static_analysis(&instance_id, files).await;
        if !response.success {
            return Err(AgentError::sandbox(
                response
                    .error
                    .unwrap_or_else(|| "static analysis failed".to_string()),
            ));
        }
        self.events
            .broadcast(SessionEvent::StaticAnalysisResults {
                issues: response.issues.clone(),
            })
            .await;
        Ok(response.issues)
    }

    /// Fetch runtime errors from the preview. A failed fetch triggers an
    /// implicit sandbox redeploy and reports no errors to the caller.
    pub async fn fetch_runtime_errors(
        &self,
        clear: bool,
        token: &CancellationToken,
    ) -> Vec<RuntimeErrorReport> {
        let snapshot = self.state.get().await;
        let Some(instance_id) = snapshot.base().sandbox_instance_id.clone() else {
            return Vec::new();
        };

        let response = self.sandbox.fetch_runtime_errors(&instance_id, clear).await;
        if !response.success {
            warn!(
                error = response.error.as_deref().unwrap_or("unknown"),
                "Runtime-error fetch failed; redeploying sandbox"
            );
            if self
                .deploy_to_sandbox(Vec::new(), true, None, false, token, &NoopDeployObserver)
                .await
                .is_ok()
            {
                self.events
                    .broadcast(SessionEvent::PreviewForceRefresh)
                    .await;
            }
            return Vec::new();
        }

        if !response.errors.is_empty() {
            self.events
                .broadcast(SessionEvent::RuntimeErrorFound {
                    errors: response.errors.clone(),
                })
                .await;
        }
        response.errors
    }

    /// Deploy to Cloudflare using credentials for `user_id`
    pub async fn deploy_to_cloudflare(
        &self,
        user_id: &str,
        observer: &dyn DeployObserver,
    ) -> Result<String> {
        self.events
            .broadcast(SessionEvent::CloudflareDeploymentStarted)
            .await;

        let Some(credentials) = self.secrets.get_cloudflare_credentials(user_id).await else {
            let message =
                "missing Cloudflare credentials: no account id / API token stored for this user";
            self.events
                .broadcast(SessionEvent::CloudflareDeploymentError {
                    error: message.to_string(),
                })
                .await;
            return Err(AgentError::deployment(message));
        };

        let snapshot = self.state.get().await;
        let files: Vec<SandboxFile> = snapshot
            .base()
            .generated_files_map
            .values()
            .map(|f| SandboxFile {
                path: f.file_path.clone(),
                contents: f.file_contents.clone(),
            })
            .collect();

        let response = self
            .deploy_client
            .deploy(&snapshot.base().project_name, &files, &credentials)
            .await;

        if response.preview_expired {
            observer.on_preview_expired().await;
        }

        match (response.success, response.deployment_url) {
            (true, Some(url)) => {
                self.events
                    .broadcast(SessionEvent::CloudflareDeploymentCompleted {
                        deployment_url: url.clone(),
                    })
                    .await;
                Ok(url)
            }
            _ => {
                let message = response
                    .error
                    .unwrap_or_else(|| "cloudflare deployment failed".to_string());
                self.events
                    .broadcast(SessionEvent::CloudflareDeploymentError {
                        error: message.clone(),
                    })
                    .await;
                Err(AgentError::deployment(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{
        InMemorySecretsProvider, MockDeployClient, MockSandboxClient,
    };
    use crate::state::AppSessionState;
    use crate::vcs::GitStore;
    use uuid::Uuid;

    async fn manager(
        sandbox: Arc<MockSandboxClient>,
        secrets: Arc<InMemorySecretsProvider>,
    ) -> (DeploymentManager<AppSessionState>, Arc<EventBus>) {
        let state = Arc::new(StateStore::new(AppSessionState::new(Uuid::now_v7())));
        let git = Arc::new(GitStore::new(Uuid::now_v7(), None));
        git.init().await.unwrap();
        let files = Arc::new(FileManager::new(state.clone(), git));
        let events = Arc::new(EventBus::new());
        let manager = DeploymentManager::new(
            state,
            files,
            sandbox,
            Arc::new(MockDeployClient::default()),
            secrets,
            events.clone(),
        );
        (manager, events)
    }

    #[tokio::test]
    async fn test_deploy_creates_instance_and_caches_preview() {
        let sandbox = Arc::new(MockSandboxClient::healthy());
        let (manager, _events) =
            manager(sandbox.clone(), Arc::new(InMemorySecretsProvider::default())).await;
        let token = CancellationToken::new();

        let url = manager
            .deploy_to_sandbox(
                vec![FileRecord::new("a.ts", "x", "entry")],
                false,
                Some("c1"),
                true,
                &token,
                &NoopDeployObserver,
            )
            .await
            .unwrap();

        assert!(!url.is_empty());
        assert_eq!(manager.preview_url().await, Some(url));
    }

    #[tokio::test]
    async fn test_deploy_failure_emits_deployment_failed() {
        let sandbox = Arc::new(MockSandboxClient::failing_deploys());
        let (manager, events) =
            manager(sandbox, Arc::new(InMemorySecretsProvider::default())).await;
        let (_id, mut rx) = events.attach().await;
        let token = CancellationToken::new();

        let result = manager
            .deploy_to_sandbox(Vec::new(), true, None, false, &token, &NoopDeployObserver)
            .await;
        assert!(result.is_err());

        let mut kinds = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        assert!(kinds.contains(&"deployment_started".to_string()));
        assert!(kinds.contains(&"deployment_failed".to_string()));
    }

    #[tokio::test]
    async fn test_cloudflare_deploy_without_credentials() {
        let sandbox = Arc::new(MockSandboxClient::healthy());
        let (manager, events) =
            manager(sandbox, Arc::new(InMemorySecretsProvider::default())).await;
        let (_id, mut rx) = events.attach().await;

        let result = manager
            .deploy_to_cloudflare("user-without-creds", &NoopDeployObserver)
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("credentials"));

        let mut saw_error = false;
        while let Ok(frame) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            if value["type"] == "cloudflare_deployment_error" {
                saw_error = true;
                assert!(value["error"].as_str().unwrap().contains("credentials"));
            }
        }
        assert!(saw_error);
    }

    #[tokio::test]
    async fn test_dependency_command_syncs_package_json() {
        let sandbox = Arc::new(MockSandboxClient::healthy());
        sandbox
            .set_file("package.json", r#"{"dependencies":{"left-pad":"1.0.0"}}"#)
            .await;
        let (manager, _events) =
            manager(sandbox.clone(), Arc::new(InMemorySecretsProvider::default())).await;
        let token = CancellationToken::new();

        // First deploy establishes the instance
        manager
            .deploy_to_sandbox(
                vec![FileRecord::new("a.ts", "x", "entry")],
                false,
                None,
                false,
                &token,
                &NoopDeployObserver,
            )
            .await
            .unwrap();

        sandbox
            .set_file(
                "package.json",
                r#"{"dependencies":{"left-pad":"1.0.0","dayjs":"1.11.0"}}"#,
            )
            .await;
        let response = manager
            .execute_commands(&["bun add dayjs".to_string()])
            .await;
        assert!(response.success);

        let synced = manager.files.get_generated_file("package.json").await;
        assert!(synced.unwrap().file_contents.contains("dayjs"));
    }

    #[tokio::test]
    async fn test_cancelled_deploy_returns_cancelled() {
        let sandbox = Arc::new(MockSandboxClient::healthy());
        let (manager, _events) =
            manager(sandbox, Arc::new(InMemorySecretsProvider::default())).await;
        let token = CancellationToken::new();
        token.cancel();

        let result = manager
            .deploy_to_sandbox(Vec::new(), true, None, false, &token, &NoopDeployObserver)
            .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
    }
}
