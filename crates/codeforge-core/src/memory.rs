// In-memory implementations for examples and testing
//
// These keep all data in memory: backend stand-ins for the Postgres
// rows, a scripted inference client, and a mock sandbox. The end-to-end
// scenarios in the session tests run entirely on this substrate.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use codeforge_contracts::SessionEvent;

use crate::conversation::{ConversationBackend, ConversationLogs};
use crate::deploy::{
    CloudDeployResponse, CloudflareCredentials, DeployClient, SecretsProvider,
};
use crate::error::Result;
use crate::inference::{
    InferenceClient, InferenceRequest, InferenceResponse, InferenceStream, InferenceStreamEvent,
};
use crate::sandbox::{
    BasicResponse, CommandOutput, CreateInstanceResponse, ExecuteCommandsResponse,
    GetFilesResponse, LogsResponse, PreviewStatusResponse, RuntimeErrorsResponse, SandboxClient,
    SandboxFile, StaticAnalysisResponse,
};
use crate::state::FileRecord;
use crate::state_store::StateBackend;
use crate::tools::AgentHandle;
use crate::vcs::{RawObject, VcsBackend};

// ============================================================================
// Backend stand-ins
// ============================================================================

/// In-memory conversation rows
#[derive(Default)]
pub struct InMemoryConversationBackend {
    rows: RwLock<HashMap<Uuid, ConversationLogs>>,
}

impl InMemoryConversationBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the row for a session (simulates a missing backing row)
    pub async fn remove(&self, session_id: Uuid) {
        self.rows.write().await.remove(&session_id);
    }
}

#[async_trait]
impl ConversationBackend for InMemoryConversationBackend {
    async fn load(&self, session_id: Uuid) -> Result<Option<ConversationLogs>> {
        Ok(self.rows.read().await.get(&session_id).cloned())
    }

    async fn save(&self, session_id: Uuid, logs: &ConversationLogs) -> Result<()> {
        self.rows.write().await.insert(session_id, logs.clone());
        Ok(())
    }
}

/// In-memory session-state row
#[derive(Default)]
pub struct InMemoryStateBackend {
    rows: RwLock<HashMap<Uuid, serde_json::Value>>,
}

impl InMemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for InMemoryStateBackend {
    async fn save(&self, session_id: Uuid, state: &serde_json::Value) -> Result<()> {
        self.rows.write().await.insert(session_id, state.clone());
        Ok(())
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<serde_json::Value>> {
        Ok(self.rows.read().await.get(&session_id).cloned())
    }
}

/// In-memory VCS object rows
#[derive(Default)]
pub struct InMemoryVcsBackend {
    objects: RwLock<HashMap<Uuid, HashMap<String, RawObject>>>,
    heads: RwLock<HashMap<Uuid, String>>,
}

impl InMemoryVcsBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VcsBackend for InMemoryVcsBackend {
    async fn put_objects(&self, session_id: Uuid, objects: &[RawObject]) -> Result<()> {
        let mut guard = self.objects.write().await;
        let store = guard.entry(session_id).or_default();
        for object in objects {
            store.insert(object.id.clone(), object.clone());
        }
        Ok(())
    }

    async fn load_objects(&self, session_id: Uuid) -> Result<Vec<RawObject>> {
        Ok(self
            .objects
            .read()
            .await
            .get(&session_id)
            .map(|store| store.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_head(&self, session_id: Uuid, head: &str) -> Result<()> {
        self.heads.write().await.insert(session_id, head.to_string());
        Ok(())
    }

    async fn get_head(&self, session_id: Uuid) -> Result<Option<String>> {
        Ok(self.heads.read().await.get(&session_id).cloned())
    }
}

// ============================================================================
// Scripted inference client
// ============================================================================

/// Inference client that replays a scripted sequence of responses.
///
/// Each call pops the next response; when the script is exhausted it
/// answers with an empty response (no text, no tool calls), which ends
/// tool-loop dialogues.
#[derive(Default)]
pub struct ScriptedInferenceClient {
    script: Mutex<VecDeque<InferenceResponse>>,
    calls: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedInferenceClient {
    pub fn new(responses: Vec<InferenceResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, response: InferenceResponse) {
        self.script.lock().await.push_back(response);
    }

    /// Requests seen so far (for asserting prompts and tool wiring)
    pub async fn calls(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInferenceClient {
    async fn execute_inference_stream(&self, request: InferenceRequest) -> Result<InferenceStream> {
        self.calls.lock().await.push(request);
        let response = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_default();

        let mut events = Vec::new();
        if !response.text.is_empty() {
            // Stream in two chunks to exercise delta handling
            let mut mid = response.text.len() / 2;
            while !response.text.is_char_boundary(mid) {
                mid -= 1;
            }
            let (head, tail) = response.text.split_at(mid);
            if !head.is_empty() {
                events.push(Ok(InferenceStreamEvent::TextDelta(head.to_string())));
            }
            if !tail.is_empty() {
                events.push(Ok(InferenceStreamEvent::TextDelta(tail.to_string())));
            }
        }
        if !response.tool_calls.is_empty() {
            events.push(Ok(InferenceStreamEvent::ToolCalls(response.tool_calls)));
        }
        events.push(Ok(InferenceStreamEvent::Done));

        Ok(Box::pin(futures::stream::iter(events)))
    }
}

// ============================================================================
// Mock sandbox client
// ============================================================================

#[derive(Default)]
struct MockSandboxState {
    files: HashMap<String, String>,
    commands: Vec<String>,
    runtime_errors: Vec<codeforge_contracts::RuntimeErrorReport>,
    instances_created: usize,
}

/// Configurable sandbox double
pub struct MockSandboxClient {
    state: RwLock<MockSandboxState>,
    fail_deploys: bool,
    fail_runtime_errors: RwLock<bool>,
}

impl MockSandboxClient {
    /// Every call succeeds; preview is ready immediately
    pub fn healthy() -> Self {
        Self {
            state: RwLock::new(MockSandboxState::default()),
            fail_deploys: false,
            fail_runtime_errors: RwLock::new(false),
        }
    }

    /// `deploy` always reports failure
    pub fn failing_deploys() -> Self {
        Self {
            fail_deploys: true,
            ..Self::healthy()
        }
    }

    pub async fn set_file(&self, path: &str, contents: &str) {
        self.state
            .write()
            .await
            .files
            .insert(path.to_string(), contents.to_string());
    }

    pub async fn set_runtime_errors(
        &self,
        errors: Vec<codeforge_contracts::RuntimeErrorReport>,
    ) {
        self.state.write().await.runtime_errors = errors;
    }

    pub async fn fail_runtime_errors(&self, fail: bool) {
        *self.fail_runtime_errors.write().await = fail;
    }

    pub async fn executed_commands(&self) -> Vec<String> {
        self.state.read().await.commands.clone()
    }

    pub async fn instances_created(&self) -> usize {
        self.state.read().await.instances_created
    }
}

#[async_trait]
impl SandboxClient for MockSandboxClient {
    async fn create_instance(&self, project_name: &str) -> CreateInstanceResponse {
        let mut state = self.state.write().await;
        state.instances_created += 1;
        CreateInstanceResponse {
            success: true,
            instance_id: Some(format!("sbx-{}-{}", project_name, state.instances_created)),
            error: None,
        }
    }

    async fn get_files(&self, _instance_id: &str, paths: &[String]) -> GetFilesResponse {
        let state = self.state.read().await;
        let files = paths
            .iter()
            .filter_map(|path| {
                state.files.get(path).map(|contents| SandboxFile {
                    path: path.clone(),
                    contents: contents.clone(),
                })
            })
            .collect();
        GetFilesResponse {
            success: true,
            files,
            error: None,
        }
    }

    async fn execute_commands(
        &self,
        _instance_id: &str,
        commands: &[String],
        _timeout_secs: Option<u64>,
    ) -> ExecuteCommandsResponse {
        let mut state = self.state.write().await;
        state.commands.extend(commands.iter().cloned());
        ExecuteCommandsResponse {
            success: true,
            results: commands
                .iter()
                .map(|command| CommandOutput {
                    command: command.clone(),
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                })
                .collect(),
            error: None,
        }
    }

    async fn get_logs(
        &self,
        _instance_id: &str,
        _reset: bool,
        _duration_seconds: Option<u64>,
    ) -> LogsResponse {
        LogsResponse {
            success: true,
            logs: String::new(),
            error: None,
        }
    }

    async fn run_static_analysis(
        &self,
        _instance_id: &str,
        _files: Option<&[String]>,
    ) -> StaticAnalysisResponse {
        StaticAnalysisResponse {
            success: true,
            issues: Vec::new(),
            error: None,
        }
    }

    async fn fetch_runtime_errors(
        &self,
        _instance_id: &str,
        clear: bool,
    ) -> RuntimeErrorsResponse {
        if *self.fail_runtime_errors.read().await {
            return RuntimeErrorsResponse {
                success: false,
                errors: Vec::new(),
                error: Some("log drain unavailable".to_string()),
            };
        }
        let mut state = self.state.write().await;
        let errors = state.runtime_errors.clone();
        if clear {
            state.runtime_errors.clear();
        }
        RuntimeErrorsResponse {
            success: true,
            errors,
            error: None,
        }
    }

    async fn update_project_name(&self, _instance_id: &str, _name: &str) -> BasicResponse {
        BasicResponse::ok()
    }

    async fn deploy(&self, _instance_id: &str, files: &[SandboxFile]) -> BasicResponse {
        if self.fail_deploys {
            return BasicResponse::err("sandbox rejected the deploy");
        }
        let mut state = self.state.write().await;
        for file in files {
            state.files.insert(file.path.clone(), file.contents.clone());
        }
        BasicResponse::ok()
    }

    async fn preview_status(&self, instance_id: &str) -> PreviewStatusResponse {
        PreviewStatusResponse {
            success: true,
            ready: true,
            preview_url: Some(format!("https://{instance_id}.preview.test")),
            error: None,
        }
    }
}

// ============================================================================
// Mock deploy client and secrets provider
// ============================================================================

/// Deploy client double; succeeds unless configured otherwise
#[derive(Default)]
pub struct MockDeployClient {
    pub fail_with: Option<String>,
    pub preview_expired: bool,
}

#[async_trait]
impl DeployClient for MockDeployClient {
    async fn deploy(
        &self,
        project_name: &str,
        _files: &[SandboxFile],
        _credentials: &CloudflareCredentials,
    ) -> CloudDeployResponse {
        if self.preview_expired {
            return CloudDeployResponse {
                success: false,
                deployment_url: None,
                preview_expired: true,
                error: Some("PREVIEW_EXPIRED".to_string()),
            };
        }
        if let Some(error) = &self.fail_with {
            return CloudDeployResponse {
                success: false,
                deployment_url: None,
                preview_expired: false,
                error: Some(error.clone()),
            };
        }
        CloudDeployResponse {
            success: true,
            deployment_url: Some(format!("https://{project_name}.workers.test")),
            preview_expired: false,
            error: None,
        }
    }
}

/// Secrets provider backed by a map
#[derive(Default)]
pub struct InMemorySecretsProvider {
    credentials: RwLock<HashMap<String, CloudflareCredentials>>,
}

impl InMemorySecretsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user_id: &str, credentials: CloudflareCredentials) {
        self.credentials
            .write()
            .await
            .insert(user_id.to_string(), credentials);
    }
}

#[async_trait]
impl SecretsProvider for InMemorySecretsProvider {
    async fn get_cloudflare_credentials(&self, user_id: &str) -> Option<CloudflareCredentials> {
        self.credentials.read().await.get(user_id).cloned()
    }
}

// ============================================================================
// Inert agent handle
// ============================================================================

/// AgentHandle whose capabilities do nothing (tool unit tests)
#[derive(Default)]
pub struct NullAgentHandle {
    pub queued: Mutex<Vec<String>>,
    pub feedback: Mutex<Vec<String>>,
    pub events: Mutex<Vec<SessionEvent>>,
}

#[async_trait]
impl AgentHandle for NullAgentHandle {
    async fn read_files(&self, _paths: &[String]) -> Vec<FileRecord> {
        Vec::new()
    }

    async fn exec_commands(&self, commands: &[String]) -> ExecuteCommandsResponse {
        ExecuteCommandsResponse {
            success: true,
            results: commands
                .iter()
                .map(|command| CommandOutput {
                    command: command.clone(),
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                })
                .collect(),
            error: None,
        }
    }

    async fn get_logs(&self, _reset: bool) -> LogsResponse {
        LogsResponse {
            success: true,
            logs: String::new(),
            error: None,
        }
    }

    async fn deploy_preview(&self) -> Result<String> {
        Ok("https://preview.test".to_string())
    }

    async fn broadcast(&self, event: SessionEvent) {
        self.events.lock().await.push(event);
    }

    async fn rename_project(&self, name: &str) -> Result<String> {
        Ok(name.to_string())
    }

    async fn queue_user_request(&self, text: String) {
        self.queued.lock().await.push(text);
    }

    async fn record_feedback(&self, text: String) {
        self.feedback.lock().await.push(text);
    }

    async fn wait_for_generation(&self) {}

    async fn wait_for_debug(&self) {}

    async fn deep_debug(&self, _issue: String, _focus_paths: Vec<String>) -> Result<String> {
        Ok(String::new())
    }

    async fn git_info(&self) -> serde_json::Value {
        json!({"head": null, "commits": 0})
    }
}
