// Session agent
//
// The composition root for one session: wires the state store,
// conversation store, file manager, git store, event bus, cancellation,
// deployment manager, plugins, deep debug and the project-type
// controller together, and enforces the in-flight rules (one generation,
// one deep debug, serialized deploys).
//
// Tools and the deep-debug loop never see this struct - they get the
// trimmed AgentHandle capability surface implemented per variant.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use codeforge_contracts::{ProjectType, SessionEvent, SessionInfo};

use crate::cancel::CancellationController;
use crate::controllers::{PhasicAppController, WorkflowController};
use crate::conversation::{ConversationBackend, ConversationStore};
use crate::debug::{DeepDebugAssistant, DeepDebugRequest};
use crate::deploy::{DeployClient, DeploymentManager, NoopDeployObserver, SecretsProvider};
use crate::dispatcher::ProjectDispatcher;
use crate::error::{AgentError, Result};
use crate::events::EventBus;
use crate::files::FileManager;
use crate::inference::InferenceClient;
use crate::lifecycle::{initial_app_state, initial_workflow_state, SessionInit};
use crate::limits::is_valid_project_name;
use crate::sandbox::{ExecuteCommandsResponse, LogsResponse, SandboxClient};
use crate::scaffold::{app_scaffold, workflow_scaffold, ScaffoldRequest};
use crate::state::{
    AppSessionState, FileRecord, SessionState, WorkflowMetadata, WorkflowSessionState,
};
use crate::state_store::{StateBackend, StateStore};
use crate::tools::{app_tools, common_tools, workflow_tools, AgentHandle};
use crate::plugins::PluginManager;
use crate::vcs::{GitStore, VcsBackend};

/// Durable backends a session persists through
#[derive(Clone)]
pub struct SessionBackends {
    pub conversation: Arc<dyn ConversationBackend>,
    pub state: Arc<dyn StateBackend>,
    pub vcs: Arc<dyn VcsBackend>,
}

/// External service clients
#[derive(Clone)]
pub struct SessionClients {
    pub sandbox: Arc<dyn SandboxClient>,
    pub inference: Arc<dyn InferenceClient>,
    pub deploy: Arc<dyn DeployClient>,
    pub secrets: Arc<dyn SecretsProvider>,
}

/// App-variant component set
#[derive(Clone)]
pub struct AppParts {
    pub state: Arc<StateStore<AppSessionState>>,
    pub files: Arc<FileManager<AppSessionState>>,
    pub deployment: Arc<DeploymentManager<AppSessionState>>,
    pub controller: Arc<PhasicAppController>,
    pub debug: Arc<DeepDebugAssistant<AppSessionState>>,
    pub git: Arc<GitStore>,
}

/// Workflow-variant component set
#[derive(Clone)]
pub struct WorkflowParts {
    pub state: Arc<StateStore<WorkflowSessionState>>,
    pub files: Arc<FileManager<WorkflowSessionState>>,
    pub deployment: Arc<DeploymentManager<WorkflowSessionState>>,
    pub controller: Arc<WorkflowController>,
    pub debug: Arc<DeepDebugAssistant<WorkflowSessionState>>,
    pub git: Arc<GitStore>,
}

/// The active controller and its components
#[derive(Clone)]
pub enum SessionVariant {
    App(AppParts),
    Workflow(WorkflowParts),
}

pub struct SessionAgent {
    session_id: Uuid,
    user_id: String,
    events: Arc<EventBus>,
    cancel: Arc<CancellationController>,
    conversation: Arc<ConversationStore>,
    plugins: Arc<PluginManager>,
    dispatcher: ProjectDispatcher,
    clients: SessionClients,
    generation: Mutex<Option<JoinHandle<()>>>,
    generating: watch::Sender<bool>,
}

impl SessionAgent {
    /// Initialize a fresh session: state, VCS, scaffold commit, first
    /// sandbox deploy.
    pub async fn create(
        init: SessionInit,
        backends: SessionBackends,
        clients: SessionClients,
    ) -> Result<Arc<Self>> {
        info!(
            agent_id = %init.agent_id,
            session_id = %init.session_id,
            user_id = %init.user_id,
            "Initializing session"
        );

        let agent = match init.project_type {
            ProjectType::App => {
                let state = initial_app_state(&init);
                Self::assemble(init.session_id, init.user_id.clone(), backends, clients, |b, c, shared| {
                    build_app_variant(state, b, c, shared)
                })
                .await?
            }
            ProjectType::Workflow => {
                let state = initial_workflow_state(&init);
                Self::assemble(init.session_id, init.user_id.clone(), backends, clients, |b, c, shared| {
                    build_workflow_variant(state, b, c, shared)
                })
                .await?
            }
        };

        agent.commit_scaffold().await?;
        agent.initial_deploy().await;
        agent.plugins.on_initialize().await;
        Ok(agent)
    }

    /// Rebuild a session from durable state on a cold start. Transient
    /// caches (cancel token, preview URL, debug slot) start empty.
    pub async fn rehydrate(
        session_id: Uuid,
        backends: SessionBackends,
        clients: SessionClients,
    ) -> Result<Arc<Self>> {
        let row = backends
            .state
            .load(session_id)
            .await?
            .ok_or_else(|| AgentError::storage(format!("no state row for session {session_id}")))?;

        let project_type: ProjectType = row
            .get("project_type")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| AgentError::storage("state row missing project_type"))?;

        let user_id = row
            .pointer("/inference_context/user_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let agent = match project_type {
            ProjectType::App => {
                let state: AppSessionState = serde_json::from_value(row)
                    .map_err(|e| AgentError::storage(e.to_string()))?;
                Self::assemble(session_id, user_id, backends, clients, |b, c, shared| {
                    build_app_variant(state, b, c, shared)
                })
                .await?
            }
            ProjectType::Workflow => {
                let state: WorkflowSessionState = serde_json::from_value(row)
                    .map_err(|e| AgentError::storage(e.to_string()))?;
                Self::assemble(session_id, user_id, backends, clients, |b, c, shared| {
                    build_workflow_variant(state, b, c, shared)
                })
                .await?
            }
        };

        info!(session_id = %session_id, "Session rehydrated");
        Ok(agent)
    }

    async fn assemble<F>(
        session_id: Uuid,
        user_id: String,
        backends: SessionBackends,
        clients: SessionClients,
        build: F,
    ) -> Result<Arc<Self>>
    where
        F: FnOnce(&SessionBackends, &SessionClients, &SharedParts) -> BuildFuture,
    {
        let events = Arc::new(EventBus::new());
        let cancel = Arc::new(CancellationController::new());
        let plugins = Arc::new(PluginManager::new(session_id, events.clone()));
        let conversation = Arc::new(ConversationStore::new(
            session_id,
            backends.conversation.clone(),
        ));
        conversation.hydrate().await?;

        let shared = SharedParts {
            session_id,
            events: events.clone(),
            cancel: cancel.clone(),
            plugins: plugins.clone(),
            conversation: conversation.clone(),
        };
        let variant = build(&backends, &clients, &shared).await?;

        let (generating, _) = watch::channel(false);
        let agent = Arc::new(Self {
            session_id,
            user_id,
            events,
            cancel,
            conversation,
            plugins,
            dispatcher: ProjectDispatcher::new(),
            clients,
            generation: Mutex::new(None),
            generating,
        });

        let replay = agent.dispatcher.attach(variant).await;
        if replay {
            agent.start_generation().await;
        }
        Ok(agent)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn cancel(&self) -> &Arc<CancellationController> {
        &self.cancel
    }

    pub fn conversation(&self) -> &Arc<ConversationStore> {
        &self.conversation
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    pub async fn variant(&self) -> Option<SessionVariant> {
        self.dispatcher.variant().await
    }

    pub async fn project_type(&self) -> ProjectType {
        self.dispatcher
            .project_type()
            .await
            .unwrap_or(ProjectType::App)
    }

    pub fn is_generating(&self) -> bool {
        *self.generating.borrow()
    }

    /// Wait until the generation track settles
    pub async fn wait_for_generation(&self) {
        let mut rx = self.generating.subscribe();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub async fn session_info(&self) -> SessionInfo {
        let (project_name, query, preview_url) = match self.variant().await {
            Some(SessionVariant::App(parts)) => {
                let s = parts.state.get().await;
                (
                    s.base.project_name,
                    s.base.query,
                    parts.deployment.preview_url().await,
                )
            }
            Some(SessionVariant::Workflow(parts)) => {
                let s = parts.state.get().await;
                (
                    s.base.project_name,
                    s.base.query,
                    parts.deployment.preview_url().await,
                )
            }
            None => (String::new(), String::new(), None),
        };
        SessionInfo {
            session_id: self.session_id,
            project_name,
            project_type: self.project_type().await,
            query,
            preview_url,
        }
    }

    // =========================================================================
    // Generation track
    // =========================================================================

    /// Kick off a generation run. Returns false when one is already in
    /// flight (the request is ignored, not queued).
    pub async fn start_generation(self: &Arc<Self>) -> bool {
        let mut guard = self.generation.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return false;
            }
        }
        if !self.dispatcher.start_ready().await {
            // Controller not attached yet; the dispatcher queued the
            // start and attach() will replay it.
            return true;
        }
        let Some(variant) = self.dispatcher.variant().await else {
            return false;
        };

        let agent = self.clone();
        // send_replace updates the value even with no subscribers yet
        self.generating.send_replace(true);
        let handle = tokio::spawn(async move {
            let result = match &variant {
                SessionVariant::App(parts) => parts.controller.generate_all().await,
                SessionVariant::Workflow(parts) => {
                    let handle: Arc<dyn AgentHandle> =
                        Arc::new(agent.workflow_handle(parts.clone()));
                    parts.controller.generate_all(handle).await
                }
            };
            match result {
                Ok(outcome) if outcome.is_cancelled() => {
                    info!(session_id = %agent.session_id, "Generation ended: cancelled");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(session_id = %agent.session_id, error = %e, "Generation failed");
                }
            }
            agent.generating.send_replace(false);
        });
        *guard = Some(handle);
        true
    }

    /// Abort the in-flight operation and acknowledge the stop
    pub async fn stop_generation(&self) {
        self.cancel.cancel();
        if let Some(SessionVariant::App(parts)) = self.variant().await {
            parts
                .state
                .update(|s| s.base.should_be_generating = false)
                .await;
        }
        self.events
            .broadcast(SessionEvent::GenerationStopped)
            .await;
    }

    // =========================================================================
    // Export surface
    // =========================================================================

    /// Raw git objects plus publishing context for this session
    pub async fn export_git_objects(&self) -> Result<crate::export::GitExport> {
        match self.variant().await {
            Some(SessionVariant::App(parts)) => {
                Ok(crate::export::export_git_objects(&parts.state, &parts.git).await)
            }
            Some(SessionVariant::Workflow(parts)) => {
                Ok(crate::export::export_git_objects(&parts.state, &parts.git).await)
            }
            None => Err(AgentError::validation("session controller not ready")),
        }
    }

    /// Publish the session to GitHub via the export client
    pub async fn push_to_github(
        &self,
        client: &dyn crate::export::ExportClient,
        index: Option<&Arc<dyn crate::export::SessionIndexBackend>>,
        request: crate::export::GithubPushRequest,
    ) -> Result<String> {
        match self.variant().await {
            Some(SessionVariant::App(parts)) => {
                crate::export::push_to_github(
                    &parts.state,
                    &parts.git,
                    &self.events,
                    client,
                    index,
                    request,
                )
                .await
            }
            Some(SessionVariant::Workflow(parts)) => {
                crate::export::push_to_github(
                    &parts.state,
                    &parts.git,
                    &self.events,
                    client,
                    index,
                    request,
                )
                .await
            }
            None => Err(AgentError::validation("session controller not ready")),
        }
    }

    // =========================================================================
    // Deep-debug track
    // =========================================================================

    /// Run the deep-debug assistant. Single-flight per session; a
    /// concurrent call joins the in-flight run.
    pub async fn run_deep_debug(
        &self,
        issue: String,
        focus_paths: Vec<String>,
    ) -> Result<String> {
        match self.variant().await {
            Some(SessionVariant::App(parts)) => {
                let handle: Arc<dyn AgentHandle> = Arc::new(self.app_handle(parts.clone()));
                let previous = parts
                    .state
                    .get()
                    .await
                    .base
                    .last_deep_debug_transcript
                    .clone();
                let outcome = parts
                    .debug
                    .run(
                        DeepDebugRequest {
                            issue,
                            previous_transcript: previous,
                            focus_paths,
                        },
                        handle,
                    )
                    .await;
                outcome_to_result(outcome)
            }
            Some(SessionVariant::Workflow(parts)) => {
                let handle: Arc<dyn AgentHandle> =
                    Arc::new(self.workflow_handle(parts.clone()));
                let previous = parts
                    .state
                    .get()
                    .await
                    .base
                    .last_deep_debug_transcript
                    .clone();
                let outcome = parts
                    .debug
                    .run(
                        DeepDebugRequest {
                            issue,
                            previous_transcript: previous,
                            focus_paths,
                        },
                        handle,
                    )
                    .await;
                outcome_to_result(outcome)
            }
            None => Err(AgentError::validation("session controller not ready")),
        }
    }

    // =========================================================================
    // Handles
    // =========================================================================

    pub fn app_handle(&self, parts: AppParts) -> AppAgentHandle {
        AppAgentHandle {
            parts,
            sandbox: self.clients.sandbox.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            conversation: self.conversation.clone(),
            generating: self.generating.subscribe(),
        }
    }

    pub fn workflow_handle(&self, parts: WorkflowParts) -> WorkflowAgentHandle {
        WorkflowAgentHandle {
            parts,
            sandbox: self.clients.sandbox.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            conversation: self.conversation.clone(),
            generating: self.generating.subscribe(),
        }
    }

    // =========================================================================
    // Initialize internals
    // =========================================================================

    async fn commit_scaffold(&self) -> Result<()> {
        match self.variant().await {
            Some(SessionVariant::App(parts)) => {
                let snapshot = parts.state.get().await;
                let scaffold = app_scaffold(&snapshot.base.project_name);
                parts
                    .files
                    .save_generated_files(scaffold.all_files, "initial scaffold")
                    .await?;
            }
            Some(SessionVariant::Workflow(parts)) => {
                let snapshot = parts.state.get().await;
                let scaffold = workflow_scaffold(&ScaffoldRequest {
                    workflow_name: snapshot.base.project_name.clone(),
                    workflow_code: None,
                    metadata: None,
                });
                parts
                    .files
                    .save_generated_files(scaffold.all_files, "initial scaffold")
                    .await?;
            }
            None => {}
        }
        Ok(())
    }

    async fn initial_deploy(&self) {
        let token = self.cancel.get_or_create();
        let result = match self.variant().await {
            Some(SessionVariant::App(parts)) => {
                parts
                    .deployment
                    .deploy_to_sandbox(Vec::new(), false, None, true, &token, &NoopDeployObserver)
                    .await
            }
            Some(SessionVariant::Workflow(parts)) => {
                parts
                    .deployment
                    .deploy_to_sandbox(Vec::new(), false, None, true, &token, &NoopDeployObserver)
                    .await
            }
            None => return,
        };
        if let Err(e) = result {
            warn!(session_id = %self.session_id, error = %e, "Initial deploy failed");
        }
    }
}

fn outcome_to_result(outcome: crate::debug::DeepDebugOutcome) -> Result<String> {
    if outcome.success {
        Ok(outcome.transcript)
    } else {
        Err(AgentError::inference(
            outcome
                .error
                .unwrap_or_else(|| "deep debug failed".to_string()),
        ))
    }
}

// ============================================================================
// Variant construction
// ============================================================================

struct SharedParts {
    session_id: Uuid,
    events: Arc<EventBus>,
    cancel: Arc<CancellationController>,
    plugins: Arc<PluginManager>,
    conversation: Arc<ConversationStore>,
}

type BuildFuture =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<SessionVariant>> + Send>>;

fn persist_observer<S: SessionState>(
    session_id: Uuid,
    backend: Arc<dyn StateBackend>,
    plugins: Arc<PluginManager>,
) -> crate::state_store::StateObserver<S> {
    Arc::new(move |old: &S, new: &S| {
        let old_json = serde_json::to_value(old).unwrap_or_default();
        let new_json = serde_json::to_value(new).unwrap_or_default();
        let backend = backend.clone();
        let plugins = plugins.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.save(session_id, &new_json).await {
                warn!(session_id = %session_id, error = %e, "Failed to persist state row");
            }
            plugins.on_state_update(&old_json, &new_json).await;
        });
    })
}

fn build_app_variant(
    initial: AppSessionState,
    backends: &SessionBackends,
    clients: &SessionClients,
    shared: &SharedParts,
) -> BuildFuture {
    let backends = backends.clone();
    let clients = clients.clone();
    let (session_id, events, cancel, plugins, conversation) = (
        shared.session_id,
        shared.events.clone(),
        shared.cancel.clone(),
        shared.plugins.clone(),
        shared.conversation.clone(),
    );
    Box::pin(async move {
        let state = Arc::new(StateStore::new(initial));
        state
            .set_observer(persist_observer(
                session_id,
                backends.state.clone(),
                plugins.clone(),
            ))
            .await;

        let git = Arc::new(GitStore::new(session_id, Some(backends.vcs.clone())));
        git.init().await?;
        let files = Arc::new(FileManager::new(state.clone(), git.clone()));
        let deployment = Arc::new(DeploymentManager::new(
            state.clone(),
            files.clone(),
            clients.sandbox.clone(),
            clients.deploy.clone(),
            clients.secrets.clone(),
            events.clone(),
        ));
        // The debug loop must not await its own track
        let mut debug_tools = common_tools();
        debug_tools.merge(app_tools());
        debug_tools.unregister("deep_debugger");
        debug_tools.unregister("wait_for_debug");
        let debug = Arc::new(DeepDebugAssistant::new(
            state.clone(),
            deployment.clone(),
            clients.inference.clone(),
            debug_tools,
            events.clone(),
        ));
        let controller = Arc::new(PhasicAppController::new(
            state.clone(),
            files.clone(),
            deployment.clone(),
            conversation,
            clients.inference.clone(),
            events,
            plugins,
            cancel,
        ));
        Ok(SessionVariant::App(AppParts {
            state,
            files,
            deployment,
            controller,
            debug,
            git,
        }))
    })
}

fn build_workflow_variant(
    initial: WorkflowSessionState,
    backends: &SessionBackends,
    clients: &SessionClients,
    shared: &SharedParts,
) -> BuildFuture {
    let backends = backends.clone();
    let clients = clients.clone();
    let (session_id, events, cancel, plugins, conversation) = (
        shared.session_id,
        shared.events.clone(),
        shared.cancel.clone(),
        shared.plugins.clone(),
        shared.conversation.clone(),
    );
    Box::pin(async move {
        let state = Arc::new(StateStore::new(initial));
        state
            .set_observer(persist_observer(
                session_id,
                backends.state.clone(),
                plugins.clone(),
            ))
            .await;

        let git = Arc::new(GitStore::new(session_id, Some(backends.vcs.clone())));
        git.init().await?;
        let files = Arc::new(FileManager::new(state.clone(), git.clone()));
        let deployment = Arc::new(DeploymentManager::new(
            state.clone(),
            files.clone(),
            clients.sandbox.clone(),
            clients.deploy.clone(),
            clients.secrets.clone(),
            events.clone(),
        ));

        // The dialogue IS the generation, so it must not wait on itself;
        // the debug loop likewise must not await its own track
        let mut tools = common_tools();
        tools.merge(workflow_tools());
        tools.unregister("wait_for_generation");
        let mut debug_tools = common_tools();
        debug_tools.unregister("deep_debugger");
        debug_tools.unregister("wait_for_debug");
        let debug = Arc::new(DeepDebugAssistant::new(
            state.clone(),
            deployment.clone(),
            clients.inference.clone(),
            debug_tools,
            events.clone(),
        ));
        let controller = Arc::new(WorkflowController::new(
            state.clone(),
            files.clone(),
            deployment.clone(),
            conversation,
            clients.inference.clone(),
            events,
            plugins,
            cancel,
            tools,
        ));
        Ok(SessionVariant::Workflow(WorkflowParts {
            state,
            files,
            deployment,
            controller,
            debug,
            git,
        }))
    })
}

// ============================================================================
// Agent handles (trimmed capability surface for tools)
// ============================================================================

// One macro expands the shared capability set per handle type; the
// variant-only methods are passed through as tokens so the async_trait
// attribute sees one complete impl block.
macro_rules! impl_agent_handle {
    ($handle:ty, { $($variant_methods:tt)* }) => {
        impl $handle {
            async fn instance_id(&self) -> Option<String> {
                self.parts
                    .state
                    .get()
                    .await
                    .base()
                    .sandbox_instance_id
                    .clone()
            }
        }

        #[async_trait::async_trait]
        impl AgentHandle for $handle {
            async fn read_files(&self, paths: &[String]) -> Vec<FileRecord> {
                let snapshot = self.parts.state.get().await;
                snapshot
                    .base()
                    .generated_files_map
                    .values()
                    .filter(|f| paths.is_empty() || paths.contains(&f.file_path))
                    .cloned()
                    .collect()
            }

            async fn exec_commands(&self, commands: &[String]) -> ExecuteCommandsResponse {
                self.parts.deployment.execute_commands(commands).await
            }

            async fn get_logs(&self, reset: bool) -> LogsResponse {
                let Some(instance_id) = self.instance_id().await else {
                    return LogsResponse {
                        success: false,
                        logs: String::new(),
                        error: Some("no sandbox instance".to_string()),
                    };
                };
                self.sandbox.get_logs(&instance_id, reset, None).await
            }

            async fn deploy_preview(&self) -> Result<String> {
                let token = self.cancel.get_or_create();
                self.parts
                    .deployment
                    .deploy_to_sandbox(
                        Vec::new(),
                        true,
                        None,
                        false,
                        &token,
                        &NoopDeployObserver,
                    )
                    .await
            }

            async fn broadcast(&self, event: SessionEvent) {
                self.events.broadcast(event).await;
            }

            async fn rename_project(&self, name: &str) -> Result<String> {
                if !is_valid_project_name(name) {
                    return Err(AgentError::validation(format!(
                        "invalid project name {name:?}: must match ^[a-z0-9-_]{{3,50}}$"
                    )));
                }
                if let Some(instance_id) = self.instance_id().await {
                    let response = self.sandbox.update_project_name(&instance_id, name).await;
                    if !response.success {
                        warn!(
                            error = response.error.as_deref().unwrap_or("unknown"),
                            "Sandbox rename failed; state updated anyway"
                        );
                    }
                }
                let name_owned = name.to_string();
                self.parts
                    .state
                    .update(|s| s.base_mut().project_name = name_owned.clone())
                    .await;
                self.events
                    .broadcast(SessionEvent::ProjectNameUpdated {
                        project_name: name.to_string(),
                    })
                    .await;
                Ok(name.to_string())
            }

            async fn queue_user_request(&self, text: String) {
                self.conversation
                    .add_message(codeforge_contracts::ConversationMessage::user(text.clone()))
                    .await;
                self.parts
                    .state
                    .update(|s| s.base_mut().pending_user_inputs.push(text))
                    .await;
            }

            async fn record_feedback(&self, text: String) {
                self.parts
                    .state
                    .update(|s| s.base_mut().project_updates.push(text))
                    .await;
            }

            async fn wait_for_generation(&self) {
                let mut rx = self.generating.clone();
                while *rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            }

            async fn wait_for_debug(&self) {
                self.parts.debug.wait().await;
            }

            async fn deep_debug(
                &self,
                issue: String,
                focus_paths: Vec<String>,
            ) -> Result<String> {
                let previous = self
                    .parts
                    .state
                    .get()
                    .await
                    .base()
                    .last_deep_debug_transcript
                    .clone();
                let request = DeepDebugRequest {
                    issue,
                    previous_transcript: previous,
                    focus_paths,
                };
                let handle: Arc<dyn AgentHandle> = Arc::new(self.clone());
                let outcome = self.parts.debug.run(request, handle).await;
                if outcome.success {
                    Ok(outcome.transcript)
                } else {
                    Err(AgentError::inference(
                        outcome.error.unwrap_or_else(|| "deep debug failed".to_string()),
                    ))
                }
            }

            async fn git_info(&self) -> serde_json::Value {
                let head = self.parts.git.head().await;
                let tree = self.parts.git.head_tree().await;
                json!({
                    "head": head,
                    "commits": self.parts.git.commit_count().await,
                    "files": tree.keys().collect::<Vec<_>>(),
                })
            }

            $($variant_methods)*
        }
    };
}

/// Capability surface for app sessions
#[derive(Clone)]
pub struct AppAgentHandle {
    parts: AppParts,
    sandbox: Arc<dyn SandboxClient>,
    events: Arc<EventBus>,
    cancel: Arc<CancellationController>,
    conversation: Arc<ConversationStore>,
    generating: watch::Receiver<bool>,
}

impl_agent_handle!(AppAgentHandle, {
    async fn alter_blueprint(&self, patch: serde_json::Value) -> Result<()> {
        self.parts.controller.alter_blueprint(patch).await
    }

    async fn regenerate_file(&self, path: String) -> Result<FileRecord> {
        self.parts.controller.regenerate_file(path).await
    }
});

/// Capability surface for workflow sessions
#[derive(Clone)]
pub struct WorkflowAgentHandle {
    parts: WorkflowParts,
    sandbox: Arc<dyn SandboxClient>,
    events: Arc<EventBus>,
    cancel: Arc<CancellationController>,
    conversation: Arc<ConversationStore>,
    generating: watch::Receiver<bool>,
}

impl_agent_handle!(WorkflowAgentHandle, {
    async fn generate_files(&self, files: Vec<FileRecord>) -> Result<()> {
        self.parts.controller.apply_generated_files(files).await
    }

    async fn configure_workflow_metadata(&self, metadata: WorkflowMetadata) -> Result<()> {
        self.parts.controller.apply_metadata(metadata).await
    }
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{InferenceRequest, InferenceResponse, InferenceStream};
    use crate::lifecycle::SessionInit;
    use crate::memory::{
        InMemoryConversationBackend, InMemorySecretsProvider, InMemoryStateBackend,
        InMemoryVcsBackend, MockDeployClient, MockSandboxClient, ScriptedInferenceClient,
    };
    use crate::state::DevState;
    use codeforge_contracts::{AgentMode, ToolCall};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn init(project_type: ProjectType, query: &str) -> SessionInit {
        SessionInit {
            session_id: Uuid::now_v7(),
            query: query.to_string(),
            project_type,
            hostname: "edge-1".to_string(),
            template_name: None,
            agent_mode: AgentMode::Deterministic,
            user_id: "user-1".to_string(),
            agent_id: Uuid::now_v7(),
        }
    }

    fn backends() -> SessionBackends {
        SessionBackends {
            conversation: Arc::new(InMemoryConversationBackend::new()),
            state: Arc::new(InMemoryStateBackend::new()),
            vcs: Arc::new(InMemoryVcsBackend::new()),
        }
    }

    fn clients(inference: Arc<dyn crate::inference::InferenceClient>) -> SessionClients {
        SessionClients {
            sandbox: Arc::new(MockSandboxClient::healthy()),
            inference,
            deploy: Arc::new(MockDeployClient::default()),
            secrets: Arc::new(InMemorySecretsProvider::default()),
        }
    }

    async fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(serde_json::from_str(&frame).unwrap());
        }
        events
    }

    fn kinds(events: &[serde_json::Value]) -> Vec<String> {
        events
            .iter()
            .map(|e| e["type"].as_str().unwrap().to_string())
            .collect()
    }

    const BLUEPRINT_JSON: &str = r#"{"title":"Counter","description":"a counter app","phases":[
        {"name":"mvp","description":"the counter ui","files":[{"path":"src/App.tsx","purpose":"ui"}]}
    ]}"#;

    const IMPLEMENT_RESPONSE: &str = "<file path=\"src/App.tsx\" purpose=\"ui\">\nexport default function App() { return <button>0</button>; }\n</file>";

    #[tokio::test]
    async fn test_happy_path_app_generation() {
        let inference = Arc::new(ScriptedInferenceClient::new(vec![
            InferenceResponse {
                text: BLUEPRINT_JSON.to_string(),
                tool_calls: Vec::new(),
            },
            InferenceResponse {
                text: IMPLEMENT_RESPONSE.to_string(),
                tool_calls: Vec::new(),
            },
        ]));
        let agent = SessionAgent::create(
            init(ProjectType::App, "make a counter"),
            backends(),
            clients(inference),
        )
        .await
        .unwrap();

        let (channel, mut rx) = agent.events().attach().await;
        crate::control::handle_frame(&agent, channel, r#"{"type":"generate_all"}"#).await;
        agent.wait_for_generation().await;

        let events = drain(&mut rx).await;
        let kinds = kinds(&events);
        assert!(kinds.contains(&"generation_started".to_string()));
        assert!(kinds.iter().any(|k| k == "phase_generating"));
        assert!(events.iter().any(|e| e["type"] == "file_generated"
            && e["file_path"] == "src/App.tsx"));
        assert!(events.iter().any(|e| e["type"] == "deployment_completed"
            && !e["preview_url"].as_str().unwrap().is_empty()));
        assert!(kinds.contains(&"generation_completed".to_string()));

        // generation_started strictly precedes generation_completed
        let started = kinds.iter().position(|k| k == "generation_started").unwrap();
        let completed = kinds.iter().position(|k| k == "generation_completed").unwrap();
        assert!(started < completed);

        let Some(SessionVariant::App(parts)) = agent.variant().await else {
            panic!("expected app variant");
        };
        let state = parts.state.get().await;
        assert!(state.mvp_generated);
        assert_eq!(state.current_dev_state, DevState::Idle);
        assert!(!state.base.should_be_generating);
        assert_eq!(state.phases_counter, 1);
        // One commit per phase on top of the scaffold commit
        assert!(parts.git.commit_count().await >= 2);
    }

    /// Inference client that parks the second call until released
    struct GateSecondCall {
        inner: ScriptedInferenceClient,
        gate: Arc<tokio::sync::Notify>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl crate::inference::InferenceClient for GateSecondCall {
        async fn execute_inference_stream(
            &self,
            request: InferenceRequest,
        ) -> Result<InferenceStream> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                self.gate.notified().await;
            }
            self.inner.execute_inference_stream(request).await
        }
    }

    #[tokio::test]
    async fn test_stop_mid_generation_suppresses_file_events() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let inference = Arc::new(GateSecondCall {
            inner: ScriptedInferenceClient::new(vec![
                InferenceResponse {
                    text: BLUEPRINT_JSON.to_string(),
                    tool_calls: Vec::new(),
                },
                InferenceResponse {
                    text: IMPLEMENT_RESPONSE.to_string(),
                    tool_calls: Vec::new(),
                },
            ]),
            gate: gate.clone(),
            calls: AtomicUsize::new(0),
        });
        let agent = SessionAgent::create(
            init(ProjectType::App, "make a counter"),
            backends(),
            clients(inference),
        )
        .await
        .unwrap();

        let (channel, mut rx) = agent.events().attach().await;
        crate::control::handle_frame(&agent, channel, r#"{"type":"generate_all"}"#).await;

        // Wait for the first phase to start implementing
        loop {
            match tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await {
                Ok(Some(frame)) => {
                    let event: serde_json::Value = serde_json::from_str(&frame).unwrap();
                    if event["type"] == "phase_implementing" {
                        break;
                    }
                }
                _ => panic!("never saw phase_implementing"),
            }
        }

        crate::control::handle_frame(&agent, channel, r#"{"type":"stop_generation"}"#).await;
        gate.notify_one();
        agent.wait_for_generation().await;

        let after_stop = drain(&mut rx).await;
        let kinds = kinds(&after_stop);
        assert!(kinds.contains(&"generation_stopped".to_string()));
        assert!(!kinds.iter().any(|k| k == "file_generated" || k == "phase_implemented"));

        let Some(SessionVariant::App(parts)) = agent.variant().await else {
            panic!("expected app variant");
        };
        let state = parts.state.get().await;
        assert!(!state.base.should_be_generating);
        // The interrupted phase resumes later
        assert!(state.generated_phases.iter().any(|p| !p.completed));
    }

    #[tokio::test]
    async fn test_workflow_generation_with_metadata() {
        let workflow_code =
            "export class SlackScheduler extends WorkflowEntrypoint<Env, Params> {\n\
             \tasync run(event, step) {}\n}\n";
        let inference = Arc::new(ScriptedInferenceClient::new(vec![
            InferenceResponse {
                text: String::new(),
                tool_calls: vec![
                    ToolCall {
                        id: "t1".to_string(),
                        name: "generate_files".to_string(),
                        arguments: serde_json::json!({
                            "files": [{
                                "path": "src/index.ts",
                                "purpose": "workflow entrypoint",
                                "contents": workflow_code,
                            }]
                        }),
                    },
                    ToolCall {
                        id: "t2".to_string(),
                        name: "configure_workflow_metadata".to_string(),
                        arguments: serde_json::json!({
                            "name": "slack-scheduler",
                            "description": "send a slack message on a schedule",
                            "params_schema": {
                                "type": "object",
                                "properties": {"channel": {"type": "string"}}
                            },
                            "resources": {
                                "STATE": {"kind": "kv", "resource_name": "sched-state"}
                            }
                        }),
                    },
                ],
            },
            InferenceResponse {
                text: "The workflow is ready.".to_string(),
                tool_calls: Vec::new(),
            },
        ]));
        let agent = SessionAgent::create(
            init(ProjectType::Workflow, "send a slack message on a schedule"),
            backends(),
            clients(inference),
        )
        .await
        .unwrap();

        let (channel, mut rx) = agent.events().attach().await;
        crate::control::handle_frame(&agent, channel, r#"{"type":"generate_all"}"#).await;
        agent.wait_for_generation().await;

        let events = drain(&mut rx).await;
        assert!(events.iter().any(|e| e["type"] == "file_generated"
            && e["file_path"] == "src/index.ts"));
        assert!(events.iter().any(|e| e["type"] == "generation_completed"));

        let Some(SessionVariant::Workflow(parts)) = agent.variant().await else {
            panic!("expected workflow variant");
        };
        let state = parts.state.get().await;
        let metadata = state.workflow_metadata.clone().unwrap();
        assert_eq!(metadata.name, "slack-scheduler");
        assert!(metadata.resources.contains_key("STATE"));
        assert_eq!(state.workflow_code().unwrap(), workflow_code);

        // Regenerated wrangler.jsonc reflects the kv binding
        let wrangler = state.base.generated_files_map.get("wrangler.jsonc").unwrap();
        assert!(wrangler.file_contents.contains("kv_namespaces"));
        assert!(wrangler.file_contents.contains("sched-state"));
        let readme = state.base.generated_files_map.get("README.md").unwrap();
        assert!(readme.file_contents.contains("slack-scheduler"));
    }

    #[tokio::test]
    async fn test_cloudflare_deploy_without_credentials_marks_failed() {
        let agent = SessionAgent::create(
            init(ProjectType::Workflow, "send a slack message on a schedule"),
            backends(),
            clients(Arc::new(ScriptedInferenceClient::default())),
        )
        .await
        .unwrap();
        let (_channel, mut rx) = agent.events().attach().await;

        let Some(SessionVariant::Workflow(parts)) = agent.variant().await else {
            panic!("expected workflow variant");
        };
        let result = parts.controller.deploy_to_cloudflare("user-1").await;
        assert!(result.is_err());

        let state = parts.state.get().await;
        assert_eq!(state.deployment_status, crate::state::DeploymentStatus::Failed);
        assert!(state
            .deployment_error
            .as_deref()
            .unwrap()
            .contains("credentials"));

        let events = drain(&mut rx).await;
        assert!(events.iter().any(|e| e["type"] == "cloudflare_deployment_error"
            && e["error"].as_str().unwrap().contains("credentials")));
    }

    #[tokio::test]
    async fn test_phase_ceiling_forces_finalize() {
        let inference = Arc::new(ScriptedInferenceClient::default());
        let agent = SessionAgent::create(
            init(ProjectType::App, "make a counter"),
            backends(),
            clients(inference.clone()),
        )
        .await
        .unwrap();

        let Some(SessionVariant::App(parts)) = agent.variant().await else {
            panic!("expected app variant");
        };
        // A session that already burned through the phase ceiling but
        // still has pending phase records
        parts
            .state
            .update(|s| {
                s.blueprint = Some(crate::state::Blueprint {
                    title: "counter".to_string(),
                    description: String::new(),
                    phases: Vec::new(),
                });
                s.generated_phases = vec![crate::state::PhaseRecord {
                    name: "one-more".to_string(),
                    description: "a 13th phase".to_string(),
                    files: Vec::new(),
                    completed: false,
                }];
                s.phases_counter = crate::limits::MAX_PHASES;
                s.current_dev_state = DevState::PhaseImplementing;
            })
            .await;

        let (channel, mut rx) = agent.events().attach().await;
        crate::control::handle_frame(&agent, channel, r#"{"type":"generate_all"}"#).await;
        agent.wait_for_generation().await;

        let events = drain(&mut rx).await;
        let kinds = kinds(&events);
        assert!(!kinds.iter().any(|k| k == "phase_implementing"));
        assert!(kinds.contains(&"generation_completed".to_string()));

        let state = parts.state.get().await;
        assert_eq!(state.phases_counter, crate::limits::MAX_PHASES);
        assert_eq!(state.current_dev_state, DevState::Idle);
        // Planning and implementing never hit the model
        assert_eq!(inference.calls().await, 0);
    }

    #[tokio::test]
    async fn test_deep_debug_persists_transcript_on_app_session() {
        let agent = SessionAgent::create(
            init(ProjectType::App, "make a counter"),
            backends(),
            clients(Arc::new(ScriptedInferenceClient::new(vec![
                InferenceResponse {
                    text: "The crash is a missing null check in src/App.tsx.".to_string(),
                    tool_calls: Vec::new(),
                },
            ]))),
        )
        .await
        .unwrap();

        let transcript = agent
            .run_deep_debug("preview crashes on load".to_string(), vec!["src/".to_string()])
            .await
            .unwrap();
        assert!(transcript.contains("null check"));

        let Some(SessionVariant::App(parts)) = agent.variant().await else {
            panic!("expected app variant");
        };
        assert!(parts
            .state
            .get()
            .await
            .base
            .last_deep_debug_transcript
            .is_some());
    }

    #[tokio::test]
    async fn test_rehydration_restores_durable_state() {
        let backends = backends();
        let agent = SessionAgent::create(
            init(ProjectType::App, "make a counter"),
            backends.clone(),
            clients(Arc::new(ScriptedInferenceClient::default())),
        )
        .await
        .unwrap();
        let session_id = agent.session_id();

        let Some(SessionVariant::App(parts)) = agent.variant().await else {
            panic!("expected app variant");
        };
        parts
            .state
            .update(|s| s.base.project_name = "rehydrated-name".to_string())
            .await;
        // The persistence observer runs on a spawned task
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(parts);
        drop(agent);

        let revived = SessionAgent::rehydrate(
            session_id,
            backends,
            clients(Arc::new(ScriptedInferenceClient::default())),
        )
        .await
        .unwrap();
        let Some(SessionVariant::App(parts)) = revived.variant().await else {
            panic!("expected app variant");
        };
        let state = parts.state.get().await;
        assert_eq!(state.base.project_name, "rehydrated-name");
        // Scaffold commits survived through the durable object store
        assert!(parts.git.head().await.is_some());
        // Transient tracks start idle
        assert!(!revived.is_generating());
    }
}
