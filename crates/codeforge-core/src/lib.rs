// Per-session agent runtime
//
// One SessionAgent per session: a stateful actor that plans, generates
// files, runs static analysis, deploys to a sandbox preview and
// optionally to Cloudflare, streaming typed events to every attached
// client channel.
//
// Key design decisions:
// - Storage-agnostic via backend traits (ConversationBackend, StateBackend,
//   VcsBackend); Postgres implementations live in codeforge-storage
// - External services are contracts (SandboxClient, DeployClient,
//   SecretsProvider, InferenceClient); HTTP implementations live in
//   codeforge-sandbox, except the OpenAI-protocol inference client
// - The app/workflow split is a tagged variant chosen at creation; the
//   dispatcher is the only place that knows both
// - Tools receive a trimmed AgentHandle capability set, never the session
// - Cancellation is cooperative: every inference/sandbox await observes
//   the token and finishes with a cancelled outcome, not an error

pub mod cancel;
pub mod control;
pub mod controllers;
pub mod conversation;
pub mod debug;
pub mod deploy;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod export;
pub mod files;
pub mod inference;
pub mod lifecycle;
pub mod limits;
pub mod openai;
pub mod plugins;
pub mod sandbox;
pub mod scaffold;
pub mod session;
pub mod state;
pub mod state_store;
pub mod tools;
pub mod vcs;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use cancel::CancellationController;
pub use control::handle_frame;
pub use controllers::{GenerationOutcome, PhasicAppController, WorkflowController};
pub use conversation::{ConversationBackend, ConversationLogs, ConversationStore};
pub use debug::{DeepDebugAssistant, DeepDebugOutcome, DeepDebugRequest};
pub use deploy::{
    CloudDeployResponse, CloudflareCredentials, DeployClient, DeployObserver, DeploymentManager,
    NoopDeployObserver, SecretsProvider,
};
pub use dispatcher::ProjectDispatcher;
pub use error::{AgentError, Result};
pub use events::{ChannelId, EventBus};
pub use export::{
    export_git_objects, push_to_github, ExportClient, GitExport, GithubPushRequest,
    SessionIndexBackend,
};
pub use files::FileManager;
pub use inference::{
    InferenceClient, InferenceMessage, InferenceRequest, InferenceResponse, InferenceRole,
    InferenceStream, InferenceStreamEvent,
};
pub use lifecycle::{derive_project_name, SessionInit};
pub use openai::OpenAiInferenceClient;
pub use plugins::{PluginContext, PluginManager, SessionPlugin};
pub use sandbox::{SandboxClient, SandboxFile};
pub use scaffold::{app_scaffold, derive_workflow_class_name, workflow_scaffold, ScaffoldRequest};
pub use session::{
    AppAgentHandle, AppParts, SessionAgent, SessionBackends, SessionClients, SessionVariant,
    WorkflowAgentHandle, WorkflowParts,
};
pub use state::{
    AppSessionState, BaseSessionState, Blueprint, DevState, FileRecord, PhaseConcept, PhaseRecord,
    ResourceBinding, ResourceKind, SessionState, WorkflowMetadata, WorkflowSessionState,
};
pub use state_store::{StateBackend, StateStore};
pub use tools::{
    app_tools, common_tools, workflow_tools, AgentHandle, SessionTool, ToolExecutionResult,
    ToolRegistry,
};
pub use vcs::{GitStore, ObjectKind, RawObject, VcsBackend};

// Wire types re-exported from contracts
pub use codeforge_contracts::{
    ClientFrame, ConversationMessage, MessageRole, ProjectType, SessionEvent, ToolCall,
    ToolDefinition, ToolResult,
};
