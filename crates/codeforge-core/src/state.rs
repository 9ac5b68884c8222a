// Session state model
//
// The single authoritative record per session. All mutation goes through
// the StateStore; components hold snapshots, never live references.
// Workflow code is never stored in state - it is always derived from
// `generated_files_map["src/index.ts"]`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use codeforge_contracts::{AgentMode, ConversationMessage, ProjectType};

use crate::limits::MAX_COMMANDS_HISTORY;

/// Path of the derived workflow entry module
pub const WORKFLOW_ENTRY_PATH: &str = "src/index.ts";

/// A generated file tracked by the session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub file_path: String,
    pub file_contents: String,
    pub file_purpose: String,
    #[serde(default)]
    pub last_diff: String,
}

impl FileRecord {
    pub fn new(
        file_path: impl Into<String>,
        file_contents: impl Into<String>,
        file_purpose: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            file_contents: file_contents.into(),
            file_purpose: file_purpose.into(),
            last_diff: String::new(),
        }
    }
}

/// Identity carried into every inference call.
///
/// The cancellation handle deliberately does not live here: state is
/// serialized to the durable row, tokens are transient runtime objects.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceContext {
    pub user_id: String,
    pub agent_id: Uuid,
}

/// Fields common to both project variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseSessionState {
    pub session_id: Uuid,
    pub project_name: String,
    pub query: String,
    pub hostname: String,
    pub template_name: String,
    pub project_type: ProjectType,

    /// Compact conversation log (the full log lives in the conversation store)
    #[serde(default)]
    pub conversation: Vec<ConversationMessage>,

    pub inference_context: InferenceContext,

    /// Client intent: keep generating until done
    #[serde(default)]
    pub should_be_generating: bool,
    #[serde(default)]
    pub agent_mode: AgentMode,

    /// Generated files keyed by relative path
    #[serde(default)]
    pub generated_files_map: BTreeMap<String, FileRecord>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_instance_id: Option<String>,
    /// Ordered, deduplicated bootstrap commands
    #[serde(default)]
    pub commands_history: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_package_json: Option<String>,

    /// User inputs queued until the next safe merge point
    #[serde(default)]
    pub pending_user_inputs: Vec<String>,
    /// Accumulated project-update notes
    #[serde(default)]
    pub project_updates: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_deep_debug_transcript: Option<String>,
}

impl BaseSessionState {
    pub fn new(session_id: Uuid, project_type: ProjectType) -> Self {
        Self {
            session_id,
            project_name: String::new(),
            query: String::new(),
            hostname: String::new(),
            template_name: String::new(),
            project_type,
            conversation: Vec::new(),
            inference_context: InferenceContext::default(),
            should_be_generating: false,
            agent_mode: AgentMode::default(),
            generated_files_map: BTreeMap::new(),
            sandbox_instance_id: None,
            commands_history: Vec::new(),
            last_package_json: None,
            pending_user_inputs: Vec::new(),
            project_updates: Vec::new(),
            last_deep_debug_transcript: None,
        }
    }

    /// Append commands, dropping duplicates and keeping the newest
    /// `MAX_COMMANDS_HISTORY` entries.
    pub fn record_commands(&mut self, commands: &[String]) {
        for cmd in commands {
            let cmd = cmd.trim();
            if cmd.is_empty() {
                continue;
            }
            if !self.commands_history.iter().any(|c| c == cmd) {
                self.commands_history.push(cmd.to_string());
            }
        }
        if self.commands_history.len() > MAX_COMMANDS_HISTORY {
            let drop = self.commands_history.len() - MAX_COMMANDS_HISTORY;
            self.commands_history.drain(..drop);
        }
    }
}

// ============================================================================
// App variant
// ============================================================================

/// App generation phase lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevState {
    #[default]
    Idle,
    PhaseGenerating,
    PhaseImplementing,
    Reviewing,
    Finalizing,
}

impl DevState {
    /// Edges of the phase state machine. The only backwards edge is
    /// FINALIZING -> IDLE; PHASE_IMPLEMENTING may loop on itself.
    pub fn can_transition(self, to: DevState) -> bool {
        use DevState::*;
        matches!(
            (self, to),
            (Idle, PhaseGenerating)
                | (PhaseGenerating, PhaseImplementing)
                | (PhaseImplementing, PhaseImplementing)
                | (PhaseImplementing, Reviewing)
                | (Reviewing, Finalizing)
                | (PhaseGenerating, Finalizing)
                | (Finalizing, Idle)
        )
    }
}

impl std::fmt::Display for DevState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DevState::Idle => "IDLE",
            DevState::PhaseGenerating => "PHASE_GENERATING",
            DevState::PhaseImplementing => "PHASE_IMPLEMENTING",
            DevState::Reviewing => "REVIEWING",
            DevState::Finalizing => "FINALIZING",
        };
        write!(f, "{s}")
    }
}

/// A file planned for a phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConcept {
    pub path: String,
    pub purpose: String,
}

/// One unit of planned app work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConcept {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<FileConcept>,
}

/// Structured project plan produced by the planning step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub phases: Vec<PhaseConcept>,
}

/// A phase that has been generated (and possibly implemented)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<FileConcept>,
    pub completed: bool,
}

impl PhaseRecord {
    pub fn from_concept(concept: &PhaseConcept) -> Self {
        Self {
            name: concept.name.clone(),
            description: concept.description.clone(),
            files: concept.files.clone(),
            completed: false,
        }
    }
}

/// Session state for app projects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSessionState {
    #[serde(flatten)]
    pub base: BaseSessionState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub blueprint: Option<Blueprint>,
    #[serde(default)]
    pub generated_phases: Vec<PhaseRecord>,
    #[serde(default)]
    pub mvp_generated: bool,
    #[serde(default)]
    pub reviewing_initiated: bool,
    #[serde(default)]
    pub phases_counter: usize,
    #[serde(default)]
    pub current_dev_state: DevState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default)]
    pub review_cycles: usize,
}

impl AppSessionState {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            base: BaseSessionState::new(session_id, ProjectType::App),
            blueprint: None,
            generated_phases: Vec::new(),
            mvp_generated: false,
            reviewing_initiated: false,
            phases_counter: 0,
            current_dev_state: DevState::Idle,
            current_phase: None,
            review_cycles: 0,
        }
    }

    /// Validated state-machine transition
    pub fn transition(&mut self, to: DevState) -> crate::error::Result<()> {
        if !self.current_dev_state.can_transition(to) {
            return Err(crate::error::AgentError::validation(format!(
                "invalid dev-state transition {} -> {}",
                self.current_dev_state, to
            )));
        }
        self.current_dev_state = to;
        Ok(())
    }

    /// First generated phase that has not been implemented yet
    pub fn next_pending_phase(&self) -> Option<&PhaseRecord> {
        self.generated_phases.iter().find(|p| !p.completed)
    }
}

// ============================================================================
// Workflow variant
// ============================================================================

/// Binding kinds a workflow may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Kv,
    R2,
    D1,
    Queue,
    Ai,
}

/// One resource binding declared in workflow metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceBinding {
    pub kind: ResourceKind,
    /// Backing resource name (bucket, namespace, database, queue)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

/// Metadata describing a generated workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the workflow's run parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    /// Secret name -> human description
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Binding name -> resource
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceBinding>,
}

impl WorkflowMetadata {
    /// Per-field union merge: maps add and overwrite keys, scalar fields
    /// are last-writer-wins when non-empty. Nothing is ever removed -
    /// there is currently no deletion semantics for bindings.
    pub fn merge(&mut self, update: WorkflowMetadata) {
        if !update.name.is_empty() {
            self.name = update.name;
        }
        if !update.description.is_empty() {
            self.description = update.description;
        }
        if update.params_schema.is_some() {
            self.params_schema = update.params_schema;
        }
        self.env_vars.extend(update.env_vars);
        self.secrets.extend(update.secrets);
        self.resources.extend(update.resources);
    }
}

/// Workflow deployment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    #[default]
    Idle,
    Deploying,
    Deployed,
    Failed,
}

/// Session state for workflow projects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSessionState {
    #[serde(flatten)]
    pub base: BaseSessionState,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_metadata: Option<WorkflowMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_url: Option<String>,
    #[serde(default)]
    pub deployment_status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_error: Option<String>,
}

impl WorkflowSessionState {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            base: BaseSessionState::new(session_id, ProjectType::Workflow),
            workflow_metadata: None,
            deployment_url: None,
            deployment_status: DeploymentStatus::Idle,
            deployment_error: None,
        }
    }

    /// Workflow code is derived, never stored: always the current contents
    /// of `src/index.ts` in the file map.
    pub fn workflow_code(&self) -> Option<&str> {
        self.base
            .generated_files_map
            .get(WORKFLOW_ENTRY_PATH)
            .map(|f| f.file_contents.as_str())
    }
}

// ============================================================================
// SessionState trait
// ============================================================================

/// Implemented by both variant states so shared infrastructure (store,
/// file manager, deployment) can work over either.
pub trait SessionState:
    Clone + Send + Sync + Serialize + serde::de::DeserializeOwned + 'static
{
    fn base(&self) -> &BaseSessionState;
    fn base_mut(&mut self) -> &mut BaseSessionState;
}

impl SessionState for AppSessionState {
    fn base(&self) -> &BaseSessionState {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSessionState {
        &mut self.base
    }
}

impl SessionState for WorkflowSessionState {
    fn base(&self) -> &BaseSessionState {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseSessionState {
        &mut self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_state_edges() {
        use DevState::*;
        assert!(Idle.can_transition(PhaseGenerating));
        assert!(PhaseGenerating.can_transition(PhaseImplementing));
        assert!(PhaseImplementing.can_transition(PhaseImplementing));
        assert!(PhaseImplementing.can_transition(Reviewing));
        assert!(Reviewing.can_transition(Finalizing));
        assert!(Finalizing.can_transition(Idle));

        // No other backwards edges
        assert!(!Reviewing.can_transition(PhaseImplementing));
        assert!(!PhaseImplementing.can_transition(Idle));
        assert!(!Idle.can_transition(Reviewing));
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut state = AppSessionState::new(Uuid::now_v7());
        assert!(state.transition(DevState::Reviewing).is_err());
        assert_eq!(state.current_dev_state, DevState::Idle);
        state.transition(DevState::PhaseGenerating).unwrap();
        assert_eq!(state.current_dev_state, DevState::PhaseGenerating);
    }

    #[test]
    fn test_commands_history_dedup_and_cap() {
        let mut base = BaseSessionState::new(Uuid::now_v7(), ProjectType::App);
        base.record_commands(&["bun install".to_string(), "bun install".to_string()]);
        assert_eq!(base.commands_history.len(), 1);

        let many: Vec<String> = (0..15).map(|i| format!("cmd-{i}")).collect();
        base.record_commands(&many);
        assert_eq!(base.commands_history.len(), MAX_COMMANDS_HISTORY);
        // Oldest entries were dropped
        assert_eq!(base.commands_history.last().unwrap(), "cmd-14");
    }

    #[test]
    fn test_metadata_merge_is_additive() {
        let mut meta = WorkflowMetadata {
            name: "notifier".to_string(),
            ..Default::default()
        };
        meta.resources.insert(
            "CACHE".to_string(),
            ResourceBinding {
                kind: ResourceKind::Kv,
                resource_name: Some("cache-ns".to_string()),
            },
        );

        let mut update = WorkflowMetadata::default();
        update.resources.insert(
            "FILES".to_string(),
            ResourceBinding {
                kind: ResourceKind::R2,
                resource_name: None,
            },
        );
        meta.merge(update);

        // Existing binding survives a merge that does not mention it
        assert!(meta.resources.contains_key("CACHE"));
        assert!(meta.resources.contains_key("FILES"));
        assert_eq!(meta.name, "notifier");
    }

    #[test]
    fn test_workflow_code_is_derived_from_file_map() {
        let mut state = WorkflowSessionState::new(Uuid::now_v7());
        assert!(state.workflow_code().is_none());

        state.base.generated_files_map.insert(
            WORKFLOW_ENTRY_PATH.to_string(),
            FileRecord::new(WORKFLOW_ENTRY_PATH, "export default {}", "entry"),
        );
        assert_eq!(state.workflow_code(), Some("export default {}"));
    }
}
