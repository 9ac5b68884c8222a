// Session lifecycle
//
// Project-name derivation and the initial state records. The composition
// root (session.rs) drives the full initialize sequence: logger scope,
// state replacement, VCS init, scaffold commit, first deploy.

use rand::Rng;
use uuid::Uuid;

use codeforge_contracts::{AgentMode, ProjectType};

use crate::limits::{is_valid_project_name, PROJECT_NAME_PREFIX_LEN};
use crate::state::{AppSessionState, BaseSessionState, InferenceContext, WorkflowSessionState};

/// Default scaffold templates per project type
pub const DEFAULT_APP_TEMPLATE: &str = "vite-react";
pub const DEFAULT_WORKFLOW_TEMPLATE: &str = "workflow-basic";

/// Arguments to session initialization
#[derive(Debug, Clone)]
pub struct SessionInit {
    pub session_id: Uuid,
    pub query: String,
    pub project_type: ProjectType,
    pub hostname: String,
    pub template_name: Option<String>,
    pub agent_mode: AgentMode,
    pub user_id: String,
    pub agent_id: Uuid,
}

/// Derive a project name from the query: a sanitized prefix (at most
/// `PROJECT_NAME_PREFIX_LEN` chars) plus a short random suffix. The
/// result always matches the project-name rules.
pub fn derive_project_name(query: &str) -> String {
    let mut prefix: String = query
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    // Collapse runs of '-' and trim the edges
    while prefix.contains("--") {
        prefix = prefix.replace("--", "-");
    }
    let prefix: String = prefix
        .trim_matches('-')
        .chars()
        .take(PROJECT_NAME_PREFIX_LEN)
        .collect();
    let prefix = prefix.trim_matches('-');

    let suffix: String = {
        let mut rng = rand::thread_rng();
        (0..6)
            .map(|_| {
                let n: u8 = rng.gen_range(0..36);
                char::from_digit(n as u32, 36).unwrap_or('0')
            })
            .collect()
    };

    let name = if prefix.is_empty() {
        format!("project-{suffix}")
    } else {
        format!("{prefix}-{suffix}")
    };
    debug_assert!(is_valid_project_name(&name), "derived name {name:?}");
    name
}

fn base_state(init: &SessionInit, project_name: String, template_name: String) -> BaseSessionState {
    let mut base = BaseSessionState::new(init.session_id, init.project_type);
    base.project_name = project_name;
    base.query = init.query.clone();
    base.hostname = init.hostname.clone();
    base.template_name = template_name;
    base.agent_mode = init.agent_mode;
    base.inference_context = InferenceContext {
        user_id: init.user_id.clone(),
        agent_id: init.agent_id,
    };
    base
}

/// INITIAL_STATE for an app session, with identity merged in
pub fn initial_app_state(init: &SessionInit) -> AppSessionState {
    let template = init
        .template_name
        .clone()
        .unwrap_or_else(|| DEFAULT_APP_TEMPLATE.to_string());
    let mut state = AppSessionState::new(init.session_id);
    state.base = base_state(init, derive_project_name(&init.query), template);
    state
}

/// INITIAL_STATE for a workflow session, with identity merged in
pub fn initial_workflow_state(init: &SessionInit) -> WorkflowSessionState {
    let template = init
        .template_name
        .clone()
        .unwrap_or_else(|| DEFAULT_WORKFLOW_TEMPLATE.to_string());
    let mut state = WorkflowSessionState::new(init.session_id);
    state.base = base_state(init, derive_project_name(&init.query), template);
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_name_is_always_valid() {
        for query in [
            "make a counter",
            "Send a Slack message on a schedule!!",
            "---",
            "",
            "ünïcödé project with a very long description that keeps going",
        ] {
            let name = derive_project_name(query);
            assert!(is_valid_project_name(&name), "{query:?} -> {name:?}");
        }
    }

    #[test]
    fn test_prefix_is_bounded() {
        let name = derive_project_name(&"a".repeat(100));
        // prefix + '-' + 6-char suffix
        assert!(name.len() <= PROJECT_NAME_PREFIX_LEN + 7);
    }

    #[test]
    fn test_initial_state_carries_identity() {
        let init = SessionInit {
            session_id: Uuid::now_v7(),
            query: "make a counter".to_string(),
            project_type: ProjectType::App,
            hostname: "edge-1".to_string(),
            template_name: None,
            agent_mode: AgentMode::Deterministic,
            user_id: "user-1".to_string(),
            agent_id: Uuid::now_v7(),
        };
        let state = initial_app_state(&init);
        assert_eq!(state.base.query, "make a counter");
        assert_eq!(state.base.template_name, DEFAULT_APP_TEMPLATE);
        assert!(state.base.project_name.starts_with("make-a-counter"));
        assert_eq!(state.base.inference_context.user_id, "user-1");
    }
}
