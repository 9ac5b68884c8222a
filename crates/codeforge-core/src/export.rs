// Git export and GitHub publishing
//
// The embedded object store can be exported as raw objects for external
// publishing. `push_to_github` wraps the export with the external export
// client, emits the github_export_* lifecycle events and records the
// repository URL on the session index.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use codeforge_contracts::SessionEvent;

use crate::error::Result;
use crate::events::EventBus;
use crate::state::SessionState;
use crate::state_store::StateStore;
use crate::vcs::{GitStore, RawObject};

/// Everything the export API needs to publish a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitExport {
    pub git_objects: Vec<RawObject>,
    pub head: Option<String>,
    pub query: String,
    pub has_commits: bool,
    pub template_details: String,
}

/// Request to publish to GitHub
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubPushRequest {
    pub repository_name: String,
    #[serde(default)]
    pub private: bool,
    pub user_id: String,
}

/// External export API contract; returns the repository URL
#[async_trait]
pub trait ExportClient: Send + Sync {
    async fn push(&self, request: &GithubPushRequest, export: &GitExport) -> Result<String>;
}

/// Session-index row updates (repository URL on successful export)
#[async_trait]
pub trait SessionIndexBackend: Send + Sync {
    async fn set_repository_url(&self, session_id: Uuid, url: &str) -> Result<()>;
}

/// Export the raw objects plus publishing context
pub async fn export_git_objects<S: SessionState>(
    state: &StateStore<S>,
    git: &GitStore,
) -> GitExport {
    let snapshot = state.get().await;
    let (git_objects, head) = git.export_objects().await;
    GitExport {
        has_commits: head.is_some(),
        head,
        git_objects,
        query: snapshot.base().query.clone(),
        template_details: snapshot.base().template_name.clone(),
    }
}

/// Publish the session to GitHub with lifecycle events
pub async fn push_to_github<S: SessionState>(
    state: &StateStore<S>,
    git: &GitStore,
    events: &EventBus,
    export_client: &dyn ExportClient,
    index: Option<&Arc<dyn SessionIndexBackend>>,
    request: GithubPushRequest,
) -> Result<String> {
    events.broadcast(SessionEvent::GithubExportStarted).await;

    let export = export_git_objects(state, git).await;
    events
        .broadcast(SessionEvent::GithubExportProgress {
            progress: 50,
            message: format!("pushing {} objects", export.git_objects.len()),
        })
        .await;

    let session_id = state.get().await.base().session_id;
    match export_client.push(&request, &export).await {
        Ok(url) => {
            if let Some(index) = index {
                if let Err(e) = index.set_repository_url(session_id, &url).await {
                    warn!(error = %e, "Failed to record repository URL");
                }
            }
            events
                .broadcast(SessionEvent::GithubExportCompleted {
                    repository_url: url.clone(),
                })
                .await;
            Ok(url)
        }
        Err(e) => {
            events
                .broadcast(SessionEvent::GithubExportError {
                    error: e.to_string(),
                })
                .await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::state::AppSessionState;
    use tokio::sync::Mutex;

    struct RecordingExportClient {
        fail: bool,
        pushed: Mutex<Vec<GithubPushRequest>>,
    }

    #[async_trait]
    impl ExportClient for RecordingExportClient {
        async fn push(&self, request: &GithubPushRequest, _export: &GitExport) -> Result<String> {
            if self.fail {
                return Err(AgentError::validation("remote rejected push"));
            }
            self.pushed.lock().await.push(request.clone());
            Ok(format!("https://github.com/acme/{}", request.repository_name))
        }
    }

    async fn fixture() -> (StateStore<AppSessionState>, GitStore, EventBus) {
        let state = StateStore::new(AppSessionState::new(Uuid::now_v7()));
        let git = GitStore::new(Uuid::now_v7(), None);
        git.init().await.unwrap();
        (state, git, EventBus::new())
    }

    #[tokio::test]
    async fn test_export_with_no_commits() {
        let (state, git, _events) = fixture().await;
        let export = export_git_objects(&state, &git).await;
        assert!(!export.has_commits);
        assert!(export.git_objects.is_empty());
    }

    #[tokio::test]
    async fn test_push_emits_lifecycle_events() {
        let (state, git, events) = fixture().await;
        git.commit(&[("a.ts".to_string(), "x".to_string())], &[], "c1")
            .await
            .unwrap();
        let (_id, mut rx) = events.attach().await;

        let client = RecordingExportClient {
            fail: false,
            pushed: Mutex::new(Vec::new()),
        };
        let url = push_to_github(
            &state,
            &git,
            &events,
            &client,
            None,
            GithubPushRequest {
                repository_name: "counter".to_string(),
                private: false,
                user_id: "u1".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(url, "https://github.com/acme/counter");

        let mut kinds = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        assert_eq!(
            kinds,
            vec![
                "github_export_started",
                "github_export_progress",
                "github_export_completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_push_emits_error_event() {
        let (state, git, events) = fixture().await;
        let (_id, mut rx) = events.attach().await;

        let client = RecordingExportClient {
            fail: true,
            pushed: Mutex::new(Vec::new()),
        };
        let result = push_to_github(
            &state,
            &git,
            &events,
            &client,
            None,
            GithubPushRequest {
                repository_name: "counter".to_string(),
                private: false,
                user_id: "u1".to_string(),
            },
        )
        .await;
        assert!(result.is_err());

        let mut saw_error = false;
        while let Ok(frame) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            if value["type"] == "github_export_error" {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
