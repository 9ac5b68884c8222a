// Core backend-trait implementations over the repository layer
//
// Thin adapters: repository errors (anyhow) are mapped to core storage
// errors at this boundary.

use async_trait::async_trait;
use uuid::Uuid;

use codeforge_contracts::ConversationMessage;
use codeforge_core::conversation::{ConversationBackend, ConversationLogs};
use codeforge_core::export::SessionIndexBackend;
use codeforge_core::state_store::StateBackend;
use codeforge_core::vcs::{ObjectKind, RawObject, VcsBackend};
use codeforge_core::{AgentError, Result};

use crate::repositories::Database;

// ============================================================================
// Conversations
// ============================================================================

/// Conversation rows: one row per session in each of the two tables
#[derive(Clone)]
pub struct PgConversationBackend {
    db: Database,
}

impl PgConversationBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationBackend for PgConversationBackend {
    async fn load(&self, session_id: Uuid) -> Result<Option<ConversationLogs>> {
        let id = session_id.to_string();
        let full = self
            .db
            .get_conversation(true, &id)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))?;
        let compact = self
            .db
            .get_conversation(false, &id)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))?;

        if full.is_none() && compact.is_none() {
            return Ok(None);
        }

        let parse = |row: Option<crate::models::ConversationRow>| -> Vec<ConversationMessage> {
            row.and_then(|r| serde_json::from_str(&r.messages).ok())
                .unwrap_or_default()
        };
        Ok(Some(ConversationLogs {
            full: parse(full),
            running: parse(compact),
        }))
    }

    async fn save(&self, session_id: Uuid, logs: &ConversationLogs) -> Result<()> {
        let id = session_id.to_string();
        let full =
            serde_json::to_string(&logs.full).map_err(|e| AgentError::storage(e.to_string()))?;
        let running =
            serde_json::to_string(&logs.running).map_err(|e| AgentError::storage(e.to_string()))?;
        self.db
            .upsert_conversation(true, &id, &full)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))?;
        self.db
            .upsert_conversation(false, &id, &running)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// Session state
// ============================================================================

#[derive(Clone)]
pub struct PgStateBackend {
    db: Database,
}

impl PgStateBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StateBackend for PgStateBackend {
    async fn save(&self, session_id: Uuid, state: &serde_json::Value) -> Result<()> {
        let project_type = state
            .get("project_type")
            .and_then(|v| v.as_str())
            .unwrap_or("app")
            .to_string();
        self.db
            .upsert_session_state(session_id, &project_type, state)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))
    }

    async fn load(&self, session_id: Uuid) -> Result<Option<serde_json::Value>> {
        let row = self
            .db
            .get_session_state(session_id)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))?;
        Ok(row.map(|r| r.state))
    }
}

// ============================================================================
// VCS objects
// ============================================================================

#[derive(Clone)]
pub struct PgVcsBackend {
    db: Database,
}

impl PgVcsBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn parse_kind(kind: &str) -> ObjectKind {
    match kind {
        "tree" => ObjectKind::Tree,
        "commit" => ObjectKind::Commit,
        _ => ObjectKind::Blob,
    }
}

#[async_trait]
impl VcsBackend for PgVcsBackend {
    async fn put_objects(&self, session_id: Uuid, objects: &[RawObject]) -> Result<()> {
        let rows: Vec<(String, String, Vec<u8>)> = objects
            .iter()
            .map(|o| (o.id.clone(), o.kind.to_string(), o.data.clone()))
            .collect();
        self.db
            .insert_git_objects(session_id, &rows)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))
    }

    async fn load_objects(&self, session_id: Uuid) -> Result<Vec<RawObject>> {
        let rows = self
            .db
            .list_git_objects(session_id)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| RawObject {
                id: r.object_id,
                kind: parse_kind(&r.kind),
                data: r.data,
            })
            .collect())
    }

    async fn set_head(&self, session_id: Uuid, head: &str) -> Result<()> {
        self.db
            .set_git_head(session_id, head)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))
    }

    async fn get_head(&self, session_id: Uuid) -> Result<Option<String>> {
        let row = self
            .db
            .get_git_head(session_id)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))?;
        Ok(row.map(|r| r.head))
    }
}

// ============================================================================
// Session index
// ============================================================================

#[derive(Clone)]
pub struct PgSessionIndexBackend {
    db: Database,
}

impl PgSessionIndexBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionIndexBackend for PgSessionIndexBackend {
    async fn set_repository_url(&self, session_id: Uuid, url: &str) -> Result<()> {
        self.db
            .set_repository_url(session_id, url)
            .await
            .map_err(|e| AgentError::storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Integration coverage needs a database; unit tests pin the pure
    // conversion logic.

    #[test]
    fn test_parse_kind_round_trip() {
        for kind in [ObjectKind::Blob, ObjectKind::Tree, ObjectKind::Commit] {
            assert_eq!(parse_kind(&kind.to_string()), kind);
        }
        assert_eq!(parse_kind("unknown"), ObjectKind::Blob);
    }
}
