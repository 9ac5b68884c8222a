// Conversation store
//
// Two parallel logs per session: the append-only full log (audit) and the
// running log (compacted working memory). Both deduplicate by
// `conversation_id` - adding a message whose id already exists updates
// that entry in place. Persistence is best-effort: failures are logged,
// the in-memory logs stay authoritative and the backing rows are reseeded
// from them on the next write.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use codeforge_contracts::ConversationMessage;

use crate::error::Result;

/// The two logs as persisted per session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationLogs {
    pub full: Vec<ConversationMessage>,
    pub running: Vec<ConversationMessage>,
}

impl ConversationLogs {
    /// Insert or update by `conversation_id` (the dedup invariant)
    fn upsert(log: &mut Vec<ConversationMessage>, message: &ConversationMessage) {
        match log
            .iter_mut()
            .find(|m| m.conversation_id == message.conversation_id)
        {
            Some(existing) => *existing = message.clone(),
            None => log.push(message.clone()),
        }
    }
}

/// Durable backend for the two conversation tables
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Load both logs; `None` when no row exists yet for this session
    async fn load(&self, session_id: Uuid) -> Result<Option<ConversationLogs>>;

    /// Replace both rows
    async fn save(&self, session_id: Uuid, logs: &ConversationLogs) -> Result<()>;
}

/// Per-session conversation store
pub struct ConversationStore {
    session_id: Uuid,
    backend: Arc<dyn ConversationBackend>,
    logs: RwLock<ConversationLogs>,
}

impl ConversationStore {
    pub fn new(session_id: Uuid, backend: Arc<dyn ConversationBackend>) -> Self {
        Self {
            session_id,
            backend,
            logs: RwLock::new(ConversationLogs::default()),
        }
    }

    /// Load persisted logs. A missing row seeds the backend from the
    /// in-memory compact log (relevant after `set_state` pre-population).
    pub async fn hydrate(&self) -> Result<()> {
        match self.backend.load(self.session_id).await {
            Ok(Some(persisted)) => {
                *self.logs.write().await = persisted;
            }
            Ok(None) => {
                let logs = self.logs.read().await.clone();
                self.persist(&logs).await;
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Failed to load conversation; keeping in-memory logs");
            }
        }
        Ok(())
    }

    /// Both logs, deduplicated
    pub async fn get_state(&self) -> ConversationLogs {
        self.logs.read().await.clone()
    }

    /// Replace both logs wholesale
    pub async fn set_state(&self, logs: ConversationLogs) {
        *self.logs.write().await = logs.clone();
        self.persist(&logs).await;
    }

    /// Upsert a message into both logs
    pub async fn add_message(&self, message: ConversationMessage) {
        let snapshot = {
            let mut guard = self.logs.write().await;
            ConversationLogs::upsert(&mut guard.full, &message);
            ConversationLogs::upsert(&mut guard.running, &message);
            guard.clone()
        };
        self.persist(&snapshot).await;
    }

    /// Empty the running log; the full log is untouched
    pub async fn clear_running(&self) {
        let snapshot = {
            let mut guard = self.logs.write().await;
            guard.running.clear();
            guard.clone()
        };
        self.persist(&snapshot).await;
    }

    /// Replace the running log (compaction); the full log is untouched
    pub async fn replace_running(&self, running: Vec<ConversationMessage>) {
        let snapshot = {
            let mut guard = self.logs.write().await;
            guard.running = running;
            guard.clone()
        };
        self.persist(&snapshot).await;
    }

    async fn persist(&self, logs: &ConversationLogs) {
        if let Err(e) = self.backend.save(self.session_id, logs).await {
            warn!(session_id = %self.session_id, error = %e, "Failed to persist conversation (will retry on next write)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryConversationBackend;

    fn store() -> ConversationStore {
        ConversationStore::new(Uuid::now_v7(), Arc::new(InMemoryConversationBackend::new()))
    }

    #[tokio::test]
    async fn test_add_message_is_idempotent() {
        let store = store();
        let msg = ConversationMessage::user("hello").with_id("m1");

        store.add_message(msg.clone()).await;
        store.add_message(msg).await;

        let logs = store.get_state().await;
        assert_eq!(logs.full.len(), 1);
        assert_eq!(logs.running.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_updates_in_place() {
        let store = store();
        store
            .add_message(ConversationMessage::user("first").with_id("m1"))
            .await;
        store
            .add_message(ConversationMessage::user("second").with_id("m1"))
            .await;

        let logs = store.get_state().await;
        assert_eq!(logs.full.len(), 1);
        assert_eq!(logs.full[0].content, "second");
    }

    #[tokio::test]
    async fn test_clear_keeps_full_log() {
        let store = store();
        for id in ["m1", "m2", "m3"] {
            store
                .add_message(ConversationMessage::user(id).with_id(id))
                .await;
        }

        store.clear_running().await;

        let logs = store.get_state().await;
        assert!(logs.running.is_empty());
        let ids: Vec<_> = logs.full.iter().map(|m| m.conversation_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_hydrate_seeds_missing_row_from_memory() {
        let backend = Arc::new(InMemoryConversationBackend::new());
        let session_id = Uuid::now_v7();
        let store = ConversationStore::new(session_id, backend.clone());
        store
            .set_state(ConversationLogs {
                full: vec![ConversationMessage::user("seed").with_id("m1")],
                running: vec![ConversationMessage::user("seed").with_id("m1")],
            })
            .await;

        // Wipe the backend row, then hydrate: memory wins and reseeds
        backend.remove(session_id).await;
        store.hydrate().await.unwrap();
        assert_eq!(backend.load(session_id).await.unwrap().unwrap().full.len(), 1);
    }
}
