// State store
//
// Single authoritative session record with snapshot reads. Writers go
// through `set`/`update`; readers get clones that never observe later
// writes. Cross-session isolation holds because every session owns its
// own store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::state::SessionState;

/// Durable row for the serialized session record
#[async_trait]
pub trait StateBackend: Send + Sync {
    async fn save(&self, session_id: Uuid, state: &serde_json::Value) -> Result<()>;
    async fn load(&self, session_id: Uuid) -> Result<Option<serde_json::Value>>;
}

/// Observer invoked with (old, new) snapshots after every write
pub type StateObserver<S> = Arc<dyn Fn(&S, &S) + Send + Sync>;

/// Holds the session record behind a read-write lock
pub struct StateStore<S: SessionState> {
    state: Arc<RwLock<S>>,
    observer: RwLock<Option<StateObserver<S>>>,
}

impl<S: SessionState> StateStore<S> {
    pub fn new(initial: S) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            observer: RwLock::new(None),
        }
    }

    /// Register the single write observer (used to fan out to plugins).
    pub async fn set_observer(&self, observer: StateObserver<S>) {
        *self.observer.write().await = Some(observer);
    }

    /// Immutable snapshot of the current state
    pub async fn get(&self) -> S {
        self.state.read().await.clone()
    }

    /// Replace the whole record
    pub async fn set(&self, new_state: S) {
        let old = {
            let mut guard = self.state.write().await;
            std::mem::replace(&mut *guard, new_state.clone())
        };
        self.notify(&old, &new_state).await;
    }

    /// Apply a mutation and return the new snapshot.
    ///
    /// Covers both single-field and batch updates; the closure runs under
    /// the write lock, so it must not await.
    pub async fn update<F>(&self, mutate: F) -> S
    where
        F: FnOnce(&mut S),
    {
        let (old, new) = {
            let mut guard = self.state.write().await;
            let old = guard.clone();
            mutate(&mut guard);
            (old, guard.clone())
        };
        self.notify(&old, &new).await;
        new
    }

    async fn notify(&self, old: &S, new: &S) {
        if let Some(observer) = self.observer.read().await.as_ref() {
            observer(old, new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppSessionState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_snapshot_does_not_see_later_writes() {
        let store = StateStore::new(AppSessionState::new(Uuid::now_v7()));
        let snapshot = store.get().await;

        store
            .update(|s| s.base.project_name = "renamed".to_string())
            .await;

        assert_eq!(snapshot.base.project_name, "");
        assert_eq!(store.get().await.base.project_name, "renamed");
    }

    #[tokio::test]
    async fn test_observer_sees_old_and_new() {
        let store = StateStore::new(AppSessionState::new(Uuid::now_v7()));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        store
            .set_observer(Arc::new(move |old: &AppSessionState, new: &AppSessionState| {
                assert_ne!(old.base.project_name, new.base.project_name);
                calls_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .await;

        store
            .update(|s| s.base.project_name = "observed".to_string())
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
