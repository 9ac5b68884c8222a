// Project-type dispatcher
//
// Holds the active controller variant for a session and delegates to it.
// The only state of its own is a single-slot deferred start: if a start
// is requested before the controller is attached, the request is queued
// and replayed on attach.

use std::sync::Mutex;

use tokio::sync::RwLock;

use codeforge_contracts::ProjectType;

use crate::session::SessionVariant;

pub struct ProjectDispatcher {
    variant: RwLock<Option<SessionVariant>>,
    deferred_start: Mutex<bool>,
}

impl Default for ProjectDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectDispatcher {
    pub fn new() -> Self {
        Self {
            variant: RwLock::new(None),
            deferred_start: Mutex::new(false),
        }
    }

    /// Attach the concrete controller. Returns true when a queued start
    /// must be replayed by the caller.
    pub async fn attach(&self, variant: SessionVariant) -> bool {
        *self.variant.write().await = Some(variant);
        let mut deferred = self.deferred_start.lock().expect("deferred lock poisoned");
        std::mem::take(&mut *deferred)
    }

    /// Record a start request. Returns false when the controller is not
    /// attached yet (the start was queued instead).
    pub async fn start_ready(&self) -> bool {
        if self.variant.read().await.is_some() {
            return true;
        }
        *self.deferred_start.lock().expect("deferred lock poisoned") = true;
        false
    }

    pub async fn variant(&self) -> Option<SessionVariant> {
        self.variant.read().await.clone()
    }

    pub async fn project_type(&self) -> Option<ProjectType> {
        self.variant.read().await.as_ref().map(|v| match v {
            SessionVariant::App(_) => ProjectType::App,
            SessionVariant::Workflow(_) => ProjectType::Workflow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_before_attach_is_deferred() {
        let dispatcher = ProjectDispatcher::new();
        assert!(!dispatcher.start_ready().await);
        assert!(dispatcher.variant().await.is_none());
    }
}
