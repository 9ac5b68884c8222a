// Session registry
//
// One live SessionAgent per session id. A session not in the map is
// rehydrated from durable state on first contact after a cold start.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use codeforge_core::lifecycle::SessionInit;
use codeforge_core::{Result, SessionAgent, SessionBackends, SessionClients};
use codeforge_storage::{CreateSessionIndex, Database};

pub struct SessionRegistry {
    db: Database,
    backends: SessionBackends,
    clients: SessionClients,
    sessions: RwLock<HashMap<Uuid, Arc<SessionAgent>>>,
}

impl SessionRegistry {
    pub fn new(db: Database, backends: SessionBackends, clients: SessionClients) -> Self {
        Self {
            db,
            backends,
            clients,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session agent and register it
    pub async fn create(&self, init: SessionInit) -> Result<Arc<SessionAgent>> {
        let session_id = init.session_id;
        let project_type = init.project_type;
        let query = init.query.clone();

        let agent =
            SessionAgent::create(init, self.backends.clone(), self.clients.clone()).await?;

        let info = agent.session_info().await;
        if let Err(e) = self
            .db
            .create_session_index(CreateSessionIndex {
                session_id,
                project_name: info.project_name.clone(),
                project_type: project_type.to_string(),
                query,
            })
            .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to index session");
        }

        self.sessions.write().await.insert(session_id, agent.clone());
        info!(session_id = %session_id, "Session registered");
        Ok(agent)
    }

    /// Live agent for a session, rehydrating from durable state if the
    /// process restarted since it was created.
    pub async fn get(&self, session_id: Uuid) -> Result<Arc<SessionAgent>> {
        if let Some(agent) = self.sessions.read().await.get(&session_id) {
            return Ok(agent.clone());
        }

        let agent =
            SessionAgent::rehydrate(session_id, self.backends.clone(), self.clients.clone())
                .await?;

        let mut sessions = self.sessions.write().await;
        // A concurrent request may have rehydrated first; keep the winner
        let agent = sessions.entry(session_id).or_insert(agent).clone();
        Ok(agent)
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
