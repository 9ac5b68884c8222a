// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Conversation models
// ============================================

/// Row of `full_conversations` / `compact_conversations`.
/// `messages` is a JSON array of ConversationMessage.
#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: String,
    pub messages: String,
}

// ============================================
// Session state
// ============================================

/// The serialized session record (one opaque row per session)
#[derive(Debug, Clone, FromRow)]
pub struct SessionStateRow {
    pub session_id: Uuid,
    pub project_type: String,
    pub state: sqlx::types::JsonValue,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// VCS objects
// ============================================

/// One content-addressed git object
#[derive(Debug, Clone, FromRow)]
pub struct GitObjectRow {
    pub session_id: Uuid,
    pub object_id: String,
    pub kind: String,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// HEAD pointer per session
#[derive(Debug, Clone, FromRow)]
pub struct GitHeadRow {
    pub session_id: Uuid,
    pub head: String,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Session index
// ============================================

/// Discovery row for sessions (also carries the exported repository URL)
#[derive(Debug, Clone, FromRow)]
pub struct SessionIndexRow {
    pub session_id: Uuid,
    pub project_name: String,
    pub project_type: String,
    pub query: String,
    pub repository_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a session-index row
#[derive(Debug, Clone)]
pub struct CreateSessionIndex {
    pub session_id: Uuid,
    pub project_name: String,
    pub project_type: String,
    pub query: String,
}
