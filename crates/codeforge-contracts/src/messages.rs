// Conversation message types
//
// One message type serves both logs (full and running/compact). Messages
// are deduplicated by `conversation_id`: adding a message with an id that
// already exists in a log updates that entry in place.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// System message (instructions)
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool execution result
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A message in a conversation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique id within each log; duplicates update in place
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Presentation hints the client may attach (opaque to the runtime)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui: Option<serde_json::Value>,
    /// Tool lifecycle events rendered inline with this message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_events: Option<Vec<serde_json::Value>>,
}

impl ConversationMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            conversation_id: Uuid::now_v7().to_string(),
            role,
            content: content.into(),
            ui: None,
            tool_events: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Tool, content)
    }

    /// Keep the id stable (for upsert tests and replayed messages)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ids_are_unique() {
        let a = ConversationMessage::user("one");
        let b = ConversationMessage::user("two");
        assert_ne!(a.conversation_id, b.conversation_id);
    }

    #[test]
    fn test_role_serialization() {
        let msg = ConversationMessage::assistant("hi").with_id("m1");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["conversation_id"], "m1");
        assert!(json.get("ui").is_none());
    }
}
