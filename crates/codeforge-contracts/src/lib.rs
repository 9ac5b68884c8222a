// Wire protocol for Codeforge
//
// Everything that crosses the client channel lives here: inbound control
// frames, outbound session events, conversation messages, tool DTOs and
// the session bootstrap types. The runtime crate depends on this crate,
// never the other way around.

pub mod events;
pub mod frames;
pub mod messages;
pub mod session;
pub mod tools;

pub use events::{LintIssue, RuntimeErrorReport, SessionEvent};
pub use frames::{ClientFrame, ImageAttachment};
pub use messages::{ConversationMessage, MessageRole};
pub use session::{
    AgentMode, BootstrapItem, CreateSessionRequest, ProjectType, SessionInfo,
};
pub use tools::{ToolCall, ToolDefinition, ToolResult};
