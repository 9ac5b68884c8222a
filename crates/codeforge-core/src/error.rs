// Error types for the session runtime

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur inside a session agent.
///
/// `Cancelled` is deliberately part of this enum but is never surfaced to
/// clients as an `error` event: operations that observe an aborted token
/// finish with a stopped/equivalent lifecycle event instead.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Inference transport error
    #[error("inference error: {0}")]
    Inference(String),

    /// Sandbox call reported failure
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// Deployment sequencing error
    #[error("deployment error: {0}")]
    Deployment(String),

    /// Version-control store error
    #[error("vcs error: {0}")]
    Vcs(String),

    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(String),

    /// Control frame or argument validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// The current operation observed an aborted cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentError {
    pub fn inference(msg: impl Into<String>) -> Self {
        AgentError::Inference(msg.into())
    }

    pub fn sandbox(msg: impl Into<String>) -> Self {
        AgentError::Sandbox(msg.into())
    }

    pub fn deployment(msg: impl Into<String>) -> Self {
        AgentError::Deployment(msg.into())
    }

    pub fn vcs(msg: impl Into<String>) -> Self {
        AgentError::Vcs(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        AgentError::Storage(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AgentError::Validation(msg.into())
    }

    /// True when the error is the cancelled outcome rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}
