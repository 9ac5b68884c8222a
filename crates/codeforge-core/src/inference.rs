// Inference call contract
//
// The LLM transport is external; the runtime only depends on this
// contract. Streaming is the primary path (text deltas feed the client
// channel); the non-streaming form is derived from it.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use codeforge_contracts::{ToolCall, ToolDefinition};

use crate::error::{AgentError, Result};

/// Message role for inference calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Provider-agnostic message for an inference call
#[derive(Debug, Clone)]
pub struct InferenceMessage {
    pub role: InferenceRole,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
}

impl InferenceMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: InferenceRole::System,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: InferenceRole::User,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: InferenceRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: InferenceRole::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// One inference call
#[derive(Debug, Clone, Default)]
pub struct InferenceRequest {
    pub messages: Vec<InferenceMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Final result of an inference call
#[derive(Debug, Clone, Default)]
pub struct InferenceResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Events on the inference stream
#[derive(Debug, Clone)]
pub enum InferenceStreamEvent {
    /// Incremental text content
    TextDelta(String),
    /// Tool calls issued by the model
    ToolCalls(Vec<ToolCall>),
    /// Streaming completed
    Done,
    /// Error during streaming
    Error(String),
}

pub type InferenceStream = Pin<Box<dyn Stream<Item = Result<InferenceStreamEvent>> + Send>>;

/// Contract for the external inference transport
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Streaming call
    async fn execute_inference_stream(&self, request: InferenceRequest) -> Result<InferenceStream>;

    /// Non-streaming call, derived from the stream
    async fn execute_inference(&self, request: InferenceRequest) -> Result<InferenceResponse> {
        use futures::StreamExt;

        let mut stream = self.execute_inference_stream(request).await?;
        let mut response = InferenceResponse::default();
        while let Some(event) = stream.next().await {
            match event? {
                InferenceStreamEvent::TextDelta(delta) => response.text.push_str(&delta),
                InferenceStreamEvent::ToolCalls(calls) => response.tool_calls = calls,
                InferenceStreamEvent::Done => break,
                InferenceStreamEvent::Error(err) => return Err(AgentError::inference(err)),
            }
        }
        Ok(response)
    }
}
