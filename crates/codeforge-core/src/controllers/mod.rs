// Project-type controllers
//
// The app controller drives the phasic state machine; the workflow
// controller drives a tool-loop dialogue. Both observe the cancellation
// token at every inference/sandbox suspension point and finish with a
// Cancelled outcome instead of an error.

pub mod app;
pub mod workflow;

pub use app::PhasicAppController;
pub use workflow::WorkflowController;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use codeforge_contracts::SessionEvent;

use crate::error::Result;
use crate::events::EventBus;
use crate::inference::{InferenceResponse, InferenceStream, InferenceStreamEvent};

/// How a generation run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Cancelled,
}

impl GenerationOutcome {
    pub fn is_cancelled(self) -> bool {
        matches!(self, GenerationOutcome::Cancelled)
    }
}

/// Drain an inference stream with cancellation observed between events.
///
/// Text deltas are forwarded to the clients as `text_delta` frames when a
/// conversation id is given. A stream error after partial output returns
/// the partial response rather than failing the operation.
pub(crate) async fn collect_stream(
    mut stream: InferenceStream,
    token: &CancellationToken,
    events: &EventBus,
    conversation_id: Option<&str>,
) -> Result<InferenceResponse> {
    let mut response = InferenceResponse::default();
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return Err(crate::error::AgentError::Cancelled),
            event = stream.next() => event,
        };
        let Some(event) = event else {
            break;
        };
        match event {
            Ok(InferenceStreamEvent::TextDelta(delta)) => {
                if !delta.is_empty() {
                    response.text.push_str(&delta);
                    if let Some(id) = conversation_id {
                        events.broadcast(SessionEvent::text_delta(id, &delta)).await;
                    }
                }
            }
            Ok(InferenceStreamEvent::ToolCalls(calls)) => response.tool_calls = calls,
            Ok(InferenceStreamEvent::Done) => break,
            Ok(InferenceStreamEvent::Error(e)) => {
                if response.text.is_empty() && response.tool_calls.is_empty() {
                    return Err(crate::error::AgentError::inference(e));
                }
                tracing::warn!(error = %e, "Inference stream error after partial output; keeping partial");
                break;
            }
            Err(e) => {
                if response.text.is_empty() && response.tool_calls.is_empty() {
                    return Err(e);
                }
                tracing::warn!(error = %e, "Inference stream failed after partial output; keeping partial");
                break;
            }
        }
    }
    Ok(response)
}
