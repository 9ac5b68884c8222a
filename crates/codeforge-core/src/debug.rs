// Deep-debug assistant
//
// Tool-using diagnostic loop: fetch runtime errors (clearing them), build
// a files index narrowed by focus paths, then let the model investigate
// with the common tool set while its text streams to the clients. The
// transcript is persisted to `last_deep_debug_transcript`.
//
// Single-flight: one deep-debug session per session agent. A concurrent
// call does not start a second loop - it awaits the first and shares its
// outcome. Generation cancellation does not propagate here.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use codeforge_contracts::SessionEvent;

use crate::deploy::DeploymentManager;
use crate::events::EventBus;
use crate::inference::{InferenceClient, InferenceMessage, InferenceRequest, InferenceStreamEvent};
use crate::state::SessionState;
use crate::state_store::StateStore;
use crate::tools::{AgentHandle, ToolRegistry};

const MAX_DEBUG_ITERATIONS: usize = 8;

/// Result of a deep-debug run
#[derive(Debug, Clone)]
pub struct DeepDebugOutcome {
    pub success: bool,
    pub transcript: String,
    pub error: Option<String>,
}

/// Inputs to a deep-debug run
#[derive(Debug, Clone, Default)]
pub struct DeepDebugRequest {
    pub issue: String,
    pub previous_transcript: Option<String>,
    /// Path prefixes the files index is narrowed to (empty = all files)
    pub focus_paths: Vec<String>,
}

type SharedRun = Shared<BoxFuture<'static, DeepDebugOutcome>>;

pub struct DeepDebugAssistant<S: SessionState> {
    state: Arc<StateStore<S>>,
    deployment: Arc<DeploymentManager<S>>,
    inference: Arc<dyn InferenceClient>,
    tools: ToolRegistry,
    events: Arc<EventBus>,
    in_flight: Mutex<Option<SharedRun>>,
}

impl<S: SessionState> DeepDebugAssistant<S> {
    pub fn new(
        state: Arc<StateStore<S>>,
        deployment: Arc<DeploymentManager<S>>,
        inference: Arc<dyn InferenceClient>,
        tools: ToolRegistry,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            state,
            deployment,
            inference,
            tools,
            events,
            in_flight: Mutex::new(None),
        }
    }

    /// True while a debug loop is running
    pub async fn is_running(&self) -> bool {
        self.in_flight.lock().await.is_some()
    }

    /// Await the in-flight run, if any
    pub async fn wait(&self) {
        let existing = self.in_flight.lock().await.clone();
        if let Some(run) = existing {
            let _ = run.await;
        }
    }

    /// Run the assistant; a concurrent call joins the in-flight run.
    pub async fn run(
        self: &Arc<Self>,
        request: DeepDebugRequest,
        handle: Arc<dyn AgentHandle>,
    ) -> DeepDebugOutcome {
        let (run, owner) = {
            let mut guard = self.in_flight.lock().await;
            match guard.as_ref() {
                Some(existing) => (existing.clone(), false),
                None => {
                    let this = self.clone();
                    let run: SharedRun =
                        async move { this.run_inner(request, handle).await }.boxed().shared();
                    *guard = Some(run.clone());
                    (run, true)
                }
            }
        };

        let outcome = run.await;
        if owner {
            *self.in_flight.lock().await = None;
        }
        outcome
    }

    async fn run_inner(
        self: Arc<Self>,
        request: DeepDebugRequest,
        handle: Arc<dyn AgentHandle>,
    ) -> DeepDebugOutcome {
        info!(issue = %request.issue, "Deep debug started");

        // Deep debug has its own lifetime; generation cancel does not
        // reach into this token.
        let token = CancellationToken::new();
        let errors = self.deployment.fetch_runtime_errors(true, &token).await;

        let snapshot = self.state.get().await;
        let mut files_index = String::new();
        for (path, record) in &snapshot.base().generated_files_map {
            let in_focus = request.focus_paths.is_empty()
                || request.focus_paths.iter().any(|prefix| path.starts_with(prefix));
            if in_focus {
                files_index.push_str(&format!(
                    "--- {path} ({})\n{}\n",
                    record.file_purpose, record.file_contents
                ));
            } else {
                files_index.push_str(&format!("--- {path} ({})\n", record.file_purpose));
            }
        }

        let system = format!(
            "You are a debugging assistant for the project '{}'. Investigate the \
             reported issue using the available tools and propose concrete patches.\n\n\
             Runtime errors (already cleared from the preview):\n{}\n\nFiles:\n{}",
            snapshot.base().project_name,
            serde_json::to_string_pretty(&errors).unwrap_or_default(),
            files_index,
        );

        let mut user = request.issue.clone();
        if let Some(previous) = &request.previous_transcript {
            user.push_str("\n\nPrevious debugging transcript:\n");
            user.push_str(previous);
        }

        let mut messages = vec![InferenceMessage::system(system), InferenceMessage::user(user)];
        let conversation_id = format!("deep-debug-{}", Uuid::now_v7());
        let mut transcript = String::new();

        for _ in 0..MAX_DEBUG_ITERATIONS {
            let request = InferenceRequest {
                messages: messages.clone(),
                tools: self.tools.definitions(),
            };
            let mut stream = match self.inference.execute_inference_stream(request).await {
                Ok(stream) => stream,
                Err(e) => return self.finish(transcript, Some(e.to_string())).await,
            };

            let mut text = String::new();
            let mut tool_calls = Vec::new();
            let mut stream_error = None;
            while let Some(event) = stream.next().await {
                match event {
                    Ok(InferenceStreamEvent::TextDelta(delta)) => {
                        if !delta.is_empty() {
                            text.push_str(&delta);
                            self.events
                                .broadcast(SessionEvent::text_delta(&conversation_id, &delta))
                                .await;
                        }
                    }
                    Ok(InferenceStreamEvent::ToolCalls(calls)) => tool_calls = calls,
                    Ok(InferenceStreamEvent::Done) => break,
                    Ok(InferenceStreamEvent::Error(e)) | Err(crate::error::AgentError::Inference(e)) => {
                        stream_error = Some(e);
                        break;
                    }
                    Err(e) => {
                        stream_error = Some(e.to_string());
                        break;
                    }
                }
            }

            if !text.is_empty() {
                transcript.push_str(&text);
                transcript.push('\n');
            }
            if let Some(e) = stream_error {
                // A partial transcript still counts as a result; an empty
                // one surfaces the failure
                warn!(error = %e, "Inference stream failed mid-debug; keeping partial transcript");
                return self.finish(transcript, Some(e)).await;
            }

            if tool_calls.is_empty() {
                break;
            }

            messages.push(InferenceMessage::assistant(text, Some(tool_calls.clone())));
            for tool_call in &tool_calls {
                let result = self.tools.dispatch(handle.as_ref(), tool_call).await;
                transcript.push_str(&format!(
                    "[tool {}: {}]\n",
                    tool_call.name,
                    if result.is_error() { "error" } else { "ok" }
                ));
                let content = result
                    .result
                    .as_ref()
                    .map(|v| v.to_string())
                    .or_else(|| result.error.clone())
                    .unwrap_or_default();
                messages.push(InferenceMessage::tool_result(&tool_call.id, content));
            }
        }

        self.finish(transcript, None).await
    }

    async fn finish(&self, transcript: String, error: Option<String>) -> DeepDebugOutcome {
        if !transcript.is_empty() {
            let persisted = transcript.clone();
            self.state
                .update(|s| s.base_mut().last_deep_debug_transcript = Some(persisted.clone()))
                .await;
        }
        match error {
            Some(error) if transcript.is_empty() => DeepDebugOutcome {
                success: false,
                transcript,
                error: Some(error),
            },
            _ => DeepDebugOutcome {
                success: true,
                transcript,
                error: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::files::FileManager;
    use crate::inference::InferenceResponse;
    use crate::memory::{
        InMemorySecretsProvider, MockDeployClient, MockSandboxClient, NullAgentHandle,
        ScriptedInferenceClient,
    };
    use crate::state::AppSessionState;
    use crate::tools::common_tools;
    use crate::vcs::GitStore;

    async fn assistant(
        script: Vec<InferenceResponse>,
    ) -> (Arc<DeepDebugAssistant<AppSessionState>>, Arc<StateStore<AppSessionState>>) {
        let state = Arc::new(StateStore::new(AppSessionState::new(Uuid::now_v7())));
        let git = Arc::new(GitStore::new(Uuid::now_v7(), None));
        git.init().await.unwrap();
        let files = Arc::new(FileManager::new(state.clone(), git));
        let events = Arc::new(EventBus::new());
        let deployment = Arc::new(DeploymentManager::new(
            state.clone(),
            files,
            Arc::new(MockSandboxClient::healthy()),
            Arc::new(MockDeployClient::default()),
            Arc::new(InMemorySecretsProvider::default()),
            events.clone(),
        ));
        let assistant = Arc::new(DeepDebugAssistant::new(
            state.clone(),
            deployment,
            Arc::new(ScriptedInferenceClient::new(script)),
            common_tools(),
            events,
        ));
        (assistant, state)
    }

    #[tokio::test]
    async fn test_transcript_is_persisted() {
        let (assistant, state) = assistant(vec![InferenceResponse {
            text: "The null deref comes from App.tsx line 3.".to_string(),
            tool_calls: Vec::new(),
        }])
        .await;

        let outcome = assistant
            .run(
                DeepDebugRequest {
                    issue: "preview crashes".to_string(),
                    ..Default::default()
                },
                Arc::new(NullAgentHandle::default()),
            )
            .await;

        assert!(outcome.success);
        assert!(outcome.transcript.contains("App.tsx"));
        let persisted = state.get().await.base.last_deep_debug_transcript.unwrap();
        assert!(persisted.contains("App.tsx"));
    }

    /// Inference client that waits for a notification before answering,
    /// so the test can hold a run in flight deliberately.
    struct GatedInferenceClient {
        gate: Arc<tokio::sync::Notify>,
        inner: ScriptedInferenceClient,
    }

    #[async_trait::async_trait]
    impl InferenceClient for GatedInferenceClient {
        async fn execute_inference_stream(
            &self,
            request: InferenceRequest,
        ) -> crate::error::Result<crate::inference::InferenceStream> {
            self.gate.notified().await;
            self.inner.execute_inference_stream(request).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_run_shares_outcome() {
        let state = Arc::new(StateStore::new(AppSessionState::new(Uuid::now_v7())));
        let git = Arc::new(GitStore::new(Uuid::now_v7(), None));
        git.init().await.unwrap();
        let files = Arc::new(FileManager::new(state.clone(), git));
        let events = Arc::new(EventBus::new());
        let deployment = Arc::new(DeploymentManager::new(
            state.clone(),
            files,
            Arc::new(MockSandboxClient::healthy()),
            Arc::new(MockDeployClient::default()),
            Arc::new(InMemorySecretsProvider::default()),
            events.clone(),
        ));
        let gate = Arc::new(tokio::sync::Notify::new());
        let assistant = Arc::new(DeepDebugAssistant::new(
            state,
            deployment,
            Arc::new(GatedInferenceClient {
                gate: gate.clone(),
                inner: ScriptedInferenceClient::new(vec![InferenceResponse {
                    text: "only one loop runs".to_string(),
                    tool_calls: Vec::new(),
                }]),
            }),
            common_tools(),
            events,
        ));

        let handle: Arc<dyn AgentHandle> = Arc::new(NullAgentHandle::default());
        let request = DeepDebugRequest {
            issue: "x".to_string(),
            ..Default::default()
        };

        let first = tokio::spawn({
            let assistant = assistant.clone();
            let handle = handle.clone();
            let request = request.clone();
            async move { assistant.run(request, handle).await }
        });
        // Let the first run reach the gated inference call
        tokio::task::yield_now().await;
        while !assistant.is_running().await {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn({
            let assistant = assistant.clone();
            async move { assistant.run(request, handle).await }
        });
        tokio::task::yield_now().await;

        // notify_one stores a permit, so the wakeup is not lost even if
        // the run has not reached the gate yet
        gate.notify_one();
        let a = first.await.unwrap();
        let b = second.await.unwrap();

        // Both callers observe the single run's transcript; the script
        // had exactly one response, so a second loop would have come
        // back empty.
        assert_eq!(a.transcript, b.transcript);
        assert!(a.transcript.contains("only one loop runs"));
    }
}
