// Agentic workflow controller
//
// One LLM dialogue drives the whole generation: the model calls
// generate_files (which must produce src/index.ts) and
// configure_workflow_metadata (merged per-field with prior metadata).
// Generation ends when the model stops issuing tool calls or the token
// is cancelled. After a successful run the scaffold is regenerated so
// wrangler.jsonc and README.md reflect the merged metadata.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use codeforge_contracts::{ConversationMessage, SessionEvent};

use super::{collect_stream, GenerationOutcome};
use crate::cancel::CancellationController;
use crate::conversation::ConversationStore;
use crate::deploy::{DeploymentManager, NoopDeployObserver};
use crate::error::{AgentError, Result};
use crate::events::EventBus;
use crate::files::FileManager;
use crate::inference::{InferenceClient, InferenceMessage, InferenceRequest};
use crate::plugins::PluginManager;
use crate::scaffold::{workflow_scaffold, ScaffoldRequest};
use crate::state::{
    DeploymentStatus, FileRecord, WorkflowMetadata, WorkflowSessionState, WORKFLOW_ENTRY_PATH,
};
use crate::state_store::StateStore;
use crate::tools::{AgentHandle, ToolRegistry};

const MAX_DIALOGUE_ITERATIONS: usize = 12;

pub struct WorkflowController {
    state: Arc<StateStore<WorkflowSessionState>>,
    files: Arc<FileManager<WorkflowSessionState>>,
    deployment: Arc<DeploymentManager<WorkflowSessionState>>,
    conversation: Arc<ConversationStore>,
    inference: Arc<dyn InferenceClient>,
    events: Arc<EventBus>,
    plugins: Arc<PluginManager>,
    cancel: Arc<CancellationController>,
    tools: ToolRegistry,
}

impl WorkflowController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<StateStore<WorkflowSessionState>>,
        files: Arc<FileManager<WorkflowSessionState>>,
        deployment: Arc<DeploymentManager<WorkflowSessionState>>,
        conversation: Arc<ConversationStore>,
        inference: Arc<dyn InferenceClient>,
        events: Arc<EventBus>,
        plugins: Arc<PluginManager>,
        cancel: Arc<CancellationController>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            state,
            files,
            deployment,
            conversation,
            inference,
            events,
            plugins,
            cancel,
            tools,
        }
    }

    /// Run the tool-loop dialogue to completion (or cancellation)
    pub async fn generate_all(
        &self,
        handle: Arc<dyn AgentHandle>,
    ) -> Result<GenerationOutcome> {
        let token = self.cancel.get_or_create();
        self.events.broadcast(SessionEvent::GenerationStarted).await;
        self.plugins.on_generation_start().await;

        let outcome = match self.run_dialogue(&token, handle).await {
            Ok(outcome) => outcome,
            Err(AgentError::Cancelled) => GenerationOutcome::Cancelled,
            Err(e) => {
                self.plugins.on_error(&e.to_string(), "generate_all").await;
                self.events
                    .broadcast(SessionEvent::error(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        if outcome.is_cancelled() {
            info!("Workflow generation cancelled");
            return Ok(outcome);
        }

        self.regenerate_scaffold().await?;
        self.events
            .broadcast(SessionEvent::GenerationCompleted)
            .await;
        self.plugins.on_generation_complete().await;
        self.state
            .update(|s| s.base.should_be_generating = false)
            .await;
        Ok(GenerationOutcome::Completed)
    }

    async fn run_dialogue(
        &self,
        token: &CancellationToken,
        handle: Arc<dyn AgentHandle>,
    ) -> Result<GenerationOutcome> {
        let snapshot = self.state.get().await;
        self.conversation
            .add_message(ConversationMessage::user(snapshot.base.query.clone()))
            .await;

        let mut messages = vec![
            InferenceMessage::system(
                "You build Cloudflare workflows. Write the workflow with the \
                 generate_files tool (the entry module must be src/index.ts, \
                 exporting a class extending WorkflowEntrypoint) and declare its \
                 metadata with configure_workflow_metadata (name, description, \
                 params schema, env vars, secrets and resource bindings). Stop \
                 calling tools when the workflow is complete.",
            ),
            InferenceMessage::user(snapshot.base.query.clone()),
        ];

        for iteration in 0..MAX_DIALOGUE_ITERATIONS {
            if token.is_cancelled() {
                return Ok(GenerationOutcome::Cancelled);
            }

            let conversation_id = Uuid::now_v7().to_string();
            let request = InferenceRequest {
                messages: messages.clone(),
                tools: self.tools.definitions(),
            };
            let stream = self.inference.execute_inference_stream(request).await?;
            let response =
                match collect_stream(stream, token, &self.events, Some(&conversation_id)).await {
                    Ok(response) => response,
                    Err(AgentError::Cancelled) => return Ok(GenerationOutcome::Cancelled),
                    Err(e) => return Err(e),
                };

            if !response.text.is_empty() {
                self.conversation
                    .add_message(
                        ConversationMessage::assistant(response.text.clone())
                            .with_id(conversation_id.clone()),
                    )
                    .await;
            }

            if response.tool_calls.is_empty() {
                info!(iteration, "Workflow dialogue settled");
                return Ok(GenerationOutcome::Completed);
            }

            messages.push(InferenceMessage::assistant(
                response.text.clone(),
                Some(response.tool_calls.clone()),
            ));
            for tool_call in &response.tool_calls {
                let result = self.tools.dispatch(handle.as_ref(), tool_call).await;
                let content = result
                    .result
                    .as_ref()
                    .map(|v| v.to_string())
                    .or_else(|| result.error.clone())
                    .unwrap_or_default();
                self.conversation
                    .add_message(ConversationMessage::tool(format!(
                        "{}: {}",
                        tool_call.name, content
                    )))
                    .await;
                messages.push(InferenceMessage::tool_result(&tool_call.id, content));
            }
        }

        warn!(max = MAX_DIALOGUE_ITERATIONS, "Workflow dialogue hit the iteration ceiling");
        Ok(GenerationOutcome::Completed)
    }

    /// Write model-produced files into the map (generate_files tool)
    pub async fn apply_generated_files(&self, files: Vec<FileRecord>) -> Result<()> {
        for file in &files {
            self.events
                .broadcast(SessionEvent::FileGenerating {
                    file_path: file.file_path.clone(),
                })
                .await;
        }
        let saved = self
            .files
            .save_generated_files(files, "generate workflow files")
            .await?;
        for file in &saved {
            self.events
                .broadcast(SessionEvent::file_generated(
                    &file.file_path,
                    &file.file_purpose,
                ))
                .await;
        }
        Ok(())
    }

    /// Merge a metadata update (configure_workflow_metadata tool)
    pub async fn apply_metadata(&self, update: WorkflowMetadata) -> Result<()> {
        self.state
            .update(|s| {
                let mut merged = s.workflow_metadata.clone().unwrap_or_default();
                merged.merge(update.clone());
                s.workflow_metadata = Some(merged);
            })
            .await;
        Ok(())
    }

    /// Re-derive wrangler.jsonc and README.md from the merged metadata
    pub async fn regenerate_scaffold(&self) -> Result<()> {
        let snapshot = self.state.get().await;
        if snapshot.workflow_code().is_none() && snapshot.workflow_metadata.is_none() {
            return Ok(());
        }

        let request = ScaffoldRequest {
            workflow_name: snapshot.base.project_name.clone(),
            workflow_code: snapshot.workflow_code().map(str::to_string),
            metadata: snapshot.workflow_metadata.clone(),
        };
        let scaffold = workflow_scaffold(&request);
        let derived: Vec<FileRecord> = scaffold
            .all_files
            .into_iter()
            .filter(|f| scaffold.dont_touch_files.contains(&f.file_path))
            .collect();
        self.files
            .save_generated_files(derived, "regenerate scaffold from metadata")
            .await?;
        Ok(())
    }

    /// Deploy to Cloudflare, tracking the workflow deployment lifecycle
    pub async fn deploy_to_cloudflare(&self, user_id: &str) -> Result<String> {
        self.state
            .update(|s| {
                s.deployment_status = DeploymentStatus::Deploying;
                s.deployment_error = None;
            })
            .await;

        match self
            .deployment
            .deploy_to_cloudflare(user_id, &NoopDeployObserver)
            .await
        {
            Ok(url) => {
                self.state
                    .update(|s| {
                        s.deployment_status = DeploymentStatus::Deployed;
                        s.deployment_url = Some(url.clone());
                    })
                    .await;
                Ok(url)
            }
            Err(e) => {
                let message = e.to_string();
                self.state
                    .update(|s| {
                        s.deployment_status = DeploymentStatus::Failed;
                        s.deployment_error = Some(message.clone());
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// Entry-module guard used by the generate_files capability
    pub fn validate_entry_present(files: &[FileRecord]) -> bool {
        files.iter().any(|f| f.file_path == WORKFLOW_ENTRY_PATH)
    }
}
