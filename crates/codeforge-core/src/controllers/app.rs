// Phasic app controller
//
// Multi-phase app generation over the dev-state machine:
//
//   IDLE -> PHASE_GENERATING (plan) -> PHASE_IMPLEMENTING (per phase)
//        -> REVIEWING -> FINALIZING -> IDLE
//
// Each implemented phase produces exactly one commit and a sandbox
// deploy. Cancellation is observed at every inference/sandbox await; an
// interrupted phase keeps `completed = false` and a later run resumes
// from the first non-completed phase. Queued user suggestions are
// drained at phase boundaries.

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use codeforge_contracts::{ConversationMessage, SessionEvent};

use super::{collect_stream, GenerationOutcome};
use crate::cancel::CancellationController;
use crate::conversation::ConversationStore;
use crate::deploy::{DeploymentManager, NoopDeployObserver};
use crate::error::{AgentError, Result};
use crate::events::EventBus;
use crate::files::FileManager;
use crate::inference::{InferenceClient, InferenceMessage, InferenceRequest};
use crate::limits::{MAX_PHASES, MAX_REVIEW_CYCLES};
use crate::plugins::PluginManager;
use crate::state::{
    AppSessionState, Blueprint, DevState, FileRecord, PhaseConcept, PhaseRecord,
};
use crate::state_store::StateStore;

pub struct PhasicAppController {
    state: Arc<StateStore<AppSessionState>>,
    files: Arc<FileManager<AppSessionState>>,
    deployment: Arc<DeploymentManager<AppSessionState>>,
    conversation: Arc<ConversationStore>,
    inference: Arc<dyn InferenceClient>,
    events: Arc<EventBus>,
    plugins: Arc<PluginManager>,
    cancel: Arc<CancellationController>,
}

impl PhasicAppController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<StateStore<AppSessionState>>,
        files: Arc<FileManager<AppSessionState>>,
        deployment: Arc<DeploymentManager<AppSessionState>>,
        conversation: Arc<ConversationStore>,
        inference: Arc<dyn InferenceClient>,
        events: Arc<EventBus>,
        plugins: Arc<PluginManager>,
        cancel: Arc<CancellationController>,
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
        }
    }

    /// Full generation run: plan (if needed), implement pending phases,
    /// review, finalize. Also the resume entry point - it picks up from
    /// the first non-completed phase.
    pub async fn generate_all(&self) -> Result<GenerationOutcome> {
        let token = self.cancel.get_or_create();
        self.events.broadcast(SessionEvent::GenerationStarted).await;
        self.plugins.on_generation_start().await;

        let outcome = match self.run_phases(&token).await {
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
            info!("Generation cancelled");
            return Ok(outcome);
        }

        self.events
            .broadcast(SessionEvent::GenerationCompleted)
            .await;
        self.plugins.on_generation_complete().await;
        self.state
            .update(|s| s.base.should_be_generating = false)
            .await;
        Ok(GenerationOutcome::Completed)
    }

    async fn run_phases(&self, token: &CancellationToken) -> Result<GenerationOutcome> {
        // Plan once
        let snapshot = self.state.get().await;
        if snapshot.blueprint.is_none() {
            if self.plan_blueprint(token).await?.is_cancelled() {
                return Ok(GenerationOutcome::Cancelled);
            }
        }

        // Implement pending phases
        loop {
            if token.is_cancelled() {
                return Ok(GenerationOutcome::Cancelled);
            }
            let snapshot = self.state.get().await;
            if snapshot.phases_counter >= MAX_PHASES {
                warn!(max = MAX_PHASES, "Phase ceiling reached; finalizing");
                break;
            }
            let Some(phase) = snapshot.next_pending_phase().cloned() else {
                break;
            };

            if self.implement_phase(&phase, token).await?.is_cancelled() {
                return Ok(GenerationOutcome::Cancelled);
            }
        }

        // Review
        let snapshot = self.state.get().await;
        if snapshot.current_dev_state == DevState::PhaseImplementing {
            self.state.update(|s| {
                let _ = s.transition(DevState::Reviewing);
                s.reviewing_initiated = true;
            })
            .await;
            if self.review(token).await?.is_cancelled() {
                return Ok(GenerationOutcome::Cancelled);
            }
        }

        // Finalize
        self.state.update(|s| {
            if s.current_dev_state == DevState::Reviewing
                || s.current_dev_state == DevState::PhaseGenerating
            {
                let _ = s.transition(DevState::Finalizing);
            }
        })
        .await;

        self.plugins.before_deployment().await;
        match self
            .deployment
            .deploy_to_sandbox(Vec::new(), true, None, false, token, &NoopDeployObserver)
            .await
        {
            Ok(url) => {
                self.plugins.after_deployment(&url).await;
            }
            Err(AgentError::Cancelled) => return Ok(GenerationOutcome::Cancelled),
            Err(e) => warn!(error = %e, "Final deploy failed"),
        }

        self.state.update(|s| {
            if s.current_dev_state == DevState::Finalizing {
                let _ = s.transition(DevState::Idle);
            }
        })
        .await;
        Ok(GenerationOutcome::Completed)
    }

    /// PHASE_GENERATING: derive the blueprint from the user query
    async fn plan_blueprint(&self, token: &CancellationToken) -> Result<GenerationOutcome> {
        let snapshot = self.state.get().await;
        self.state
            .update(|s| {
                let _ = s.transition(DevState::PhaseGenerating);
            })
            .await;
        self.events
            .broadcast(SessionEvent::PhaseGenerating {
                phase_name: "blueprint".to_string(),
            })
            .await;

        let request = InferenceRequest {
            messages: vec![
                InferenceMessage::system(
                    "You are planning a small web app. Answer with a JSON object \
                     {\"title\", \"description\", \"phases\": [{\"name\", \"description\", \
                     \"files\": [{\"path\", \"purpose\"}]}]}. Keep phases small and ordered.",
                ),
                InferenceMessage::user(snapshot.base.query.clone()),
            ],
            tools: Vec::new(),
        };
        let stream = self.inference.execute_inference_stream(request).await?;
        let response = match collect_stream(stream, token, &self.events, None).await {
            Ok(response) => response,
            Err(AgentError::Cancelled) => return Ok(GenerationOutcome::Cancelled),
            Err(e) => return Err(e),
        };

        if token.is_cancelled() {
            return Ok(GenerationOutcome::Cancelled);
        }

        let blueprint = parse_blueprint(&response.text).unwrap_or_else(|| fallback_blueprint(&snapshot));
        let phases: Vec<PhaseRecord> = blueprint
            .phases
            .iter()
            .take(MAX_PHASES)
            .map(PhaseRecord::from_concept)
            .collect();

        for phase in &phases {
            self.events
                .broadcast(SessionEvent::PhaseGenerated {
                    phase_name: phase.name.clone(),
                    description: phase.description.clone(),
                })
                .await;
        }

        self.conversation
            .add_message(ConversationMessage::assistant(format!(
                "Planned {}: {} phase(s)",
                blueprint.title,
                phases.len()
            )))
            .await;

        self.state
            .update(|s| {
                s.blueprint = Some(blueprint);
                s.generated_phases = phases;
                let _ = s.transition(DevState::PhaseImplementing);
            })
            .await;
        Ok(GenerationOutcome::Completed)
    }

    /// PHASE_IMPLEMENTING: generate this phase's files, commit, deploy
    async fn implement_phase(
        &self,
        phase: &PhaseRecord,
        token: &CancellationToken,
    ) -> Result<GenerationOutcome> {
        info!(phase = %phase.name, "Implementing phase");
        self.state
            .update(|s| {
                let _ = s.transition(DevState::PhaseImplementing);
                s.current_phase = Some(phase.name.clone());
            })
            .await;
        self.events
            .broadcast(SessionEvent::PhaseImplementing {
                phase_name: phase.name.clone(),
            })
            .await;
        self.plugins
            .before_files_generated(&phase.name, &phase.files)
            .await;

        // Drain suggestions queued since the last boundary into the prompt
        let snapshot = self.state.get().await;
        let pending: Vec<String> = snapshot.base.pending_user_inputs.clone();
        if !pending.is_empty() {
            self.state
                .update(|s| s.base.pending_user_inputs.clear())
                .await;
        }

        let files_context: String = snapshot
            .base
            .generated_files_map
            .values()
            .map(|f| format!("--- {} ({})\n{}\n", f.file_path, f.file_purpose, f.file_contents))
            .collect();
        let planned: String = phase
            .files
            .iter()
            .map(|f| format!("- {} : {}\n", f.path, f.purpose))
            .collect();

        let mut prompt = format!(
            "Project: {}\nPhase: {} - {}\nPlanned files:\n{}\n",
            snapshot.base.query, phase.name, phase.description, planned
        );
        if !pending.is_empty() {
            prompt.push_str("User suggestions to incorporate:\n");
            for suggestion in &pending {
                prompt.push_str(&format!("- {suggestion}\n"));
            }
        }
        prompt.push_str(&format!("\nCurrent files:\n{files_context}"));

        let request = InferenceRequest {
            messages: vec![
                InferenceMessage::system(
                    "Implement the requested phase. Answer with complete files, each \
                     wrapped as <file path=\"...\" purpose=\"...\">contents</file>.",
                ),
                InferenceMessage::user(prompt),
            ],
            tools: Vec::new(),
        };
        let stream = self.inference.execute_inference_stream(request).await?;
        let response = match collect_stream(stream, token, &self.events, None).await {
            Ok(response) => response,
            Err(AgentError::Cancelled) => {
                // The phase stays non-completed; the queued suggestions
                // were consumed into this attempt, so re-queue them.
                if !pending.is_empty() {
                    self.state
                        .update(|s| { s.base.pending_user_inputs.splice(0..0, pending.clone()); })
                        .await;
                }
                return Ok(GenerationOutcome::Cancelled);
            }
            Err(e) => return Err(e),
        };

        if token.is_cancelled() {
            if !pending.is_empty() {
                self.state
                    .update(|s| { s.base.pending_user_inputs.splice(0..0, pending.clone()); })
                    .await;
            }
            return Ok(GenerationOutcome::Cancelled);
        }

        let generated = parse_file_blocks(&response.text);
        if generated.is_empty() {
            warn!(phase = %phase.name, "Phase produced no files");
        }
        for file in &generated {
            self.events
                .broadcast(SessionEvent::FileGenerating {
                    file_path: file.file_path.clone(),
                })
                .await;
            self.events
                .broadcast(SessionEvent::FileChunkGenerated {
                    file_path: file.file_path.clone(),
                    chunk: file.file_contents.clone(),
                })
                .await;
        }

        // One commit per implemented phase, pushed with the deploy
        let commit_message = format!("implement phase: {}", phase.name);
        match self
            .deployment
            .deploy_to_sandbox(
                generated.clone(),
                false,
                Some(&commit_message),
                false,
                token,
                &NoopDeployObserver,
            )
            .await
        {
            Ok(_) => {}
            Err(AgentError::Cancelled) => return Ok(GenerationOutcome::Cancelled),
            Err(e) => warn!(phase = %phase.name, error = %e, "Phase deploy failed"),
        }

        for file in &generated {
            self.events
                .broadcast(SessionEvent::file_generated(
                    &file.file_path,
                    &file.file_purpose,
                ))
                .await;
        }
        self.plugins
            .after_files_generated(&phase.name, &generated)
            .await;

        let phase_name = phase.name.clone();
        let file_count = generated.len();
        self.state
            .update(|s| {
                if let Some(record) = s
                    .generated_phases
                    .iter_mut()
                    .find(|p| p.name == phase_name && !p.completed)
                {
                    record.completed = true;
                }
                s.phases_counter += 1;
                s.mvp_generated = true;
                s.current_phase = None;
            })
            .await;
        self.events
            .broadcast(SessionEvent::PhaseImplemented {
                phase_name: phase.name.clone(),
                file_count,
            })
            .await;
        Ok(GenerationOutcome::Completed)
    }

    /// REVIEWING: static analysis + runtime errors feed fix rounds
    async fn review(&self, token: &CancellationToken) -> Result<GenerationOutcome> {
        for cycle in 0..MAX_REVIEW_CYCLES {
            if token.is_cancelled() {
                return Ok(GenerationOutcome::Cancelled);
            }

            let issues = self.deployment.run_static_analysis(None).await.unwrap_or_default();
            let errors = self.deployment.fetch_runtime_errors(true, token).await;
            if issues.is_empty() && errors.is_empty() {
                break;
            }

            info!(cycle, issues = issues.len(), errors = errors.len(), "Review cycle");
            let snapshot = self.state.get().await;
            let files_context: String = snapshot
                .base
                .generated_files_map
                .values()
                .map(|f| format!("--- {}\n{}\n", f.file_path, f.file_contents))
                .collect();

            let prompt = format!(
                "Fix these findings.\nStatic analysis:\n{}\nRuntime errors:\n{}\n\nFiles:\n{}",
                serde_json::to_string_pretty(&issues).unwrap_or_default(),
                serde_json::to_string_pretty(&errors).unwrap_or_default(),
                files_context,
            );
            let request = InferenceRequest {
                messages: vec![
                    InferenceMessage::system(
                        "Repair the reported problems. Answer only with corrected files \
                         wrapped as <file path=\"...\" purpose=\"...\">contents</file>.",
                    ),
                    InferenceMessage::user(prompt),
                ],
                tools: Vec::new(),
            };
            let stream = self.inference.execute_inference_stream(request).await?;
            let response = match collect_stream(stream, token, &self.events, None).await {
                Ok(response) => response,
                Err(AgentError::Cancelled) => return Ok(GenerationOutcome::Cancelled),
                Err(e) => return Err(e),
            };

            let fixes = parse_file_blocks(&response.text);
            if fixes.is_empty() {
                break;
            }
            self.files
                .save_generated_files(fixes, &format!("review fixes (cycle {})", cycle + 1))
                .await?;
            self.state.update(|s| s.review_cycles += 1).await;
        }
        Ok(GenerationOutcome::Completed)
    }

    /// Queue a suggestion for the next phase boundary
    pub async fn queue_user_suggestion(&self, text: String) {
        self.conversation
            .add_message(ConversationMessage::user(text.clone()))
            .await;
        self.state
            .update(|s| s.base.pending_user_inputs.push(text))
            .await;
    }

    /// Patch the blueprint (alter_blueprint tool)
    pub async fn alter_blueprint(&self, patch: serde_json::Value) -> Result<()> {
        self.state
            .update(|s| {
                let mut blueprint = s.blueprint.clone().unwrap_or(Blueprint {
                    title: s.base.project_name.clone(),
                    description: String::new(),
                    phases: Vec::new(),
                });
                if let Some(title) = patch.get("title").and_then(|t| t.as_str()) {
                    blueprint.title = title.to_string();
                }
                if let Some(description) = patch.get("description").and_then(|d| d.as_str()) {
                    blueprint.description = description.to_string();
                }
                if let Some(phases) = patch.get("phases") {
                    if let Ok(phases) = serde_json::from_value::<Vec<PhaseConcept>>(phases.clone())
                    {
                        for concept in &phases {
                            if !s.generated_phases.iter().any(|p| p.name == concept.name) {
                                s.generated_phases.push(PhaseRecord::from_concept(concept));
                            }
                        }
                        blueprint.phases = phases;
                    }
                }
                s.blueprint = Some(blueprint);
            })
            .await;
        Ok(())
    }

    /// Regenerate a single file from its recorded purpose
    pub async fn regenerate_file(&self, path: String) -> Result<FileRecord> {
        let token = self.cancel.get_or_create();
        let snapshot = self.state.get().await;
        let existing = snapshot
            .base
            .generated_files_map
            .get(&path)
            .cloned()
            .ok_or_else(|| AgentError::validation(format!("no generated file at {path}")))?;

        let request = InferenceRequest {
            messages: vec![
                InferenceMessage::system(
                    "Rewrite the file from scratch. Answer with one file wrapped as \
                     <file path=\"...\" purpose=\"...\">contents</file>.",
                ),
                InferenceMessage::user(format!(
                    "Project: {}\nFile: {} ({})\nCurrent contents:\n{}",
                    snapshot.base.query, existing.file_path, existing.file_purpose,
                    existing.file_contents
                )),
            ],
            tools: Vec::new(),
        };
        let stream = self.inference.execute_inference_stream(request).await?;
        let response = collect_stream(stream, &token, &self.events, None).await?;

        let file = parse_file_blocks(&response.text)
            .into_iter()
            .find(|f| f.file_path == path)
            .ok_or_else(|| AgentError::inference("model returned no matching file"))?;
        self.files
            .save_generated_file(file.clone(), &format!("regenerate {path}"))
            .await?;
        self.events
            .broadcast(SessionEvent::file_generated(&file.file_path, &file.file_purpose))
            .await;
        Ok(file)
    }
}

// ============================================================================
// Response parsing
// ============================================================================

fn file_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?s)<file\s+path="([^"]+)"(?:\s+purpose="([^"]*)")?\s*>\n?(.*?)</file>"#,
        )
        .expect("static pattern")
    })
}

/// Parse `<file path=".." purpose="..">..</file>` blocks
fn parse_file_blocks(text: &str) -> Vec<FileRecord> {
    file_block_regex()
        .captures_iter(text)
        .map(|caps| {
            FileRecord::new(
                caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
                caps.get(3).map(|m| m.as_str()).unwrap_or_default(),
                caps.get(2)
                    .map(|m| m.as_str())
                    .filter(|p| !p.is_empty())
                    .unwrap_or("generated file"),
            )
        })
        .collect()
}

/// Parse the first JSON object in the planning response
fn parse_blueprint(text: &str) -> Option<Blueprint> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    serde_json::from_str(&text[start..=end]).ok()
}

fn fallback_blueprint(state: &AppSessionState) -> Blueprint {
    Blueprint {
        title: state.base.project_name.clone(),
        description: state.base.query.clone(),
        phases: vec![PhaseConcept {
            name: "implement".to_string(),
            description: state.base.query.clone(),
            files: vec![crate::state::FileConcept {
                path: "src/App.tsx".to_string(),
                purpose: "root component".to_string(),
            }],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_blocks() {
        let text = r#"Here you go:
<file path="src/App.tsx" purpose="root component">
export default function App() { return null; }
</file>
<file path="src/util.ts">
export const x = 1;
</file>"#;

        let files = parse_file_blocks(text);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_path, "src/App.tsx");
        assert_eq!(files[0].file_purpose, "root component");
        assert!(files[0].file_contents.contains("export default"));
        assert_eq!(files[1].file_purpose, "generated file");
    }

    #[test]
    fn test_parse_blueprint_tolerates_prose() {
        let text = r#"Sure, here is the plan:
{"title": "Counter", "description": "a counter", "phases": [
  {"name": "mvp", "description": "the counter", "files": [{"path": "src/App.tsx", "purpose": "ui"}]}
]}"#;
        let blueprint = parse_blueprint(text).unwrap();
        assert_eq!(blueprint.title, "Counter");
        assert_eq!(blueprint.phases.len(), 1);
    }

    #[test]
    fn test_parse_blueprint_rejects_garbage() {
        assert!(parse_blueprint("no json here").is_none());
    }
}
