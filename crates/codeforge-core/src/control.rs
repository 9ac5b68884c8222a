// Control-message handler
//
// Parses inbound client frames and routes them to the session agent.
// Validation failures, app-only rejections and handler errors all
// surface as per-channel error frames; nothing propagates to the
// transport and cancelled outcomes are never reported as errors.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use codeforge_contracts::{ClientFrame, ProjectType, SessionEvent};

use crate::deploy::NoopDeployObserver;
use crate::error::{AgentError, Result};
use crate::events::ChannelId;
use crate::limits::{MAX_IMAGES_PER_MESSAGE, MAX_IMAGE_SIZE_BYTES};
use crate::session::{SessionAgent, SessionVariant};

/// Handle one raw frame from a client channel
pub async fn handle_frame(agent: &Arc<SessionAgent>, channel: ChannelId, raw: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(raw) {
        Ok(frame) => frame,
        Err(e) => {
            agent
                .events()
                .send_error(channel, format!("unrecognized frame: {e}"))
                .await;
            return;
        }
    };

    if let Err(e) = dispatch(agent, channel, frame).await {
        if e.is_cancelled() {
            return;
        }
        agent.events().send_error(channel, e.to_string()).await;
    }
}

async fn dispatch(agent: &Arc<SessionAgent>, channel: ChannelId, frame: ClientFrame) -> Result<()> {
    match frame {
        ClientFrame::GenerateAll => {
            if agent.is_generating() {
                return Ok(());
            }
            set_should_generate(agent, true).await;
            agent.start_generation().await;
            Ok(())
        }

        ClientFrame::Preview => {
            let variant = require_variant(agent).await?;
            tokio::spawn(async move {
                // Preview deploys are not tied to the generation token
                let token = CancellationToken::new();
                let result = match &variant {
                    SessionVariant::App(parts) => {
                        parts
                            .deployment
                            .deploy_to_sandbox(
                                Vec::new(),
                                false,
                                None,
                                false,
                                &token,
                                &NoopDeployObserver,
                            )
                            .await
                    }
                    SessionVariant::Workflow(parts) => {
                        parts
                            .deployment
                            .deploy_to_sandbox(
                                Vec::new(),
                                false,
                                None,
                                false,
                                &token,
                                &NoopDeployObserver,
                            )
                            .await
                    }
                };
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        warn!(error = %e, "Preview deploy failed");
                    }
                }
            });
            Ok(())
        }

        ClientFrame::Deploy => {
            let variant = require_variant(agent).await?;
            let user_id = agent.user_id().to_string();
            tokio::spawn(async move {
                let result = match &variant {
                    SessionVariant::Workflow(parts) => {
                        parts.controller.deploy_to_cloudflare(&user_id).await
                    }
                    SessionVariant::App(parts) => {
                        parts
                            .deployment
                            .deploy_to_cloudflare(&user_id, &NoopDeployObserver)
                            .await
                    }
                };
                if let Err(e) = result {
                    warn!(error = %e, "Cloudflare deploy failed");
                }
            });
            Ok(())
        }

        ClientFrame::CaptureScreenshot => {
            require_app(agent, "capture_screenshot").await?;
            // The sandbox contract exposes no screenshot capability
            Err(AgentError::validation(
                "screenshot capture is not supported by the sandbox service",
            ))
        }

        ClientFrame::StopGeneration => {
            agent.stop_generation().await;
            Ok(())
        }

        ClientFrame::ResumeGeneration => {
            require_app(agent, "resume_generation").await?;
            set_should_generate(agent, true).await;
            agent
                .events()
                .broadcast(SessionEvent::GenerationResumed)
                .await;
            if !agent.is_generating() {
                agent.start_generation().await;
            }
            Ok(())
        }

        ClientFrame::UserSuggestion { text, images } => {
            require_app(agent, "user_suggestion").await?;
            if images.len() > MAX_IMAGES_PER_MESSAGE {
                return Err(AgentError::validation(format!(
                    "too many images: {} (limit {MAX_IMAGES_PER_MESSAGE})",
                    images.len()
                )));
            }
            for image in &images {
                if image.byte_len() > MAX_IMAGE_SIZE_BYTES {
                    return Err(AgentError::validation(format!(
                        "image {} exceeds the {MAX_IMAGE_SIZE_BYTES}-byte limit",
                        image.filename.as_deref().unwrap_or("(unnamed)")
                    )));
                }
            }
            if let Some(SessionVariant::App(parts)) = agent.variant().await {
                parts.controller.queue_user_suggestion(text).await;
            }
            Ok(())
        }

        ClientFrame::ClearConversation => {
            agent.conversation().clear_running().await;
            agent
                .events()
                .broadcast(SessionEvent::ConversationCleared)
                .await;
            Ok(())
        }

        ClientFrame::GetConversationState => {
            let logs = agent.conversation().get_state().await;
            let deep_debug_session = match agent.variant().await {
                Some(SessionVariant::App(parts)) => {
                    parts.state.get().await.base.last_deep_debug_transcript
                }
                Some(SessionVariant::Workflow(parts)) => {
                    parts.state.get().await.base.last_deep_debug_transcript
                }
                None => None,
            };
            agent
                .events()
                .send_to(
                    channel,
                    SessionEvent::ConversationState {
                        full: logs.full,
                        running: logs.running,
                        deep_debug_session,
                    },
                )
                .await;
            Ok(())
        }

        ClientFrame::GetModelConfigs => {
            require_app(agent, "get_model_configs").await?;
            let configs = match agent.variant().await {
                Some(SessionVariant::App(parts)) => {
                    let snapshot = parts.state.get().await;
                    serde_json::json!({
                        "agent_mode": snapshot.base.agent_mode,
                        "template": snapshot.base.template_name,
                    })
                }
                _ => serde_json::json!({}),
            };
            agent
                .events()
                .send_to(channel, SessionEvent::ModelConfigsInfo { configs })
                .await;
            Ok(())
        }

        ClientFrame::GithubExport => Err(AgentError::validation(
            "github_export over the session channel is deprecated; use the export API",
        )),
    }
}

async fn require_variant(agent: &Arc<SessionAgent>) -> Result<SessionVariant> {
    agent
        .variant()
        .await
        .ok_or_else(|| AgentError::validation("session controller not ready"))
}

async fn require_app(agent: &Arc<SessionAgent>, frame: &str) -> Result<()> {
    if agent.project_type().await != ProjectType::App {
        return Err(AgentError::validation(format!(
            "{frame} is only available on app sessions"
        )));
    }
    Ok(())
}

async fn set_should_generate(agent: &Arc<SessionAgent>, value: bool) {
    match agent.variant().await {
        Some(SessionVariant::App(parts)) => {
            parts
                .state
                .update(|s| s.base.should_be_generating = value)
                .await;
        }
        Some(SessionVariant::Workflow(parts)) => {
            parts
                .state
                .update(|s| s.base.should_be_generating = value)
                .await;
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::SessionInit;
    use crate::memory::{
        InMemoryConversationBackend, InMemorySecretsProvider, InMemoryStateBackend,
        InMemoryVcsBackend, MockDeployClient, MockSandboxClient, ScriptedInferenceClient,
    };
    use crate::session::SessionBackends;
    use crate::session::SessionClients;
    use codeforge_contracts::{AgentMode, ConversationMessage, ImageAttachment};
    use uuid::Uuid;

    async fn agent(project_type: ProjectType) -> Arc<SessionAgent> {
        let init = SessionInit {
            session_id: Uuid::now_v7(),
            query: "make a counter".to_string(),
            project_type,
            hostname: "edge-1".to_string(),
            template_name: None,
            agent_mode: AgentMode::Deterministic,
            user_id: "user-1".to_string(),
            agent_id: Uuid::now_v7(),
        };
        SessionAgent::create(
            init,
            SessionBackends {
                conversation: Arc::new(InMemoryConversationBackend::new()),
                state: Arc::new(InMemoryStateBackend::new()),
                vcs: Arc::new(InMemoryVcsBackend::new()),
            },
            SessionClients {
                sandbox: Arc::new(MockSandboxClient::healthy()),
                inference: Arc::new(ScriptedInferenceClient::default()),
                deploy: Arc::new(MockDeployClient::default()),
                secrets: Arc::new(InMemorySecretsProvider::default()),
            },
        )
        .await
        .unwrap()
    }

    async fn recv_events(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>,
    ) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            events.push(serde_json::from_str(&frame).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn test_unknown_frame_type_is_channel_error() {
        let agent = agent(ProjectType::App).await;
        let (channel, mut rx) = agent.events().attach().await;

        handle_frame(&agent, channel, r#"{"type":"warp_drive"}"#).await;

        let events = recv_events(&mut rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");
    }

    #[tokio::test]
    async fn test_capture_screenshot_rejected_on_workflow() {
        let agent = agent(ProjectType::Workflow).await;
        let (channel, mut rx) = agent.events().attach().await;

        handle_frame(&agent, channel, r#"{"type":"capture_screenshot"}"#).await;

        let events = recv_events(&mut rx).await;
        assert_eq!(events[0]["type"], "error");
        assert!(events[0]["error"]
            .as_str()
            .unwrap()
            .contains("only available on app sessions"));
    }

    #[tokio::test]
    async fn test_resume_rejected_on_workflow() {
        let agent = agent(ProjectType::Workflow).await;
        let (channel, mut rx) = agent.events().attach().await;

        handle_frame(&agent, channel, r#"{"type":"resume_generation"}"#).await;

        let events = recv_events(&mut rx).await;
        assert_eq!(events[0]["type"], "error");
    }

    #[tokio::test]
    async fn test_oversized_suggestion_is_rejected_without_state_change() {
        let agent = agent(ProjectType::App).await;
        let (channel, mut rx) = agent.events().attach().await;

        let images: Vec<ImageAttachment> = (0..=MAX_IMAGES_PER_MESSAGE)
            .map(|i| ImageAttachment {
                filename: Some(format!("img{i}.png")),
                mime_type: "image/png".to_string(),
                data: "aGVsbG8=".to_string(),
            })
            .collect();
        let frame = serde_json::json!({
            "type": "user_suggestion",
            "text": "add stripes",
            "images": images,
        });
        handle_frame(&agent, channel, &frame.to_string()).await;

        let events = recv_events(&mut rx).await;
        assert_eq!(events[0]["type"], "error");
        assert!(events[0]["error"].as_str().unwrap().contains("too many images"));

        if let Some(SessionVariant::App(parts)) = agent.variant().await {
            assert!(parts.state.get().await.base.pending_user_inputs.is_empty());
        } else {
            panic!("expected app session");
        }
    }

    #[tokio::test]
    async fn test_clear_then_get_conversation_state() {
        let agent = agent(ProjectType::App).await;
        for id in ["m1", "m2", "m3"] {
            agent
                .conversation()
                .add_message(ConversationMessage::user(id).with_id(id))
                .await;
        }

        let (channel, mut rx) = agent.events().attach().await;
        handle_frame(&agent, channel, r#"{"type":"clear_conversation"}"#).await;
        handle_frame(&agent, channel, r#"{"type":"get_conversation_state"}"#).await;

        let events = recv_events(&mut rx).await;
        assert_eq!(events[0]["type"], "conversation_cleared");
        assert_eq!(events[1]["type"], "conversation_state");
        assert_eq!(events[1]["running"].as_array().unwrap().len(), 0);
        let full: Vec<&str> = events[1]["full"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["conversation_id"].as_str().unwrap())
            .collect();
        assert_eq!(full, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_github_export_is_deprecated() {
        let agent = agent(ProjectType::App).await;
        let (channel, mut rx) = agent.events().attach().await;

        handle_frame(&agent, channel, r#"{"type":"github_export"}"#).await;

        let events = recv_events(&mut rx).await;
        assert_eq!(events[0]["type"], "error");
        assert!(events[0]["error"].as_str().unwrap().contains("deprecated"));
    }

    #[tokio::test]
    async fn test_get_model_configs_is_app_only() {
        let agent = agent(ProjectType::Workflow).await;
        let (channel, mut rx) = agent.events().attach().await;

        handle_frame(&agent, channel, r#"{"type":"get_model_configs"}"#).await;
        let events = recv_events(&mut rx).await;
        assert_eq!(events[0]["type"], "error");

        let app_agent = self::tests_agent_app().await;
        let (channel, mut rx) = app_agent.events().attach().await;
        handle_frame(&app_agent, channel, r#"{"type":"get_model_configs"}"#).await;
        let events = recv_events(&mut rx).await;
        assert_eq!(events[0]["type"], "model_configs_info");
    }

    async fn tests_agent_app() -> Arc<SessionAgent> {
        agent(ProjectType::App).await
    }
}
