// OpenAI-protocol inference client
//
// Implementation of InferenceClient for OpenAI-compatible chat-completion
// endpoints. Streaming via SSE; tool-call fragments are accumulated per
// index and emitted once the finish reason arrives.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use codeforge_contracts::{ToolCall, ToolDefinition};

use crate::error::{AgentError, Result};
use crate::inference::{
    InferenceClient, InferenceMessage, InferenceRequest, InferenceRole, InferenceStream,
    InferenceStreamEvent,
};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI-protocol inference client
#[derive(Clone)]
pub struct OpenAiInferenceClient {
    client: Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl OpenAiInferenceClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from `INFERENCE_API_KEY` (and optional `INFERENCE_API_URL`,
    /// `INFERENCE_MODEL`) environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("INFERENCE_API_KEY")
            .map_err(|_| AgentError::inference("INFERENCE_API_KEY environment variable not set"))?;
        let mut client = Self::new(api_key);
        if let Ok(url) = std::env::var("INFERENCE_API_URL") {
            client.api_url = url;
        }
        if let Ok(model) = std::env::var("INFERENCE_MODEL") {
            client.model = model;
        }
        Ok(client)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn convert_role(role: InferenceRole) -> &'static str {
        match role {
            InferenceRole::System => "system",
            InferenceRole::User => "user",
            InferenceRole::Assistant => "assistant",
            InferenceRole::Tool => "tool",
        }
    }

    fn convert_message(msg: &InferenceMessage) -> WireMessage {
        WireMessage {
            role: Self::convert_role(msg.role).to_string(),
            content: Some(msg.content.clone()),
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| WireToolCall {
                        id: tc.id.clone(),
                        r#type: "function".to_string(),
                        function: WireFunctionCall {
                            name: tc.name.clone(),
                            arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
                        },
                    })
                    .collect()
            }),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|tool| WireTool {
                r#type: "function".to_string(),
                function: WireFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    }
}

#[async_trait]
impl InferenceClient for OpenAiInferenceClient {
    async fn execute_inference_stream(&self, request: InferenceRequest) -> Result<InferenceStream> {
        let messages: Vec<WireMessage> =
            request.messages.iter().map(Self::convert_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(Self::convert_tools(&request.tools))
        };

        let body = WireRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            tools,
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::inference(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::inference(format!(
                "inference API error ({}): {}",
                status, error_text
            )));
        }

        let event_stream = response.bytes_stream().eventsource();
        let accumulated_tool_calls = Arc::new(Mutex::new(Vec::<ToolCall>::new()));

        let converted: InferenceStream = Box::pin(event_stream.then(move |result| {
            let accumulated_tool_calls = Arc::clone(&accumulated_tool_calls);

            async move {
                match result {
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            return Ok(InferenceStreamEvent::Done);
                        }

                        match serde_json::from_str::<StreamChunk>(&event.data) {
                            Ok(chunk) => {
                                let Some(choice) = chunk.choices.first() else {
                                    return Ok(InferenceStreamEvent::TextDelta(String::new()));
                                };

                                if let Some(tool_calls) = &choice.delta.tool_calls {
                                    let mut acc = accumulated_tool_calls
                                        .lock()
                                        .expect("tool-call accumulator poisoned");
                                    for tc in tool_calls {
                                        let idx = tc.index as usize;
                                        while acc.len() <= idx {
                                            acc.push(ToolCall {
                                                id: String::new(),
                                                name: String::new(),
                                                arguments: json!(""),
                                            });
                                        }
                                        if let Some(id) = &tc.id {
                                            acc[idx].id = id.clone();
                                        }
                                        if let Some(function) = &tc.function {
                                            if let Some(name) = &function.name {
                                                acc[idx].name = name.clone();
                                            }
                                            if let Some(args) = &function.arguments {
                                                let current =
                                                    acc[idx].arguments.as_str().unwrap_or("");
                                                acc[idx].arguments =
                                                    json!(format!("{current}{args}"));
                                            }
                                        }
                                    }
                                    return Ok(InferenceStreamEvent::TextDelta(String::new()));
                                }

                                if let Some(content) = &choice.delta.content {
                                    return Ok(InferenceStreamEvent::TextDelta(content.clone()));
                                }

                                if let Some(finish_reason) = &choice.finish_reason {
                                    if finish_reason == "tool_calls" {
                                        let calls: Vec<ToolCall> = accumulated_tool_calls
                                            .lock()
                                            .expect("tool-call accumulator poisoned")
                                            .clone()
                                            .into_iter()
                                            .map(|mut tc| {
                                                if let Some(args) = tc.arguments.as_str() {
                                                    tc.arguments = serde_json::from_str(args)
                                                        .unwrap_or(json!({}));
                                                }
                                                tc
                                            })
                                            .collect();
                                        if !calls.is_empty() {
                                            return Ok(InferenceStreamEvent::ToolCalls(calls));
                                        }
                                    }
                                    return Ok(InferenceStreamEvent::Done);
                                }

                                Ok(InferenceStreamEvent::TextDelta(String::new()))
                            }
                            Err(e) => Ok(InferenceStreamEvent::Error(format!(
                                "Failed to parse chunk: {}",
                                e
                            ))),
                        }
                    }
                    Err(e) => Ok(InferenceStreamEvent::Error(format!("Stream error: {}", e))),
                }
            }
        }));

        Ok(converted)
    }
}

impl std::fmt::Debug for OpenAiInferenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiInferenceClient")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
