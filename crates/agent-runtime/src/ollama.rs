//! Ollama LLM Provider
//!
//! Implementation of `LlmProvider` for local Ollama inference. Tools are
//! offered through the system prompt and requested by the model as fenced
//! ```` ```tool ```` blocks, which are cut out of the text stream as it
//! arrives so they never reach the client.

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{CompletionStream, GenerationOptions, LlmProvider, ModelInfo, StreamChunk},
    tool::{ToolCall, ToolRegistry, ToolSchema},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use futures::StreamExt;
use ollama_rs::{
    Ollama,
    generation::{
        chat::{ChatMessage, MessageRole, request::ChatMessageRequest},
        images::Image,
    },
    models::ModelOptions as OllamaOptions,
};

const FENCE_OPEN: &str = "```tool";
const FENCE_CLOSE: &str = "```";

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self { host, port }
    }
}

/// Splits a streamed reply into visible text and fenced tool calls.
///
/// Text that could be the start of a fence is held back until the next chunk
/// settles it, so a marker split across chunks is still recognised.
#[derive(Debug, Default)]
struct ToolFenceParser {
    buffer: String,
    in_fence: bool,
}

impl ToolFenceParser {
    fn push(&mut self, text: &str) -> (String, Vec<ToolCall>) {
        self.buffer.push_str(text);
        let mut visible = String::new();
        let mut calls = Vec::new();

        loop {
            if self.in_fence {
                let Some(end) = self.buffer.find(FENCE_CLOSE) else {
                    break;
                };
                let body: String = self.buffer.drain(..end + FENCE_CLOSE.len()).collect();
                let body = &body[..end];
                match Self::parse_call(body) {
                    Some(call) => calls.push(call),
                    None => {
                        tracing::warn!("Model wrote a tool block that is not a valid call");
                        visible.push_str(FENCE_OPEN);
                        visible.push_str(body);
                        visible.push_str(FENCE_CLOSE);
                    }
                }
                self.in_fence = false;
            } else if let Some(start) = self.buffer.find(FENCE_OPEN) {
                visible.extend(self.buffer.drain(..start));
                self.buffer.drain(..FENCE_OPEN.len());
                self.in_fence = true;
            } else {
                let held = Self::partial_marker_len(&self.buffer);
                let emit = self.buffer.len() - held;
                visible.extend(self.buffer.drain(..emit));
                break;
            }
        }

        (visible, calls)
    }

    /// Flush whatever is left once the model stops. An unterminated fence is
    /// still parsed, since models often drop the closing backticks.
    fn finish(&mut self) -> (String, Vec<ToolCall>) {
        let rest = std::mem::take(&mut self.buffer);
        if !self.in_fence {
            return (rest, Vec::new());
        }
        self.in_fence = false;
        match Self::parse_call(&rest) {
            Some(call) => (String::new(), vec![call]),
            None => (format!("{}{}", FENCE_OPEN, rest), Vec::new()),
        }
    }

    fn parse_call(body: &str) -> Option<ToolCall> {
        serde_json::from_str::<ToolCall>(body.trim()).ok()
    }

    /// Length of the longest suffix of `text` that begins the open marker
    fn partial_marker_len(text: &str) -> usize {
        (1..FENCE_OPEN.len())
            .rev()
            .find(|&k| text.ends_with(&FENCE_OPEN[..k]))
            .unwrap_or(0)
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
    config: OllamaConfig,
}

impl OllamaProvider {
    /// Create a new Ollama provider with custom host/port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_config(OllamaConfig {
            host: host.into(),
            port,
        })
    }

    /// Create from configuration
    pub fn from_config(config: OllamaConfig) -> Self {
        Self {
            client: Ollama::new(config.host.clone(), config.port),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::from_config(OllamaConfig::from_env())
    }

    /// Create with default localhost settings
    pub fn localhost() -> Self {
        Self::from_config(OllamaConfig::default())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Convert agent messages to Ollama format. The tool catalogue is
    /// appended to the system prompt; earlier tool calls are replayed as
    /// the fenced blocks the model wrote.
    fn convert_messages(messages: &[Message], tools: &[ToolSchema]) -> Vec<ChatMessage> {
        let tool_section = (!tools.is_empty()).then(|| ToolRegistry::generate_prompt_section(tools));
        let mut converted = Vec::with_capacity(messages.len() + 1);

        if let Some(section) = &tool_section {
            if messages.first().is_none_or(|m| m.role != Role::System) {
                converted.push(ChatMessage::new(MessageRole::System, section.clone()));
            }
        }

        for m in messages {
            let message = match m.role {
                Role::System => {
                    let mut content = m.content.clone();
                    if let Some(section) = &tool_section {
                        content.push_str("\n\n");
                        content.push_str(section);
                    }
                    ChatMessage::new(MessageRole::System, content)
                }
                Role::User => ChatMessage::new(MessageRole::User, m.content.clone()),
                Role::Assistant => {
                    let mut content = m.content.clone();
                    for call in &m.tool_calls {
                        let json = serde_json::json!({"tool": call.name, "arguments": call.arguments});
                        content.push_str(&format!("\n{}\n{}\n{}", FENCE_OPEN, json, FENCE_CLOSE));
                    }
                    ChatMessage::new(MessageRole::Assistant, content)
                }
                // Tools appear as user context
                Role::Tool => ChatMessage::new(
                    MessageRole::User,
                    format!("Tool result: {}", m.content),
                ),
            };

            let message = match &m.attachment {
                Some(a) if a.content_type.starts_with("image/") => {
                    message.with_images(vec![Image::from_base64(&STANDARD.encode(&a.data))])
                }
                Some(a) => {
                    tracing::debug!(content_type = %a.content_type, "Ollama ignores non-image attachment");
                    message
                }
                None => message,
            };
            converted.push(message);
        }

        converted
    }

    /// Build Ollama generation options
    fn build_options(opts: &GenerationOptions) -> OllamaOptions {
        let options = OllamaOptions::default()
            .temperature(opts.temperature)
            .top_p(opts.top_p)
            .num_predict(i32::try_from(opts.max_tokens).unwrap_or(i32::MAX));
        if opts.stop_sequences.is_empty() {
            options
        } else {
            options.stop(opts.stop_sequences.clone())
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let request = ChatMessageRequest::new(
            options.model.clone(),
            Self::convert_messages(messages, tools),
        )
        .options(Self::build_options(options));

        tracing::debug!(model = %options.model, messages = messages.len(), "Sending Ollama chat request");

        let stream = self
            .client
            .send_chat_messages_stream(request)
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        let mapped = futures::stream::unfold(
            (stream, ToolFenceParser::default(), false),
            |(mut inner, mut parser, finished)| async move {
                if finished {
                    return None;
                }
                match inner.next().await {
                    Some(Ok(response)) => {
                        let (delta, tool_calls) = parser.push(&response.message.content);
                        let chunk = StreamChunk {
                            delta,
                            tool_calls,
                            ..Default::default()
                        };
                        Some((Ok(chunk), (inner, parser, false)))
                    }
                    Some(Err(_)) => Some((
                        Err(AgentError::Provider("Ollama stream interrupted".into())),
                        (inner, parser, true),
                    )),
                    None => {
                        let (delta, tool_calls) = parser.finish();
                        let chunk = StreamChunk {
                            delta,
                            tool_calls,
                            done: true,
                            usage: None,
                        };
                        Some((Ok(chunk), (inner, parser, true)))
                    }
                }
            },
        );

        Ok(Box::pin(mapped))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        Ok(models
            .into_iter()
            .map(|m| ModelInfo {
                id: m.name.clone(),
                name: m.name,
                context_length: None, // Not exposed by Ollama API
                supports_vision: false,
            })
            .collect())
    }
}
