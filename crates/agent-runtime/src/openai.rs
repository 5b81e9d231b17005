//! OpenAI / Azure OpenAI Provider
//!
//! Streams `chat/completions` over server-sent events with native function
//! calling. Setting an API version switches to Azure addressing, where the
//! model name is the deployment name.

use std::collections::{BTreeMap, VecDeque};

use agent_core::{
    error::{AgentError, Result},
    message::{Message, Role},
    provider::{
        CompletionStream, GenerationOptions, LlmProvider, ModelInfo, StreamChunk, TokenUsage,
    },
    tool::{ToolCall, ToolSchema},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// OpenAI provider configuration
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    /// API root, e.g. `https://api.openai.com/v1` or an Azure resource URL
    pub base_url: String,

    pub api_key: String,

    /// Azure `api-version`; `None` for plain OpenAI
    pub api_version: Option<String>,
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AgentError::Config("OPENAI_API_KEY is not set".into()))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let api_version = std::env::var("OPENAI_API_VERSION")
            .ok()
            .filter(|v| !v.trim().is_empty());

        Ok(Self {
            base_url,
            api_key,
            api_version,
        })
    }

    fn is_azure(&self) -> bool {
        self.api_version.is_some()
    }
}

/// OpenAI-compatible LLM provider
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(mut config: OpenAiConfig) -> Result<Self> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiConfig::from_env()?)
    }

    fn completions_url(&self, model: &str) -> String {
        match &self.config.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.config.base_url, model, version
            ),
            None => format!("{}/chat/completions", self.config.base_url),
        }
    }

    fn models_url(&self) -> String {
        match &self.config.api_version {
            Some(version) => format!("{}/openai/models?api-version={}", self.config.base_url, version),
            None => format!("{}/models", self.config.base_url),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.config.is_azure() {
            request.header("api-key", &self.config.api_key)
        } else {
            request.bearer_auth(&self.config.api_key)
        }
    }

    /// Convert agent messages to the wire format
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let content = match &m.attachment {
                    Some(a) if a.content_type.starts_with("image/") => json!([
                        {"type": "text", "text": m.content},
                        {"type": "image_url", "image_url": {
                            "url": format!("data:{};base64,{}", a.content_type, STANDARD.encode(&a.data))
                        }},
                    ]),
                    _ if m.role == Role::Assistant && m.content.is_empty() && !m.tool_calls.is_empty() => {
                        Value::Null
                    }
                    _ => Value::String(m.content.clone()),
                };

                ApiMessage {
                    role: m.role.as_str().to_string(),
                    content,
                    tool_calls: (!m.tool_calls.is_empty()).then(|| {
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone().unwrap_or_default(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: serde_json::to_string(&tc.arguments)
                                        .unwrap_or_else(|_| "{}".into()),
                                },
                            })
                            .collect()
                    }),
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    /// Convert tool schemas to the wire format
    fn to_api_tools(tools: &[ToolSchema]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters_json_schema(),
                },
            })
            .collect()
    }

    fn request_body(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &GenerationOptions,
    ) -> Value {
        let mut body = json!({
            "model": options.model,
            "messages": Self::to_api_messages(messages),
            "temperature": options.temperature,
            "top_p": options.top_p,
            "max_tokens": options.max_tokens,
            "stream": true,
        });
        if !self.config.is_azure() {
            body["stream_options"] = json!({"include_usage": true});
        }
        if !tools.is_empty() {
            body["tools"] = json!(Self::to_api_tools(tools));
        }
        if !options.stop_sequences.is_empty() {
            body["stop"] = json!(options.stop_sequences);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn health_check(&self) -> Result<bool> {
        match self.authorize(self.client.get(self.models_url())).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) => {
                tracing::warn!("OpenAI health check failed: {}", e);
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
        let body = self.request_body(messages, tools, options);
        tracing::debug!(model = %options.model, messages = messages.len(), "Sending streaming request");

        let response = self
            .authorize(self.client.post(self.completions_url(&options.model)))
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %error_body, "Provider returned error");
            return Err(AgentError::Provider(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_body
            )));
        }

        let bytes = Box::pin(response.bytes_stream());
        let stream = futures::stream::unfold(
            (bytes, SseParser::default(), VecDeque::new()),
            |(mut bytes, mut parser, mut pending)| async move {
                loop {
                    if let Some(item) = pending.pop_front() {
                        return Some((item, (bytes, parser, pending)));
                    }
                    if parser.finished {
                        return None;
                    }
                    match bytes.next().await {
                        Some(Ok(data)) => pending.extend(parser.push(&data).into_iter().map(Ok)),
                        Some(Err(e)) => {
                            parser.finished = true;
                            pending.push_back(Err(AgentError::Provider(format!(
                                "stream interrupted: {}",
                                e
                            ))));
                        }
                        None => pending.push_back(parser.end_of_stream()),
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .authorize(self.client.get(self.models_url()))
            .send()
            .await
            .map_err(|e| AgentError::ProviderUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(e.to_string()))?;

        Ok(body["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str())
                    .map(|id| ModelInfo {
                        id: id.to_string(),
                        name: id.to_string(),
                        context_length: None,
                        supports_vision: false,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Incremental SSE decoder for `chat/completions` streams
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    usage: Option<TokenUsage>,
    finish_reason: Option<String>,
    finished: bool,
}

impl SseParser {
    /// Feed raw bytes; returns the text chunks completed so far, plus the
    /// final chunk once `[DONE]` arrives.
    fn push(&mut self, bytes: &[u8]) -> Vec<StreamChunk> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();

        while !self.finished {
            let Some(end) = self.buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            // blank separators and comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                chunks.push(self.finish());
                break;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(event) => {
                    if let Some(chunk) = self.apply(event) {
                        chunks.push(chunk);
                    }
                }
                Err(e) => tracing::trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk"),
            }
        }

        chunks
    }

    fn apply(&mut self, event: StreamResponse) -> Option<StreamChunk> {
        if let Some(usage) = event.usage {
            self.usage = Some(TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        let choice = event.choices.into_iter().next()?;
        if choice.finish_reason.is_some() {
            self.finish_reason = choice.finish_reason;
        }
        for delta in choice.delta.tool_calls.unwrap_or_default() {
            let acc = self.tool_calls.entry(delta.index).or_default();
            if let Some(id) = delta.id {
                acc.id = id;
            }
            if let Some(function) = delta.function {
                if let Some(name) = function.name {
                    acc.name = name;
                }
                if let Some(arguments) = function.arguments {
                    acc.arguments.push_str(&arguments);
                }
            }
        }

        choice
            .delta
            .content
            .filter(|c| !c.is_empty())
            .map(StreamChunk::text)
    }

    /// The body closed. Without `[DONE]` or a finish reason the reply was
    /// cut off, so it is reported as a provider error rather than a reply.
    fn end_of_stream(&mut self) -> Result<StreamChunk> {
        if self.finish_reason.is_none() {
            self.finished = true;
            tracing::warn!(pending_tool_calls = self.tool_calls.len(), "Provider stream closed before completion");
            return Err(AgentError::Provider("stream ended before the reply was complete".into()));
        }
        Ok(self.finish())
    }

    /// Final chunk with every accumulated tool call
    fn finish(&mut self) -> StreamChunk {
        self.finished = true;
        StreamChunk {
            delta: String::new(),
            tool_calls: std::mem::take(&mut self.tool_calls)
                .into_values()
                .map(ToolCallAccumulator::into_tool_call)
                .collect(),
            done: true,
            usage: self.usage.take(),
        }
    }
}

/// Accumulates incremental tool call deltas into a complete tool call
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> ToolCall {
        let raw = self.arguments.trim();
        let mut call = if raw.is_empty() {
            ToolCall::new(self.name, json!({}))
        } else {
            match serde_json::from_str::<Value>(raw) {
                Ok(arguments) => ToolCall::new(self.name, arguments),
                Err(e) => {
                    tracing::warn!(tool = %self.name, error = %e, "Tool arguments are not valid JSON");
                    ToolCall::new(self.name, json!({}))
                        .with_malformed_arguments(format!("arguments are not valid JSON: {}", e))
                }
            }
        };
        if !self.id.is_empty() {
            call = call.with_id(self.id);
        }
        call
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
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
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::math::math_tools;

    fn provider(api_version: Option<&str>) -> OpenAiProvider {
        OpenAiProvider::new(OpenAiConfig {
            base_url: "https://example.openai.azure.com/".into(),
            api_key: "sk-test".into(),
            api_version: api_version.map(String::from),
        })
        .unwrap()
    }

    fn sse(events: &[&str]) -> Vec<u8> {
        events
            .iter()
            .map(|e| format!("data: {}\n\n", e))
            .collect::<String>()
            .into_bytes()
    }

    #[test]
    fn test_urls_for_openai_and_azure() {
        assert_eq!(
            provider(None).completions_url("gpt-4o"),
            "https://example.openai.azure.com/chat/completions"
        );
        assert_eq!(
            provider(Some("2024-06-01")).completions_url("math-agent"),
            "https://example.openai.azure.com/openai/deployments/math-agent/chat/completions?api-version=2024-06-01"
        );
    }

    #[test]
    fn test_message_conversion_with_tool_round() {
        let messages = vec![
            Message::system("You are helpful"),
            Message::user("2+2?"),
            Message::assistant("").with_tool_calls(vec![
                ToolCall::new("Add", json!({"a": 2, "b": 2})).with_id("call_1"),
            ]),
            Message::tool("4", Some("call_1".into())),
        ];
        let api = OpenAiProvider::to_api_messages(&messages);

        assert_eq!(api[0].role, "system");
        assert_eq!(api[2].content, Value::Null);
        let call = &api[2].tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.name, "Add");
        assert_eq!(serde_json::from_str::<Value>(&call.function.arguments).unwrap(), json!({"a": 2, "b": 2}));
        assert_eq!(api[3].role, "tool");
        assert_eq!(api[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_image_attachment_becomes_content_part() {
        let message = Message::user("What is this?").with_attachment("image/png", vec![1, 2, 3]);
        let api = OpenAiProvider::to_api_messages(&[message]);
        assert_eq!(api[0].content[1]["image_url"]["url"], "data:image/png;base64,AQID");
    }

    #[test]
    fn test_tool_definitions_use_json_schema() {
        let schemas: Vec<ToolSchema> = math_tools().iter().map(|t| t.schema().clone()).collect();
        let api = OpenAiProvider::to_api_tools(&schemas);
        let add = api.iter().find(|t| t.function.name == "Add").unwrap();
        assert_eq!(add.r#type, "function");
        assert_eq!(add.function.parameters["type"], "object");
    }

    #[test]
    fn test_azure_body_omits_stream_options() {
        let options = GenerationOptions::default();
        let body = provider(Some("2024-06-01")).request_body(&[Message::user("hi")], &[], &options);
        assert!(body.get("stream_options").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["max_tokens"], 500);
    }

    #[test]
    fn test_parse_content_stream() {
        let mut parser = SseParser::default();
        let chunks = parser.push(&sse(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":2,"total_tokens":12}}"#,
            "[DONE]",
        ]));

        let text: String = chunks.iter().map(|c| c.delta.as_str()).collect();
        assert_eq!(text, "Hello");
        let last = chunks.last().unwrap();
        assert!(last.done);
        assert_eq!(last.usage.as_ref().unwrap().total_tokens, 12);
        assert!(parser.finished);
    }

    #[test]
    fn test_tool_call_fragments_are_accumulated() {
        let mut parser = SseParser::default();
        let mut chunks = parser.push(&sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"Add","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\": 2,"}}]}}]}"#,
        ]));
        chunks.extend(parser.push(&sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":" \"b\": 2}"}}]}}]}"#,
            "[DONE]",
        ])));

        let calls = &chunks.last().unwrap().tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id.as_deref(), Some("call_a"));
        assert_eq!(calls[0].name, "Add");
        assert_eq!(calls[0].arguments["a"], 2);
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut parser = SseParser::default();
        let bytes = sse(&[r#"{"choices":[{"delta":{"content":"héllo"}}]}"#]);
        let (head, tail) = bytes.split_at(30);

        assert!(parser.push(head).is_empty());
        let chunks = parser.push(tail);
        assert_eq!(chunks[0].delta, "héllo");
    }

    #[test]
    fn test_finish_reason_without_done_still_finishes() {
        let mut parser = SseParser::default();
        parser.push(&sse(&[r#"{"choices":[{"delta":{"content":"all"},"finish_reason":"stop"}]}"#]));
        let last = parser.end_of_stream().unwrap();
        assert!(last.done);
        assert!(last.tool_calls.is_empty());
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let mut parser = SseParser::default();
        parser.push(&sse(&[r#"{"choices":[{"delta":{"content":"partial"}}]}"#]));
        let err = parser.end_of_stream().unwrap_err();
        assert!(matches!(err, AgentError::Provider(ref msg) if msg.contains("before the reply was complete")));
        assert!(parser.finished);
    }

    #[test]
    fn test_unparseable_tool_arguments_are_kept_as_malformed() {
        let mut parser = SseParser::default();
        let chunks = parser.push(&sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"Add","arguments":"{\"a\": 2, \"b\""}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            "[DONE]",
        ]));

        let call = &chunks.last().unwrap().tool_calls[0];
        assert_eq!(call.id.as_deref(), Some("call_a"));
        assert!(call.arguments.is_empty());
        assert!(call.malformed.as_deref().unwrap().starts_with("arguments are not valid JSON"));

        let mut registry = agent_core::ToolRegistry::new();
        agent_core::math::register_math_tools(&mut registry).unwrap();
        match registry.validate(call) {
            Err(AgentError::Argument { reason, .. }) => assert!(reason.contains("not valid JSON")),
            other => panic!("expected argument error, got {:?}", other),
        }
    }
}
