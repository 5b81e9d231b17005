//! Reasoning Loop
//!
//! The orchestrator alternates model passes and tool dispatch until the model
//! answers without asking for tools:
//!
//! ```text
//! Idle → Reasoning → (ToolDispatch → Reasoning)* → Responding → Done
//!                         any state ──────────────────────────→ Failed
//! ```
//!
//! Content deltas are pushed into a bounded channel as soon as the provider
//! yields them. The channel is the only output; whoever drains it (the HTTP
//! encoder, or [`AgentOrchestrator::ask`]) decides how records reach the
//! client. Closing the receiving end cancels the run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Message, Role};
use crate::protocol::{
    ChatCompletion, ChatRequest, DeltaRecord, ErrorRecord, MessageAssembler, MessageDelta,
    StreamRecord,
};
use crate::provider::{GenerationOptions, LlmProvider, TokenUsage};
use crate::session::{ChatThread, SessionContext};
use crate::tool::{ToolCall, ToolRegistry, ToolResult};

/// Capacity of the per-request record channel
pub const RECORD_CHANNEL_CAPACITY: usize = 32;

/// Default system prompt, used when the conversation brings none
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer the user's questions to the best of your ability using your tools.";

/// Orchestrator configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Prepended when the conversation has no system message
    pub system_prompt: String,

    /// Maximum tool-dispatch rounds per request
    pub max_tool_iterations: usize,

    /// Run requested tools; when false they are handed back to the caller
    pub auto_invoke_tools: bool,

    /// Generation options (model, temperature, max tokens)
    pub generation: GenerationOptions,

    /// Bound on opening the provider stream and on each gap between chunks
    pub provider_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_tool_iterations: 8,
            auto_invoke_tools: true,
            generation: GenerationOptions::default(),
            provider_timeout: Duration::from_secs(120),
        }
    }
}

/// Where a run currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Reasoning,
    ToolDispatch,
    Responding,
    Done,
    Failed,
}

/// What a finished run did
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Everything streamed as `delta.content`, in order
    pub content: String,

    /// Provider passes made
    pub reasoning_passes: usize,

    /// Tool-dispatch rounds made
    pub tool_rounds: usize,

    /// Individual tool calls executed
    pub tool_calls: usize,

    /// Calls handed back to the caller (auto-invocation off)
    pub pending_tool_calls: Vec<ToolCall>,

    /// Records written to the channel
    pub records: usize,

    /// Summed token usage, when the provider reports it
    pub usage: Option<TokenUsage>,
}

/// Writes records for one request and notices when the reader is gone
struct RecordWriter {
    sink: mpsc::Sender<StreamRecord>,
    session: SessionContext,
    sent: usize,
}

impl RecordWriter {
    fn disconnected() -> AgentError {
        AgentError::StreamWrite("client disconnected".into())
    }

    /// Send one delta. The first record of a stream also carries the
    /// assistant role and the client context.
    async fn delta(&mut self, mut delta: MessageDelta) -> Result<()> {
        let first = self.sent == 0;
        if first {
            delta.role = Some(Role::Assistant);
        }
        let record = DeltaRecord {
            delta: Some(delta),
            session_token: Some(self.session.token.to_string()),
            context: if first { self.session.context.clone() } else { None },
        };
        self.sink
            .send(record.into())
            .await
            .map_err(|_| Self::disconnected())?;
        self.sent += 1;
        Ok(())
    }

    /// Await `work`, giving up as soon as the reader hangs up
    async fn guard<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.sink.closed() => Err(Self::disconnected()),
            out = work => out,
        }
    }
}

/// Drives the reasoning/tool loop for one request at a time. Cheap to clone;
/// every field is shared and immutable.
#[derive(Clone)]
pub struct AgentOrchestrator {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: Arc<AgentConfig>,
}

impl AgentOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            config: Arc::new(config),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(provider: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self::new(provider, tools, AgentConfig::default())
    }

    /// Run the loop for `thread`, pushing records into `sink`.
    ///
    /// Terminal failures after the first record are also written in-band as
    /// an [`ErrorRecord`]; before it, nothing is written and the error is
    /// only returned.
    pub async fn run(
        &self,
        thread: ChatThread,
        sink: mpsc::Sender<StreamRecord>,
    ) -> Result<RunSummary> {
        let ChatThread {
            session,
            conversation,
        } = thread;
        let token = session.token.clone();
        let started_at = session.started_at;

        let mut writer = RecordWriter {
            sink,
            session,
            sent: 0,
        };
        let mut summary = RunSummary {
            content: String::new(),
            reasoning_passes: 0,
            tool_rounds: 0,
            tool_calls: 0,
            pending_tool_calls: Vec::new(),
            records: 0,
            usage: None,
        };
        let mut state = AgentState::Idle;

        let outcome = self
            .drive(conversation, &mut writer, &mut summary, &mut state)
            .await;
        summary.records = writer.sent;
        let elapsed_ms = (chrono::Utc::now() - started_at).num_milliseconds();

        match outcome {
            Ok(()) => {
                tracing::info!(
                    session = %token,
                    passes = summary.reasoning_passes,
                    tool_calls = summary.tool_calls,
                    records = summary.records,
                    elapsed_ms,
                    "Chat request completed"
                );
                Ok(summary)
            }
            Err(err) => {
                let failed_in = state;
                self.transition(&mut state, AgentState::Failed);
                tracing::error!(
                    session = %token,
                    ?failed_in,
                    code = err.code(),
                    records = writer.sent,
                    elapsed_ms,
                    "Chat request failed: {}",
                    err
                );
                if writer.sent > 0 && !matches!(err, AgentError::StreamWrite(_)) {
                    let record = StreamRecord::Error(ErrorRecord::from(&err));
                    let _ = writer.sink.send(record).await;
                }
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        mut conversation: Conversation,
        writer: &mut RecordWriter,
        summary: &mut RunSummary,
        state: &mut AgentState,
    ) -> Result<()> {
        conversation.ensure_system_prompt(&self.config.system_prompt);
        let schemas = self.tools.schemas();

        loop {
            self.transition(state, AgentState::Reasoning);
            summary.reasoning_passes += 1;
            tracing::debug!(
                pass = summary.reasoning_passes,
                messages = conversation.len(),
                "Reasoning pass"
            );

            let mut stream = writer
                .guard(self.bounded(self.provider.complete_stream(
                    conversation.messages(),
                    &schemas,
                    &self.config.generation,
                )))
                .await??;

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            loop {
                let next = writer.guard(self.bounded(stream.next())).await?;
                let Some(chunk) = next else { break };
                let chunk = chunk?;
                if !chunk.delta.is_empty() {
                    if calls.is_empty() {
                        self.transition(state, AgentState::Responding);
                    }
                    text.push_str(&chunk.delta);
                    summary.content.push_str(&chunk.delta);
                    writer.delta(MessageDelta::content(chunk.delta)).await?;
                }
                calls.extend(chunk.tool_calls);
                if let Some(usage) = chunk.usage {
                    let total = summary.usage.get_or_insert_with(TokenUsage::default);
                    total.prompt_tokens += usage.prompt_tokens;
                    total.completion_tokens += usage.completion_tokens;
                    total.total_tokens += usage.total_tokens;
                }
                if chunk.done {
                    break;
                }
            }
            drop(stream);

            if calls.is_empty() {
                if writer.sent == 0 {
                    // still hand the client its token and role
                    writer.delta(MessageDelta::default()).await?;
                }
                self.transition(state, AgentState::Done);
                return Ok(());
            }

            for call in calls.iter_mut().filter(|c| c.id.is_none()) {
                call.id = Some(format!("call_{}", uuid::Uuid::new_v4().simple()));
            }

            if !self.config.auto_invoke_tools {
                writer
                    .delta(MessageDelta {
                        tool_calls: Some(calls.clone()),
                        ..Default::default()
                    })
                    .await?;
                summary.pending_tool_calls = calls;
                self.transition(state, AgentState::Done);
                return Ok(());
            }

            if summary.tool_rounds >= self.config.max_tool_iterations {
                return Err(AgentError::IterationLimitExceeded(
                    self.config.max_tool_iterations,
                ));
            }
            summary.tool_rounds += 1;
            self.transition(state, AgentState::ToolDispatch);

            conversation.push(Message::assistant(text).with_tool_calls(calls.clone()));
            for call in &calls {
                let result = writer.guard(self.dispatch(call)).await?;
                summary.tool_calls += 1;
                conversation.push(Message::tool(result.to_message_content(), result.id.clone()));
            }
        }
    }

    /// Run one tool call. Tool failures become an error result the model
    /// sees on its next pass.
    async fn dispatch(&self, call: &ToolCall) -> Result<ToolResult> {
        tracing::debug!(tool = %call.name, id = ?call.id, "Executing tool");

        let result = match self.tools.invoke(call).await {
            Ok(result) => result,
            Err(err) => {
                match &err {
                    AgentError::UnknownTool(name) => {
                        tracing::warn!(tool = %name, "Model requested an unknown tool");
                    }
                    AgentError::Argument { tool, reason } => {
                        tracing::warn!(tool = %tool, %reason, "Model sent invalid tool arguments");
                    }
                    other => {
                        tracing::warn!(tool = %call.name, "Tool invocation failed: {}", other);
                    }
                }
                ToolResult::failure(&call.name, err.to_string()).with_id(call.id.clone())
            }
        };
        Ok(result)
    }

    /// Apply the provider timeout to one await
    async fn bounded<T>(&self, work: impl Future<Output = T>) -> Result<T> {
        tokio::time::timeout(self.config.provider_timeout, work)
            .await
            .map_err(|_| AgentError::ProviderTimeout(self.config.provider_timeout.as_secs()))
    }

    fn transition(&self, state: &mut AgentState, next: AgentState) {
        if *state != next {
            tracing::trace!(from = ?*state, to = ?next, "State transition");
            *state = next;
        }
    }

    /// Run a request to completion and return the assembled reply, for
    /// callers that do not stream.
    pub async fn ask(&self, request: ChatRequest) -> Result<ChatCompletion> {
        let thread = ChatThread::from_request(request)?;
        let mut assembler = MessageAssembler::new(Some(thread.session.token.to_string()));
        let (tx, mut rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);

        let drain = async {
            let mut failure = None;
            while let Some(record) = rx.recv().await {
                if let Err(err) = assembler.apply(record) {
                    failure = Some(err);
                }
            }
            failure
        };
        let (outcome, failure) = tokio::join!(self.run(thread, tx), drain);

        outcome?;
        if let Some(err) = failure {
            return Err(AgentError::Other(err.to_string()));
        }
        Ok(assembler.finish())
    }

    /// Get the tool registry
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Get the provider
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Get configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Builder for orchestrator configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: Arc::new(ToolRegistry::new()),
            config: AgentConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.config.generation.temperature = temp;
        self
    }

    pub fn max_response_tokens(mut self, max: u32) -> Self {
        self.config.generation.max_tokens = max;
        self
    }

    pub fn auto_invoke_tools(mut self, enabled: bool) -> Self {
        self.config.auto_invoke_tools = enabled;
        self
    }

    pub fn max_tool_iterations(mut self, max: usize) -> Self {
        self.config.max_tool_iterations = max;
        self
    }

    pub fn provider_timeout(mut self, timeout: Duration) -> Self {
        self.config.provider_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<AgentOrchestrator> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;

        let temperature = self.config.generation.temperature;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(AgentError::Config(format!(
                "temperature must be between 0 and 2, got {}",
                temperature
            )));
        }
        if self.config.generation.max_tokens == 0 {
            return Err(AgentError::Config("max response tokens must be positive".into()));
        }
        if self.config.provider_timeout.is_zero() {
            return Err(AgentError::Config("provider timeout must be positive".into()));
        }

        Ok(AgentOrchestrator::new(provider, self.tools, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::register_math_tools;
    use crate::testing::{Script, ScriptedProvider};
    use serde_json::json;

    fn math_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        register_math_tools(&mut registry).unwrap();
        Arc::new(registry)
    }

    fn orchestrator(provider: Arc<ScriptedProvider>) -> AgentOrchestrator {
        AgentBuilder::new()
            .provider(provider)
            .tools(math_registry())
            .build()
            .unwrap()
    }

    fn thread(text: &str) -> ChatThread {
        ChatThread::from_request(ChatRequest::new(vec![Message::user(text)])).unwrap()
    }

    async fn collect(orch: &AgentOrchestrator, thread: ChatThread) -> (Result<RunSummary>, Vec<StreamRecord>) {
        let (tx, mut rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let drain = async {
            let mut records = Vec::new();
            while let Some(record) = rx.recv().await {
                records.push(record);
            }
            records
        };
        tokio::join!(orch.run(thread, tx), drain)
    }

    fn streamed_content(records: &[StreamRecord]) -> String {
        records
            .iter()
            .filter_map(|r| match r {
                StreamRecord::Delta(d) => d.delta.as_ref().and_then(|d| d.content.clone()),
                StreamRecord::Error(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_two_tool_round_trips() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tools(vec![ToolCall::new("Add", json!({"a": 2, "b": 2}))]),
            Script::tools(vec![ToolCall::new("Multiply", json!({"a": 4, "b": 5}))]),
            Script::reply(["2 + 2 = 4, ", "and 4 × 5 = ", "20."]),
        ]));
        let orch = orchestrator(provider.clone());

        let (summary, records) = collect(&orch, thread("What is 2+2, then multiply the result by 5?")).await;
        let summary = summary.unwrap();

        assert_eq!(summary.tool_rounds, 2);
        assert_eq!(summary.reasoning_passes, 3);
        assert!(summary.content.contains("20"));
        assert_eq!(streamed_content(&records), summary.content);

        // the model saw both tool results before answering
        let last_request = provider.requests().pop().unwrap();
        let tool_outputs: Vec<&str> = last_request
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tool_outputs, vec!["4", "20"]);
        assert_eq!(last_request[0].role, Role::System);
    }

    #[tokio::test]
    async fn test_divide_by_zero_is_folded_into_conversation() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tools(vec![ToolCall::new("Divide", json!({"a": 1, "b": 0}))]),
            Script::reply(["You cannot divide by zero."]),
        ]));
        let orch = orchestrator(provider.clone());

        let (summary, _) = collect(&orch, thread("What is 1/0?")).await;
        assert!(summary.is_ok());

        let second_pass = &provider.requests()[1];
        let tool_msg = second_pass.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(tool_msg.content.starts_with("Error:"));
        assert!(tool_msg.content.contains("Cannot divide by zero."));
        assert!(tool_msg.tool_call_id.is_some());
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recoverable() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tools(vec![ToolCall::new("Sqrt", json!({"a": 9}))]),
            Script::reply(["I can't take square roots."]),
        ]));
        let (summary, _) = collect(&orchestrator(provider), thread("sqrt 9")).await;
        assert_eq!(summary.unwrap().tool_calls, 1);
    }

    #[tokio::test]
    async fn test_endless_tool_requests_hit_the_limit() {
        // every pass streams a little text and then asks for another tool
        let provider = Arc::new(ScriptedProvider::repeating(Script::Reply {
            chunks: vec!["thinking ".into()],
            tool_calls: vec![ToolCall::new("Add", json!({"a": 1, "b": 1}))],
        }));
        let orch = AgentBuilder::new()
            .provider(provider.clone())
            .tools(math_registry())
            .max_tool_iterations(3)
            .build()
            .unwrap();

        let (summary, records) = collect(&orch, thread("loop forever")).await;
        assert!(matches!(summary, Err(AgentError::IterationLimitExceeded(3))));
        assert_eq!(provider.requests().len(), 4);

        // streaming had started, so the failure is reported in-band last
        match records.last().unwrap() {
            StreamRecord::Error(err) => assert_eq!(err.code, "iteration_limit_exceeded"),
            other => panic!("expected error record, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_before_first_record_writes_nothing() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Fail("model offline".into())]));
        let (summary, records) = collect(&orchestrator(provider), thread("hi")).await;

        assert!(matches!(summary, Err(AgentError::Provider(_))));
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_token_and_context_echo() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::reply(["Hello", " there"])]));
        let mut request = ChatRequest::new(vec![Message::user("hi")]);
        request.session_token = Some("thread-42".into());
        request.context = Some(json!({"page": "home"}));
        let thread = ChatThread::from_request(request).unwrap();

        let (_, records) = collect(&orchestrator(provider), thread).await;
        assert_eq!(records.len(), 2);
        for (i, record) in records.iter().enumerate() {
            let StreamRecord::Delta(d) = record else { panic!("unexpected error record") };
            assert_eq!(d.session_token.as_deref(), Some("thread-42"));
            assert_eq!(d.context.is_some(), i == 0);
            assert_eq!(d.delta.as_ref().unwrap().role.is_some(), i == 0);
        }
    }

    #[tokio::test]
    async fn test_empty_conversation_gets_opening_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::reply(["Hi! Ask me some math."])]));
        let thread = ChatThread::from_request(ChatRequest::new(vec![])).unwrap();
        let (summary, records) = collect(&orchestrator(provider), thread).await;

        assert_eq!(summary.unwrap().content, "Hi! Ask me some math.");
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_calls_surface_when_auto_invoke_is_off() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::tools(vec![ToolCall::new(
            "Add",
            json!({"a": 2, "b": 2}),
        )])]));
        let orch = AgentBuilder::new()
            .provider(provider.clone())
            .tools(math_registry())
            .auto_invoke_tools(false)
            .build()
            .unwrap();

        let (summary, records) = collect(&orch, thread("2+2?")).await;
        let summary = summary.unwrap();
        assert_eq!(summary.tool_calls, 0);
        assert_eq!(summary.pending_tool_calls.len(), 1);
        assert_eq!(provider.requests().len(), 1);

        let StreamRecord::Delta(d) = &records[0] else { panic!("unexpected error record") };
        let calls = d.delta.as_ref().unwrap().tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].name, "Add");
        assert!(calls[0].id.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_provider_work() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Stall("first".into())]));
        let orch = orchestrator(provider.clone());
        let (tx, mut rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);

        let run = tokio::spawn({
            let orch = orch.clone();
            let thread = thread("hang");
            async move { orch.run(thread, tx).await }
        });

        assert!(rx.recv().await.is_some());
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run should stop after disconnect")
            .unwrap();
        assert!(matches!(outcome, Err(AgentError::StreamWrite(_))));
        assert!(provider.stream_released());
    }

    #[tokio::test]
    async fn test_disconnect_during_tool_dispatch_stops_run() {
        use crate::tool::{ToolDescriptor, ToolSchema};
        use std::sync::atomic::{AtomicBool, Ordering};

        let started = Arc::new(AtomicBool::new(false));
        let slow = ToolDescriptor::new(
            ToolSchema {
                name: "Slow".into(),
                description: "Takes its time".into(),
                parameters: vec![],
            },
            {
                let started = started.clone();
                move |_| {
                    started.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(500));
                    Ok(json!("done"))
                }
            },
        );
        let mut registry = ToolRegistry::new().with_timeout(Duration::from_secs(10));
        registry.register(slow).unwrap();

        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::Reply {
                chunks: vec!["Let me check. ".into()],
                tool_calls: vec![ToolCall::new("Slow", json!({}))],
            },
            Script::reply(["never reached"]),
        ]));
        let orch = AgentBuilder::new()
            .provider(provider.clone())
            .tools(Arc::new(registry))
            .build()
            .unwrap();
        let (tx, mut rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);

        let run = tokio::spawn({
            let orch = orch.clone();
            let thread = thread("slow please");
            async move { orch.run(thread, tx).await }
        });

        assert!(rx.recv().await.is_some());
        while !started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let hung_up = std::time::Instant::now();
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .expect("run should stop after disconnect")
            .unwrap();
        assert!(matches!(outcome, Err(AgentError::StreamWrite(_))));
        // did not wait for the tool to finish
        assert!(hung_up.elapsed() < Duration::from_millis(400));
        assert_eq!(provider.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_ask_assembles_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Script::tools(vec![ToolCall::new("Add", json!({"a": 2, "b": 2}))]),
            Script::reply(["The answer is ", "4."]),
        ]));
        let completion = orchestrator(provider)
            .ask(ChatRequest::new(vec![Message::user("2+2?")]))
            .await
            .unwrap();

        assert_eq!(completion.message.role, Role::Assistant);
        assert_eq!(completion.message.content, "The answer is 4.");
        assert!(completion.session_token.is_some());
    }

    #[test]
    fn test_builder_rejects_bad_config() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        assert!(AgentBuilder::new().build().is_err());
        assert!(AgentBuilder::new().provider(provider).temperature(3.5).build().is_err());
    }
}
