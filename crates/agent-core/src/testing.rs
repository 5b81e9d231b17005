//! Scripted provider for tests.
//!
//! Each `complete_stream` call plays the next [`Script`]; once the scripts run
//! out the last one repeats. Every conversation the provider was shown is
//! recorded so tests can check what the model saw.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::{StreamExt, stream};

use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::provider::{CompletionStream, GenerationOptions, LlmProvider, ModelInfo, StreamChunk};
use crate::tool::{ToolCall, ToolSchema};

/// One provider pass
#[derive(Clone, Debug)]
pub enum Script {
    /// Stream `chunks` as text, then request `tool_calls` (if any)
    Reply {
        chunks: Vec<String>,
        tool_calls: Vec<ToolCall>,
    },
    /// Fail to open the stream
    Fail(String),
    /// Stream one chunk, then never finish
    Stall(String),
}

impl Script {
    pub fn reply<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Script::Reply {
            chunks: chunks.into_iter().map(Into::into).collect(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tools(tool_calls: Vec<ToolCall>) -> Self {
        Script::Reply {
            chunks: Vec::new(),
            tool_calls,
        }
    }
}

/// Sets a flag when dropped, i.e. when the stream holding it is released
struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    last: Mutex<Option<Script>>,
    requests: Mutex<Vec<Vec<Message>>>,
    released: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Plays `script` on every call
    pub fn repeating(script: Script) -> Self {
        Self::new(vec![script])
    }

    /// Conversations passed to the provider, one per call
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    /// Whether a stalled stream has been dropped by its consumer
    pub fn stream_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn next_script(&self) -> Script {
        let mut last = self.last.lock().unwrap();
        if let Some(script) = self.scripts.lock().unwrap().pop_front() {
            *last = Some(script);
        }
        last.clone()
            .unwrap_or_else(|| Script::Fail("no scripted responses".into()))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
        _options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        self.requests.lock().unwrap().push(messages.to_vec());

        match self.next_script() {
            Script::Reply { chunks, tool_calls } => {
                let mut items: Vec<Result<StreamChunk>> =
                    chunks.into_iter().map(|c| Ok(StreamChunk::text(c))).collect();
                items.push(Ok(StreamChunk {
                    tool_calls,
                    done: true,
                    ..Default::default()
                }));
                Ok(Box::pin(stream::iter(items)))
            }
            Script::Fail(reason) => Err(AgentError::Provider(reason)),
            Script::Stall(first) => {
                let flag = ReleaseFlag(self.released.clone());
                let stalled = stream::iter(vec![Ok(StreamChunk::text(first))])
                    .chain(stream::pending())
                    .map(move |item| {
                        let _held = &flag;
                        item
                    });
                Ok(Box::pin(stalled))
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted".into(),
            name: "scripted".into(),
            context_length: None,
            supports_vision: false,
        }])
    }
}
