//! Chat Wire Protocol
//!
//! Requests are a single JSON document. Replies are a record stream: one JSON
//! object per line, CRLF-terminated, each line parseable on its own. A record
//! carrying a `code` field is an [`ErrorRecord`]; anything else is a
//! [`DeltaRecord`]. There is no end-of-stream record; the producer closes the
//! transport when it is done.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::message::{Message, Role};
use crate::tool::ToolCall;

/// Media type of the record stream
pub const JSONL_CONTENT_TYPE: &str = "application/jsonl";

/// Terminator written after every record
pub const RECORD_TERMINATOR: &[u8] = b"\r\n";

/// Body of a chat request
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Full conversation so far, oldest first
    pub messages: Vec<Message>,

    /// Opaque correlation id, echoed back unmodified
    #[serde(default, alias = "sessionState", skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// Opaque client payload, passed through unmodified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            session_token: None,
            context: None,
        }
    }
}

/// One fragment of the assistant's in-progress reply
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool calls handed back to the caller when auto-invocation is off
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl MessageDelta {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }
}

/// Incremental reply record
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<MessageDelta>,

    #[serde(default, alias = "sessionState", skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// In-band failure record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl ErrorRecord {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&AgentError> for ErrorRecord {
    fn from(err: &AgentError) -> Self {
        Self::new(err.code(), err.user_message())
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A single line of the record stream
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamRecord {
    Delta(DeltaRecord),
    Error(ErrorRecord),
}

impl StreamRecord {
    /// Serialize as one terminated line
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.extend_from_slice(RECORD_TERMINATOR);
        Ok(line)
    }

    /// Parse one line (without its terminator)
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        if value.get("code").is_some() {
            Ok(StreamRecord::Error(serde_json::from_value(value)?))
        } else {
            Ok(StreamRecord::Delta(serde_json::from_value(value)?))
        }
    }
}

impl From<DeltaRecord> for StreamRecord {
    fn from(record: DeltaRecord) -> Self {
        StreamRecord::Delta(record)
    }
}

impl From<ErrorRecord> for StreamRecord {
    fn from(record: ErrorRecord) -> Self {
        StreamRecord::Error(record)
    }
}

/// Splits a byte stream into records. Bytes may arrive in arbitrary chunks;
/// a record is only parsed once its terminator has been seen.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes from the transport
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete record, if one is buffered
    pub fn next_record(&mut self) -> Option<Result<StreamRecord>> {
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if let Some(record) = Self::parse_line(&line) {
                return Some(record);
            }
        }
        None
    }

    /// Transport closed: parse whatever is left without a terminator
    pub fn finish(&mut self) -> Option<Result<StreamRecord>> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_line(&rest)
    }

    fn parse_line(line: &[u8]) -> Option<Result<StreamRecord>> {
        let text = match std::str::from_utf8(line) {
            Ok(text) => text.trim(),
            Err(e) => return Some(Err(AgentError::Other(format!("record is not valid UTF-8: {}", e)))),
        };
        if text.is_empty() {
            return None;
        }
        Some(StreamRecord::parse(text))
    }
}

/// Final message reconstructed from a record stream
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCompletion {
    pub message: Message,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Logical events seen by a consumer
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    /// A reply fragment arrived
    Delta(MessageDelta),
    /// The session token changed
    SessionToken(String),
    /// The transport closed cleanly
    Completed(ChatCompletion),
}

/// Consumer-side state: the running assistant message and session token
#[derive(Clone, Debug)]
pub struct MessageAssembler {
    message: Message,
    session_token: Option<String>,
    context: Option<Value>,
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MessageAssembler {
    /// Start from the token the request was sent with
    pub fn new(session_token: Option<String>) -> Self {
        Self {
            message: Message::assistant(""),
            session_token,
            context: None,
        }
    }

    /// Apply one record. An error record is returned untouched and leaves
    /// the buffered message as it was.
    pub fn apply(&mut self, record: StreamRecord) -> std::result::Result<Vec<ChatEvent>, ErrorRecord> {
        let record = match record {
            StreamRecord::Error(err) => return Err(err),
            StreamRecord::Delta(record) => record,
        };

        let mut events = Vec::new();
        if let Some(token) = record.session_token {
            if self.session_token.as_deref() != Some(token.as_str()) {
                self.session_token = Some(token.clone());
                events.push(ChatEvent::SessionToken(token));
            }
        }
        if record.context.is_some() {
            self.context = record.context;
        }
        if let Some(delta) = record.delta {
            if let Some(role) = delta.role {
                self.message.role = role;
            }
            if let Some(content) = &delta.content {
                self.message.content.push_str(content);
            }
            if let Some(calls) = &delta.tool_calls {
                self.message.tool_calls.extend(calls.iter().cloned());
            }
            events.push(ChatEvent::Delta(delta));
        }
        Ok(events)
    }

    /// Content accumulated so far
    pub fn content(&self) -> &str {
        &self.message.content
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Finalize once the transport has closed
    pub fn finish(self) -> ChatCompletion {
        ChatCompletion {
            message: self.message,
            session_token: self.session_token,
            context: self.context,
        }
    }
}
