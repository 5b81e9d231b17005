//! Conversation Messages
//!
//! Standard message format used across the agent system, on the wire and
//! inside the reasoning loop.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AgentError;
use crate::tool::ToolCall;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// System prompt/instructions
    System,
    /// Assistant (LLM) response
    Assistant,
    /// User input
    User,
    /// Tool result (injected as context)
    Tool,
}

/// Wire names for each role. Parsing and printing both go through this table.
const ROLE_NAMES: [(Role, &str); 4] = [
    (Role::System, "system"),
    (Role::Assistant, "assistant"),
    (Role::User, "user"),
    (Role::Tool, "tool"),
];

impl Role {
    pub fn as_str(self) -> &'static str {
        ROLE_NAMES
            .iter()
            .find(|(role, _)| *role == self)
            .map(|(_, name)| *name)
            .unwrap_or("user")
    }
}

impl FromStr for Role {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ROLE_NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(role, _)| *role)
            .ok_or_else(|| AgentError::Validation(format!("unknown role '{}'", s)))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Binary payload attached to a message (e.g. an image)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// MIME type of `data`
    pub content_type: String,

    /// Raw bytes, base64 on the wire
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content
    #[serde(default)]
    pub content: String,

    /// Optional binary attachment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,

    /// Tool calls requested by the assistant in this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call this message answers (tool messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachment: None,
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool result message
    pub fn tool(content: impl Into<String>, tool_call_id: Option<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = tool_call_id;
        msg
    }

    /// Attach binary data to the message
    pub fn with_attachment(mut self, content_type: impl Into<String>, data: Vec<u8>) -> Self {
        self.attachment = Some(Attachment {
            content_type: content_type.into(),
            data,
        });
        self
    }

    /// Record the tool calls requested in this (assistant) turn
    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

/// Ordered conversation history
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Get all messages
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether the conversation opens with a system message
    pub fn has_system_prompt(&self) -> bool {
        self.messages.first().map(|m| m.role) == Some(Role::System)
    }

    /// Put a system prompt in front unless one is already there
    pub fn ensure_system_prompt(&mut self, prompt: &str) {
        if !self.has_system_prompt() {
            self.messages.insert(0, Message::system(prompt));
        }
    }

    /// Number of messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}
