//! Session Context
//!
//! Rebuilds a live conversation thread from a client request. The client
//! always resends the full history, so nothing is looked up server-side; the
//! session token is only a correlation id that travels back with each record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::{Conversation, Role};
use crate::protocol::ChatRequest;

/// Opaque session token
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-request correlation data echoed back to the client
#[derive(Clone, Debug)]
pub struct SessionContext {
    /// Token echoed on every delta record
    pub token: SessionToken,

    /// True when the client sent no token and one was minted
    pub issued: bool,

    /// Client payload, echoed on the first record
    pub context: Option<Value>,

    /// When the request arrived
    pub started_at: DateTime<Utc>,
}

/// A conversation being reasoned over for one request
#[derive(Clone, Debug)]
pub struct ChatThread {
    pub session: SessionContext,
    pub conversation: Conversation,
}

impl ChatThread {
    /// Build a thread from a request. An empty message list is valid and
    /// produces a thread that asks the model for an opening message.
    pub fn from_request(request: ChatRequest) -> Result<Self> {
        let ChatRequest {
            messages,
            session_token,
            context,
        } = request;

        let mut conversation = Conversation::new();
        for (index, mut message) in messages.into_iter().enumerate() {
            match message.role {
                Role::System if index > 0 => {
                    return Err(AgentError::Validation(format!(
                        "system message at position {} must be the first message",
                        index
                    )));
                }
                Role::Tool => {
                    return Err(AgentError::Validation(format!(
                        "message {} has role 'tool', which clients may not send",
                        index
                    )));
                }
                _ => {}
            }
            if message
                .attachment
                .as_ref()
                .is_some_and(|a| a.content_type.trim().is_empty())
            {
                return Err(AgentError::Validation(format!(
                    "attachment on message {} has no content type",
                    index
                )));
            }
            // tool bookkeeping is server-side only
            message.tool_calls.clear();
            message.tool_call_id = None;
            conversation.push(message);
        }

        let issued = session_token.is_none();
        let token = session_token
            .map(SessionToken::from_string)
            .unwrap_or_default();

        Ok(Self {
            session: SessionContext {
                token,
                issued,
                context,
                started_at: Utc::now(),
            },
            conversation,
        })
    }
}
