//! # agent-core
//!
//! Streaming chat protocol and tool-invocation loop, independent of any LLM
//! backend or transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     AgentOrchestrator                             │
//! │  ┌─────────────┐  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │  Reasoning  │  │    Tool      │  │   LlmProvider            │ │
//! │  │    Loop     │──│   Registry   │──│   (Strategy)             │ │
//! │  └──────┬──────┘  └──────────────┘  └──────────────────────────┘ │
//! └─────────┼────────────────────────────────────────────────────────┘
//!           │ StreamRecord (mpsc)
//!           ▼
//!   JSONL encoder (server)  /  MessageAssembler (client, ask)
//! ```
//!
//! The `LlmProvider` trait enables swapping between Ollama, OpenAI or Azure
//! OpenAI without changing the loop.

pub mod error;
pub mod math;
pub mod message;
pub mod protocol;
pub mod provider;
pub mod reasoning;
pub mod session;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{AgentError, Result};
pub use message::{Attachment, Conversation, Message, Role};
pub use protocol::{
    ChatCompletion, ChatEvent, ChatRequest, DeltaRecord, ErrorRecord, MessageAssembler,
    MessageDelta, RecordDecoder, StreamRecord, JSONL_CONTENT_TYPE,
};
pub use provider::LlmProvider;
pub use reasoning::{AgentBuilder, AgentConfig, AgentOrchestrator, RunSummary};
pub use session::{ChatThread, SessionToken};
pub use tool::{ToolCall, ToolDescriptor, ToolRegistry, ToolResult, ToolSchema};
