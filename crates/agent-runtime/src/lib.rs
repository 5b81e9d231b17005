//! # agent-runtime
//!
//! LLM backends for the chat agent.
//!
//! ## Providers
//!
//! - **Ollama** (default): local inference, tools offered through the prompt
//! - **OpenAI** (default): OpenAI or Azure OpenAI with native function calling
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::ollama::OllamaProvider;
//!
//! let provider = OllamaProvider::new("http://localhost", 11434);
//! let agent = AgentBuilder::new()
//!     .provider(Arc::new(provider))
//!     .tools(Arc::new(registry))
//!     .build()?;
//! ```

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "ollama")]
pub use ollama::{OllamaConfig, OllamaProvider};

#[cfg(feature = "openai")]
pub use openai::{OpenAiConfig, OpenAiProvider};

// Re-export core types for convenience
pub use agent_core::{AgentError, LlmProvider, Message, Result, Role, ToolRegistry};
