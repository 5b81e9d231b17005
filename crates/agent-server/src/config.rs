//! Server Configuration
//!
//! Read once at startup from the environment (after `.env` is loaded) and
//! handed to every request as immutable state.

use std::str::FromStr;
use std::time::Duration;

use agent_core::{
    error::{AgentError, Result},
    reasoning::{AgentBuilder, DEFAULT_SYSTEM_PROMPT},
};

/// Which LLM backend to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenAi,
}

impl ProviderKind {
    fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "llama3.2",
            Self::OpenAi => "gpt-4o-mini",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "azure" => Ok(Self::OpenAi),
            other => Err(AgentError::Config(format!(
                "AGENT_PROVIDER must be 'ollama' or 'openai', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub max_response_tokens: u32,
    pub auto_invoke_tools: bool,
    pub max_tool_iterations: usize,
    pub tool_timeout: Duration,
    pub provider_timeout: Duration,
    pub system_prompt: String,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process env
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let provider = match var("AGENT_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => ProviderKind::Ollama,
        };

        Ok(Self {
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
            provider,
            model: var("AGENT_MODEL").unwrap_or_else(|| provider.default_model().into()),
            temperature: parsed(&var, "AGENT_TEMPERATURE", 0.1)?,
            max_response_tokens: parsed(&var, "AGENT_MAX_RESPONSE_TOKENS", 500)?,
            auto_invoke_tools: parsed_bool(&var, "AGENT_AUTO_INVOKE_TOOLS", true)?,
            max_tool_iterations: parsed(&var, "AGENT_MAX_TOOL_ITERATIONS", 8)?,
            tool_timeout: Duration::from_millis(parsed(&var, "AGENT_TOOL_TIMEOUT_MS", 5_000)?),
            provider_timeout: Duration::from_secs(parsed(&var, "AGENT_PROVIDER_TIMEOUT_SECS", 120)?),
            system_prompt: var("AGENT_SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
        })
    }

    /// Orchestrator builder carrying these settings; provider and tools are
    /// added by the caller
    pub fn agent_builder(&self) -> AgentBuilder {
        AgentBuilder::new()
            .model(self.model.clone())
            .temperature(self.temperature)
            .max_response_tokens(self.max_response_tokens)
            .auto_invoke_tools(self.auto_invoke_tools)
            .max_tool_iterations(self.max_tool_iterations)
            .provider_timeout(self.provider_timeout)
            .system_prompt(self.system_prompt.clone())
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T> {
    match var(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AgentError::Config(format!("{} has an invalid value: '{}'", name, raw))),
    }
}

fn parsed_bool(var: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool> {
    match var(name).map(|raw| raw.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(AgentError::Config(format!("{} must be a boolean, got '{}'", name, raw))),
        },
    }
}
