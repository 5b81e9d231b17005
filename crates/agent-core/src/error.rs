//! Error Types

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// Malformed request where no meaningful reply is possible
    #[error("Validation error: {0}")]
    Validation(String),

    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider did not answer within the configured window
    #[error("Provider timed out after {0} seconds")]
    ProviderTimeout(u64),

    /// Tool not found in registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments do not match the declared parameters
    #[error("Invalid arguments for '{tool}': {reason}")]
    Argument { tool: String, reason: String },

    /// Tool ran and failed (domain error or timeout)
    #[error("Tool '{tool}' failed: {reason}")]
    ToolInvocation { tool: String, reason: String },

    /// Two tools registered under the same name
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    /// The client went away while records were being written
    #[error("Stream write failed: {0}")]
    StreamWrite(String),

    /// Tool-call loop exceeded its configured bound
    #[error("Tool iteration limit ({0}) exceeded")]
    IterationLimitExceeded(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Stable machine-readable code, used as `ErrorRecord::code`.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation_error",
            AgentError::Provider(_)
            | AgentError::ProviderUnavailable(_)
            | AgentError::ProviderTimeout(_) => "provider_error",
            AgentError::UnknownTool(_) => "unknown_tool",
            AgentError::Argument { .. } => "argument_error",
            AgentError::ToolInvocation { .. } => "tool_invocation_error",
            AgentError::DuplicateTool(_) => "duplicate_tool",
            AgentError::StreamWrite(_) => "stream_write_error",
            AgentError::IterationLimitExceeded(_) => "iteration_limit_exceeded",
            AgentError::Config(_)
            | AgentError::Io(_)
            | AgentError::Json(_)
            | AgentError::Other(_) => "internal_error",
        }
    }

    /// Tool-level failures are folded back into the conversation instead of
    /// ending the request.
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            AgentError::UnknownTool(_)
                | AgentError::Argument { .. }
                | AgentError::ToolInvocation { .. }
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Validation(msg) => format!("The request is invalid: {}", msg),
            AgentError::Provider(msg) => format!("The AI service encountered an error: {}", msg),
            AgentError::ProviderUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            AgentError::ProviderTimeout(_) => "The AI service took too long to respond. Please try again.".into(),
            AgentError::UnknownTool(name) => format!("The tool '{}' is not available.", name),
            AgentError::Argument { reason, .. } => format!("Invalid tool input: {}", reason),
            AgentError::ToolInvocation { reason, .. } => format!("Tool error: {}", reason),
            AgentError::IterationLimitExceeded(_) => "The request needed too many tool calls. Please try a simpler query.".into(),
            AgentError::StreamWrite(_) => "The connection to the client was lost.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_for_tool_errors() {
        let unknown = AgentError::UnknownTool("Sqrt".into());
        let argument = AgentError::Argument { tool: "Add".into(), reason: "missing a".into() };
        let failed = AgentError::ToolInvocation { tool: "Divide".into(), reason: "Cannot divide by zero.".into() };

        assert_eq!(unknown.code(), "unknown_tool");
        assert_eq!(argument.code(), "argument_error");
        assert_eq!(failed.code(), "tool_invocation_error");
        assert!(unknown.is_tool_error() && argument.is_tool_error() && failed.is_tool_error());
    }

    #[test]
    fn test_terminal_errors() {
        assert!(!AgentError::IterationLimitExceeded(8).is_tool_error());
        assert!(!AgentError::Provider("boom".into()).is_tool_error());
        assert_eq!(AgentError::ProviderTimeout(30).code(), "provider_error");
    }
}
