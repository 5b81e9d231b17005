//! Application State

use agent_core::AgentOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Reasoning loop with its provider, tool registry and settings.
    /// Everything inside is shared and read-only.
    pub orchestrator: AgentOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: AgentOrchestrator) -> Self {
        Self { orchestrator }
    }
}
