//! Axum app: state and router.

use std::sync::Arc;

use axum::{routing::post, Router};

use triage::{AgentRuntime, CommandDispatcher};

use super::run::{ask, command, resume};

/// Shared server state: one runtime and its dispatcher. `agent_id` in the
/// routes addresses this single deployed agent.
pub struct AppState {
    pub runtime: Arc<AgentRuntime>,
    pub dispatcher: CommandDispatcher,
}

impl AppState {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        let dispatcher = CommandDispatcher::new(&runtime);
        Self {
            runtime,
            dispatcher,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/agents/:agent_id/ask", post(ask))
        .route("/agents/:agent_id/:run_id/resume", post(resume))
        .route("/agents/:agent_id/:run_id/command", post(command))
        .with_state(state)
}
