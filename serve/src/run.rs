//! Route handlers: run events to SSE records.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use run_event::RunEvent;
use serde::Deserialize;
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt};
use tracing::info;

use triage::{AgentCommand, StartRequest};

use super::app::AppState;

/// Body of `POST /agents/{agent_id}/ask`.
#[derive(Debug, Deserialize)]
pub(crate) struct AskRequest {
    pub instruction: String,
    #[serde(default)]
    pub context: Option<String>,
}

type EventStream = Sse<Box<dyn Stream<Item = Result<Event, Infallible>> + Send + Unpin>>;

/// One SSE record per run event.
fn to_sse_record(event: RunEvent) -> Event {
    let kind = event.kind.as_str();
    let data = serde_json::to_string(&event)
        .unwrap_or_else(|_| format!(r#"{{"type":"{kind}","logMessage":"{}"}}"#, event.log_message));
    Event::default().event(kind).data(data)
}

fn sse_response(stream: ReceiverStream<RunEvent>) -> EventStream {
    let mapped = stream.map(|event| Ok(to_sse_record(event)));
    Sse::new(Box::new(mapped) as Box<dyn Stream<Item = Result<Event, Infallible>> + Send + Unpin>)
        .keep_alive(KeepAlive::default())
}

/// Extracts the downstream API key from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> String {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).to_string())
        .unwrap_or_default()
}

pub(crate) async fn ask(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AskRequest>,
) -> EventStream {
    info!(agent_id = %agent_id, "ask");
    let api_key = bearer_token(&headers);
    let user_instructions = match body.context {
        Some(context) if !context.is_empty() => {
            format!("{}\n\nContext: {context}", body.instruction)
        }
        _ => body.instruction,
    };
    sse_response(state.runtime.start_run(StartRequest {
        api_key,
        user_instructions,
    }))
}

pub(crate) async fn resume(
    State(state): State<Arc<AppState>>,
    Path((agent_id, run_id)): Path<(String, String)>,
) -> EventStream {
    info!(agent_id = %agent_id, run_id = %run_id, "resume");
    sse_response(state.runtime.resume_run(&run_id))
}

pub(crate) async fn command(
    State(state): State<Arc<AppState>>,
    Path((agent_id, run_id)): Path<(String, String)>,
    Json(command): Json<AgentCommand>,
) -> EventStream {
    info!(agent_id = %agent_id, run_id = %run_id, command = ?command, "command");
    sse_response(state.dispatcher.dispatch(&run_id, command))
}
