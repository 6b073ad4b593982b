//! HTTP/SSE surface for the triage agent.
//!
//! Three endpoints, all returning `text/event-stream` (one SSE record per
//! run event; the record's `event:` field is the event type, `data:` the
//! JSON-encoded event):
//!
//! - `POST /agents/{agent_id}/ask` — start a run from an instruction.
//! - `POST /agents/{agent_id}/{run_id}/resume` — resume a checkpointed run.
//! - `POST /agents/{agent_id}/{run_id}/command` — submit an approval/abort
//!   command and stream the continuation.
//!
//! A stream ends when the run reaches a terminal state or an approval
//! waypoint.

mod app;
mod run;

pub use app::{router, AppState};
