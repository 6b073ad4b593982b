//! Run event protocol for the classification agent.
//!
//! One event = kind + log message + optional JSON payload + optional run id.
//! The transport layer (`serve`) frames each event as one SSE record; this
//! crate stays serde-only so any subscriber can depend on it.

mod event;

pub use event::{EventKind, RunEvent, TextStreamFamily};
