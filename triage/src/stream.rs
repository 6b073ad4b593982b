//! Event sink: the runtime's side of the event stream.
//!
//! Wraps the mpsc sender, stamps the run id onto every event, detects
//! subscriber closure, and provides the chunked text helper
//! (`started` → `delta`* → `done` with a subscriber-friendly cadence).

use std::time::Duration;

use run_event::{EventKind, RunEvent, TextStreamFamily};
use serde_json::Value;
use tokio::sync::mpsc;

/// Characters per delta chunk when streaming long text.
const TEXT_CHUNK_CHARS: usize = 48;

/// Minimum delay between consecutive delta chunks.
pub const MIN_CHUNK_DELAY: Duration = Duration::from_millis(20);

/// The subscriber dropped its receiver; no further events can be delivered.
#[derive(Debug, thiserror::Error)]
#[error("event subscriber disconnected")]
pub struct SinkClosed;

/// Emits [`RunEvent`]s for one run. Each emission is a suspension point;
/// backpressure is the bounded channel's.
pub struct EventSink {
    tx: mpsc::Sender<RunEvent>,
    run_id: String,
    chunk_delay: Duration,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<RunEvent>, run_id: impl Into<String>) -> Self {
        Self {
            tx,
            run_id: run_id.into(),
            chunk_delay: MIN_CHUNK_DELAY,
        }
    }

    /// Overrides the inter-chunk delay. Clamped to the 20 ms minimum.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay.max(MIN_CHUNK_DELAY);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Emits one event; `Err(SinkClosed)` when the subscriber is gone.
    pub async fn emit(
        &self,
        kind: EventKind,
        log_message: impl Into<String>,
    ) -> Result<(), SinkClosed> {
        self.send(RunEvent::new(kind, log_message).with_run_id(self.run_id.clone()))
            .await
    }

    /// Emits one event with a JSON payload.
    pub async fn emit_with_data(
        &self,
        kind: EventKind,
        log_message: impl Into<String>,
        data: Value,
    ) -> Result<(), SinkClosed> {
        self.send(
            RunEvent::new(kind, log_message)
                .with_run_id(self.run_id.clone())
                .with_data(data),
        )
        .await
    }

    /// Streams long text as `started`, then small `delta` chunks at the
    /// configured cadence, then `done` carrying the full text.
    pub async fn emit_text_stream(
        &self,
        family: TextStreamFamily,
        text: &str,
    ) -> Result<(), SinkClosed> {
        self.emit(family.started(), "").await?;
        let chars: Vec<char> = text.chars().collect();
        let mut first = true;
        for chunk in chars.chunks(TEXT_CHUNK_CHARS) {
            if !first {
                tokio::time::sleep(self.chunk_delay).await;
            }
            first = false;
            let piece: String = chunk.iter().collect();
            self.emit_with_data(
                family.delta(),
                piece.clone(),
                serde_json::json!({ "delta": piece }),
            )
            .await?;
        }
        self.emit_with_data(
            family.done(),
            text,
            serde_json::json!({ "text": text }),
        )
        .await
    }

    async fn send(&self, event: RunEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }
}
