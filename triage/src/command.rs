//! Command dispatcher: external approval/abort commands re-entering the
//! runtime.
//!
//! A dispatch loads the checkpoint, validates the command against the
//! current state, applies the mutations, persists, and re-enters the drive
//! loop — all under the run's lock, so two concurrent dispatches on the same
//! run serialize. Invalid commands surface as a single `agent.run.error`
//! event and leave the run unchanged.

use std::sync::Arc;

use run_event::{EventKind, RunEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::context::{AgentState, ReplanReason};
use crate::error::AgentError;
use crate::runtime::{drive, AgentRuntime, Entry, RuntimeCore, EVENT_QUEUE_CAPACITY};
use crate::stream::EventSink;

/// Externally-submitted run command. The wire shape is `{"mode": "..."}`
/// with an optional `feedback` field on rejections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentCommand {
    ApproveFetch,
    ApproveAllFetch,
    RejectFetch { feedback: String },
    ApproveBatch,
    RejectBatch { feedback: String },
    Stop,
    NoOp,
}

/// Dispatches commands into checkpointed runs.
pub struct CommandDispatcher {
    core: Arc<RuntimeCore>,
}

impl CommandDispatcher {
    pub fn new(runtime: &AgentRuntime) -> Self {
        Self {
            core: runtime.core(),
        }
    }

    /// Handles one command; returns the continuation event sequence.
    pub fn dispatch(&self, run_id: &str, command: AgentCommand) -> ReceiverStream<RunEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let core = Arc::clone(&self.core);
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            let lock = core.lock_for(&run_id);
            let _guard = lock.lock_owned().await;
            let sink = EventSink::new(tx, run_id.clone()).with_chunk_delay(core.chunk_delay);
            if let Err(e) = handle(core, &run_id, command, &sink).await {
                match e {
                    AgentError::SubscriberDisconnected(_) => {}
                    other => {
                        let _ = sink.emit(EventKind::RunError, other.to_string()).await;
                    }
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

async fn handle(
    core: Arc<RuntimeCore>,
    run_id: &str,
    command: AgentCommand,
    sink: &EventSink,
) -> Result<(), AgentError> {
    let Some(mut ctx) = core.checkpoints.load(run_id).await? else {
        return Err(AgentError::InvalidCommand(format!("run {run_id} not found")));
    };

    if command == AgentCommand::NoOp {
        sink.emit(EventKind::RunResumed, "No-op command; run unchanged")
            .await?;
        return Ok(());
    }

    match (ctx.state.clone(), command) {
        (AgentState::AwaitingFetchApproval { batch }, AgentCommand::ApproveFetch) => {
            sink.emit(
                EventKind::RunResumed,
                format!("Run {run_id} resumed for fetch approval"),
            )
            .await?;
            ctx.state = AgentState::Classifying { batch };
            core.persist(&mut ctx).await?;
            sink.emit(EventKind::FetchApproved, "Fetch approved").await?;
        }
        (AgentState::AwaitingFetchApproval { batch }, AgentCommand::ApproveAllFetch) => {
            sink.emit(
                EventKind::RunResumed,
                format!("Run {run_id} resumed for fetch approval"),
            )
            .await?;
            ctx.approval_fetch_command_executed = true;
            ctx.state = AgentState::Classifying { batch };
            core.persist(&mut ctx).await?;
            sink.emit(
                EventKind::FetchApproved,
                "Fetch approved for this and all subsequent batches",
            )
            .await?;
        }
        (AgentState::AwaitingFetchApproval { .. }, AgentCommand::RejectFetch { feedback }) => {
            sink.emit(
                EventKind::RunResumed,
                format!("Run {run_id} resumed for fetch rejection"),
            )
            .await?;
            // The fetched batch is discarded; the planner sees the feedback.
            ctx.append_failure(format!("fetch_rejected: {feedback}"));
            ctx.replanning_reason = Some(ReplanReason::FetchRejected);
            ctx.state = AgentState::Planning;
            core.persist(&mut ctx).await?;
            sink.emit_with_data(
                EventKind::FetchRejected,
                "Fetch rejected; re-planning",
                json!({ "feedback": feedback }),
            )
            .await?;
        }
        (AgentState::AwaitingBatchApproval { pending, .. }, AgentCommand::ApproveBatch) => {
            sink.emit(
                EventKind::RunResumed,
                format!("Run {run_id} resumed for batch approval"),
            )
            .await?;
            ctx.approval_batch_command_executed = true;
            ctx.state = AgentState::Saving { pending };
            core.persist(&mut ctx).await?;
            sink.emit(EventKind::BatchApproved, "Batch approved; saving")
                .await?;
        }
        (AgentState::AwaitingBatchApproval { batch, .. }, AgentCommand::RejectBatch { feedback }) => {
            sink.emit(
                EventKind::RunResumed,
                format!("Run {run_id} resumed for batch rejection"),
            )
            .await?;
            // Pending outputs are discarded; the same batch is re-classified.
            ctx.append_failure(format!("batch_rejected: {feedback}"));
            ctx.state = AgentState::Classifying { batch };
            core.persist(&mut ctx).await?;
            sink.emit_with_data(
                EventKind::BatchRejected,
                "Batch rejected; re-classifying",
                json!({ "feedback": feedback }),
            )
            .await?;
        }
        (state, AgentCommand::Stop) if state.is_awaiting() => {
            sink.emit(EventKind::RunResumed, format!("Run {run_id} resumed to stop"))
                .await?;
            ctx.state = AgentState::Stopped {
                reason: "Stopped by user command".into(),
            };
            core.persist(&mut ctx).await?;
        }
        (state, command) => {
            return Err(AgentError::InvalidCommand(format!(
                "command {command:?} not valid in state {}",
                state.name()
            )));
        }
    }

    drive(core, ctx, sink, Entry::None).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: commands round-trip through the documented wire shape.
    #[test]
    fn command_wire_shape() {
        let v = serde_json::to_value(AgentCommand::ApproveFetch).unwrap();
        assert_eq!(v["mode"], "APPROVE_FETCH");

        let v = serde_json::to_value(AgentCommand::RejectBatch {
            feedback: "wrong labels".into(),
        })
        .unwrap();
        assert_eq!(v["mode"], "REJECT_BATCH");
        assert_eq!(v["feedback"], "wrong labels");

        let parsed: AgentCommand =
            serde_json::from_str(r#"{"mode":"APPROVE_ALL_FETCH"}"#).unwrap();
        assert_eq!(parsed, AgentCommand::ApproveAllFetch);

        let parsed: AgentCommand = serde_json::from_str(r#"{"mode":"STOP"}"#).unwrap();
        assert_eq!(parsed, AgentCommand::Stop);

        let parsed: AgentCommand =
            serde_json::from_str(r#"{"mode":"REJECT_FETCH","feedback":"bad sample"}"#).unwrap();
        assert_eq!(
            parsed,
            AgentCommand::RejectFetch {
                feedback: "bad sample".into()
            }
        );
    }
}
