//! Agent runtime: the state machine driving planning → fetching → approvals
//! → classifying → saving → summarizing.
//!
//! One tick reads the context, executes the current state's handler, persists
//! the mutated context, and emits that tick's events — persistence always
//! lands before the tick's closing event, and never in the middle of an event
//! burst. Handler errors become an `Error` state transition; the `Error`
//! state emits `agent.run.error`, then ends as `Stopped`. Approval states
//! persist, emit their `awaiting_*` event, and end the event sequence; a
//! later command re-enters through the dispatcher.
//!
//! Per run the machine is single-threaded cooperative: the spawned drive task
//! holds the run's lock for the whole sequence, so a concurrently dispatched
//! command serializes behind it.

mod classifying;
mod fetching;
mod planning;
mod saving;
mod summarizing;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use run_event::{EventKind, RunEvent};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, warn};

use crate::broker::LlmBroker;
use crate::checkpoint::CheckpointStore;
use crate::context::{AgentContext, AgentLimits, AgentState};
use crate::conversation::ConversationStore;
use crate::error::AgentError;
use crate::retrieval::index::VectorIndex;
use crate::stream::{EventSink, MIN_CHUNK_DELAY};

/// Capacity of a run's event queue.
pub(crate) const EVENT_QUEUE_CAPACITY: usize = 128;

/// Control flow of one tick.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Proceed to the next tick.
    Continue,
    /// Approval waypoint: sequence ends, a command resumes the run.
    Suspend,
    /// Terminal state reached; sequence ends for good.
    Finished,
}

/// How a drive loop was entered, for the bridging event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Entry {
    Started,
    Resumed,
    /// Command continuation; the dispatcher already emitted its events.
    None,
}

/// Optional corpus knowledge source for planning enrichment.
pub struct KnowledgeSource {
    pub index: Arc<dyn VectorIndex>,
    pub vector_store_ids: Vec<String>,
}

/// Runtime construction options.
pub struct RuntimeConfig {
    pub limits: AgentLimits,
    /// Inter-chunk delay for streamed text (floored at 20 ms).
    pub chunk_delay: Duration,
    pub knowledge: Option<KnowledgeSource>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            limits: AgentLimits::default(),
            chunk_delay: MIN_CHUNK_DELAY,
            knowledge: None,
        }
    }
}

/// Shared services handed to the state handlers.
pub(crate) struct RuntimeCore {
    pub(crate) broker: Arc<dyn LlmBroker>,
    pub(crate) conversations: Arc<dyn ConversationStore>,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) limits: AgentLimits,
    pub(crate) chunk_delay: Duration,
    pub(crate) knowledge: Option<KnowledgeSource>,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl RuntimeCore {
    /// The per-run serialization lock.
    pub(crate) fn lock_for(&self, run_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Stamps `updated_at` and writes the checkpoint.
    pub(crate) async fn persist(&self, ctx: &mut AgentContext) -> Result<(), AgentError> {
        ctx.touch();
        self.checkpoints.save(ctx).await?;
        Ok(())
    }
}

/// Inputs to `start_run`.
pub struct StartRequest {
    pub api_key: String,
    pub user_instructions: String,
}

/// The agent runtime. Cheap to share; all services live behind one `Arc`.
pub struct AgentRuntime {
    core: Arc<RuntimeCore>,
}

impl AgentRuntime {
    pub fn new(
        broker: Arc<dyn LlmBroker>,
        conversations: Arc<dyn ConversationStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self::with_config(broker, conversations, checkpoints, RuntimeConfig::default())
    }

    pub fn with_config(
        broker: Arc<dyn LlmBroker>,
        conversations: Arc<dyn ConversationStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            core: Arc::new(RuntimeCore {
                broker,
                conversations,
                checkpoints,
                limits: config.limits,
                chunk_delay: config.chunk_delay,
                knowledge: config.knowledge,
                locks: DashMap::new(),
            }),
        }
    }

    pub(crate) fn core(&self) -> Arc<RuntimeCore> {
        Arc::clone(&self.core)
    }

    /// Starts a new run; returns its event sequence. The sequence ends at a
    /// terminal state or an approval waypoint.
    pub fn start_run(&self, request: StartRequest) -> ReceiverStream<RunEvent> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let ctx = AgentContext::new(run_id, request.api_key, request.user_instructions);
        self.spawn_drive(ctx, Entry::Started)
    }

    /// Resumes a checkpointed run. Unknown run ids produce a single error
    /// event.
    pub fn resume_run(&self, run_id: &str) -> ReceiverStream<RunEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let core = self.core();
        let run_id = run_id.to_string();
        tokio::spawn(async move {
            let lock = core.lock_for(&run_id);
            let _guard = lock.lock_owned().await;
            let sink = EventSink::new(tx, run_id.clone()).with_chunk_delay(core.chunk_delay);
            match core.checkpoints.load(&run_id).await {
                Ok(Some(ctx)) => drive(core, ctx, &sink, Entry::Resumed).await,
                Ok(None) => {
                    let _ = sink
                        .emit(EventKind::RunError, format!("run {run_id} not found"))
                        .await;
                }
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "checkpoint load failed");
                    let _ = sink
                        .emit(EventKind::RunError, format!("checkpoint load failed: {e}"))
                        .await;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    fn spawn_drive(&self, ctx: AgentContext, entry: Entry) -> ReceiverStream<RunEvent> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let core = self.core();
        tokio::spawn(async move {
            let lock = core.lock_for(&ctx.run_id);
            let _guard = lock.lock_owned().await;
            let sink = EventSink::new(tx, ctx.run_id.clone()).with_chunk_delay(core.chunk_delay);
            drive(core, ctx, &sink, entry).await;
        });
        ReceiverStream::new(rx)
    }
}

/// Drives one run until it suspends or terminates. Owns the error routing:
/// handler failures become the `Error` state; checkpoint failures and a
/// vanished subscriber end the sequence without touching state.
pub(crate) async fn drive(
    core: Arc<RuntimeCore>,
    mut ctx: AgentContext,
    sink: &EventSink,
    entry: Entry,
) {
    let entry_ok = match entry {
        Entry::Started => match core.persist(&mut ctx).await {
            Ok(()) => sink
                .emit(
                    EventKind::RunStarted,
                    format!("Run {} started", ctx.run_id),
                )
                .await
                .is_ok(),
            Err(e) => {
                error!(run_id = %ctx.run_id, error = %e, "initial checkpoint failed");
                false
            }
        },
        Entry::Resumed => sink
            .emit(
                EventKind::RunResumed,
                format!("Run {} resumed in state {}", ctx.run_id, ctx.state_name()),
            )
            .await
            .is_ok(),
        Entry::None => true,
    };
    if !entry_ok {
        return;
    }

    loop {
        match tick(&core, &mut ctx, sink).await {
            Ok(Flow::Continue) => continue,
            Ok(Flow::Suspend) | Ok(Flow::Finished) => break,
            Err(AgentError::Checkpoint(e)) => {
                error!(run_id = %ctx.run_id, error = %e, "checkpoint failure; aborting sequence");
                break;
            }
            Err(AgentError::SubscriberDisconnected(_)) => {
                debug!(run_id = %ctx.run_id, "subscriber disconnected; ending sequence");
                break;
            }
            Err(e) => {
                let message = e.to_string();
                warn!(run_id = %ctx.run_id, error = %message, "handler error; entering error state");
                ctx.append_failure(message.clone());
                ctx.state = AgentState::Error { message };
            }
        }
    }
}

/// One tick: dispatch on the current state.
async fn tick(
    core: &Arc<RuntimeCore>,
    ctx: &mut AgentContext,
    sink: &EventSink,
) -> Result<Flow, AgentError> {
    debug!(
        run_id = %ctx.run_id,
        state = ctx.state_name(),
        plans = ctx.plans_count,
        model_calls = ctx.model_call_count,
        classified = ctx.total_conversations_classified,
        "tick"
    );
    match ctx.state.clone() {
        AgentState::Planning => planning::run(core, ctx, sink).await,
        AgentState::Fetching => fetching::run(core, ctx, sink).await,
        AgentState::Classifying { batch } => classifying::run(core, ctx, sink, batch).await,
        AgentState::Saving { pending } => saving::run(core, ctx, sink, pending).await,
        AgentState::Summarizing => summarizing::run(core, ctx, sink).await,
        AgentState::AwaitingFetchApproval { batch } => {
            core.persist(ctx).await?;
            let ids: Vec<&str> = batch.iter().map(|c| c.id.as_str()).collect();
            let preview = json!({
                "batchSize": batch.len(),
                "conversationIds": ids,
                "planDetails": ctx.current_plan.as_ref().map(|p| p.plan_details.as_str()),
            });
            sink.emit_with_data(
                EventKind::AwaitingFetchApproval,
                format!("Fetched {} conversations; awaiting approval", batch.len()),
                preview,
            )
            .await?;
            Ok(Flow::Suspend)
        }
        AgentState::AwaitingBatchApproval { batch, pending } => {
            core.persist(ctx).await?;
            let preview = json!({
                "batchSize": batch.len(),
                "outputs": pending,
            });
            sink.emit_with_data(
                EventKind::AwaitingBatchApproval,
                format!(
                    "Classified {} conversations; awaiting batch approval",
                    pending.len()
                ),
                preview,
            )
            .await?;
            Ok(Flow::Suspend)
        }
        AgentState::Completed => {
            core.persist(ctx).await?;
            sink.emit_with_data(
                EventKind::RunCompleted,
                format!(
                    "Run completed: {} conversations classified",
                    ctx.total_conversations_classified
                ),
                json!({
                    "totalConversationsClassified": ctx.total_conversations_classified,
                    "summary": ctx.summary,
                }),
            )
            .await?;
            Ok(Flow::Finished)
        }
        AgentState::Stopped { reason } => {
            core.persist(ctx).await?;
            sink.emit(EventKind::RunStopped, reason).await?;
            Ok(Flow::Finished)
        }
        AgentState::Error { message } => {
            core.persist(ctx).await?;
            sink.emit(EventKind::RunError, message.clone()).await?;
            ctx.state = AgentState::Stopped { reason: message };
            Ok(Flow::Continue)
        }
    }
}
