//! # Triage
//!
//! A resumable, human-in-the-loop classification agent for customer-service
//! conversations. The agent drives an LLM through a planning / execution /
//! approval loop and streams fine-grained progress events to a subscriber:
//!
//! - **Runtime** ([`AgentRuntime`]): the state machine — planning → fetching
//!   → approvals → classifying → saving → summarizing, with checkpoint-first
//!   persistence on every transition and a replan policy for fetch failures.
//! - **Checkpoint store** ([`CheckpointStore`]): durable `runId → context`
//!   mapping; [`SqliteCheckpointStore`] for persistence across restarts,
//!   [`InMemoryCheckpointStore`] for tests and dev.
//! - **Command dispatcher** ([`CommandDispatcher`]): approval/abort commands
//!   ([`AgentCommand`]) validated against the checkpointed state, then
//!   re-entering the runtime under a per-run lock.
//! - **Event stream** ([`EventSink`], the `run-event` crate): ordered,
//!   finite sequences of typed events, with chunked text streaming for long
//!   model output.
//! - **LLM broker** ([`LlmBroker`]): JSON-schema constrained completions
//!   behind a provider-isolating result; [`OpenAiBroker`] and [`MockBroker`].
//! - **Agentic retrieval loop** ([`AgenticRetrieval`]): iterative
//!   LLM-steered vector search with hyperparameter self-tuning, a
//!   query-repetition guard, and `##MEMORY##` knowledge accumulation.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_stream::StreamExt;
//! use triage::{
//!     AgentRuntime, InMemoryCheckpointStore, InMemoryConversationStore, MockBroker,
//!     StartRequest,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let runtime = AgentRuntime::new(
//!     Arc::new(MockBroker::new()),
//!     Arc::new(InMemoryConversationStore::new()),
//!     Arc::new(InMemoryCheckpointStore::new()),
//! );
//! let mut events = runtime.start_run(StartRequest {
//!     api_key: "sk-...".into(),
//!     user_instructions: "classify the last 20 refund conversations".into(),
//! });
//! while let Some(event) = events.next().await {
//!     println!("{}: {}", event.kind.as_str(), event.log_message);
//! }
//! # }
//! ```

pub mod broker;
pub mod checkpoint;
pub mod command;
pub mod context;
pub mod conversation;
pub mod error;
pub mod plan;
pub mod prompts;
pub mod retrieval;
pub mod runtime;
pub mod schema;
pub mod stream;

pub use broker::{BrokerFailure, BrokerResult, LlmBroker, MockBroker, OpenAiBroker, SamplingParams};
pub use checkpoint::{
    CheckpointError, CheckpointStore, InMemoryCheckpointStore, RunListItem, SqliteCheckpointStore,
};
pub use command::{AgentCommand, CommandDispatcher};
pub use context::{AgentContext, AgentLimits, AgentState, ReplanReason};
pub use conversation::{
    Conversation, ConversationMessage, ConversationMeta, ConversationStore,
    InMemoryConversationStore, QueryMap, StoreError,
};
pub use error::AgentError;
pub use plan::{AgentRunOutcome, Classification, ClassificationOutput, ConvClassificationPlan};
pub use retrieval::{
    AgenticRetrieval, IterationTrace, RetrievalError, RetrievalOptions, RetrievalOutcome,
};
pub use runtime::{AgentRuntime, KnowledgeSource, RuntimeConfig, StartRequest};
pub use stream::{EventSink, SinkClosed};

pub use run_event::{EventKind, RunEvent, TextStreamFamily};
