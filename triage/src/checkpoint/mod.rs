//! Checkpoint store: durable `runId → AgentContext` mapping.
//!
//! The store is the single source of truth for a run; the runtime's in-memory
//! context is derivative. `save` is atomic and idempotent; every write
//! refreshes `updatedAt` and the denormalized `state_name` used for listing.
//! Outcomes live in a separate collection keyed by the same run id.

mod memory;
mod sqlite;

pub use memory::InMemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::context::AgentContext;
use crate::plan::AgentRunOutcome;

/// Error type for checkpoint operations. A checkpoint failure is fatal for
/// the current tick: the runtime stops emitting for that transition.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
}

/// One row in a run listing.
#[derive(Clone, Debug)]
pub struct RunListItem {
    pub run_id: String,
    pub state_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persists agent contexts and run outcomes by run id.
///
/// **Interaction**: the runtime saves between ticks; the dispatcher loads
/// before validating a command; `list` backs operational tooling with keyset
/// pagination on `createdAt` descending.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persists the full context snapshot. Atomic and idempotent.
    async fn save(&self, ctx: &AgentContext) -> Result<(), CheckpointError>;

    /// Loads the last committed snapshot, or `None` for an unknown run.
    async fn load(&self, run_id: &str) -> Result<Option<AgentContext>, CheckpointError>;

    /// Writes the final run artifact to the outcome collection.
    async fn save_outcome(&self, outcome: &AgentRunOutcome) -> Result<(), CheckpointError>;

    /// Loads a run's outcome, if one was stored.
    async fn load_outcome(&self, run_id: &str)
        -> Result<Option<AgentRunOutcome>, CheckpointError>;

    /// Lists runs newest-first; `after` is the keyset cursor (exclusive,
    /// `createdAt` of the last row seen).
    async fn list(
        &self,
        limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RunListItem>, CheckpointError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Display of each CheckpointError variant contains its
    /// keyword.
    #[test]
    fn checkpoint_error_display() {
        assert!(CheckpointError::Serialization("x".into())
            .to_string()
            .contains("serialization"));
        assert!(CheckpointError::Storage("io".into())
            .to_string()
            .contains("storage"));
    }
}
