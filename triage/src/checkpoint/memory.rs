//! In-memory checkpoint store. Test/dev parity with the SQLite store.
//!
//! Snapshots are stored as serialized JSON, not live clones, so the identity
//! property (`save` then `load` round-trips the context) exercises the same
//! serde path the persistent store uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

use crate::context::AgentContext;
use crate::plan::AgentRunOutcome;

use super::{CheckpointError, CheckpointStore, RunListItem};

/// Pure in-memory [`CheckpointStore`]. All data is lost on drop.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    runs: DashMap<String, Value>,
    outcomes: DashMap<String, Value>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs (test helper).
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, ctx: &AgentContext) -> Result<(), CheckpointError> {
        let snapshot = serde_json::to_value(ctx)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        self.runs.insert(ctx.run_id.clone(), snapshot);
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<AgentContext>, CheckpointError> {
        match self.runs.get(run_id) {
            Some(entry) => {
                let ctx = serde_json::from_value(entry.value().clone())
                    .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
                Ok(Some(ctx))
            }
            None => Ok(None),
        }
    }

    async fn save_outcome(&self, outcome: &AgentRunOutcome) -> Result<(), CheckpointError> {
        let snapshot = serde_json::to_value(outcome)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        self.outcomes.insert(outcome.run_id.clone(), snapshot);
        Ok(())
    }

    async fn load_outcome(
        &self,
        run_id: &str,
    ) -> Result<Option<AgentRunOutcome>, CheckpointError> {
        match self.outcomes.get(run_id) {
            Some(entry) => {
                let outcome = serde_json::from_value(entry.value().clone())
                    .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
                Ok(Some(outcome))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        limit: usize,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<RunListItem>, CheckpointError> {
        let mut items: Vec<RunListItem> = self
            .runs
            .iter()
            .filter_map(|entry| {
                let v = entry.value();
                let created_at = v
                    .get("createdAt")
                    .and_then(|t| serde_json::from_value(t.clone()).ok())?;
                let updated_at = v
                    .get("updatedAt")
                    .and_then(|t| serde_json::from_value(t.clone()).ok())?;
                let state_name = v
                    .get("state")
                    .and_then(|s| s.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(RunListItem {
                    run_id: entry.key().clone(),
                    state_name,
                    created_at,
                    updated_at,
                })
            })
            .filter(|item| match after {
                Some(cursor) => item.created_at < cursor,
                None => true,
            })
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }
}
