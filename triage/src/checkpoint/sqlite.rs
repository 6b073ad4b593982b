//! SQLite-backed checkpoint store. Persistent across process restarts.
//!
//! Two tables: `agent_runs` (context snapshots, denormalized `state_name`)
//! and `agent_runs_outcome`. Connections are opened per operation inside
//! `spawn_blocking`; single-node and dev scale.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::params;

use crate::context::AgentContext;
use crate::plan::AgentRunOutcome;

use super::{CheckpointError, CheckpointStore, RunListItem};

fn storage_err(e: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Storage(e.to_string())
}

fn to_millis(t: &DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

/// SQLite [`CheckpointStore`], keyed by run id.
pub struct SqliteCheckpointStore {
    db_path: std::path::PathBuf,
}

impl SqliteCheckpointStore {
    /// Opens (or creates) the database and ensures both tables exist.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_path = path.as_ref().to_path_buf();
        let conn = rusqlite::Connection::open(&db_path).map_err(storage_err)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS agent_runs (
                run_id TEXT PRIMARY KEY,
                state_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )
        .map_err(storage_err)?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS agent_runs_outcome (
                run_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            [],
        )
        .map_err(storage_err)?;
        Ok(Self { db_path })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, ctx: &AgentContext) -> Result<(), CheckpointError> {
        let payload = serde_json::to_string(ctx)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let run_id = ctx.run_id.clone();
        let state_name = ctx.state_name().to_string();
        let created_at = to_millis(&ctx.created_at);
        let updated_at = to_millis(&ctx.updated_at);
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage_err)?;
            conn.execute(
                r#"
                INSERT INTO agent_runs (run_id, state_name, payload, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(run_id) DO UPDATE SET
                    state_name = excluded.state_name,
                    payload = excluded.payload,
                    updated_at = excluded.updated_at
                "#,
                params![run_id, state_name, payload, created_at, updated_at],
            )
            .map_err(storage_err)?;
            Ok::<(), CheckpointError>(())
        })
        .await
        .map_err(storage_err)?
    }

    async fn load(&self, run_id: &str) -> Result<Option<AgentContext>, CheckpointError> {
        let run_id = run_id.to_string();
        let db_path = self.db_path.clone();
        let payload: Option<String> = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage_err)?;
            let mut stmt = conn
                .prepare("SELECT payload FROM agent_runs WHERE run_id = ?1")
                .map_err(storage_err)?;
            let mut rows = stmt.query(params![run_id]).map_err(storage_err)?;
            match rows.next().map_err(storage_err)? {
                Some(row) => Ok::<Option<String>, CheckpointError>(Some(
                    row.get(0).map_err(storage_err)?,
                )),
                None => Ok(None),
            }
        })
        .await
        .map_err(storage_err)??;

        match payload {
            Some(json) => {
                let ctx = serde_json::from_str(&json)
                    .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
                Ok(Some(ctx))
            }
            None => Ok(None),
        }
    }

    async fn save_outcome(&self, outcome: &AgentRunOutcome) -> Result<(), CheckpointError> {
        let payload = serde_json::to_string(outcome)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let run_id = outcome.run_id.clone();
        let created_at = to_millis(&outcome.created_at);
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage_err)?;
            conn.execute(
                r#"
                INSERT OR REPLACE INTO agent_runs_outcome (run_id, payload, created_at)
                VALUES (?1, ?2, ?3)
                "#,
                params![run_id, payload, created_at],
            )
            .map_err(storage_err)?;
            Ok::<(), CheckpointError>(())
        })
        .await
        .map_err(storage_err)?
    }

    async fn load_outcome(
        &self,
        run_id: &str,
    ) -> Result<Option<AgentRunOutcome>, CheckpointError> {
        let run_id = run_id.to_string();
        let db_path = self.db_path.clone();
        let payload: Option<String> = tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage_err)?;
            let mut stmt = conn
                .prepare("SELECT payload FROM agent_runs_outcome WHERE run_id = ?1")
                .map_err(storage_err)?;
            let mut rows = stmt.query(params![run_id]).map_err(storage_err)?;
            match rows.next().map_err(storage_err)? {
                Some(row) => Ok::<Option<String>, CheckpointError>(Some(
                    row.get(0).map_err(storage_err)?,
                )),
                None => Ok(None),
            }
        })
        .await
        .map_err(storage_err)??;

        match payload {
            Some(json) => {
                let outcome = serde_json::from_str(&json)
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
        let db_path = self.db_path.clone();
        let cursor = after.map(|t| to_millis(&t));
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open(&db_path).map_err(storage_err)?;
            let sql = if cursor.is_some() {
                "SELECT run_id, state_name, created_at, updated_at FROM agent_runs
                 WHERE created_at < ?1 ORDER BY created_at DESC LIMIT ?2"
            } else {
                "SELECT run_id, state_name, created_at, updated_at FROM agent_runs
                 ORDER BY created_at DESC LIMIT ?1"
            };
            let mut stmt = conn.prepare(sql).map_err(storage_err)?;
            let mut rows = match cursor {
                Some(c) => stmt.query(params![c, limit as i64]),
                None => stmt.query(params![limit as i64]),
            }
            .map_err(storage_err)?;

            let mut items = Vec::new();
            while let Some(row) = rows.next().map_err(storage_err)? {
                items.push(RunListItem {
                    run_id: row.get(0).map_err(storage_err)?,
                    state_name: row.get(1).map_err(storage_err)?,
                    created_at: from_millis(row.get(2).map_err(storage_err)?),
                    updated_at: from_millis(row.get(3).map_err(storage_err)?),
                });
            }
            Ok::<Vec<RunListItem>, CheckpointError>(items)
        })
        .await
        .map_err(storage_err)?
    }
}
