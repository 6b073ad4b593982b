//! Chunk filters for vector search.
//!
//! The loop combines the caller's filter, the LLM's proposed filter map, and
//! the not-already-seen exclusion into one compound filter. Indexes that
//! cannot evaluate compound filters natively get the same AST applied
//! client-side.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::index::ChunkRecord;
use super::RetrievalError;

/// Filter AST over chunk attributes (`file_id`, `filename`, `chunk_id`,
/// `chunk_index`, `content`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFilter {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    And(Vec<ChunkFilter>),
    Or(Vec<ChunkFilter>),
    /// Excludes chunks whose field value appears in the list. Used for the
    /// seen-chunk exclusion.
    NotIn { field: String, values: Vec<Value> },
}

impl ChunkFilter {
    /// Conjunction of the given filters; `None` when all inputs are `None`.
    pub fn all(filters: Vec<Option<ChunkFilter>>) -> Option<ChunkFilter> {
        let present: Vec<ChunkFilter> = filters.into_iter().flatten().collect();
        match present.len() {
            0 => None,
            1 => present.into_iter().next(),
            _ => Some(ChunkFilter::And(present)),
        }
    }

    /// Evaluates the filter against one chunk.
    pub fn matches(&self, chunk: &ChunkRecord) -> bool {
        match self {
            Self::Eq { field, value } => field_value(chunk, field).as_ref() == Some(value),
            Self::Ne { field, value } => field_value(chunk, field).as_ref() != Some(value),
            Self::Range { field, min, max } => {
                let Some(v) = field_value(chunk, field).and_then(|v| v.as_f64()) else {
                    return false;
                };
                min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m)
            }
            Self::And(parts) => parts.iter().all(|f| f.matches(chunk)),
            Self::Or(parts) => parts.iter().any(|f| f.matches(chunk)),
            Self::NotIn { field, values } => match field_value(chunk, field) {
                Some(v) => !values.contains(&v),
                None => true,
            },
        }
    }
}

fn field_value(chunk: &ChunkRecord, field: &str) -> Option<Value> {
    match field {
        "file_id" => Some(Value::String(chunk.file_id.clone())),
        "filename" => Some(Value::String(chunk.filename.clone())),
        "chunk_id" => Some(Value::String(chunk.chunk_id.clone())),
        "chunk_index" => Some(Value::from(chunk.chunk_index)),
        "content" => Some(Value::String(chunk.content.clone())),
        _ => None,
    }
}

/// Compiles the LLM's flat filter map into a [`ChunkFilter`].
///
/// Plain values are equality matches; `{"ne": v}` negates; `{"min"/"max"}`
/// is a numeric range. A `chunk_index` constraint without an accompanying
/// `filename` is rejected — an index alone is meaningless across files.
pub fn from_llm_map(map: &serde_json::Map<String, Value>) -> Result<ChunkFilter, RetrievalError> {
    if map.contains_key("chunk_index") && !map.contains_key("filename") {
        return Err(RetrievalError::InvalidFilter(
            "chunk_index filter requires filename".into(),
        ));
    }
    let mut parts = Vec::with_capacity(map.len());
    for (field, spec) in map {
        let part = match spec {
            Value::Object(obj) => {
                if let Some(ne) = obj.get("ne") {
                    ChunkFilter::Ne {
                        field: field.clone(),
                        value: ne.clone(),
                    }
                } else if obj.contains_key("min") || obj.contains_key("max") {
                    ChunkFilter::Range {
                        field: field.clone(),
                        min: obj.get("min").and_then(Value::as_f64),
                        max: obj.get("max").and_then(Value::as_f64),
                    }
                } else {
                    return Err(RetrievalError::InvalidFilter(format!(
                        "unsupported filter operator for field {field}"
                    )));
                }
            }
            plain => ChunkFilter::Eq {
                field: field.clone(),
                value: plain.clone(),
            },
        };
        parts.push(part);
    }
    Ok(match parts.len() {
        0 => ChunkFilter::And(Vec::new()),
        1 => parts.into_iter().next().unwrap_or(ChunkFilter::And(Vec::new())),
        _ => ChunkFilter::And(parts),
    })
}
