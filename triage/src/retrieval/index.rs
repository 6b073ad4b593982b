//! Vector index interface and the in-memory reference implementation.
//!
//! The index provides filtered top-k search over chunks. The in-memory
//! implementation scores by cosine similarity over caller-provided
//! embeddings; it evaluates compound filters natively. An index that cannot
//! (`supports_compound_filters() == false`) is handed no filter and the loop
//! applies the full filter client-side over a widened candidate set.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::filter::ChunkFilter;
use super::RetrievalError;

/// One stored chunk with its attributes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub file_id: String,
    pub filename: String,
    pub chunk_index: u32,
    pub content: String,
}

impl ChunkRecord {
    /// Dedup key for the relevant-chunk accumulator: file id plus the first
    /// content text.
    pub fn dedup_key(&self) -> (String, String) {
        (self.file_id.clone(), self.content.clone())
    }
}

/// A search hit: chunk plus similarity score.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub record: ChunkRecord,
    pub score: f32,
}

/// Embedding function for the in-memory index. Deterministic in tests.
pub type EmbedFn = Arc<dyn Fn(&str) -> Vec<f32> + Send + Sync>;

/// Filtered top-k chunk search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Searches the named stores, highest score first.
    async fn search(
        &self,
        store_ids: &[String],
        query: &str,
        top_k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError>;

    /// Whether the backend evaluates compound filters itself. When false the
    /// loop degrades to client-side filtering.
    fn supports_compound_filters(&self) -> bool {
        true
    }
}

/// In-memory [`VectorIndex`]: cosine similarity over provided embeddings.
pub struct InMemoryVectorIndex {
    stores: DashMap<String, Vec<(ChunkRecord, Vec<f32>)>>,
    embed: EmbedFn,
    compound_filters: bool,
}

impl InMemoryVectorIndex {
    pub fn new(embed: EmbedFn) -> Self {
        Self {
            stores: DashMap::new(),
            embed,
            compound_filters: true,
        }
    }

    /// Disables native compound filtering (exercises the degraded path).
    pub fn without_compound_filters(mut self) -> Self {
        self.compound_filters = false;
        self
    }

    /// Adds chunks to a store; embeddings are computed from the content.
    pub fn add_chunks(&self, store_id: &str, chunks: impl IntoIterator<Item = ChunkRecord>) {
        let mut entry = self.stores.entry(store_id.to_string()).or_default();
        for chunk in chunks {
            let vector = (self.embed)(&chunk.content);
            entry.push((chunk, vector));
        }
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn search(
        &self,
        store_ids: &[String],
        query: &str,
        top_k: usize,
        filter: Option<&ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let query_vector = (self.embed)(query);
        let mut hits = Vec::new();
        for store_id in store_ids {
            let Some(entries) = self.stores.get(store_id) else {
                continue;
            };
            for (record, vector) in entries.iter() {
                if let Some(f) = filter {
                    if !f.matches(record) {
                        continue;
                    }
                }
                hits.push(ScoredChunk {
                    record: record.clone(),
                    score: Self::cosine_similarity(&query_vector, vector),
                });
            }
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.chunk_id.cmp(&b.record.chunk_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn supports_compound_filters(&self) -> bool {
        self.compound_filters
    }
}
