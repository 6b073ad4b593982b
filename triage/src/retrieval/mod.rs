//! Agentic retrieval loop: iterative LLM-steered search over a vector index.
//!
//! A seed search warms the buffer, then each iteration asks the LLM to either
//! terminate or propose the next query + filter map. The loop combines the
//! caller's filter, the LLM's filter, and a not-already-seen exclusion;
//! merges unique hits; trims the buffer to `max_results` by score; and tunes
//! its sampling parameters from the buffer's relevance. A query-repetition
//! guard and a decision-parse retry budget bound the loop besides
//! `max_iterations`. Replies marked `##MEMORY##` accumulate into a knowledge
//! memory returned with the result.

pub mod decision;
pub mod filter;
pub mod index;
pub mod memory;
pub mod tuning;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::broker::{LlmBroker, SamplingParams};

use decision::{parse_decision, Decision};
use filter::ChunkFilter;
use index::{ChunkRecord, ScoredChunk, VectorIndex};
use memory::KnowledgeMemory;

/// Retrieval loop error.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("decision parse error: {0}")]
    DecisionParse(String),
    #[error("index error: {0}")]
    Index(String),
}

/// Exact (query, filters) repeats that force termination.
pub const REPEAT_LIMIT: u32 = 2;

/// Attempts at obtaining a parseable decision per iteration.
const DECISION_RETRIES: u32 = 3;

/// Hard cap on the seed search's top-k.
const SEED_TOP_K_CAP: usize = 100;

pub const REASON_NO_INITIAL: &str = "No initial results found.";
pub const REASON_AFTER_INITIAL: &str = "Terminated after initial results.";
pub const REASON_PARSE_FAILURES: &str =
    "Default termination after LLM decision parse failures.";
pub const REASON_LLM_TERMINATE: &str = "LLM decided to TERMINATE.";

/// Inputs to one retrieval run.
#[derive(Clone, Debug)]
pub struct RetrievalOptions {
    pub question: String,
    pub vector_store_ids: Vec<String>,
    pub user_filter: Option<ChunkFilter>,
    pub max_results: usize,
    pub max_iterations: u32,
    /// Named seed strategy; recorded for observability.
    pub seed_strategy: String,
    pub initial_seed_multiplier: usize,
}

impl RetrievalOptions {
    pub fn new(question: impl Into<String>, vector_store_ids: Vec<String>) -> Self {
        Self {
            question: question.into(),
            vector_store_ids,
            user_filter: None,
            max_results: 10,
            max_iterations: 5,
            seed_strategy: "wide".into(),
            initial_seed_multiplier: 3,
        }
    }

    pub fn with_user_filter(mut self, filter: ChunkFilter) -> Self {
        self.user_filter = Some(filter);
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

/// One row of the loop's trace. Iteration 0 is the seed search.
#[derive(Clone, Debug)]
pub struct IterationTrace {
    pub iteration: u32,
    pub query: String,
    /// Canonical filter representation; empty when no filter applied.
    pub filters: String,
    pub result_count: usize,
}

/// Result of one retrieval run.
#[derive(Clone, Debug)]
pub struct RetrievalOutcome {
    /// Unique hits sorted by score descending, at most `max_results`.
    pub chunks: Vec<ScoredChunk>,
    /// Every relevant chunk seen, deduplicated by (file id, first content
    /// text). Unbounded.
    pub all_relevant: Vec<ChunkRecord>,
    pub trace: Vec<IterationTrace>,
    pub termination_reason: String,
    pub knowledge_memory: String,
}

/// The loop driver. Stateless between runs.
pub struct AgenticRetrieval {
    broker: Arc<dyn LlmBroker>,
    index: Arc<dyn VectorIndex>,
}

/// Mutable search state threaded through one run.
struct SearchBuffer {
    buffer: Vec<ScoredChunk>,
    seen_ids: HashSet<String>,
    relevant: Vec<ChunkRecord>,
    relevant_keys: HashSet<(String, String)>,
    max_results: usize,
}

impl SearchBuffer {
    fn new(max_results: usize) -> Self {
        Self {
            buffer: Vec::new(),
            seen_ids: HashSet::new(),
            relevant: Vec::new(),
            relevant_keys: HashSet::new(),
            max_results,
        }
    }

    /// Merges new unique hits, trims to `max_results` by score.
    fn merge(&mut self, hits: Vec<ScoredChunk>) {
        for hit in hits {
            if self.seen_ids.insert(hit.record.chunk_id.clone()) {
                let key = hit.record.dedup_key();
                if self.relevant_keys.insert(key) {
                    self.relevant.push(hit.record.clone());
                }
                self.buffer.push(hit);
            }
        }
        self.buffer.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.chunk_id.cmp(&b.record.chunk_id))
        });
        self.buffer.truncate(self.max_results);
    }

    fn scores(&self) -> Vec<f32> {
        self.buffer.iter().map(|h| h.score).collect()
    }

    fn seen_filter(&self) -> Option<ChunkFilter> {
        if self.seen_ids.is_empty() {
            return None;
        }
        let mut values: Vec<Value> = self
            .seen_ids
            .iter()
            .map(|id| Value::String(id.clone()))
            .collect();
        values.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        Some(ChunkFilter::NotIn {
            field: "chunk_id".into(),
            values,
        })
    }
}

impl AgenticRetrieval {
    pub fn new(broker: Arc<dyn LlmBroker>, index: Arc<dyn VectorIndex>) -> Self {
        Self { broker, index }
    }

    /// Runs the loop to completion. Index failures propagate; provider and
    /// parse failures are absorbed into the termination policy.
    pub async fn run(&self, opts: &RetrievalOptions) -> Result<RetrievalOutcome, RetrievalError> {
        let seed_k = (opts.max_results.saturating_mul(opts.initial_seed_multiplier))
            .min(SEED_TOP_K_CAP)
            .max(1);
        debug!(
            question = %opts.question,
            seed_strategy = %opts.seed_strategy,
            seed_k,
            "retrieval seed search"
        );

        let mut state = SearchBuffer::new(opts.max_results);
        let mut trace = Vec::new();

        let seed_hits = self
            .search(opts, &opts.question, seed_k, opts.user_filter.clone())
            .await?;
        trace.push(IterationTrace {
            iteration: 0,
            query: opts.question.clone(),
            filters: filter_repr(opts.user_filter.as_ref()),
            result_count: seed_hits.len(),
        });
        if seed_hits.is_empty() {
            return Ok(self.outcome(state, trace, REASON_NO_INITIAL, KnowledgeMemory::new()));
        }
        state.merge(seed_hits);

        if opts.max_iterations == 0 {
            return Ok(self.outcome(state, trace, REASON_AFTER_INITIAL, KnowledgeMemory::new()));
        }

        let mut knowledge = KnowledgeMemory::new();
        let mut params = SamplingParams::default();
        let mut repeats: HashMap<(String, String), u32> = HashMap::new();
        let mut rng = StdRng::from_entropy();
        let mut reason: Option<String> = None;

        for iteration in 1..=opts.max_iterations {
            let prompt = decision_prompt(opts, &state, &knowledge, iteration);
            let Some(parsed) = self
                .next_decision(&prompt, &params, iteration, &mut knowledge)
                .await
            else {
                reason = Some(REASON_PARSE_FAILURES.to_string());
                break;
            };

            match parsed {
                Decision::Terminate { conclusion } => {
                    if let Some(c) = conclusion {
                        knowledge.conclude(&c);
                    }
                    reason = Some(REASON_LLM_TERMINATE.to_string());
                    break;
                }
                Decision::Next {
                    query,
                    filter,
                    filter_repr: repr,
                } => {
                    let count = repeats
                        .entry((query.clone(), repr.clone()))
                        .or_insert(0);
                    *count += 1;
                    if *count >= REPEAT_LIMIT {
                        trace.push(IterationTrace {
                            iteration,
                            query,
                            filters: repr,
                            result_count: 0,
                        });
                        reason = Some(format!(
                            "Terminated after {REPEAT_LIMIT} repeated queries."
                        ));
                        break;
                    }

                    let effective = ChunkFilter::all(vec![
                        opts.user_filter.clone(),
                        filter,
                        state.seen_filter(),
                    ]);
                    let hits = self
                        .search(opts, &query, opts.max_results, effective.clone())
                        .await?;
                    trace.push(IterationTrace {
                        iteration,
                        query,
                        filters: repr,
                        result_count: hits.len(),
                    });
                    state.merge(hits);

                    let avg_rel = tuning::average_relevance(&state.scores());
                    params = tuning::tune(avg_rel, &mut rng);
                    debug!(iteration, avg_rel, temperature = params.temperature, "retrieval tuning");
                }
            }
        }

        let reason = reason
            .unwrap_or_else(|| format!("Reached max iterations ({}).", opts.max_iterations));
        Ok(self.outcome(state, trace, &reason, knowledge))
    }

    /// Obtains a parseable decision within the retry budget; records every
    /// reply into the knowledge memory.
    async fn next_decision(
        &self,
        prompt: &str,
        params: &SamplingParams,
        iteration: u32,
        knowledge: &mut KnowledgeMemory,
    ) -> Option<Decision> {
        for attempt in 1..=DECISION_RETRIES {
            match self.broker.decide_next_query(prompt, params).await {
                Ok(reply) => {
                    knowledge.observe(&reply);
                    match parse_decision(&reply) {
                        Ok(decision) => return Some(decision),
                        Err(e) => {
                            warn!(iteration, attempt, error = %e, "retrieval decision did not parse");
                        }
                    }
                }
                Err(f) => {
                    warn!(iteration, attempt, failure = %f, "retrieval decision call failed");
                }
            }
        }
        None
    }

    /// Executes one search, degrading to client-side filtering when the
    /// index cannot evaluate compound filters.
    async fn search(
        &self,
        opts: &RetrievalOptions,
        query: &str,
        top_k: usize,
        filter: Option<ChunkFilter>,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        if self.index.supports_compound_filters() || filter.is_none() {
            return self
                .index
                .search(&opts.vector_store_ids, query, top_k, filter.as_ref())
                .await;
        }
        let filter = filter.unwrap_or(ChunkFilter::And(Vec::new()));
        // Widen the candidate set, then apply the full filter here.
        let widened = top_k.saturating_mul(4).max(top_k);
        let raw = self
            .index
            .search(&opts.vector_store_ids, query, widened, None)
            .await?;
        Ok(raw
            .into_iter()
            .filter(|hit| filter.matches(&hit.record))
            .take(top_k)
            .collect())
    }

    fn outcome(
        &self,
        state: SearchBuffer,
        trace: Vec<IterationTrace>,
        reason: &str,
        knowledge: KnowledgeMemory,
    ) -> RetrievalOutcome {
        RetrievalOutcome {
            chunks: state.buffer,
            all_relevant: state.relevant,
            trace,
            termination_reason: reason.to_string(),
            knowledge_memory: knowledge.render(),
        }
    }
}

fn filter_repr(filter: Option<&ChunkFilter>) -> String {
    filter
        .and_then(|f| serde_json::to_string(f).ok())
        .unwrap_or_default()
}

/// Decision prompt: question, current buffer snippets, accumulated memory,
/// and the line protocol the model must follow.
fn decision_prompt(
    opts: &RetrievalOptions,
    state: &SearchBuffer,
    knowledge: &KnowledgeMemory,
    iteration: u32,
) -> String {
    let mut prompt = format!(
        "You steer an iterative search over a document corpus (iteration {iteration} of {}).\n\
         Question: {}\n\nCurrent best chunks:\n",
        opts.max_iterations, opts.question
    );
    for hit in state.buffer.iter().take(10) {
        let snippet: String = hit.record.content.chars().take(200).collect();
        prompt.push_str(&format!(
            "- [{} #{} score {:.3}] {}\n",
            hit.record.filename, hit.record.chunk_index, hit.score, snippet
        ));
    }
    if !knowledge.is_empty() {
        prompt.push_str("\nKnowledge so far:\n");
        prompt.push_str(&knowledge.render());
        prompt.push('\n');
    }
    prompt.push_str(
        "\nReply with exactly one of:\n\
         TERMINATE: <conclusion>   (when the chunks answer the question)\n\
         NEXT_QUERY: <query text> { <JSON filter map> }\n\
         Filter map keys: filename, file_id, chunk_index (requires filename); \
         values may be {\"ne\": v} or {\"min\": n, \"max\": n}.\n\
         Prefix any line worth remembering with ##MEMORY##.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use index::InMemoryVectorIndex;
    use serde_json::json;

    fn axis_embed(content: &str) -> Vec<f32> {
        vec![
            if content.contains("refund") { 1.0 } else { 0.1 },
            if content.contains("billing") { 1.0 } else { 0.1 },
        ]
    }

    fn seeded_index(n: usize) -> Arc<InMemoryVectorIndex> {
        let idx = InMemoryVectorIndex::new(Arc::new(axis_embed));
        idx.add_chunks(
            "vs-1",
            (0..n).map(|i| ChunkRecord {
                chunk_id: format!("c{i}"),
                file_id: format!("f{}", i % 5),
                filename: format!("doc{}.md", i % 5),
                chunk_index: (i / 5) as u32,
                content: if i % 2 == 0 {
                    format!("refund note {i}")
                } else {
                    format!("billing note {i}")
                },
            }),
        );
        Arc::new(idx)
    }

    fn opts() -> RetrievalOptions {
        RetrievalOptions::new("refund handling", vec!["vs-1".into()])
            .with_max_results(10)
            .with_max_iterations(5)
    }

    /// **Scenario**: an empty corpus terminates immediately with the
    /// no-initial-results reason and an empty buffer.
    #[tokio::test]
    async fn no_initial_results() {
        let broker = Arc::new(MockBroker::new());
        let index = Arc::new(InMemoryVectorIndex::new(Arc::new(axis_embed)));
        let loop_ = AgenticRetrieval::new(broker, index);

        let outcome = loop_.run(&opts()).await.unwrap();
        assert_eq!(outcome.termination_reason, REASON_NO_INITIAL);
        assert!(outcome.chunks.is_empty());
        assert_eq!(outcome.trace.len(), 1, "seed search is traced");
        assert_eq!(outcome.trace[0].iteration, 0);
    }

    /// **Scenario**: max_iterations = 0 stops after the seed search.
    #[tokio::test]
    async fn zero_iterations_stops_after_seed() {
        let broker = Arc::new(MockBroker::new());
        let loop_ = AgenticRetrieval::new(broker, seeded_index(20));
        let outcome = loop_
            .run(&opts().with_max_iterations(0))
            .await
            .unwrap();
        assert_eq!(outcome.termination_reason, REASON_AFTER_INITIAL);
        assert_eq!(outcome.chunks.len(), 10, "buffer trimmed to max_results");
    }

    /// **Scenario** (§8.6): a 50-chunk corpus and an LLM that repeats the
    /// same NEXT_QUERY + filters terminates at iteration ≤ 3 with the
    /// repeated-queries reason, returning unique chunks sorted by score.
    #[tokio::test]
    async fn repetition_guard_terminates() {
        let broker = Arc::new(MockBroker::new());
        for _ in 0..2 {
            broker.push_decision(Ok(
                r#"NEXT_QUERY: billing notes {"filename": "doc1.md"}"#.to_string()
            ));
        }
        let loop_ = AgenticRetrieval::new(broker, seeded_index(50));

        let outcome = loop_.run(&opts()).await.unwrap();
        assert_eq!(
            outcome.termination_reason,
            "Terminated after 2 repeated queries."
        );
        let executed_iterations = outcome.trace.last().unwrap().iteration;
        assert!(executed_iterations <= 3);

        // Unique and sorted by score descending.
        let ids: HashSet<_> = outcome.chunks.iter().map(|c| &c.record.chunk_id).collect();
        assert_eq!(ids.len(), outcome.chunks.len());
        for pair in outcome.chunks.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    /// **Scenario**: three malformed replies exhaust the parse budget and
    /// trigger the default termination.
    #[tokio::test]
    async fn parse_failures_default_termination() {
        let broker = Arc::new(MockBroker::new());
        for _ in 0..3 {
            broker.push_decision(Ok("no protocol marker here".to_string()));
        }
        let loop_ = AgenticRetrieval::new(broker.clone(), seeded_index(20));

        let outcome = loop_.run(&opts()).await.unwrap();
        assert_eq!(outcome.termination_reason, REASON_PARSE_FAILURES);
        assert_eq!(broker.decision_prompts().len(), 3);
    }

    /// **Scenario**: TERMINATE with a conclusion ends the loop and the
    /// conclusion joins the ##MEMORY## entries in the knowledge memory.
    #[tokio::test]
    async fn terminate_collects_memory_and_conclusion() {
        let broker = Arc::new(MockBroker::new());
        broker.push_decision(Ok(
            "##MEMORY## refunds spike at month end\nNEXT_QUERY: month end refunds".to_string(),
        ));
        broker.push_decision(Ok("TERMINATE: refunds are seasonal".to_string()));
        let loop_ = AgenticRetrieval::new(broker, seeded_index(20));

        let outcome = loop_.run(&opts()).await.unwrap();
        assert_eq!(outcome.termination_reason, REASON_LLM_TERMINATE);
        assert!(outcome.knowledge_memory.contains("spike at month end"));
        assert!(outcome.knowledge_memory.contains("refunds are seasonal"));
    }

    /// **Scenario**: with decisions that never terminate, the loop stops at
    /// max_iterations and reports it; sampling params were re-tuned within
    /// their documented ranges.
    #[tokio::test]
    async fn max_iterations_reached_with_tuning() {
        let broker = Arc::new(MockBroker::new());
        broker.push_decision(Ok("NEXT_QUERY: refund follow-ups".to_string()));
        broker.push_decision(Ok("NEXT_QUERY: billing disputes".to_string()));
        let loop_ = AgenticRetrieval::new(broker.clone(), seeded_index(30));

        let outcome = loop_
            .run(&opts().with_max_iterations(2))
            .await
            .unwrap();
        assert_eq!(outcome.termination_reason, "Reached max iterations (2).");
        assert_eq!(outcome.trace.len(), 3, "seed + two iterations");

        let params = broker.decision_params();
        // First call uses defaults; the second reflects one tuning pass.
        assert_eq!(params[0].temperature, 0.2);
        assert!((0.2..=1.0).contains(&params[1].temperature));
        assert!((0.5..=1.0).contains(&params[1].top_p));
    }

    /// **Scenario**: seen chunks are excluded from later iterations, so a
    /// repeated topic search returns new ids only.
    #[tokio::test]
    async fn seen_chunks_excluded() {
        let broker = Arc::new(MockBroker::new());
        broker.push_decision(Ok("NEXT_QUERY: refund".to_string()));
        broker.push_decision(Ok("TERMINATE".to_string()));
        let loop_ = AgenticRetrieval::new(broker, seeded_index(30));

        let options = opts().with_max_results(5);
        let outcome = loop_.run(&options).await.unwrap();
        // Seed returned 5-best; iteration 1 must have found different ids,
        // so all_relevant exceeds the trimmed buffer.
        assert!(outcome.all_relevant.len() > outcome.chunks.len());
    }

    /// **Scenario**: an index without native compound filters still honors
    /// the ¬seen exclusion through client-side degradation.
    #[tokio::test]
    async fn degraded_filtering_client_side() {
        let idx = InMemoryVectorIndex::new(Arc::new(axis_embed)).without_compound_filters();
        idx.add_chunks(
            "vs-1",
            (0..12).map(|i| ChunkRecord {
                chunk_id: format!("c{i}"),
                file_id: "f0".into(),
                filename: "doc0.md".into(),
                chunk_index: i,
                content: format!("refund note {i}"),
            }),
        );
        let broker = Arc::new(MockBroker::new());
        broker.push_decision(Ok("NEXT_QUERY: refund".to_string()));
        broker.push_decision(Ok("TERMINATE".to_string()));
        let loop_ = AgenticRetrieval::new(broker, Arc::new(idx));

        let options = RetrievalOptions::new("refund", vec!["vs-1".into()])
            .with_max_results(4)
            .with_max_iterations(2);
        let outcome = loop_.run(&options).await.unwrap();
        let ids: HashSet<_> = outcome
            .all_relevant
            .iter()
            .map(|c| c.chunk_id.clone())
            .collect();
        assert!(ids.len() >= 8, "iteration added unseen chunks: {ids:?}");
    }

    /// **Scenario**: the seed top-k follows min(maxResults * multiplier, 100).
    #[test]
    fn seed_top_k_formula() {
        let o = RetrievalOptions::new("q", vec![]);
        let k = (o.max_results * o.initial_seed_multiplier).min(SEED_TOP_K_CAP);
        assert_eq!(k, 30);
        let o = o.with_max_results(60);
        let k = (o.max_results * o.initial_seed_multiplier).min(SEED_TOP_K_CAP);
        assert_eq!(k, 100);
    }

    /// **Scenario**: user filters restrict the seed and propagate into the
    /// effective filter.
    #[tokio::test]
    async fn user_filter_applies_throughout() {
        let broker = Arc::new(MockBroker::new());
        broker.push_decision(Ok("TERMINATE".to_string()));
        let loop_ = AgenticRetrieval::new(broker, seeded_index(30));

        let options = opts().with_user_filter(ChunkFilter::Eq {
            field: "filename".into(),
            value: json!("doc1.md"),
        });
        let outcome = loop_.run(&options).await.unwrap();
        assert!(!outcome.chunks.is_empty());
        for hit in &outcome.chunks {
            assert_eq!(hit.record.filename, "doc1.md");
        }
    }
}
