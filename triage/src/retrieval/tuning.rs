//! Hyperparameter self-tuning for the retrieval loop.
//!
//! After each iteration the loop measures how relevant its buffer looks
//! (`avg_rel`) and moves the sampling parameters along linear ranges toward
//! exploration (low relevance → hotter sampling) with a small random jitter.
//! The ranges and the ±0.1 jitter are part of the contract, not tuning
//! freedom: given `avg_rel = 0.0` the post-clamp temperature lands in
//! [0.9, 1.0]; given `avg_rel = 1.0` it lands in [0.2, 0.4].

use rand::Rng;

use crate::broker::SamplingParams;

/// Scores considered when measuring buffer relevance.
const RELEVANCE_TOP_N: usize = 10;

/// Jitter half-width applied to every tuned parameter.
const JITTER: f64 = 0.1;

/// Mean of the top-10 scores normalized by the maximum observed score.
/// Empty input yields 0.0 (full exploration).
pub fn average_relevance(scores: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f32> = scores.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let max = sorted[0];
    if max <= 0.0 {
        return 0.0;
    }
    let top: &[f32] = &sorted[..sorted.len().min(RELEVANCE_TOP_N)];
    let mean = top.iter().sum::<f32>() / top.len() as f32;
    mean / max
}

/// Derives the next iteration's sampling parameters from `avg_rel`.
pub fn tune(avg_rel: f32, rng: &mut impl Rng) -> SamplingParams {
    let explore = f64::from(1.0 - avg_rel.clamp(0.0, 1.0));
    let mut jittered = |base: f64, span: f64, lo: f64, hi: f64| -> f32 {
        let jitter = rng.gen_range(-JITTER..=JITTER);
        (base + span * explore + jitter).clamp(lo, hi) as f32
    };
    SamplingParams {
        temperature: jittered(0.2, 0.8, 0.2, 1.0),
        top_p: jittered(0.5, 0.5, 0.5, 1.0),
        frequency_penalty: jittered(0.0, 1.0, 0.0, 1.0),
        presence_penalty: jittered(0.0, 1.0, 0.0, 1.0),
    }
}
