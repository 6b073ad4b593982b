//! Parsing of the LLM's per-iteration search decision.
//!
//! The decision protocol is line-based: either `TERMINATE` (optionally
//! `TERMINATE: <conclusion>`) or `NEXT_QUERY: <text>` with an optional
//! trailing `{ ... }` JSON filter map. Anything else is a parse failure; the
//! loop retries up to its budget and then terminates.

use super::filter::{from_llm_map, ChunkFilter};
use super::RetrievalError;

/// One parsed decision.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Terminate { conclusion: Option<String> },
    Next {
        query: String,
        filter: Option<ChunkFilter>,
        /// Canonical form of the proposed filter map, used by the
        /// query-repetition guard.
        filter_repr: String,
    },
}

/// Parses the raw model reply into a [`Decision`].
pub fn parse_decision(text: &str) -> Result<Decision, RetrievalError> {
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("TERMINATE") {
            let conclusion = rest
                .strip_prefix(':')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from);
            return Ok(Decision::Terminate { conclusion });
        }
        if let Some(rest) = line.strip_prefix("NEXT_QUERY:") {
            return parse_next_query(rest.trim());
        }
    }
    Err(RetrievalError::DecisionParse(format!(
        "no TERMINATE or NEXT_QUERY line in reply ({} chars)",
        text.len()
    )))
}

fn parse_next_query(rest: &str) -> Result<Decision, RetrievalError> {
    let (query, filter, filter_repr) = match rest.find('{') {
        Some(open) => {
            let close = rest.rfind('}').ok_or_else(|| {
                RetrievalError::DecisionParse("unterminated filter map".into())
            })?;
            if close < open {
                return Err(RetrievalError::DecisionParse(
                    "malformed filter map braces".into(),
                ));
            }
            let raw = &rest[open..=close];
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| RetrievalError::DecisionParse(format!("filter map: {e}")))?;
            let map = value.as_object().ok_or_else(|| {
                RetrievalError::DecisionParse("filter map must be a JSON object".into())
            })?;
            let filter = if map.is_empty() {
                None
            } else {
                Some(from_llm_map(map)?)
            };
            let repr = serde_json::to_string(&value).unwrap_or_default();
            (rest[..open].trim().to_string(), filter, repr)
        }
        None => (rest.to_string(), None, String::new()),
    };
    if query.is_empty() {
        return Err(RetrievalError::DecisionParse("empty next query".into()));
    }
    Ok(Decision::Next {
        query,
        filter,
        filter_repr,
    })
}
