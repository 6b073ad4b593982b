//! Conversation entity, store interface, and the query-map translator.
//!
//! The conversation store is an external collaborator; the agent only depends
//! on the [`ConversationStore`] trait. A dashmap-backed reference
//! implementation ships for tests and dev servers, together with the
//! [`QueryMap`] translator that compiles a plan's serialized query into the
//! reference store's predicate. A different backend supplies its own
//! translator behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::plan::Classification;

/// One message turn inside a conversation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub text: String,
}

/// Denormalized conversation attributes used for querying.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMeta {
    #[serde(default)]
    pub user_state: Option<String>,
    #[serde(default)]
    pub number_of_turns: u32,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

/// Customer-service conversation entity. Read and written by the agent,
/// owned by the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<ConversationMessage>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub classification: Option<Classification>,
    #[serde(default)]
    pub meta: ConversationMeta,
    #[serde(default)]
    pub version: u32,
}

impl Conversation {
    /// Minimal constructor for seeding stores.
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            messages: Vec::new(),
            summary: None,
            labels: Vec::new(),
            resolved: false,
            classification: None,
            meta: ConversationMeta::default(),
            version: 0,
        }
    }
}

/// Conversation store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query error: {0}")]
    Query(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("conversation not found: {0}")]
    NotFound(String),
}

/// Read/write interface the agent needs from the conversation store.
///
/// **Interaction**: the fetching handler calls `fetch_unclassified` with the
/// plan's serialized query; the saving pass calls `set_classification`
/// per item, best-effort.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fetches up to `limit` conversations without a classification that
    /// match the serialized query, newest first.
    async fn fetch_unclassified(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, StoreError>;

    /// Writes one conversation's classification field.
    async fn set_classification(
        &self,
        id: &str,
        classification: Classification,
    ) -> Result<(), StoreError>;
}

/// Parsed query map: a flat JSON object of field → value.
///
/// Reserved keys (`label`, `category`, `intent`, `resolved`, `createdAfter`,
/// `createdBefore`) compile to dedicated predicates; any other key is an
/// equality match against the conversation's JSON representation.
#[derive(Clone, Debug)]
pub struct QueryMap {
    entries: serde_json::Map<String, Value>,
}

impl QueryMap {
    /// Parses the store-native serialized form (a JSON object). An empty
    /// string is the match-all query.
    pub fn parse(serialized: &str) -> Result<Self, StoreError> {
        if serialized.trim().is_empty() {
            return Ok(Self {
                entries: serde_json::Map::new(),
            });
        }
        let value: Value = serde_json::from_str(serialized)
            .map_err(|e| StoreError::Query(format!("query map is not valid JSON: {e}")))?;
        match value {
            Value::Object(entries) => Ok(Self { entries }),
            other => Err(StoreError::Query(format!(
                "query map must be a JSON object, got {other}"
            ))),
        }
    }

    /// True when the conversation satisfies every entry (conjunction).
    pub fn matches(&self, conversation: &Conversation) -> bool {
        self.entries.iter().all(|(key, want)| {
            match key.as_str() {
                "label" => match want.as_str() {
                    Some(s) => conversation.labels.iter().any(|l| l == s),
                    None => false,
                },
                "category" => conversation.meta.category.as_deref() == want.as_str(),
                "intent" => conversation.meta.intent.as_deref() == want.as_str(),
                "resolved" => Some(conversation.resolved) == want.as_bool(),
                "createdAfter" => match parse_instant(want) {
                    Some(t) => conversation.created_at > t,
                    None => false,
                },
                "createdBefore" => match parse_instant(want) {
                    Some(t) => conversation.created_at < t,
                    None => false,
                },
                _ => {
                    // Fallback: equality against the entity's JSON fields.
                    match serde_json::to_value(conversation) {
                        Ok(v) => v.get(key) == Some(want),
                        Err(_) => false,
                    }
                }
            }
        })
    }
}

fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// In-memory conversation store for tests and dev servers.
#[derive(Default)]
pub struct InMemoryConversationStore {
    data: DashMap<String, Conversation>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces one conversation.
    pub fn insert(&self, conversation: Conversation) {
        self.data.insert(conversation.id.clone(), conversation);
    }

    /// Seeds many conversations at once.
    pub fn seed(&self, conversations: impl IntoIterator<Item = Conversation>) {
        for c in conversations {
            self.insert(c);
        }
    }

    /// Reads one conversation back (test helper).
    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.data.get(id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn fetch_unclassified(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Conversation>, StoreError> {
        let map = QueryMap::parse(query)?;
        let mut hits: Vec<Conversation> = self
            .data
            .iter()
            .filter(|e| e.value().classification.is_none() && map.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn set_classification(
        &self,
        id: &str,
        classification: Classification,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .data
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.classification = Some(classification);
        entry.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn convo(id: &str, day: u32, category: &str) -> Conversation {
        let mut c = Conversation::new(id, Utc.with_ymd_and_hms(2025, 6, day, 12, 0, 0).unwrap());
        c.meta.category = Some(category.to_string());
        c.labels = vec!["support".into()];
        c
    }

    /// **Scenario**: empty query matches everything; bad JSON is a query
    /// error, not a panic.
    #[test]
    fn query_map_parse_edges() {
        assert!(QueryMap::parse("").unwrap().matches(&convo("a", 1, "X")));
        assert!(QueryMap::parse("   ").unwrap().matches(&convo("a", 1, "X")));
        assert!(matches!(
            QueryMap::parse("not json"),
            Err(StoreError::Query(_))
        ));
        assert!(matches!(
            QueryMap::parse("[1,2]"),
            Err(StoreError::Query(_))
        ));
    }

    /// **Scenario**: reserved keys compile to their dedicated predicates.
    #[test]
    fn query_map_reserved_keys() {
        let c = convo("a", 10, "REFUND");
        let q = QueryMap::parse(r#"{"category":"REFUND","label":"support"}"#).unwrap();
        assert!(q.matches(&c));
        let q = QueryMap::parse(r#"{"category":"BILLING"}"#).unwrap();
        assert!(!q.matches(&c));
        let q = QueryMap::parse(r#"{"resolved":false}"#).unwrap();
        assert!(q.matches(&c));
        let q = QueryMap::parse(r#"{"createdAfter":"2025-06-05T00:00:00Z"}"#).unwrap();
        assert!(q.matches(&c));
        let q = QueryMap::parse(r#"{"createdBefore":"2025-06-05T00:00:00Z"}"#).unwrap();
        assert!(!q.matches(&c));
    }

    /// **Scenario**: fetch_unclassified filters classified entries, applies
    /// the query, sorts newest first, and honors the limit.
    #[tokio::test]
    async fn fetch_unclassified_filters_and_limits() {
        let store = InMemoryConversationStore::new();
        store.seed([
            convo("a", 1, "REFUND"),
            convo("b", 2, "REFUND"),
            convo("c", 3, "BILLING"),
            convo("d", 4, "REFUND"),
        ]);
        store
            .set_classification("d", Classification::Resolved)
            .await
            .unwrap();

        let hits = store
            .fetch_unclassified(r#"{"category":"REFUND"}"#, 10)
            .await
            .unwrap();
        let ids: Vec<_> = hits.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"], "newest first, classified excluded");

        let hits = store
            .fetch_unclassified(r#"{"category":"REFUND"}"#, 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    /// **Scenario**: set_classification writes the field, bumps the version,
    /// and reports missing ids.
    #[tokio::test]
    async fn set_classification_updates_or_errors() {
        let store = InMemoryConversationStore::new();
        store.insert(convo("a", 1, "REFUND"));

        store
            .set_classification("a", Classification::Unresolved)
            .await
            .unwrap();
        let c = store.get("a").unwrap();
        assert_eq!(c.classification, Some(Classification::Unresolved));
        assert_eq!(c.version, 1);

        let err = store
            .set_classification("zzz", Classification::Resolved)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
