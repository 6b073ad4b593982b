//! Plan and classification result types.
//!
//! The planner's structured output, the classifier's per-conversation verdict,
//! and the final run outcome artifact. All serde types; the checkpoint store
//! persists them as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification taxonomy. Fixed externally; the agent never invents labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "RESOLVED")]
    Resolved,
    #[serde(rename = "UNRESOLVED")]
    Unresolved,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolved => "RESOLVED",
            Self::Unresolved => "UNRESOLVED",
        }
    }
}

/// Default sample size when the planner omits one.
pub const DEFAULT_TARGET_SAMPLE_SIZE: u32 = 20;

/// Structured sampling plan produced by the LLM and validated by the runtime.
///
/// `query_map_serialized` is the plan's query map rendered to the conversation
/// store's native syntax; the broker performs that translation before the plan
/// reaches the runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvClassificationPlan {
    pub target_sample_size: u32,
    pub stop_requested: bool,
    pub additional_instructions: String,
    pub query_map_serialized: String,
    pub plan_details: String,
}

/// One classification verdict for one conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationOutput {
    pub conversation_id: String,
    pub classification: Classification,
}

/// Final run artifact, persisted separately from the context.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunOutcome {
    pub run_id: String,
    pub conversation_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Classification serializes to the external taxonomy names.
    #[test]
    fn classification_wire_names() {
        assert_eq!(
            serde_json::to_value(Classification::Resolved).unwrap(),
            "RESOLVED"
        );
        assert_eq!(
            serde_json::to_value(Classification::Unresolved).unwrap(),
            "UNRESOLVED"
        );
        let back: Classification = serde_json::from_str("\"UNRESOLVED\"").unwrap();
        assert_eq!(back, Classification::Unresolved);
    }

    /// **Scenario**: plan round-trips with camelCase keys.
    #[test]
    fn plan_roundtrip_camel_case() {
        let plan = ConvClassificationPlan {
            target_sample_size: 20,
            stop_requested: false,
            additional_instructions: "focus on refunds".into(),
            query_map_serialized: r#"{"category":"REFUND"}"#.into(),
            plan_details: "sample the latest refund threads".into(),
        };
        let v = serde_json::to_value(&plan).unwrap();
        assert_eq!(v["targetSampleSize"], 20);
        assert_eq!(v["stopRequested"], false);
        assert!(v["queryMapSerialized"].as_str().unwrap().contains("REFUND"));
        let back: ConvClassificationPlan = serde_json::from_value(v).unwrap();
        assert_eq!(back.plan_details, plan.plan_details);
    }

    /// **Scenario**: ClassificationOutput keeps ids and labels intact.
    #[test]
    fn classification_output_roundtrip() {
        let out = ClassificationOutput {
            conversation_id: "c-1".into(),
            classification: Classification::Resolved,
        };
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["conversationId"], "c-1");
        assert_eq!(v["classification"], "RESOLVED");
    }
}
