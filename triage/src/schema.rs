//! JSON schemas for constrained LLM outputs.
//!
//! Held as first-class artifacts: the broker attaches these to the chat
//! request's `response_format` and deserializes the reply into the matching
//! typed result. Free-form text is never parsed for plans or classifications.

use serde_json::{json, Value};

pub const PLANNING_SCHEMA_NAME: &str = "conv_classification_plan";
pub const CLASSIFICATION_SCHEMA_NAME: &str = "conversation_classifications";

/// Schema for the sampling plan (§ planner output).
pub fn planning_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "targetSampleSize": {
                "type": "integer",
                "minimum": 0,
                "maximum": 100,
                "description": "How many conversations to classify in this run (1-100)."
            },
            "stopRequested": {
                "type": "boolean",
                "description": "True when no further classification should happen."
            },
            "additionalInstructions": {
                "type": "string",
                "description": "Free-text guidance carried into classification."
            },
            "queryMap": {
                "type": "object",
                "description": "Flat field-to-value map selecting conversations. Keys: label, category, intent, resolved, createdAfter, createdBefore.",
                "additionalProperties": true
            },
            "planDetails": {
                "type": "string",
                "description": "Human-readable rationale for the plan."
            }
        },
        "required": ["targetSampleSize", "stopRequested", "additionalInstructions", "queryMap", "planDetails"],
        "additionalProperties": false
    })
}

/// Schema for the per-batch classification output.
pub fn classification_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "outputs": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "conversationId": { "type": "string" },
                        "classification": { "type": "string", "enum": ["RESOLVED", "UNRESOLVED"] }
                    },
                    "required": ["conversationId", "classification"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["outputs"],
        "additionalProperties": false
    })
}
