//! Run context and the agent state union.
//!
//! One [`AgentContext`] per run, persisted by the checkpoint store on every
//! state transition. The state is a tagged sum type; each variant owns only
//! the transient data that state needs, so a checkpoint can never hold a
//! half-applied transition (e.g. pending classifications outside the
//! classifying/approval/saving states).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::Conversation;
use crate::plan::{ClassificationOutput, ConvClassificationPlan};

/// Per-run resource bounds. Defaults: 10 model calls, 5 plans, batches of 10.
/// The per-call LLM timeout lives on the broker.
#[derive(Clone, Copy, Debug)]
pub struct AgentLimits {
    pub max_model_calls: u32,
    pub max_plans: u32,
    pub max_batch: u32,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_model_calls: 10,
            max_plans: 5,
            max_batch: 10,
        }
    }
}

/// Why the runtime went back to planning. Cleared on a successful plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanReason {
    FetchFailure,
    NoConversationsFound,
    FetchRejected,
}

impl ReplanReason {
    /// The verbatim tag handed to the planner prompt.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchFailure => "fetch_failure",
            Self::NoConversationsFound => "no_conversations_found",
            Self::FetchRejected => "fetch_rejected",
        }
    }
}

/// Agent lifecycle state. Variants own their transient data.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum AgentState {
    Planning,
    Fetching,
    AwaitingFetchApproval {
        batch: Vec<Conversation>,
    },
    Classifying {
        batch: Vec<Conversation>,
    },
    AwaitingBatchApproval {
        batch: Vec<Conversation>,
        pending: Vec<ClassificationOutput>,
    },
    Saving {
        pending: Vec<ClassificationOutput>,
    },
    Summarizing,
    Completed,
    Stopped {
        reason: String,
    },
    Error {
        message: String,
    },
}

impl AgentState {
    /// Denormalized tag name, persisted beside the payload for listing.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Fetching => "fetching",
            Self::AwaitingFetchApproval { .. } => "awaiting_fetch_approval",
            Self::Classifying { .. } => "classifying",
            Self::AwaitingBatchApproval { .. } => "awaiting_batch_approval",
            Self::Saving { .. } => "saving",
            Self::Summarizing => "summarizing",
            Self::Completed => "completed",
            Self::Stopped { .. } => "stopped",
            Self::Error { .. } => "error",
        }
    }

    /// Terminal states never tick again after their exit event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped { .. })
    }

    /// Approval waypoints: the runtime yields and waits for a command.
    pub fn is_awaiting(&self) -> bool {
        matches!(
            self,
            Self::AwaitingFetchApproval { .. } | Self::AwaitingBatchApproval { .. }
        )
    }
}

/// Durable per-run context. The checkpoint store is the source of truth;
/// any in-memory copy is derivative.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    pub run_id: String,
    /// Opaque credential for the downstream LLM provider.
    pub api_key: String,
    pub user_instructions: String,
    pub state: AgentState,
    pub model_call_count: u32,
    pub plans_count: u32,
    pub total_conversations_classified: u32,
    /// Set exactly once per plan; 1–100.
    pub target_sample_size: Option<u32>,
    pub current_plan: Option<ConvClassificationPlan>,
    /// Accumulator of saved conversation ids; growth is monotonic.
    pub all_conversation_ids: Vec<String>,
    /// Append-only failure log, fed back into the planner prompt.
    pub failure_logs: Vec<String>,
    pub replanning_reason: Option<ReplanReason>,
    /// Sticky "approve all fetches" flag, set by `ApproveAllFetch`.
    pub approval_fetch_command_executed: bool,
    /// Records that a batch approval ran. Never sticky: classification
    /// batches always route through `AwaitingBatchApproval`.
    pub approval_batch_command_executed: bool,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentContext {
    pub fn new(
        run_id: impl Into<String>,
        api_key: impl Into<String>,
        user_instructions: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            api_key: api_key.into(),
            user_instructions: user_instructions.into(),
            state: AgentState::Planning,
            model_call_count: 0,
            plans_count: 0,
            total_conversations_classified: 0,
            target_sample_size: None,
            current_plan: None,
            all_conversation_ids: Vec::new(),
            failure_logs: Vec::new(),
            replanning_reason: None,
            approval_fetch_command_executed: false,
            approval_batch_command_executed: false,
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Denormalized state tag, persisted as `state_name`.
    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Appends one line to the failure log.
    pub fn append_failure(&mut self, line: impl Into<String>) {
        self.failure_logs.push(line.into());
    }

    /// Refreshes `updated_at`; called right before every checkpoint write.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Remaining conversations until the plan's target is met.
    pub fn remaining_to_target(&self) -> u32 {
        self.target_sample_size
            .unwrap_or(0)
            .saturating_sub(self.total_conversations_classified)
    }

    /// True once the plan's target has been met.
    pub fn target_met(&self) -> bool {
        match self.target_sample_size {
            Some(t) => self.total_conversations_classified >= t,
            None => false,
        }
    }
}
