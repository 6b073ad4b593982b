//! Agent error taxonomy.
//!
//! Every handler failure is routed through [`AgentError`]; the runtime never
//! lets an error escape the tick loop — it becomes an `Error` state transition
//! (or, for checkpoint/subscriber failures, ends the event sequence).

use thiserror::Error;

use crate::broker::BrokerFailure;
use crate::checkpoint::CheckpointError;
use crate::conversation::StoreError;
use crate::stream::SinkClosed;

/// Agent runtime error.
///
/// **Interaction**: returned by state handlers; the drive loop maps most
/// variants to the `Error` state. `Checkpoint` and `SubscriberDisconnected`
/// are special: a checkpoint failure aborts the sequence without a state
/// change, and a disconnected subscriber simply ends emission.
#[derive(Debug, Error)]
pub enum AgentError {
    /// plansCount reached maxPlans after a failure.
    #[error("planner exhausted: {0}")]
    PlannerExhaustion(String),

    /// 4xx-class provider error; fatal for the current tick.
    #[error("provider client error: {0}")]
    ProviderClientError(String),

    /// 5xx/timeout provider error.
    #[error("provider server error: {0}")]
    ProviderServerError(String),

    /// Conversation store read/write failed.
    #[error("store failure: {0}")]
    StoreFailure(String),

    /// Command not valid for the current state; surfaced, run unchanged.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// LLM output rejected by validation (bad plan, unparseable output).
    #[error("validation failure: {0}")]
    ValidationFailure(String),

    /// Checkpoint persistence failed; aborts the sequence, no state change.
    #[error("checkpoint failure: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The event subscriber went away; emission ends, run state is preserved.
    #[error("subscriber disconnected")]
    SubscriberDisconnected(#[from] SinkClosed),
}

impl From<BrokerFailure> for AgentError {
    fn from(f: BrokerFailure) -> Self {
        match f.kind {
            crate::broker::ProviderErrorKind::Client => {
                AgentError::ProviderClientError(f.failure_log)
            }
            crate::broker::ProviderErrorKind::Server => {
                AgentError::ProviderServerError(f.failure_log)
            }
            crate::broker::ProviderErrorKind::Validation => {
                AgentError::ValidationFailure(f.failure_log)
            }
        }
    }
}

impl From<StoreError> for AgentError {
    fn from(e: StoreError) -> Self {
        AgentError::StoreFailure(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ProviderErrorKind;

    /// **Scenario**: Display of each variant contains its taxonomy keyword.
    #[test]
    fn agent_error_display_variants() {
        assert!(AgentError::PlannerExhaustion("x".into())
            .to_string()
            .contains("planner exhausted"));
        assert!(AgentError::ProviderClientError("x".into())
            .to_string()
            .contains("client"));
        assert!(AgentError::ProviderServerError("x".into())
            .to_string()
            .contains("server"));
        assert!(AgentError::StoreFailure("x".into())
            .to_string()
            .contains("store"));
        assert!(AgentError::InvalidCommand("x".into())
            .to_string()
            .contains("invalid command"));
        assert!(AgentError::ValidationFailure("x".into())
            .to_string()
            .contains("validation"));
    }

    /// **Scenario**: broker failures map onto the matching taxonomy variants.
    #[test]
    fn broker_failure_maps_by_kind() {
        let client = BrokerFailure {
            kind: ProviderErrorKind::Client,
            failure_log: "401".into(),
        };
        assert!(matches!(
            AgentError::from(client),
            AgentError::ProviderClientError(_)
        ));

        let server = BrokerFailure {
            kind: ProviderErrorKind::Server,
            failure_log: "timeout".into(),
        };
        assert!(matches!(
            AgentError::from(server),
            AgentError::ProviderServerError(_)
        ));

        let validation = BrokerFailure {
            kind: ProviderErrorKind::Validation,
            failure_log: "unparseable".into(),
        };
        assert!(matches!(
            AgentError::from(validation),
            AgentError::ValidationFailure(_)
        ));
    }
}
