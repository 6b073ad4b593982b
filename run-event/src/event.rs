//! Protocol-level event types: kind + log message + payload.
//!
//! Kinds serialize to their dotted wire names (`agent.run.planning.started`);
//! `RunEvent` is the wire shape with camelCase keys (`logMessage`, `runId`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire-level event kind. Serializes to the dotted event name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "agent.run.started")]
    RunStarted,
    #[serde(rename = "agent.run.resumed")]
    RunResumed,
    #[serde(rename = "agent.run.stopped")]
    RunStopped,
    #[serde(rename = "agent.run.completed")]
    RunCompleted,
    #[serde(rename = "agent.run.error")]
    RunError,
    #[serde(rename = "agent.run.planning.started")]
    PlanningStarted,
    #[serde(rename = "agent.run.planning.completed")]
    PlanningCompleted,
    #[serde(rename = "agent.run.replanning")]
    Replanning,
    #[serde(rename = "agent.run.plan_summary.started")]
    PlanSummaryStarted,
    #[serde(rename = "agent.run.plan_summary.delta")]
    PlanSummaryDelta,
    #[serde(rename = "agent.run.plan_summary.done")]
    PlanSummaryDone,
    #[serde(rename = "agent.run.fetching.started")]
    FetchingStarted,
    #[serde(rename = "agent.run.fetching.completed")]
    FetchingCompleted,
    #[serde(rename = "agent.run.fetching.error")]
    FetchingError,
    #[serde(rename = "agent.run.fetching.stopped")]
    FetchingStopped,
    #[serde(rename = "agent.run.classifying.started")]
    ClassifyingStarted,
    #[serde(rename = "agent.run.classifying.completed")]
    ClassifyingCompleted,
    #[serde(rename = "agent.run.classifying_next_batch")]
    ClassifyingNextBatch,
    #[serde(rename = "agent.run.output_text.started")]
    OutputTextStarted,
    #[serde(rename = "agent.run.output_text.done")]
    OutputTextDone,
    #[serde(rename = "agent.run.saving.started")]
    SavingStarted,
    #[serde(rename = "agent.run.saving.completed")]
    SavingCompleted,
    #[serde(rename = "agent.run.summarizing.started")]
    SummarizingStarted,
    #[serde(rename = "agent.run.summarizing.completed")]
    SummarizingCompleted,
    #[serde(rename = "agent.run.summary.started")]
    SummaryStarted,
    #[serde(rename = "agent.run.summary.delta")]
    SummaryDelta,
    #[serde(rename = "agent.run.summary.done")]
    SummaryDone,
    #[serde(rename = "agent.run.awaiting_fetch_approval")]
    AwaitingFetchApproval,
    #[serde(rename = "agent.run.awaiting_batch_approval")]
    AwaitingBatchApproval,
    #[serde(rename = "agent.run.fetch_approved")]
    FetchApproved,
    #[serde(rename = "agent.run.fetch_rejected")]
    FetchRejected,
    #[serde(rename = "agent.run.batch_approved")]
    BatchApproved,
    #[serde(rename = "agent.run.batch_rejected")]
    BatchRejected,
    #[serde(rename = "agent.run.batch_completed")]
    BatchCompleted,
    #[serde(rename = "agent.run.batch_summary.started")]
    BatchSummaryStarted,
    #[serde(rename = "agent.run.batch_summary.delta")]
    BatchSummaryDelta,
    #[serde(rename = "agent.run.batch_summary.done")]
    BatchSummaryDone,
}

impl EventKind {
    /// The dotted wire name (same string the serde rename produces).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "agent.run.started",
            Self::RunResumed => "agent.run.resumed",
            Self::RunStopped => "agent.run.stopped",
            Self::RunCompleted => "agent.run.completed",
            Self::RunError => "agent.run.error",
            Self::PlanningStarted => "agent.run.planning.started",
            Self::PlanningCompleted => "agent.run.planning.completed",
            Self::Replanning => "agent.run.replanning",
            Self::PlanSummaryStarted => "agent.run.plan_summary.started",
            Self::PlanSummaryDelta => "agent.run.plan_summary.delta",
            Self::PlanSummaryDone => "agent.run.plan_summary.done",
            Self::FetchingStarted => "agent.run.fetching.started",
            Self::FetchingCompleted => "agent.run.fetching.completed",
            Self::FetchingError => "agent.run.fetching.error",
            Self::FetchingStopped => "agent.run.fetching.stopped",
            Self::ClassifyingStarted => "agent.run.classifying.started",
            Self::ClassifyingCompleted => "agent.run.classifying.completed",
            Self::ClassifyingNextBatch => "agent.run.classifying_next_batch",
            Self::OutputTextStarted => "agent.run.output_text.started",
            Self::OutputTextDone => "agent.run.output_text.done",
            Self::SavingStarted => "agent.run.saving.started",
            Self::SavingCompleted => "agent.run.saving.completed",
            Self::SummarizingStarted => "agent.run.summarizing.started",
            Self::SummarizingCompleted => "agent.run.summarizing.completed",
            Self::SummaryStarted => "agent.run.summary.started",
            Self::SummaryDelta => "agent.run.summary.delta",
            Self::SummaryDone => "agent.run.summary.done",
            Self::AwaitingFetchApproval => "agent.run.awaiting_fetch_approval",
            Self::AwaitingBatchApproval => "agent.run.awaiting_batch_approval",
            Self::FetchApproved => "agent.run.fetch_approved",
            Self::FetchRejected => "agent.run.fetch_rejected",
            Self::BatchApproved => "agent.run.batch_approved",
            Self::BatchRejected => "agent.run.batch_rejected",
            Self::BatchCompleted => "agent.run.batch_completed",
            Self::BatchSummaryStarted => "agent.run.batch_summary.started",
            Self::BatchSummaryDelta => "agent.run.batch_summary.delta",
            Self::BatchSummaryDone => "agent.run.batch_summary.done",
        }
    }

    /// True for kinds that close a run for good (`stopped`, `completed`).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunStopped | Self::RunCompleted)
    }

    /// True for the two approval-waypoint kinds.
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingFetchApproval | Self::AwaitingBatchApproval)
    }
}

/// A family of `started`/`delta`/`done` kinds for chunked text streaming.
///
/// **Interaction**: the core's text-stream helper takes one of these and
/// emits the family's three kinds around the chunk sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextStreamFamily {
    PlanSummary,
    Summary,
    BatchSummary,
}

impl TextStreamFamily {
    pub fn started(&self) -> EventKind {
        match self {
            Self::PlanSummary => EventKind::PlanSummaryStarted,
            Self::Summary => EventKind::SummaryStarted,
            Self::BatchSummary => EventKind::BatchSummaryStarted,
        }
    }

    pub fn delta(&self) -> EventKind {
        match self {
            Self::PlanSummary => EventKind::PlanSummaryDelta,
            Self::Summary => EventKind::SummaryDelta,
            Self::BatchSummary => EventKind::BatchSummaryDelta,
        }
    }

    pub fn done(&self) -> EventKind {
        match self {
            Self::PlanSummary => EventKind::PlanSummaryDone,
            Self::Summary => EventKind::SummaryDone,
            Self::BatchSummary => EventKind::BatchSummaryDone,
        }
    }
}

/// One stream event: kind + human-readable log line + optional payload.
///
/// Wire keys are camelCase (`logMessage`, `runId`); `data` is omitted when
/// absent so subscribers see compact records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(rename = "logMessage")]
    pub log_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "runId", default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl RunEvent {
    pub fn new(kind: EventKind, log_message: impl Into<String>) -> Self {
        Self {
            kind,
            log_message: log_message.into(),
            data: None,
            run_id: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Serializes this event to a JSON object (the SSE `data:` body).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: kinds serialize to their dotted wire names and `as_str`
    /// agrees with serde.
    #[test]
    fn event_kind_wire_names_match_as_str() {
        for kind in [
            EventKind::RunStarted,
            EventKind::Replanning,
            EventKind::PlanSummaryDelta,
            EventKind::FetchingStopped,
            EventKind::ClassifyingNextBatch,
            EventKind::AwaitingBatchApproval,
            EventKind::BatchSummaryDone,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, Value::String(kind.as_str().to_string()));
        }
    }

    /// **Scenario**: RunEvent serializes with camelCase keys and omits absent
    /// optional fields.
    #[test]
    fn run_event_wire_shape() {
        let ev = RunEvent::new(EventKind::PlanningStarted, "Planning a sample");
        let v = ev.to_value().unwrap();
        assert_eq!(v["type"], "agent.run.planning.started");
        assert_eq!(v["logMessage"], "Planning a sample");
        assert!(v.get("data").is_none());
        assert!(v.get("runId").is_none());

        let ev = ev
            .with_data(serde_json::json!({"batch": 3}))
            .with_run_id("run-1");
        let v = ev.to_value().unwrap();
        assert_eq!(v["data"]["batch"], 3);
        assert_eq!(v["runId"], "run-1");
    }

    /// **Scenario**: RunEvent round-trips through JSON.
    #[test]
    fn run_event_roundtrip() {
        let ev = RunEvent::new(EventKind::RunCompleted, "done")
            .with_run_id("r")
            .with_data(serde_json::json!({"total": 20}));
        let text = serde_json::to_string(&ev).unwrap();
        let back: RunEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind, EventKind::RunCompleted);
        assert_eq!(back.run_id.as_deref(), Some("r"));
        assert_eq!(back.data.unwrap()["total"], 20);
    }

    /// **Scenario**: terminal and awaiting predicates match the protocol
    /// contract (stream ends on terminal or awaiting kinds only).
    #[test]
    fn terminal_and_awaiting_predicates() {
        assert!(EventKind::RunStopped.is_terminal());
        assert!(EventKind::RunCompleted.is_terminal());
        assert!(!EventKind::RunError.is_terminal());
        assert!(EventKind::AwaitingFetchApproval.is_awaiting());
        assert!(EventKind::AwaitingBatchApproval.is_awaiting());
        assert!(!EventKind::FetchingStopped.is_awaiting());
    }

    /// **Scenario**: each text-stream family produces its own three kinds.
    #[test]
    fn text_stream_families() {
        let f = TextStreamFamily::Summary;
        assert_eq!(f.started(), EventKind::SummaryStarted);
        assert_eq!(f.delta(), EventKind::SummaryDelta);
        assert_eq!(f.done(), EventKind::SummaryDone);
        assert_eq!(
            TextStreamFamily::BatchSummary.delta(),
            EventKind::BatchSummaryDelta
        );
        assert_eq!(
            TextStreamFamily::PlanSummary.done(),
            EventKind::PlanSummaryDone
        );
    }
}
