//! Fetching handler: pull the next bounded batch from the conversation
//! store, then route to approval, classification, replanning, or wrap-up.

use std::sync::Arc;

use run_event::EventKind;
use serde_json::json;
use tracing::warn;

use crate::context::{AgentContext, AgentState, ReplanReason};
use crate::error::AgentError;
use crate::stream::EventSink;

use super::{Flow, RuntimeCore};

pub(super) async fn run(
    core: &Arc<RuntimeCore>,
    ctx: &mut AgentContext,
    sink: &EventSink,
) -> Result<Flow, AgentError> {
    let plan = ctx
        .current_plan
        .clone()
        .ok_or_else(|| AgentError::ValidationFailure("fetching without a plan".into()))?;

    let batch_size = core
        .limits
        .max_batch
        .min(ctx.remaining_to_target()) as usize;
    sink.emit(
        EventKind::FetchingStarted,
        format!("Fetching up to {batch_size} conversations"),
    )
    .await?;

    if batch_size == 0 {
        ctx.state = AgentState::Summarizing;
        core.persist(ctx).await?;
        sink.emit(
            EventKind::FetchingStopped,
            "Target sample size reached; nothing left to fetch",
        )
        .await?;
        return Ok(Flow::Continue);
    }

    match core
        .conversations
        .fetch_unclassified(&plan.query_map_serialized, batch_size)
        .await
    {
        Err(e) => {
            warn!(run_id = %ctx.run_id, error = %e, "conversation fetch failed");
            ctx.append_failure(format!("fetch_failure: {e}"));
            if ctx.plans_count < core.limits.max_plans {
                ctx.replanning_reason = Some(ReplanReason::FetchFailure);
                ctx.state = AgentState::Planning;
                core.persist(ctx).await?;
                sink.emit(
                    EventKind::FetchingError,
                    format!("Fetch failed ({e}); re-planning"),
                )
                .await?;
                Ok(Flow::Continue)
            } else {
                Err(AgentError::StoreFailure(format!(
                    "fetch failed with plan budget exhausted: {e}"
                )))
            }
        }
        Ok(batch) if batch.is_empty() => {
            if ctx.plans_count < core.limits.max_plans {
                ctx.append_failure("no_conversations_found: query matched nothing".to_string());
                ctx.replanning_reason = Some(ReplanReason::NoConversationsFound);
                ctx.state = AgentState::Planning;
                core.persist(ctx).await?;
                sink.emit(
                    EventKind::FetchingStopped,
                    "No conversations matched the plan query; re-planning",
                )
                .await?;
            } else {
                ctx.state = AgentState::Summarizing;
                core.persist(ctx).await?;
                sink.emit(
                    EventKind::FetchingStopped,
                    "No conversations matched and plan budget is exhausted",
                )
                .await?;
            }
            Ok(Flow::Continue)
        }
        Ok(batch) => {
            let count = batch.len();
            ctx.state = if ctx.approval_fetch_command_executed {
                AgentState::Classifying { batch }
            } else {
                AgentState::AwaitingFetchApproval { batch }
            };
            core.persist(ctx).await?;
            sink.emit_with_data(
                EventKind::FetchingCompleted,
                format!("Fetched {count} conversations"),
                json!({ "batchSize": count }),
            )
            .await?;
            Ok(Flow::Continue)
        }
    }
}
