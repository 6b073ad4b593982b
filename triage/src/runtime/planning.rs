//! Planning handler: ask the LLM for a sampling plan, validate, advance to
//! fetching.

use std::sync::Arc;

use run_event::{EventKind, TextStreamFamily};
use serde_json::json;
use tracing::warn;

use crate::context::{AgentContext, AgentState};
use crate::conversation::QueryMap;
use crate::error::AgentError;
use crate::plan::ConvClassificationPlan;
use crate::prompts;
use crate::retrieval::{AgenticRetrieval, RetrievalOptions};
use crate::stream::EventSink;

use super::{Flow, RuntimeCore};

pub(super) async fn run(
    core: &Arc<RuntimeCore>,
    ctx: &mut AgentContext,
    sink: &EventSink,
) -> Result<Flow, AgentError> {
    if let Some(reason) = ctx.replanning_reason {
        sink.emit(
            EventKind::Replanning,
            format!("Re-planning ({})", reason.as_str()),
        )
        .await?;
    }
    sink.emit(EventKind::PlanningStarted, "Planning the next sample")
        .await?;

    if ctx.plans_count >= core.limits.max_plans {
        return Err(AgentError::PlannerExhaustion(format!(
            "Maximum plans ({}) reached",
            core.limits.max_plans
        )));
    }

    let knowledge = gather_knowledge(core, ctx).await;
    let prompt = prompts::planning_prompt(ctx, knowledge.as_deref());
    let plan = core.broker.plan(&prompt).await?;
    validate_plan(&plan, ctx)?;

    ctx.target_sample_size = Some(plan.target_sample_size);
    ctx.current_plan = Some(plan.clone());
    ctx.plans_count += 1;
    ctx.replanning_reason = None;
    ctx.state = AgentState::Fetching;
    core.persist(ctx).await?;

    sink.emit_with_data(
        EventKind::PlanningCompleted,
        format!(
            "Plan ready: classify {} conversations",
            plan.target_sample_size
        ),
        json!({
            "targetSampleSize": plan.target_sample_size,
            "plansCount": ctx.plans_count,
        }),
    )
    .await?;
    sink.emit_text_stream(TextStreamFamily::PlanSummary, &plan.plan_details)
        .await?;
    Ok(Flow::Continue)
}

fn validate_plan(plan: &ConvClassificationPlan, ctx: &AgentContext) -> Result<(), AgentError> {
    if plan.stop_requested {
        return Err(AgentError::ValidationFailure(
            "planner requested stop".into(),
        ));
    }
    if plan.target_sample_size == 0 || plan.target_sample_size > 100 {
        return Err(AgentError::ValidationFailure(format!(
            "target sample size {} outside 1-100",
            plan.target_sample_size
        )));
    }
    if ctx.total_conversations_classified >= plan.target_sample_size {
        return Err(AgentError::ValidationFailure(format!(
            "target sample size {} already reached ({} classified)",
            plan.target_sample_size, ctx.total_conversations_classified
        )));
    }
    QueryMap::parse(&plan.query_map_serialized)
        .map_err(|e| AgentError::ValidationFailure(format!("plan query invalid: {e}")))?;
    Ok(())
}

/// Optional planning enrichment: run the agentic retrieval loop over the
/// user's instructions and hand the knowledge memory to the planner.
/// Best-effort — retrieval failures are logged, never fatal.
async fn gather_knowledge(core: &Arc<RuntimeCore>, ctx: &mut AgentContext) -> Option<String> {
    let source = core.knowledge.as_ref()?;
    let options = RetrievalOptions::new(
        ctx.user_instructions.clone(),
        source.vector_store_ids.clone(),
    );
    let retrieval = AgenticRetrieval::new(Arc::clone(&core.broker), Arc::clone(&source.index));
    match retrieval.run(&options).await {
        Ok(outcome) if !outcome.knowledge_memory.is_empty() => Some(outcome.knowledge_memory),
        Ok(_) => None,
        Err(e) => {
            warn!(run_id = %ctx.run_id, error = %e, "planning retrieval failed");
            ctx.append_failure(format!("retrieval_failure: {e}"));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(target: u32) -> ConvClassificationPlan {
        ConvClassificationPlan {
            target_sample_size: target,
            stop_requested: false,
            additional_instructions: String::new(),
            query_map_serialized: "{}".into(),
            plan_details: "details".into(),
        }
    }

    /// **Scenario**: a zero (or >100) target sample size is rejected, as is
    /// a stop request and an already-met target.
    #[test]
    fn plan_validation_boundaries() {
        let ctx = AgentContext::new("r", "k", "i");
        assert!(validate_plan(&plan(20), &ctx).is_ok());
        assert!(validate_plan(&plan(0), &ctx).is_err());
        assert!(validate_plan(&plan(101), &ctx).is_err());

        let mut stopping = plan(20);
        stopping.stop_requested = true;
        assert!(validate_plan(&stopping, &ctx).is_err());

        let mut met = AgentContext::new("r", "k", "i");
        met.total_conversations_classified = 20;
        assert!(validate_plan(&plan(20), &met).is_err());

        let mut bad_query = plan(20);
        bad_query.query_map_serialized = "not json".into();
        assert!(validate_plan(&bad_query, &ctx).is_err());
    }
}
