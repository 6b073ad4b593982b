//! Classifying handler: schema-constrained LLM call over the current batch.

use std::sync::Arc;

use run_event::EventKind;
use serde_json::json;

use crate::context::{AgentContext, AgentState};
use crate::conversation::Conversation;
use crate::error::AgentError;
use crate::prompts;
use crate::stream::EventSink;

use super::{Flow, RuntimeCore};

pub(super) async fn run(
    core: &Arc<RuntimeCore>,
    ctx: &mut AgentContext,
    sink: &EventSink,
    batch: Vec<Conversation>,
) -> Result<Flow, AgentError> {
    if ctx.model_call_count >= core.limits.max_model_calls {
        ctx.state = AgentState::Stopped {
            reason: format!(
                "Maximum model calls ({}) reached",
                core.limits.max_model_calls
            ),
        };
        return Ok(Flow::Continue);
    }

    sink.emit_with_data(
        EventKind::ClassifyingStarted,
        format!("Classifying {} conversations", batch.len()),
        json!({ "batchSize": batch.len() }),
    )
    .await?;

    let additional = ctx
        .current_plan
        .as_ref()
        .map(|p| p.additional_instructions.clone())
        .unwrap_or_default();
    let prompt = prompts::classification_prompt(&batch, &additional);
    let outputs = core.broker.classify(&prompt).await?;
    ctx.model_call_count += 1;

    ctx.state = AgentState::AwaitingBatchApproval {
        batch,
        pending: outputs.clone(),
    };
    core.persist(ctx).await?;

    sink.emit_with_data(
        EventKind::ClassifyingCompleted,
        format!("Classified {} conversations", outputs.len()),
        json!({ "outputCount": outputs.len(), "modelCallCount": ctx.model_call_count }),
    )
    .await?;
    sink.emit(EventKind::OutputTextStarted, "").await?;
    sink.emit_with_data(
        EventKind::OutputTextDone,
        format!("{} classifications produced", outputs.len()),
        json!({ "outputs": outputs }),
    )
    .await?;
    Ok(Flow::Continue)
}
