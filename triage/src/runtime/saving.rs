//! Saving handler: persist pending classifications best-effort per item.
//!
//! Entered through `ApproveBatch`. Ids already in the accumulator are
//! skipped, so replaying the same batch never double-counts. Per-item store
//! failures are logged and skipped; the batch completes with whatever saved.

use std::sync::Arc;

use run_event::{EventKind, TextStreamFamily};
use serde_json::json;
use tracing::warn;

use crate::context::{AgentContext, AgentState};
use crate::error::AgentError;
use crate::plan::ClassificationOutput;
use crate::stream::EventSink;

use super::{Flow, RuntimeCore};

pub(super) async fn run(
    core: &Arc<RuntimeCore>,
    ctx: &mut AgentContext,
    sink: &EventSink,
    pending: Vec<ClassificationOutput>,
) -> Result<Flow, AgentError> {
    sink.emit_with_data(
        EventKind::SavingStarted,
        format!("Saving {} classifications", pending.len()),
        json!({ "count": pending.len() }),
    )
    .await?;

    let mut saved_ids = Vec::new();
    for output in &pending {
        if ctx.all_conversation_ids.contains(&output.conversation_id) {
            continue;
        }
        match core
            .conversations
            .set_classification(&output.conversation_id, output.classification)
            .await
        {
            Ok(()) => saved_ids.push(output.conversation_id.clone()),
            Err(e) => {
                warn!(
                    run_id = %ctx.run_id,
                    conversation_id = %output.conversation_id,
                    error = %e,
                    "classification save failed; skipping item"
                );
                ctx.append_failure(format!(
                    "save_failure[{}]: {e}",
                    output.conversation_id
                ));
            }
        }
    }

    let saved = saved_ids.len();
    ctx.all_conversation_ids.extend(saved_ids);
    ctx.total_conversations_classified += saved as u32;

    let target = ctx.target_sample_size.unwrap_or(0);
    let total = ctx.total_conversations_classified;
    let next_batch = !ctx.target_met();
    ctx.state = if next_batch {
        AgentState::Fetching
    } else {
        AgentState::Summarizing
    };
    core.persist(ctx).await?;

    sink.emit_with_data(
        EventKind::SavingCompleted,
        format!("Saved {saved} classifications ({total} of {target})"),
        json!({ "saved": saved, "totalConversationsClassified": total }),
    )
    .await?;
    sink.emit_with_data(
        EventKind::BatchCompleted,
        format!("Batch completed: {saved} saved"),
        json!({ "saved": saved }),
    )
    .await?;
    let batch_summary = format!(
        "Saved {saved} classifications in this batch. {total} of {target} conversations classified so far."
    );
    sink.emit_text_stream(TextStreamFamily::BatchSummary, &batch_summary)
        .await?;
    if next_batch {
        sink.emit(
            EventKind::ClassifyingNextBatch,
            "Continuing with the next batch",
        )
        .await?;
    }
    Ok(Flow::Continue)
}
