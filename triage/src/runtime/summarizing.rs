//! Summarizing handler: user-facing recap, outcome artifact, terminal
//! routing.
//!
//! A summarizer failure never kills an otherwise-finished run: the handler
//! logs it and falls back to a counters-only summary.

use std::sync::Arc;

use chrono::Utc;
use run_event::{EventKind, TextStreamFamily};
use tracing::warn;

use crate::context::{AgentContext, AgentState};
use crate::error::AgentError;
use crate::plan::AgentRunOutcome;
use crate::prompts;
use crate::stream::EventSink;

use super::{Flow, RuntimeCore};

pub(super) async fn run(
    core: &Arc<RuntimeCore>,
    ctx: &mut AgentContext,
    sink: &EventSink,
) -> Result<Flow, AgentError> {
    sink.emit(EventKind::SummarizingStarted, "Summarizing the run")
        .await?;

    let prompt = prompts::summary_prompt(ctx);
    let summary = match core.broker.summarize(&prompt).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => prompts::fallback_summary(ctx),
        Err(f) => {
            warn!(run_id = %ctx.run_id, failure = %f, "summarizer failed; using fallback");
            ctx.append_failure(f.to_string());
            prompts::fallback_summary(ctx)
        }
    };
    ctx.summary = Some(summary.clone());

    let completed = ctx.total_conversations_classified > 0;
    if completed {
        let outcome = AgentRunOutcome {
            run_id: ctx.run_id.clone(),
            conversation_ids: ctx.all_conversation_ids.clone(),
            created_at: Utc::now(),
        };
        core.checkpoints.save_outcome(&outcome).await?;
    }
    ctx.state = if completed {
        AgentState::Completed
    } else {
        AgentState::Stopped {
            reason: "No conversations were classified".into(),
        }
    };
    core.persist(ctx).await?;

    sink.emit_text_stream(TextStreamFamily::Summary, &summary)
        .await?;
    sink.emit(EventKind::SummarizingCompleted, "Summary ready")
        .await?;
    Ok(Flow::Continue)
}
