//! Prompt builders for the planner, classifier, and summarizer.
//!
//! Each builder fills the slots the runtime owns: conversation schema
//! overview, progress counters, replanning reason, and failure logs. The
//! wording stays deliberately terse; the structured output schema carries the
//! real contract.

use crate::context::AgentContext;
use crate::conversation::Conversation;

/// Textual overview of the conversation entity handed to the planner.
pub fn conversation_schema_overview() -> &'static str {
    "Conversations have: id, createdAt, messages[{role,text}], summary, \
     labels[], resolved (bool), classification (null | RESOLVED | UNRESOLVED), \
     meta{userState, numberOfTurns, category, intent, flags}, version. \
     Query maps are flat JSON objects; supported keys: label, category, \
     intent, resolved, createdAfter, createdBefore."
}

/// Planner prompt: schema, progress, replanning reason, failure logs,
/// optional retrieved knowledge.
pub fn planning_prompt(ctx: &AgentContext, knowledge: Option<&str>) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You plan which customer-service conversations to classify next. \
         Produce a sampling plan as structured output.\n\n",
    );
    prompt.push_str("Conversation schema: ");
    prompt.push_str(conversation_schema_overview());
    prompt.push_str("\n\nUser instructions: ");
    prompt.push_str(&ctx.user_instructions);
    prompt.push_str(&format!(
        "\n\nProgress so far: {} conversations classified, {} plans made, {} model calls used.",
        ctx.total_conversations_classified, ctx.plans_count, ctx.model_call_count
    ));
    if let Some(target) = ctx.target_sample_size {
        prompt.push_str(&format!(" Previous target sample size: {target}."));
    }
    if let Some(reason) = ctx.replanning_reason {
        prompt.push_str(&format!(
            "\n\nRe-planning required. Reason: {}. Adapt the query so this does not repeat.",
            reason.as_str()
        ));
    }
    if !ctx.failure_logs.is_empty() {
        prompt.push_str("\n\nFailure log:\n");
        for line in &ctx.failure_logs {
            prompt.push_str("- ");
            prompt.push_str(line);
            prompt.push('\n');
        }
    }
    if let Some(knowledge) = knowledge {
        if !knowledge.is_empty() {
            prompt.push_str("\n\nRetrieved corpus knowledge:\n");
            prompt.push_str(knowledge);
        }
    }
    prompt
}

/// Classifier prompt over one fetched batch.
pub fn classification_prompt(batch: &[Conversation], additional_instructions: &str) -> String {
    let mut prompt = String::from(
        "Classify each conversation below as RESOLVED or UNRESOLVED. \
         Return structured output with one entry per conversation id.\n",
    );
    if !additional_instructions.is_empty() {
        prompt.push_str("Additional instructions: ");
        prompt.push_str(additional_instructions);
        prompt.push('\n');
    }
    for c in batch {
        prompt.push_str(&format!("\n--- conversation {} ---\n", c.id));
        if let Some(summary) = &c.summary {
            prompt.push_str("summary: ");
            prompt.push_str(summary);
            prompt.push('\n');
        }
        for m in &c.messages {
            prompt.push_str(&format!("{}: {}\n", m.role, m.text));
        }
    }
    prompt
}

/// Summarizer prompt: a three-bullet user-facing recap from the counters.
pub fn summary_prompt(ctx: &AgentContext) -> String {
    format!(
        "Write a 3-bullet summary of this classification run for the user.\n\
         Conversations classified: {}\n\
         Target sample size: {}\n\
         Plans made: {}\n\
         Model calls used: {}\n\
         Failures logged: {}",
        ctx.total_conversations_classified,
        ctx.target_sample_size
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".into()),
        ctx.plans_count,
        ctx.model_call_count,
        ctx.failure_logs.len()
    )
}

/// Deterministic fallback summary used when the summarizer call fails.
pub fn fallback_summary(ctx: &AgentContext) -> String {
    format!(
        "- Classified {} conversations\n- Used {} plans and {} model calls\n- {} failures logged",
        ctx.total_conversations_classified,
        ctx.plans_count,
        ctx.model_call_count,
        ctx.failure_logs.len()
    )
}
