use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};
use turn_flow::{Context, NextAction, Result, SerializableMessage, Task, TaskResult};

use super::types::{
    BestEffort, MIN_SUMMARY_HISTORY, NO_PRIOR_CONTEXT, SUMMARY_FAILED, render_history,
    session_keys,
};
use crate::llm::LanguageModel;

/// Digest of what the conversation already established, used to ground extraction
///
/// Short histories are answered with a sentinel without calling the model, and
/// a failed call degrades to a sentinel instead of failing the turn.
pub async fn summarize_history(
    model: &dyn LanguageModel,
    history: &[SerializableMessage],
) -> BestEffort<String> {
    if history.len() < MIN_SUMMARY_HISTORY {
        return BestEffort::Value(NO_PRIOR_CONTEXT.to_string());
    }

    let prompt = format!(
        r#"
        Based on the following conversation history with a healthcare sales representative who is logging an interaction:
        {history}

        Summarize the key information already gathered about the current interaction being logged.
        This summary will be used as context for the primary AI assistant.
        Focus on entities like HCP name, date, products, and main topics.
        If crucial information is still missing, note that.
        "#,
        history = render_history(history)
    );

    match model.generate(&prompt).await {
        Ok(summary) if !summary.trim().is_empty() => {
            info!(summary_length = summary.len(), "Context summary generated");
            BestEffort::Value(summary.trim().to_string())
        }
        Ok(_) => {
            error!("Context summary model returned an empty response");
            BestEffort::degraded(SUMMARY_FAILED.to_string(), "empty summary")
        }
        Err(e) => {
            error!(error = %e, "Error during context summarization");
            BestEffort::degraded(SUMMARY_FAILED.to_string(), e.to_string())
        }
    }
}

/// Optional first stage of a turn: summarizes prior history for the extractor
pub struct ContextSummaryTask {
    model: Arc<dyn LanguageModel>,
}

impl ContextSummaryTask {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Task for ContextSummaryTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!(task_id = %self.id(), "Summarizing conversation for context");

        let history = context.get_all_messages().await;
        let summary = summarize_history(self.model.as_ref(), &history).await;
        let status_message = if summary.is_degraded() {
            "Context summary unavailable - continuing without it"
        } else {
            "Context summary ready - proceeding to extraction"
        };

        context.set(session_keys::CONTEXT_SUMMARY, &summary).await;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::ContinueAndExecute,
            Some(status_message.to_string()),
        ))
    }
}
