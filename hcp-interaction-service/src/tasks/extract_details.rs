use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{error, info};
use turn_flow::{Context, GraphError, NextAction, Result, SerializableMessage, Task, TaskResult};

use super::types::{BestEffort, NO_PRIOR_SUMMARY, render_history, session_keys};
use crate::llm::{InferenceError, LanguageModel};
use crate::models::ExtractedInteraction;

/// Build the extraction instruction for one utterance
pub fn build_extraction_prompt(
    user_input: &str,
    history: &[SerializableMessage],
    context_summary: &str,
    today: NaiveDate,
) -> String {
    format!(
        r#"
    You are an AI assistant helping a healthcare sales representative log an interaction with a Healthcare Professional (HCP).
    Your goal is to extract structured information from the user's conversational input.
    Never invent data: if a field is not mentioned, leave it null.
    If the interaction date is not specified, assume it is today: {today}.

    Current user input: "{user_input}"

    Consider the recent conversation history:
    {history}

    And the overall context summary (if available):
    {context_summary}

    Based *only* on the user's current input and the provided history/context, extract the interaction details.
    If some details are present in history but contradicted or updated by the current user input, the current input wins.
    If the user's input is a question or does not provide loggable information, still extract any partial information present.
    If crucial details are missing or ambiguous, describe them in 'unclear_details' instead of leaving them silently empty.
    "#,
        today = today.format("%Y-%m-%d"),
        history = render_history(history),
    )
}

/// Ask the model for an extraction object and validate it against the schema
pub async fn extract_interaction(
    model: &dyn LanguageModel,
    prompt: &str,
) -> std::result::Result<ExtractedInteraction, InferenceError> {
    let raw = model
        .extract(prompt, &ExtractedInteraction::json_schema())
        .await?;
    let extracted: ExtractedInteraction = serde_json::from_value(raw)
        .map_err(|e| InferenceError::SchemaViolation(e.to_string()))?;
    Ok(extracted.normalized())
}

/// Extracts interaction fields from the current utterance
///
/// Always continues; the outgoing edge routes on whether an extraction was stored.
pub struct ExtractDetailsTask {
    model: Arc<dyn LanguageModel>,
    history_window: usize,
}

impl ExtractDetailsTask {
    pub fn new(model: Arc<dyn LanguageModel>, history_window: usize) -> Self {
        Self {
            model,
            history_window,
        }
    }
}

#[async_trait]
impl Task for ExtractDetailsTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!(task_id = %self.id(), "Attempting to extract interaction details");

        let user_input: String = context
            .get(session_keys::USER_INPUT)
            .await
            .ok_or_else(|| GraphError::ContextError("user_input not found".to_string()))?;
        let today: NaiveDate = context
            .get(session_keys::TODAY)
            .await
            .ok_or_else(|| GraphError::ContextError("today not found".to_string()))?;
        let context_summary = context
            .get::<BestEffort<String>>(session_keys::CONTEXT_SUMMARY)
            .await
            .map(BestEffort::into_inner)
            .unwrap_or_else(|| NO_PRIOR_SUMMARY.to_string());
        let history = context.get_last_messages(self.history_window).await;

        let prompt = build_extraction_prompt(&user_input, &history, &context_summary, today);

        match extract_interaction(self.model.as_ref(), &prompt).await {
            Ok(extracted) => {
                info!(
                    fields = ?extracted.populated_fields(),
                    "Extracted interaction details"
                );
                context.set(session_keys::EXTRACTED_DATA, &extracted).await;
                Ok(TaskResult::new_with_status(
                    None,
                    NextAction::ContinueAndExecute,
                    Some("Extraction complete - composing acknowledgment".to_string()),
                ))
            }
            Err(e) => {
                error!(error = %e, "Error during extraction");
                context
                    .set(session_keys::EXTRACTION_ERROR, e.to_string())
                    .await;
                Ok(TaskResult::new_with_status(
                    None,
                    NextAction::ContinueAndExecute,
                    Some(format!("Extraction failed: {e}")),
                ))
            }
        }
    }
}
