use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};
use turn_flow::{Context, GraphError, NextAction, Result, SerializableMessage, Task, TaskResult};

use super::types::{BestEffort, CONVERSATION_FAILED_REPLY, render_history, session_keys};
use crate::llm::LanguageModel;
use crate::models::ExtractedInteraction;

pub const NEUTRAL_ACK: &str = "I've received your message.";
pub const INVITE_MORE: &str = "What else can I help you log about this interaction?";

/// Fixed-phrase acknowledgment clauses for an extraction, in reply order
pub fn acknowledgment_clauses(data: &ExtractedInteraction) -> Vec<String> {
    let mut parts = Vec::new();

    if let Some(name) = &data.hcp_name {
        parts.push(format!("Okay, I've noted HCP: {name}."));
    }
    if let Some(date) = &data.interaction_date {
        parts.push(format!("Date: {date}."));
    }
    if let Some(products) = data.products_joined() {
        parts.push(format!("Products: {products}."));
    }
    if data.key_discussion_points.is_some() {
        parts.push("Got the key points.".to_string());
    }
    if data.follow_up_actions.is_some() {
        parts.push("And the follow-up actions.".to_string());
    }

    if let Some(unclear) = &data.unclear_details {
        parts.push(format!("However, I need clarification on: {unclear}"));
    } else if parts.is_empty() {
        parts.push(NEUTRAL_ACK.to_string());
    } else {
        parts.push(INVITE_MORE.to_string());
    }

    parts
}

/// Compose the assistant reply for a turn
///
/// With an extraction the reply is built from fixed phrases; without one the
/// model answers conversationally, degrading to an apology if that call fails.
pub async fn compose_reply(
    model: &dyn LanguageModel,
    extraction: Option<&ExtractedInteraction>,
    user_input: &str,
    history: &[SerializableMessage],
) -> BestEffort<String> {
    let parts = extraction.map(acknowledgment_clauses).unwrap_or_default();
    if !parts.is_empty() {
        return BestEffort::Value(parts.join(" "));
    }

    let prompt = format!(
        r#"You are a helpful AI assistant for a healthcare sales representative.
        The user is trying to log an interaction.
        User's current message: "{user_input}"
        Previous conversation:
        {history}

        Respond naturally and helpfully. If the user's input seems like a command or data for logging,
        acknowledge it. If it's a question, answer it.
        Keep your responses concise and focused on completing the interaction log.
        "#,
        history = render_history(history)
    );

    match model.generate(&prompt).await {
        Ok(reply) if !reply.trim().is_empty() => BestEffort::Value(reply.trim().to_string()),
        Ok(_) => {
            error!("Conversational model returned an empty reply");
            BestEffort::degraded(CONVERSATION_FAILED_REPLY.to_string(), "empty reply")
        }
        Err(e) => {
            error!(error = %e, "Error during conversational LLM call");
            BestEffort::degraded(CONVERSATION_FAILED_REPLY.to_string(), e.to_string())
        }
    }
}

/// Terminal stage of a successful extraction: acknowledges what was understood
pub struct ComposeResponseTask {
    model: Arc<dyn LanguageModel>,
}

impl ComposeResponseTask {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Task for ComposeResponseTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        info!(task_id = %self.id(), "Composing response");

        let user_input: String = context
            .get(session_keys::USER_INPUT)
            .await
            .ok_or_else(|| GraphError::ContextError("user_input not found".to_string()))?;
        let extracted: Option<ExtractedInteraction> =
            context.get(session_keys::EXTRACTED_DATA).await;
        let history = context.get_all_messages().await;

        let reply = compose_reply(
            self.model.as_ref(),
            extracted.as_ref(),
            &user_input,
            &history,
        )
        .await;
        let text = reply.get().clone();

        info!(reply_length = text.len(), degraded = reply.is_degraded(), "AI response composed");

        context.add_user_message(user_input).await;
        context.add_assistant_message(text.clone()).await;
        context.set(session_keys::REPLY, &reply).await;

        Ok(TaskResult::new_with_status(
            Some(text),
            NextAction::End,
            Some("Turn complete".to_string()),
        ))
    }
}
