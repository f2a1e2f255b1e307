use async_trait::async_trait;
use tracing::warn;
use turn_flow::{Context, NextAction, Result, Task, TaskResult};

use super::types::{BestEffort, EXTRACTION_FAILED_REPLY, session_keys};

/// Terminal stage when extraction failed: apologizes and invites a retry
pub struct ExtractionFailedTask;

#[async_trait]
impl Task for ExtractionFailedTask {
    async fn run(&self, context: Context) -> Result<TaskResult> {
        let reason: String = context
            .get(session_keys::EXTRACTION_ERROR)
            .await
            .unwrap_or_else(|| "unknown extraction error".to_string());
        warn!(task_id = %self.id(), reason = %reason, "Replying with extraction apology");

        if let Some(user_input) = context.get::<String>(session_keys::USER_INPUT).await {
            context.add_user_message(user_input).await;
        }
        context.add_assistant_message(EXTRACTION_FAILED_REPLY).await;
        context
            .set(
                session_keys::REPLY,
                BestEffort::degraded(EXTRACTION_FAILED_REPLY.to_string(), reason),
            )
            .await;

        Ok(TaskResult::new_with_status(
            Some(EXTRACTION_FAILED_REPLY.to_string()),
            NextAction::End,
            Some("Extraction failed - asked the user to rephrase".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apology_ends_turn() {
        let context = Context::new();
        context.set(session_keys::USER_INPUT, "???").await;
        context
            .set(session_keys::EXTRACTION_ERROR, "model call timed out")
            .await;

        let result = ExtractionFailedTask.run(context.clone()).await.unwrap();

        assert_eq!(result.next_action, NextAction::End);
        assert_eq!(result.response.as_deref(), Some(EXTRACTION_FAILED_REPLY));
        let reply: BestEffort<String> = context.get(session_keys::REPLY).await.unwrap();
        assert_eq!(
            reply,
            BestEffort::degraded(
                EXTRACTION_FAILED_REPLY.to_string(),
                "model call timed out"
            )
        );
        assert_eq!(context.message_count().await, 2);
    }
}
