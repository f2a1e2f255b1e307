//! The conversational turn: graph construction and the orchestrator that runs
//! one graph execution per user message.

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::{error, info};
use turn_flow::{Context, Graph, GraphBuilder, Task};

use crate::config::TurnConfig;
use crate::llm::LanguageModel;
use crate::models::{ChatMessage, ExtractedInteraction, PersistableInteraction};
use crate::tasks::types::EXTRACTION_FAILED_REPLY;
use crate::tasks::{
    BestEffort, ComposeResponseTask, ContextSummaryTask, ExtractDetailsTask, ExtractionFailedTask,
    session_keys,
};

/// Model handles used by the pipeline
#[derive(Clone)]
pub struct ModelClients {
    /// Extraction and open-ended replies
    pub conversation: Arc<dyn LanguageModel>,
    /// Context summaries
    pub summary: Arc<dyn LanguageModel>,
}

/// One user message plus the history the client has so far
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub message: String,
    pub history: Vec<ChatMessage>,
    /// Fallback for an unspecified interaction date
    pub today: NaiveDate,
}

impl TurnInput {
    pub fn new(message: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            message: message.into(),
            history,
            today: Local::now().date_naive(),
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }
}

/// Side effects a turn asks its caller to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEffect {
    PersistInteraction(PersistableInteraction),
    /// A named interaction that cannot be stored as stated
    RejectInteraction { hcp_name: String, reason: String },
}

fn persist_effect(data: &ExtractedInteraction, today: NaiveDate) -> Option<TurnEffect> {
    match PersistableInteraction::from_extraction(data, today) {
        Ok(record) => record.map(TurnEffect::PersistInteraction),
        Err(e) => Some(TurnEffect::RejectInteraction {
            hcp_name: data.hcp_name.clone().unwrap_or_default(),
            reason: e.to_string(),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutput {
    /// Never empty
    pub reply: String,
    /// `None` when extraction failed
    pub extracted_data: Option<ExtractedInteraction>,
    /// `None` when the summary stage did not run
    pub context_summary: Option<BestEffort<String>>,
    /// Input history followed by this turn's user message and reply
    pub history: Vec<ChatMessage>,
    pub effects: Vec<TurnEffect>,
}

pub fn build_turn_graph(models: &ModelClients, config: &TurnConfig) -> Graph {
    let summary_task = Arc::new(ContextSummaryTask::new(models.summary.clone()));
    let summary_id = summary_task.id().to_string();

    let extract_task = Arc::new(ExtractDetailsTask::new(
        models.conversation.clone(),
        config.history_window,
    ));
    let extract_id = extract_task.id().to_string();

    let compose_task = Arc::new(ComposeResponseTask::new(models.conversation.clone()));
    let compose_id = compose_task.id().to_string();

    let failed_task = Arc::new(ExtractionFailedTask);
    let failed_id = failed_task.id().to_string();

    let mut builder = GraphBuilder::new("hcp_interaction_turn");
    if config.summarize_context {
        builder = builder
            .add_task(summary_task)
            .add_edge(&summary_id, &extract_id);
    }

    builder
        .add_task(extract_task)
        .add_task(compose_task)
        .add_task(failed_task)
        .add_conditional_edge(
            extract_id,
            |context| context.contains_key(session_keys::EXTRACTED_DATA),
            compose_id,
            failed_id,
        )
        .build()
}

/// Runs conversational turns; shared between concurrent requests
pub struct TurnOrchestrator {
    graph: Arc<Graph>,
}

impl TurnOrchestrator {
    pub fn new(models: ModelClients, config: TurnConfig) -> Self {
        Self {
            graph: Arc::new(build_turn_graph(&models, &config)),
        }
    }

    /// Run one turn; always produces a reply
    pub async fn run_turn(&self, input: TurnInput) -> TurnOutput {
        info!(
            message_length = input.message.len(),
            history_length = input.history.len(),
            "Processing chat message"
        );

        let context = Context::new();
        for message in &input.history {
            context.add_message(message.into()).await;
        }
        context.set(session_keys::USER_INPUT, &input.message).await;
        context.set(session_keys::TODAY, input.today).await;

        let reply = match self.graph.execute(context.clone()).await {
            Ok(result) => result.response.filter(|reply| !reply.trim().is_empty()),
            Err(e) => {
                error!(error = %e, "Turn execution failed");
                None
            }
        };

        let (reply, extracted_data) = match reply {
            Some(reply) => (
                reply,
                context
                    .get::<ExtractedInteraction>(session_keys::EXTRACTED_DATA)
                    .await,
            ),
            None => {
                if context.message_count().await == input.history.len() {
                    context.add_user_message(input.message.clone()).await;
                    context.add_assistant_message(EXTRACTION_FAILED_REPLY).await;
                }
                (EXTRACTION_FAILED_REPLY.to_string(), None)
            }
        };

        let effects = extracted_data
            .as_ref()
            .and_then(|data| persist_effect(data, input.today))
            .into_iter()
            .collect();

        let output = TurnOutput {
            reply,
            extracted_data,
            context_summary: context.get(session_keys::CONTEXT_SUMMARY).await,
            history: context
                .get_all_messages()
                .await
                .into_iter()
                .map(ChatMessage::from)
                .collect(),
            effects,
        };

        info!(
            reply = %output.reply,
            extracted = output.extracted_data.is_some(),
            effects = output.effects.len(),
            "Turn complete"
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{InferenceError, testing::ScriptedModel};
    use crate::models::InteractionSource;
    use crate::tasks::compose_response::{INVITE_MORE, NEUTRAL_ACK};
    use crate::tasks::types::{NO_PRIOR_CONTEXT, SUMMARY_FAILED};
    use serde_json::json;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 14).unwrap()
    }

    fn orchestrator(
        conversation: &Arc<ScriptedModel>,
        summary: &Arc<ScriptedModel>,
        summarize_context: bool,
    ) -> TurnOrchestrator {
        TurnOrchestrator::new(
            ModelClients {
                conversation: conversation.clone(),
                summary: summary.clone(),
            },
            TurnConfig {
                summarize_context,
                history_window: 20,
            },
        )
    }

    fn long_history() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("Logged a meeting with Dr. Smith yesterday about ProductA."),
            ChatMessage::assistant("Okay, I've noted HCP: Dr. Smith."),
            ChatMessage::user("What about follow up actions?"),
        ]
    }

    #[tokio::test]
    async fn test_hcp_only_turn() {
        let conversation =
            Arc::new(ScriptedModel::new().with_extract(Ok(json!({ "hcpName": "Dr. Smith" }))));
        let summary = Arc::new(ScriptedModel::new());
        let output = orchestrator(&conversation, &summary, true)
            .run_turn(TurnInput::new("Met Dr. Smith", vec![]).with_today(today()))
            .await;

        assert!(output.reply.contains("Okay, I've noted HCP: Dr. Smith."));
        assert!(output.reply.contains(INVITE_MORE));
        assert!(!output.reply.contains("clarification"));
        assert_eq!(
            output.context_summary,
            Some(BestEffort::Value(NO_PRIOR_CONTEXT.to_string()))
        );
        assert_eq!(summary.generate_calls(), 0);
        assert_eq!(conversation.generate_calls(), 0);

        assert_eq!(output.history.len(), 2);
        assert_eq!(output.history[0], ChatMessage::user("Met Dr. Smith"));
        assert_eq!(output.history[1], ChatMessage::assistant(output.reply.clone()));
    }

    #[tokio::test]
    async fn test_extraction_failure_skips_composer() {
        let conversation = Arc::new(
            ScriptedModel::new().with_extract(Err(InferenceError::Request("rate limited".into()))),
        );
        let summary = Arc::new(ScriptedModel::new());
        let output = orchestrator(&conversation, &summary, true)
            .run_turn(TurnInput::new("Met Dr. Smith", vec![]).with_today(today()))
            .await;

        assert!(output.extracted_data.is_none());
        assert_eq!(output.reply, EXTRACTION_FAILED_REPLY);
        assert!(output.reply.contains("rephrase"));
        assert!(output.effects.is_empty());
        // the composer's only model use is the fallback call
        assert_eq!(conversation.generate_calls(), 0);
        assert_eq!(output.history.len(), 2);
    }

    #[tokio::test]
    async fn test_unclear_details_reach_reply() {
        let conversation = Arc::new(ScriptedModel::new().with_extract(Ok(json!({
            "hcpName": "Dr. Smith",
            "interactionDate": "2024-05-13",
            "productsDiscussed": ["ProductA"],
            "keyDiscussionPoints": "dosage",
            "followUpActions": "send study",
            "unclear_details": "which ProductA formulation"
        }))));
        let summary = Arc::new(ScriptedModel::new());
        let output = orchestrator(&conversation, &summary, false)
            .run_turn(TurnInput::new("...", vec![]).with_today(today()))
            .await;

        assert!(output.reply.contains("which ProductA formulation"));
        assert!(!output.reply.contains(INVITE_MORE));
        assert!(output.context_summary.is_none());
    }

    #[tokio::test]
    async fn test_empty_extraction_is_neutral_and_not_persisted() {
        let conversation = Arc::new(ScriptedModel::new().with_extract(Ok(json!({}))));
        let summary = Arc::new(ScriptedModel::new());
        let output = orchestrator(&conversation, &summary, true)
            .run_turn(TurnInput::new("hello", vec![]).with_today(today()))
            .await;

        assert_eq!(output.reply, NEUTRAL_ACK);
        assert_eq!(output.extracted_data, Some(ExtractedInteraction::default()));
        assert!(output.effects.is_empty());
    }

    #[tokio::test]
    async fn test_summary_grounds_extraction_for_long_history() {
        let conversation = Arc::new(ScriptedModel::new().with_extract(Ok(json!({
            "hcpName": "Dr. Smith",
            "followUpActions": "Send the latest ProductA study results by Friday"
        }))));
        let summary = Arc::new(
            ScriptedModel::new().with_generate(Ok("HCP Dr. Smith, product ProductA.".into())),
        );
        let output = orchestrator(&conversation, &summary, true)
            .run_turn(
                TurnInput::new("Need to send him the study by Friday", long_history())
                    .with_today(today()),
            )
            .await;

        assert_eq!(summary.generate_calls(), 1);
        assert_eq!(conversation.extract_calls(), 1);
        let extraction_prompt = &conversation.prompts()[0];
        assert!(extraction_prompt.contains("HCP Dr. Smith, product ProductA."));
        assert!(extraction_prompt.contains("user: What about follow up actions?"));
        assert!(output.reply.contains("And the follow-up actions."));
        assert_eq!(output.history.len(), 5);
    }

    #[tokio::test]
    async fn test_summary_failure_does_not_block_turn() {
        let conversation =
            Arc::new(ScriptedModel::new().with_extract(Ok(json!({ "hcpName": "Dr. Smith" }))));
        let summary =
            Arc::new(ScriptedModel::new().with_generate(Err(InferenceError::Request("down".into()))));
        let output = orchestrator(&conversation, &summary, true)
            .run_turn(TurnInput::new("Dr. Smith again", long_history()).with_today(today()))
            .await;

        let context_summary = output.context_summary.unwrap();
        assert!(context_summary.is_degraded());
        assert_eq!(context_summary.get(), SUMMARY_FAILED);
        assert!(conversation.prompts()[0].contains(SUMMARY_FAILED));
        assert!(output.reply.starts_with("Okay, I've noted HCP: Dr. Smith."));
    }

    #[tokio::test]
    async fn test_named_extraction_requests_persistence_with_defaults() {
        let conversation = Arc::new(ScriptedModel::new().with_extract(Ok(json!({
            "hcpName": "Dr. Smith",
            "productsDiscussed": ["ProductA", "ProductB"]
        }))));
        let summary = Arc::new(ScriptedModel::new());
        let output = orchestrator(&conversation, &summary, true)
            .run_turn(TurnInput::new("Met Dr. Smith", vec![]).with_today(today()))
            .await;

        let [TurnEffect::PersistInteraction(record)] = output.effects.as_slice() else {
            panic!("expected one persist effect, got {:?}", output.effects);
        };
        assert_eq!(record.hcp_name, "Dr. Smith");
        assert_eq!(record.interaction_date, today());
        assert_eq!(record.interaction_type, "chat_derived");
        assert_eq!(record.products_discussed.as_deref(), Some("ProductA, ProductB"));
        assert_eq!(record.source, InteractionSource::ChatAi);
    }

    #[tokio::test]
    async fn test_stated_date_is_kept_or_rejected() {
        let conversation = Arc::new(
            ScriptedModel::new()
                .with_extract(Ok(json!({ "hcpName": "Dr. Smith", "interactionDate": "May 13, 2024" })))
                .with_extract(Ok(json!({ "hcpName": "Dr. Smith", "interactionDate": "last Tuesday" }))),
        );
        let summary = Arc::new(ScriptedModel::new());
        let orchestrator = orchestrator(&conversation, &summary, false);

        let output = orchestrator
            .run_turn(TurnInput::new("Met Dr. Smith on May 13", vec![]).with_today(today()))
            .await;
        assert!(output.reply.contains("Date: May 13, 2024."));
        let [TurnEffect::PersistInteraction(record)] = output.effects.as_slice() else {
            panic!("expected one persist effect, got {:?}", output.effects);
        };
        assert_eq!(
            record.interaction_date,
            NaiveDate::from_ymd_opt(2024, 5, 13).unwrap()
        );

        let output = orchestrator
            .run_turn(TurnInput::new("Met Dr. Smith last Tuesday", vec![]).with_today(today()))
            .await;
        assert!(matches!(
            output.effects.as_slice(),
            [TurnEffect::RejectInteraction { hcp_name, .. }] if hcp_name == "Dr. Smith"
        ));
    }

    #[tokio::test]
    async fn test_reply_never_empty() {
        let inputs = [
            Ok(json!({})),
            Ok(json!({ "unclear_details": "everything" })),
            Ok(json!({ "sentiment": "positive" })),
            Ok(json!("not an object")),
            Err(InferenceError::Timeout(std::time::Duration::from_secs(30))),
        ];
        for extract in inputs {
            let conversation = Arc::new(ScriptedModel::new().with_extract(extract));
            let summary = Arc::new(ScriptedModel::new());
            let output = orchestrator(&conversation, &summary, true)
                .run_turn(TurnInput::new("", vec![]).with_today(today()))
                .await;
            assert!(!output.reply.trim().is_empty());
        }
    }
}
