use serde::{Deserialize, Serialize};
use turn_flow::SerializableMessage;

/// Keys of the per-turn state held in the graph context
pub mod session_keys {
    pub const USER_INPUT: &str = "user_input";
    /// Calendar date the turn runs on, `NaiveDate`
    pub const TODAY: &str = "today";
    /// `BestEffort<String>` from the summary stage
    pub const CONTEXT_SUMMARY: &str = "context_summary";
    /// `ExtractedInteraction`, present only after a successful extraction
    pub const EXTRACTED_DATA: &str = "extracted_data";
    /// Error text of a failed extraction
    pub const EXTRACTION_ERROR: &str = "extraction_error";
    /// `BestEffort<String>` reply of the terminal task
    pub const REPLY: &str = "reply";
}

pub const NO_PRIOR_CONTEXT: &str = "No extensive prior context.";
pub const SUMMARY_FAILED: &str = "Error in generating context summary.";
pub const NO_PRIOR_SUMMARY: &str = "No prior summary.";
pub const EXTRACTION_FAILED_REPLY: &str =
    "I had trouble processing that. Could you please rephrase or provide more details?";
pub const CONVERSATION_FAILED_REPLY: &str = "I encountered an issue. Please try again.";

/// Histories shorter than this are not worth summarizing
pub const MIN_SUMMARY_HISTORY: usize = 3;

/// One `role: content` line per message, oldest first
pub fn render_history(messages: &[SerializableMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Outcome of a stage that must never abort the turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum BestEffort<T> {
    Value(T),
    /// The stage failed and `fallback` stands in for its result
    Degraded { fallback: T, reason: String },
}

impl<T> BestEffort<T> {
    pub fn degraded(fallback: T, reason: impl Into<String>) -> Self {
        BestEffort::Degraded {
            fallback,
            reason: reason.into(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, BestEffort::Degraded { .. })
    }

    pub fn get(&self) -> &T {
        match self {
            BestEffort::Value(value) => value,
            BestEffort::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            BestEffort::Value(value) => value,
            BestEffort::Degraded { fallback, .. } => fallback,
        }
    }
}
