//! Language-model capability used by the pipeline.
//!
//! The pipeline only needs two things from a model: free text for a prompt,
//! and a best-effort JSON object for a prompt plus a schema. Both fail with a
//! single [`InferenceError`] that callers absorb at the call site.

use async_trait::async_trait;
use rig::{completion::Prompt, prelude::*, providers::openrouter};
use serde_json::Value;
use std::future::IntoFuture;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::ModelConfig;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model request failed: {0}")]
    Request(String),

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("model output violates the schema: {0}")]
    SchemaViolation(String),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Free-text completion for a prompt
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError>;

    /// Best-effort JSON object conforming to `schema`
    async fn extract(&self, prompt: &str, schema: &Value) -> Result<Value, InferenceError>;
}

const EXTRACTION_PREAMBLE: &str = r#"You extract structured data from text.
Respond with ONLY a single JSON object that conforms to the JSON schema you are given.
Use null for any field you cannot fill. Never include explanatory text, Markdown or code fences."#;

/// OpenRouter-hosted chat model with a fixed per-call timeout
#[derive(Clone)]
pub struct OpenRouterModel {
    client: openrouter::Client,
    model: String,
    temperature: f64,
    timeout: Duration,
}

impl OpenRouterModel {
    pub fn new(api_key: &str, model: impl Into<String>, temperature: f64, timeout: Duration) -> Self {
        Self {
            client: openrouter::Client::new(api_key),
            model: model.into(),
            temperature,
            timeout,
        }
    }

    /// Model used for extraction and open-ended replies
    pub fn extraction(config: &ModelConfig) -> Self {
        Self::new(
            &config.api_key,
            config.extraction_model.clone(),
            config.extraction_temperature,
            config.timeout,
        )
    }

    /// Model used for context summaries
    pub fn summary(config: &ModelConfig) -> Self {
        Self::new(
            &config.api_key,
            config.summary_model.clone(),
            config.summary_temperature,
            config.timeout,
        )
    }

    async fn prompt_with_preamble(
        &self,
        preamble: Option<&str>,
        prompt: &str,
    ) -> Result<String, InferenceError> {
        let mut builder = self.client.agent(&self.model).temperature(self.temperature);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        let agent = builder.build();

        debug!(model = %self.model, prompt_length = prompt.len(), "Calling model");

        with_timeout(self.timeout, agent.prompt(prompt)).await
    }
}

/// Bound a model call by `limit`; expiry is `Timeout`, any call error is `Request`
pub(crate) async fn with_timeout<F, T, E>(limit: Duration, call: F) -> Result<T, InferenceError>
where
    F: IntoFuture<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| InferenceError::Timeout(limit))?
        .map_err(|e| InferenceError::Request(e.to_string()))
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
        self.prompt_with_preamble(None, prompt).await
    }

    async fn extract(&self, prompt: &str, schema: &Value) -> Result<Value, InferenceError> {
        let prompt = format!("{prompt}\n\nJSON schema:\n{schema}");
        let raw = self
            .prompt_with_preamble(Some(EXTRACTION_PREAMBLE), &prompt)
            .await?;
        parse_json_object(&raw)
    }
}

/// Parse a JSON object out of a model response, tolerating code fences and
/// prose around the object
pub fn parse_json_object(raw: &str) -> Result<Value, InferenceError> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed)
        .trim();

    let candidate = match serde_json::from_str::<Value>(unfenced) {
        Ok(value) => value,
        Err(first_error) => {
            let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) else {
                return Err(InferenceError::MalformedOutput(first_error.to_string()));
            };
            if end < start {
                return Err(InferenceError::MalformedOutput(first_error.to_string()));
            }
            serde_json::from_str::<Value>(&unfenced[start..=end])
                .map_err(|e| InferenceError::MalformedOutput(e.to_string()))?
        }
    };

    if candidate.is_object() {
        Ok(candidate)
    } else {
        Err(InferenceError::SchemaViolation(format!(
            "expected a JSON object, got {candidate}"
        )))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted model double with call counters.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct ScriptedModel {
        generate_responses: Mutex<VecDeque<Result<String, InferenceError>>>,
        extract_responses: Mutex<VecDeque<Result<Value, InferenceError>>>,
        generate_calls: AtomicUsize,
        extract_calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_generate(self, response: Result<String, InferenceError>) -> Self {
            self.generate_responses.lock().unwrap().push_back(response);
            self
        }

        pub fn with_extract(self, response: Result<Value, InferenceError>) -> Self {
            self.extract_responses.lock().unwrap().push_back(response);
            self
        }

        pub fn generate_calls(&self) -> usize {
            self.generate_calls.load(Ordering::SeqCst)
        }

        pub fn extract_calls(&self) -> usize {
            self.extract_calls.load(Ordering::SeqCst)
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, prompt: &str) -> Result<String, InferenceError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.generate_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(InferenceError::Request("no scripted response".into())))
        }

        async fn extract(&self, prompt: &str, _schema: &Value) -> Result<Value, InferenceError> {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.extract_responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(InferenceError::Request("no scripted response".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_times_out() {
        let limit = Duration::from_secs(30);
        let err = with_timeout(limit, std::future::pending::<Result<String, InferenceError>>())
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Timeout(d) if d == limit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_errors_and_replies_pass_through() {
        let limit = Duration::from_secs(30);
        let err = with_timeout(limit, async { Err::<String, _>("rate limited") })
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Request(ref msg) if msg == "rate limited"));

        let reply = with_timeout(limit, async { Ok::<_, String>("{}".to_string()) })
            .await
            .unwrap();
        assert_eq!(reply, "{}");
    }

    #[test]
    fn test_parse_plain_object() {
        let value = parse_json_object(r#"{"hcpName": "Dr. Smith"}"#).unwrap();
        assert_eq!(value, json!({ "hcpName": "Dr. Smith" }));
    }

    #[test]
    fn test_parse_fenced_object() {
        let raw = "```json\n{\"hcpName\": null, \"sentiment\": \"positive\"}\n```";
        let value = parse_json_object(raw).unwrap();
        assert_eq!(value["sentiment"], "positive");
    }

    #[test]
    fn test_parse_object_wrapped_in_prose() {
        let raw = "Here is the data: {\"hcpName\": \"Dr. Lee\"} Let me know!";
        let value = parse_json_object(raw).unwrap();
        assert_eq!(value["hcpName"], "Dr. Lee");
    }

    #[test]
    fn test_parse_rejects_non_objects() {
        assert!(matches!(
            parse_json_object("I could not find anything."),
            Err(InferenceError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_json_object("[1, 2]"),
            Err(InferenceError::SchemaViolation(_))
        ));
    }
}
