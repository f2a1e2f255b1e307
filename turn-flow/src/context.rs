use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tracing::error;

/// Author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A chat message that can be stored in the context and sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl SerializableMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Context for sharing data between tasks in a graph execution
///
/// Cloning is cheap and every clone sees the same data, so a context created
/// for one execution is shared by all of that execution's tasks and nothing else.
#[derive(Clone, Debug, Default)]
pub struct Context {
    data: Arc<DashMap<String, Value>>,
    chat: Arc<RwLock<Vec<SerializableMessage>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Serialize) {
        self.set_sync(key, value);
    }

    pub fn set_sync(&self, key: impl Into<String>, value: impl Serialize) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.data.insert(key, value);
            }
            Err(e) => error!(key = %key, error = %e, "Failed to serialize context value"),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_sync(key)
    }

    /// Synchronous read, usable from edge conditions
    pub fn get_sync<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub async fn remove(&self, key: &str) -> Option<Value> {
        self.data.remove(key).map(|(_, v)| v)
    }

    pub async fn add_user_message(&self, content: impl Into<String>) {
        self.add_message(SerializableMessage::user(content)).await;
    }

    pub async fn add_assistant_message(&self, content: impl Into<String>) {
        self.add_message(SerializableMessage::assistant(content)).await;
    }

    pub async fn add_message(&self, message: SerializableMessage) {
        match self.chat.write() {
            Ok(mut messages) => messages.push(message),
            Err(_) => error!("Chat history lock poisoned, message dropped"),
        }
    }

    pub async fn get_all_messages(&self) -> Vec<SerializableMessage> {
        self.chat
            .read()
            .map(|messages| messages.to_vec())
            .unwrap_or_default()
    }

    /// The last `n` messages, oldest first
    pub async fn get_last_messages(&self, n: usize) -> Vec<SerializableMessage> {
        self.chat
            .read()
            .map(|messages| {
                let start = messages.len().saturating_sub(n);
                messages[start..].to_vec()
            })
            .unwrap_or_default()
    }

    pub async fn message_count(&self) -> usize {
        self.chat.read().map(|messages| messages.len()).unwrap_or(0)
    }
}
