use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use turn_flow::{MessageRole, SerializableMessage};

/// Field descriptions handed to the model to guide extraction
const FIELD_DESCRIPTIONS: &[(&str, &str)] = &[
    ("hcpName", "Name of the Healthcare Professional."),
    (
        "interactionDate",
        "Date of interaction, ideally YYYY-MM-DD. If not specified, use today.",
    ),
    (
        "interactionType",
        "Type of interaction (e.g., Detail, Follow-up, Meeting).",
    ),
    ("productsDiscussed", "List of products discussed."),
    ("keyDiscussionPoints", "Key points from the discussion."),
    ("followUpActions", "Any follow-up actions required."),
    (
        "sentiment",
        "Overall sentiment of the HCP (e.g., positive, neutral, negative).",
    ),
    (
        "unclear_details",
        "Any details that are unclear from the conversation and require clarification from the user.",
    ),
];

/// Structured fields extracted from one conversational turn
///
/// Every field is independently optional; an entirely empty value is a valid
/// extraction for a turn that carries nothing loggable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedInteraction {
    pub hcp_name: Option<String>,
    pub interaction_date: Option<String>,
    pub interaction_type: Option<String>,
    pub products_discussed: Option<Vec<String>>,
    pub key_discussion_points: Option<String>,
    pub follow_up_actions: Option<String>,
    pub sentiment: Option<String>,
    #[serde(rename = "unclear_details")]
    pub unclear_details: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ExtractedInteraction {
    /// JSON schema describing the extraction object
    pub fn json_schema() -> Value {
        let mut properties = Map::new();
        for (name, description) in FIELD_DESCRIPTIONS {
            let property = if *name == "productsDiscussed" {
                json!({
                    "type": ["array", "null"],
                    "items": { "type": "string" },
                    "description": description,
                })
            } else {
                json!({ "type": ["string", "null"], "description": description })
            };
            properties.insert((*name).to_string(), property);
        }

        json!({
            "title": "ExtractedInteraction",
            "type": "object",
            "properties": properties,
            "required": [],
        })
    }

    /// Trim every value and drop blanks, so a present field is always a populated one
    pub fn normalized(self) -> Self {
        let products = self
            .products_discussed
            .map(|products| {
                products
                    .into_iter()
                    .filter_map(|p| clean(Some(p)))
                    .collect::<Vec<_>>()
            })
            .filter(|products| !products.is_empty());

        Self {
            hcp_name: clean(self.hcp_name),
            interaction_date: clean(self.interaction_date),
            interaction_type: clean(self.interaction_type),
            products_discussed: products,
            key_discussion_points: clean(self.key_discussion_points),
            follow_up_actions: clean(self.follow_up_actions),
            sentiment: clean(self.sentiment),
            unclear_details: clean(self.unclear_details),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Wire names of the populated fields, for logging
    pub fn populated_fields(&self) -> Vec<&'static str> {
        let flags = [
            self.hcp_name.is_some(),
            self.interaction_date.is_some(),
            self.interaction_type.is_some(),
            self.products_discussed.is_some(),
            self.key_discussion_points.is_some(),
            self.follow_up_actions.is_some(),
            self.sentiment.is_some(),
            self.unclear_details.is_some(),
        ];
        FIELD_DESCRIPTIONS
            .iter()
            .zip(flags)
            .filter(|(_, present)| *present)
            .map(|((name, _), _)| *name)
            .collect()
    }

    /// Products joined for display and storage, order preserved
    pub fn products_joined(&self) -> Option<String> {
        self.products_discussed
            .as_ref()
            .filter(|products| !products.is_empty())
            .map(|products| products.join(", "))
    }
}

/// Extraction as rendered in chat responses
///
/// `productsDiscussed` is flattened to a comma-joined string for compatibility
/// with existing clients; a product name containing a comma cannot be told
/// apart from two products once joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDataView {
    pub hcp_name: Option<String>,
    pub interaction_date: Option<String>,
    pub interaction_type: Option<String>,
    pub products_discussed: Option<String>,
    pub key_discussion_points: Option<String>,
    pub follow_up_actions: Option<String>,
    pub sentiment: Option<String>,
    #[serde(rename = "unclear_details")]
    pub unclear_details: Option<String>,
}

impl From<&ExtractedInteraction> for ExtractedDataView {
    fn from(data: &ExtractedInteraction) -> Self {
        Self {
            hcp_name: data.hcp_name.clone(),
            interaction_date: data.interaction_date.clone(),
            interaction_type: data.interaction_type.clone(),
            products_discussed: data.products_joined(),
            key_discussion_points: data.key_discussion_points.clone(),
            follow_up_actions: data.follow_up_actions.clone(),
            sentiment: data.sentiment.clone(),
            unclear_details: data.unclear_details.clone(),
        }
    }
}

/// Author of a history entry as sent by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    #[serde(alias = "human")]
    User,
    #[serde(alias = "ai")]
    Assistant,
}

impl From<ChatRole> for MessageRole {
    fn from(role: ChatRole) -> Self {
        match role {
            ChatRole::User => MessageRole::User,
            ChatRole::Assistant => MessageRole::Assistant,
        }
    }
}

impl From<MessageRole> for ChatRole {
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => ChatRole::User,
            MessageRole::Assistant => ChatRole::Assistant,
        }
    }
}

/// One history entry; older clients send `sender`/`type` and `text`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(alias = "sender", alias = "type")]
    pub role: ChatRole,
    #[serde(alias = "text")]
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for SerializableMessage {
    fn from(message: &ChatMessage) -> Self {
        SerializableMessage::new(message.role.into(), message.content.clone())
    }
}

impl From<SerializableMessage> for ChatMessage {
    fn from(message: SerializableMessage) -> Self {
        Self {
            role: message.role.into(),
            content: message.content,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
    pub extracted_data: Option<ExtractedDataView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_interaction_id: Option<i64>,
}

/// Which intake path produced a record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionSource {
    #[default]
    Structured,
    ChatAi,
}

impl InteractionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionSource::Structured => "structured",
            InteractionSource::ChatAi => "chat_ai",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "structured" => Some(InteractionSource::Structured),
            "chat_ai" => Some(InteractionSource::ChatAi),
            _ => None,
        }
    }
}

/// A record ready to be written to the interaction store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistableInteraction {
    pub hcp_name: String,
    pub interaction_date: NaiveDate,
    pub interaction_type: String,
    pub products_discussed: Option<String>,
    pub key_discussion_points: Option<String>,
    pub follow_up_actions: Option<String>,
    pub source: InteractionSource,
}

/// Structured-form submission
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionCreate {
    pub hcp_name: String,
    pub interaction_date: NaiveDate,
    pub interaction_type: String,
    #[serde(default)]
    pub products_discussed: Option<String>,
    #[serde(default)]
    pub key_discussion_points: Option<String>,
    #[serde(default)]
    pub follow_up_actions: Option<String>,
    #[serde(default)]
    pub source: InteractionSource,
}

impl From<InteractionCreate> for PersistableInteraction {
    fn from(form: InteractionCreate) -> Self {
        Self {
            hcp_name: form.hcp_name.trim().to_string(),
            interaction_date: form.interaction_date,
            interaction_type: form.interaction_type,
            products_discussed: form.products_discussed,
            key_discussion_points: form.key_discussion_points,
            follow_up_actions: form.follow_up_actions,
            source: form.source,
        }
    }
}

/// A stored interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub id: i64,
    #[serde(flatten)]
    pub interaction: PersistableInteraction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListInteractionsQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_uses_wire_field_names() {
        let data: ExtractedInteraction = serde_json::from_value(json!({
            "hcpName": "Dr. Smith",
            "productsDiscussed": ["ProductA"],
            "unclear_details": "Which date?"
        }))
        .unwrap();

        assert_eq!(data.hcp_name.as_deref(), Some("Dr. Smith"));
        assert_eq!(data.unclear_details.as_deref(), Some("Which date?"));
        assert!(data.interaction_date.is_none());
        assert_eq!(
            data.populated_fields(),
            vec!["hcpName", "productsDiscussed", "unclear_details"]
        );
    }

    #[test]
    fn test_empty_object_is_valid_extraction() {
        let data: ExtractedInteraction = serde_json::from_str("{}").unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_normalized_drops_blanks() {
        let data = ExtractedInteraction {
            hcp_name: Some("  Dr. Lee ".to_string()),
            interaction_date: Some("   ".to_string()),
            products_discussed: Some(vec![" ".to_string()]),
            unclear_details: Some(String::new()),
            ..Default::default()
        }
        .normalized();

        assert_eq!(data.hcp_name.as_deref(), Some("Dr. Lee"));
        assert!(data.interaction_date.is_none());
        assert!(data.products_discussed.is_none());
        assert!(data.unclear_details.is_none());
    }

    #[test]
    fn test_products_join_in_view() {
        let data = ExtractedInteraction {
            products_discussed: Some(vec!["ProductA".to_string(), "ProductB".to_string()]),
            ..Default::default()
        };
        let view = ExtractedDataView::from(&data);
        assert_eq!(view.products_discussed.as_deref(), Some("ProductA, ProductB"));

        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(value["productsDiscussed"], "ProductA, ProductB");
        // absent fields are rendered as null, not omitted
        assert!(value["hcpName"].is_null());
        assert!(value.as_object().unwrap().contains_key("unclear_details"));
    }

    #[test]
    fn test_schema_lists_every_field() {
        let schema = ExtractedInteraction::json_schema();
        let properties = schema["properties"].as_object().unwrap();
        assert_eq!(properties.len(), 8);
        assert_eq!(properties["productsDiscussed"]["items"]["type"], "string");
        assert!(
            properties["interactionDate"]["description"]
                .as_str()
                .unwrap()
                .contains("today")
        );
    }

    #[test]
    fn test_history_accepts_legacy_shapes() {
        let history: Vec<ChatMessage> = serde_json::from_value(json!([
            { "role": "user", "content": "Met Dr. Smith" },
            { "sender": "ai", "text": "Noted.", "extractedData": null },
            { "type": "human", "content": "Also ProductA" }
        ]))
        .unwrap();

        assert_eq!(history[0], ChatMessage::user("Met Dr. Smith"));
        assert_eq!(history[1], ChatMessage::assistant("Noted."));
        assert_eq!(history[2].role, ChatRole::User);

        let bad = serde_json::from_value::<ChatMessage>(json!({ "role": "robot", "content": "x" }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_interaction_create_defaults_to_structured() {
        let form: InteractionCreate = serde_json::from_value(json!({
            "hcpName": "Dr. Jane Doe",
            "interactionDate": "2024-12-01",
            "interactionType": "detail"
        }))
        .unwrap();
        assert_eq!(form.source, InteractionSource::Structured);

        let record = InteractionRecord {
            id: 7,
            interaction: form.into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["hcpName"], "Dr. Jane Doe");
        assert_eq!(value["interactionDate"], "2024-12-01");
        assert_eq!(value["source"], "structured");
    }
}
