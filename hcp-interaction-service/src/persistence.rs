//! Interaction storage and the bridge that carries out a turn's persist effects.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use dashmap::DashMap;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::{
    ChatResponse, ExtractedDataView, ExtractedInteraction, InteractionRecord, InteractionSource,
    PersistableInteraction,
};
use crate::workflow::{TurnEffect, TurnOutput};

pub const CHAT_INTERACTION_TYPE: &str = "chat_derived";
const SAVE_FAILED_NOTICE: &str = " (There was an issue saving this interaction to the database.)";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid interaction: {0}")]
    Invalid(String),
}

/// Formats accepted for a date the user stated in chat
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%m/%d/%Y",
];

/// Parse a stated interaction date; `None` when no known format matches
pub fn parse_interaction_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|timestamp| timestamp.date_naive())
        })
}

impl PersistableInteraction {
    /// Map a chat extraction to a storable record
    ///
    /// `Ok(None)` without an HCP name. Only an absent date defaults to `today`;
    /// a stated date that cannot be read is an error rather than a guess.
    pub fn from_extraction(
        data: &ExtractedInteraction,
        today: NaiveDate,
    ) -> Result<Option<Self>, StoreError> {
        let Some(hcp_name) = data
            .hcp_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        else {
            return Ok(None);
        };

        let interaction_date = match data.interaction_date.as_deref() {
            None => today,
            Some(raw) => parse_interaction_date(raw).ok_or_else(|| {
                StoreError::Invalid(format!("unrecognized interactionDate '{raw}'"))
            })?,
        };

        Ok(Some(Self {
            hcp_name: hcp_name.to_string(),
            interaction_date,
            interaction_type: data
                .interaction_type
                .clone()
                .unwrap_or_else(|| CHAT_INTERACTION_TYPE.to_string()),
            products_discussed: data.products_joined(),
            key_discussion_points: data.key_discussion_points.clone(),
            follow_up_actions: data.follow_up_actions.clone(),
            source: InteractionSource::ChatAi,
        }))
    }
}

/// Trait for storing and listing interactions
#[async_trait]
pub trait InteractionStore: Send + Sync {
    async fn create(&self, interaction: PersistableInteraction)
    -> Result<InteractionRecord, StoreError>;
    /// Records in id order, skipping `skip` and returning at most `limit`
    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<InteractionRecord>, StoreError>;
}

fn validate(interaction: &PersistableInteraction) -> Result<(), StoreError> {
    if interaction.hcp_name.trim().is_empty() {
        return Err(StoreError::Invalid("hcpName is required".to_string()));
    }
    Ok(())
}

/// In-memory implementation of InteractionStore
#[derive(Default)]
pub struct InMemoryInteractionStore {
    records: Arc<DashMap<i64, InteractionRecord>>,
    next_id: AtomicI64,
}

impl InMemoryInteractionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InteractionStore for InMemoryInteractionStore {
    async fn create(
        &self,
        interaction: PersistableInteraction,
    ) -> Result<InteractionRecord, StoreError> {
        validate(&interaction)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = InteractionRecord { id, interaction };
        self.records.insert(id, record.clone());
        Ok(record)
    }

    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<InteractionRecord>, StoreError> {
        let mut records: Vec<InteractionRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by_key(|record| record.id);
        Ok(records
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

/// PostgreSQL implementation of InteractionStore
pub struct PostgresInteractionStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct InteractionRow {
    id: i64,
    hcp_name: String,
    interaction_date: NaiveDate,
    interaction_type: String,
    products_discussed: Option<String>,
    key_discussion_points: Option<String>,
    follow_up_actions: Option<String>,
    source: String,
}

impl InteractionRow {
    fn into_record(self) -> Result<InteractionRecord, StoreError> {
        let source = InteractionSource::parse(&self.source)
            .ok_or_else(|| StoreError::Invalid(format!("unknown source '{}'", self.source)))?;
        Ok(InteractionRecord {
            id: self.id,
            interaction: PersistableInteraction {
                hcp_name: self.hcp_name,
                interaction_date: self.interaction_date,
                interaction_type: self.interaction_type,
                products_discussed: self.products_discussed,
                key_discussion_points: self.key_discussion_points,
                follow_up_actions: self.follow_up_actions,
                source,
            },
        })
    }
}

impl PostgresInteractionStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interactions (
                id BIGSERIAL PRIMARY KEY,
                hcp_name TEXT NOT NULL,
                interaction_date DATE NOT NULL,
                interaction_type TEXT NOT NULL,
                products_discussed TEXT,
                key_discussion_points TEXT,
                follow_up_actions TEXT,
                source TEXT NOT NULL DEFAULT 'structured',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_interactions_hcp_name ON interactions (hcp_name)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl InteractionStore for PostgresInteractionStore {
    async fn create(
        &self,
        interaction: PersistableInteraction,
    ) -> Result<InteractionRecord, StoreError> {
        validate(&interaction)?;
        let row: InteractionRow = sqlx::query_as(
            r#"
            INSERT INTO interactions (
                hcp_name, interaction_date, interaction_type, products_discussed,
                key_discussion_points, follow_up_actions, source
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, hcp_name, interaction_date, interaction_type, products_discussed,
                key_discussion_points, follow_up_actions, source
            "#,
        )
        .bind(&interaction.hcp_name)
        .bind(interaction.interaction_date)
        .bind(&interaction.interaction_type)
        .bind(&interaction.products_discussed)
        .bind(&interaction.key_discussion_points)
        .bind(&interaction.follow_up_actions)
        .bind(interaction.source.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.into_record()
    }

    async fn list(&self, skip: i64, limit: i64) -> Result<Vec<InteractionRecord>, StoreError> {
        let rows: Vec<InteractionRow> = sqlx::query_as(
            r#"
            SELECT id, hcp_name, interaction_date, interaction_type, products_discussed,
                key_discussion_points, follow_up_actions, source
            FROM interactions
            ORDER BY id
            OFFSET $1 LIMIT $2
            "#,
        )
        .bind(skip.max(0))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InteractionRow::into_record).collect()
    }
}

/// Execute a turn's effects and build the chat response
///
/// Storage failures only change the reply text.
pub async fn apply_turn_effects(store: &dyn InteractionStore, output: TurnOutput) -> ChatResponse {
    let mut reply = output.reply;
    let mut saved_interaction_id = None;

    for effect in output.effects {
        match effect {
            TurnEffect::PersistInteraction(interaction) => {
                match store.create(interaction).await {
                    Ok(record) => {
                        info!(
                            interaction_id = record.id,
                            hcp_name = %record.interaction.hcp_name,
                            "Interaction logged from chat"
                        );
                        reply.push_str(&format!(
                            " (Interaction details for {} logged with ID: {})",
                            record.interaction.hcp_name, record.id
                        ));
                        saved_interaction_id = Some(record.id);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to save interaction from chat");
                        reply.push_str(SAVE_FAILED_NOTICE);
                    }
                }
            }
            TurnEffect::RejectInteraction { hcp_name, reason } => {
                warn!(hcp_name = %hcp_name, reason = %reason, "Interaction from chat not saved");
                reply.push_str(SAVE_FAILED_NOTICE);
            }
        }
    }

    ChatResponse {
        reply,
        extracted_data: output.extracted_data.as_ref().map(ExtractedDataView::from),
        saved_interaction_id,
    }
}
