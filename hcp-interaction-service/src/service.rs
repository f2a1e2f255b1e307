use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::{Next, from_fn},
    response::Json,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::ServerConfig,
    models::{
        ChatRequest, ChatResponse, InteractionCreate, InteractionRecord, ListInteractionsQuery,
        PersistableInteraction,
    },
    persistence::{InteractionStore, StoreError, apply_turn_effects},
    workflow::{TurnInput, TurnOrchestrator},
};

const MAX_LIST_LIMIT: i64 = 1000;
const CORRELATION_ID_HEADER: &str = "x-correlation-id";

type ApiResult<T> = Result<T, ApiError>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn store_error(message: &str, e: StoreError) -> ApiError {
    match e {
        StoreError::Invalid(details) => bad_request_error(message, &details),
        StoreError::Database(e) => internal_error(message, &e.to_string()),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
    pub store: Arc<dyn InteractionStore>,
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(
    mut request: Request<axum::body::Body>,
    next: Next,
) -> axum::response::Response {
    let correlation_id = Uuid::new_v4().to_string();
    let header_value = HeaderValue::from_str(&correlation_id).ok();

    if let Some(value) = &header_value {
        request
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, value.clone());
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    let mut response = next.run(request).instrument(span).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

pub fn build_router(app_state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route(
            "/api/interactions",
            post(create_interaction).get(list_interactions),
        )
        .route("/api/chat_interaction", post(chat_interaction))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(correlation_id_middleware))
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "HCP Interaction Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Logs healthcare-professional interactions from structured forms and AI-assisted chat",
        "endpoints": {
            "POST /api/interactions": "Log an interaction from the structured form",
            "GET /api/interactions": "List logged interactions (skip, limit)",
            "POST /api/chat_interaction": "Send a chat message to the logging assistant",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn create_interaction(
    State(state): State<AppState>,
    Json(request): Json<InteractionCreate>,
) -> ApiResult<(StatusCode, Json<InteractionRecord>)> {
    if request.hcp_name.trim().is_empty() {
        return Err(bad_request_error(
            "Invalid interaction",
            "hcpName is required",
        ));
    }

    let interaction = PersistableInteraction::from(request);
    info!(
        hcp_name = %interaction.hcp_name,
        source = interaction.source.as_str(),
        "Received interaction log request"
    );

    let record = state.store.create(interaction).await.map_err(|e| {
        error!(error = %e, "Failed to log interaction");
        store_error("Failed to log interaction", e)
    })?;

    info!(interaction_id = record.id, "Interaction logged");
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_interactions(
    State(state): State<AppState>,
    Query(query): Query<ListInteractionsQuery>,
) -> ApiResult<Json<Vec<InteractionRecord>>> {
    let skip = query.skip.max(0);
    let limit = query.limit.clamp(0, MAX_LIST_LIMIT);

    let records = state.store.list(skip, limit).await.map_err(|e| {
        error!(error = %e, "Failed to list interactions");
        store_error("Failed to list interactions", e)
    })?;

    info!(count = records.len(), skip, limit, "Retrieving interactions");
    Ok(Json(records))
}

async fn chat_interaction(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Json<ChatResponse> {
    info!(
        message_length = request.message.len(),
        history_length = request.history.len(),
        "Received chat request"
    );

    let output = state
        .orchestrator
        .run_turn(TurnInput::new(request.message, request.history))
        .await;

    Json(apply_turn_effects(state.store.as_ref(), output).await)
}
