use hcp_interaction_service::{
    AppConfig, AppState, InMemoryInteractionStore, InteractionStore, ModelClients,
    OpenRouterModel, PostgresInteractionStore, TurnOrchestrator, build_router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "hcp_interaction_service=debug,turn_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

async fn create_store(database_url: Option<&str>) -> Arc<dyn InteractionStore> {
    let Some(database_url) = database_url else {
        info!("Using in-memory interaction store (set DATABASE_URL to use PostgreSQL)");
        return Arc::new(InMemoryInteractionStore::new());
    };

    info!("Using PostgreSQL interaction store");
    match PostgresInteractionStore::connect(database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                e
            );
            Arc::new(InMemoryInteractionStore::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // dotenv first so LOG_FORMAT and RUST_LOG can come from .env
    let config = AppConfig::from_env();
    init_tracing();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let models = ModelClients {
        conversation: Arc::new(OpenRouterModel::extraction(&config.model)),
        summary: Arc::new(OpenRouterModel::summary(&config.model)),
    };
    info!(
        extraction_model = %config.model.extraction_model,
        summary_model = %config.model.summary_model,
        summarize_context = config.turn.summarize_context,
        "Configured language models"
    );

    let app_state = AppState {
        orchestrator: Arc::new(TurnOrchestrator::new(models, config.turn.clone())),
        store: create_store(config.database_url.as_deref()).await,
    };
    let app = build_router(app_state, &config.server);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.server.port)).await?;
    let addr = listener.local_addr()?;

    info!("HCP Interaction Service starting on {}", addr);
    info!("Chat endpoint: POST http://{}/api/chat_interaction", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
