//! HCP interaction logging service.
//!
//! Sales representatives log interactions with healthcare professionals either
//! through a structured form or by chatting with an assistant that extracts
//! the interaction details from free text. The conversational turn runs as a
//! `turn-flow` graph; its persist effects are carried out by the HTTP layer.

pub mod config;
pub mod llm;
pub mod models;
pub mod persistence;
pub mod service;
pub mod tasks;
pub mod workflow;

pub use config::{AppConfig, ConfigError, ModelConfig, ServerConfig, TurnConfig};
pub use llm::{InferenceError, LanguageModel, OpenRouterModel};
pub use models::*;
pub use persistence::{
    InMemoryInteractionStore, InteractionStore, PostgresInteractionStore, StoreError,
    apply_turn_effects,
};
pub use service::{AppState, build_router};
pub use workflow::{ModelClients, TurnEffect, TurnInput, TurnOrchestrator, TurnOutput};
