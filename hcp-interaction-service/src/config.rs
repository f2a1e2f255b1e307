//! Process configuration, read once from the environment at startup and passed
//! explicitly to the components that need it.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Required configuration missing: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Credentials and model identifiers for the inference service
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub extraction_model: String,
    pub summary_model: String,
    pub extraction_temperature: f64,
    pub summary_temperature: f64,
    /// Applied to every model call
    pub timeout: Duration,
}

/// Knobs of the conversational turn pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
    /// Run the context summary stage before extraction
    pub summarize_context: bool,
    /// Most recent history messages shown to the extractor
    pub history_window: usize,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            summarize_context: true,
            history_window: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model: ModelConfig,
    pub turn: TurnConfig,
    pub server: ServerConfig,
    /// PostgreSQL connection string; the in-memory store is used when unset
    pub database_url: Option<String>,
}

impl AppConfig {
    /// Read configuration from the process environment, after loading `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_key = get("OPENROUTER_API_KEY").ok_or(ConfigError::Missing("OPENROUTER_API_KEY"))?;

        let timeout_secs: u64 = parse_or(&get, "MODEL_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "MODEL_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let history_window: usize = parse_or(&get, "HISTORY_WINDOW", 20)?;
        if history_window == 0 {
            return Err(ConfigError::Invalid {
                key: "HISTORY_WINDOW",
                reason: "must be greater than zero".to_string(),
            });
        }

        let model = ModelConfig {
            api_key,
            extraction_model: get("EXTRACTION_MODEL")
                .unwrap_or_else(|| "google/gemma-2-9b-it".to_string()),
            summary_model: get("SUMMARY_MODEL")
                .unwrap_or_else(|| "meta-llama/llama-3-70b-instruct".to_string()),
            extraction_temperature: parse_or(&get, "EXTRACTION_TEMPERATURE", 0.0)?,
            summary_temperature: parse_or(&get, "SUMMARY_TEMPERATURE", 0.2)?,
            timeout: Duration::from_secs(timeout_secs),
        };

        let turn = TurnConfig {
            summarize_context: parse_or(&get, "SUMMARIZE_CONTEXT", true)?,
            history_window,
        };

        let server = ServerConfig {
            port: parse_or(&get, "PORT", 8000)?,
            cors_origins: get("CORS_ORIGINS")
                .unwrap_or_else(|| "http://localhost:5173".to_string())
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
        };

        Ok(Self {
            model,
            turn,
            server,
            database_url: get("DATABASE_URL"),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
