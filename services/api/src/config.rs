use std::net::SocketAddr;
use std::time::Duration;

use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub chat_model: String,
    pub max_questions: u32,
    pub provider_timeout: Duration,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// This function will look for a `.env` file in the current directory
    /// and load the following variables:
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to (e.g., "0.0.0.0:8000").
    /// *   `OPENAI_API_KEY`: Your secret key for the OpenAI API. Required.
    /// *   `CHAT_MODEL`: (Optional) The model used for question generation and evaluation. Defaults to "gpt-4o".
    /// *   `MAX_VIVA_QUESTIONS`: (Optional) Questions per session, clamped to 3..=10. Defaults to 5.
    /// *   `PROVIDER_TIMEOUT_SECS`: (Optional) Upper bound on each provider call. Defaults to 15.
    /// *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let max_questions = match std::env::var("MAX_VIVA_QUESTIONS") {
            Ok(raw) => raw.parse::<u32>().map_err(|e| {
                ConfigError::InvalidValue("MAX_VIVA_QUESTIONS".to_string(), e.to_string())
            })?,
            Err(_) => 5,
        };

        let provider_timeout_secs = match std::env::var("PROVIDER_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("PROVIDER_TIMEOUT_SECS".to_string(), e.to_string())
            })?,
            Err(_) => 15,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            chat_model,
            max_questions,
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            log_level,
        })
    }
}
