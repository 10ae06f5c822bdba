//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;

use companion_core::provisioning::PollPolicy;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub talks_api_url: String,
    pub talks_api_key: String,
    pub media_upload_url: String,
    pub media_cloud_name: String,
    pub media_upload_preset: String,
    pub image_host_url: String,
    pub image_host_client_id: String,
    pub poll_initial: Duration,
    pub poll_max: Duration,
    pub poll_deadline: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys and Endpoints ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());

        let talks_api_url =
            std::env::var("TALKS_API_URL").unwrap_or_else(|_| "https://api.d-id.com".to_string());
        let talks_api_key = std::env::var("TALKS_API_KEY")
            .map_err(|_| ConfigError::MissingVar("TALKS_API_KEY".to_string()))?;

        let media_upload_url = std::env::var("MEDIA_UPLOAD_URL")
            .unwrap_or_else(|_| "https://api.cloudinary.com/v1_1".to_string());
        let media_cloud_name = std::env::var("MEDIA_CLOUD_NAME")
            .map_err(|_| ConfigError::MissingVar("MEDIA_CLOUD_NAME".to_string()))?;
        let media_upload_preset = std::env::var("MEDIA_UPLOAD_PRESET")
            .map_err(|_| ConfigError::MissingVar("MEDIA_UPLOAD_PRESET".to_string()))?;

        let image_host_url = std::env::var("IMAGE_HOST_URL")
            .unwrap_or_else(|_| "https://api.imgur.com".to_string());
        let image_host_client_id = std::env::var("IMAGE_HOST_CLIENT_ID")
            .map_err(|_| ConfigError::MissingVar("IMAGE_HOST_CLIENT_ID".to_string()))?;

        // --- Talk-job Poll Settings ---
        let poll_initial = Duration::from_millis(env_u64("POLL_INITIAL_MS", 1_000)?);
        let poll_max = Duration::from_millis(env_u64("POLL_MAX_MS", 8_000)?);
        let poll_deadline = Duration::from_secs(env_u64("POLL_DEADLINE_SECS", 120)?);

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            chat_model,
            talks_api_url,
            talks_api_key,
            media_upload_url,
            media_cloud_name,
            media_upload_preset,
            image_host_url,
            image_host_client_id,
            poll_initial,
            poll_max,
            poll_deadline,
        })
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial: self.poll_initial,
            max: self.poll_max,
            deadline: self.poll_deadline,
        }
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
    }
}
