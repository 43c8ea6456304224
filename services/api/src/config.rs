use secrecy::SecretString;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Roster persistence. Without it the roster lives in memory.
    pub database_url: Option<String>,
    /// Server secret. Its absence is reported per request, not at startup.
    pub openai_api_key: Option<SecretString>,
    pub openai_api_base: String,
    pub realtime_model: String,
    pub realtime_voice: Option<String>,
    pub scoring_model: String,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::from);

        let openai_api_base = var_or("OPENAI_API_BASE", openai_realtime::broker::DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let realtime_model = var_or("REALTIME_MODEL", openai_realtime::broker::DEFAULT_REALTIME_MODEL);
        let realtime_voice = match var_or("REALTIME_VOICE", openai_realtime::broker::DEFAULT_VOICE)
            .as_str()
        {
            "none" => None,
            voice => Some(voice.to_string()),
        };
        let scoring_model = var_or("SCORING_MODEL", "gpt-4o-mini");

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            database_url,
            openai_api_key,
            openai_api_base,
            realtime_model,
            realtime_voice,
            scoring_model,
            log_level,
        })
    }
}
