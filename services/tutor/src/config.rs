use secrecy::SecretString;
use std::{path::PathBuf, time::Duration};
use tracing::Level;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where ephemeral credentials come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// `POST /realtime/token` on the tutor API.
    Api,
    /// The server secret is available locally (developer mode).
    Local,
}

/// Client configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_url: String,
    pub credential_source: CredentialSource,
    pub openai_api_key: Option<SecretString>,
    pub openai_api_base: String,
    pub realtime_model: String,
    pub progress_dir: PathBuf,
    pub session_budget: Duration,
    pub connect_timeout: Duration,
    pub log_level: Level,
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_secs(name: &str, default: u64) -> Result<Duration, ConfigError> {
    match var(name) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    name.to_string(),
                    format!("'{}' is not a positive number of seconds", raw),
                )
            }),
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_url = var("TUTOR_API_URL")
            .unwrap_or_else(|| "http://127.0.0.1:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let openai_api_key = var("OPENAI_API_KEY").map(SecretString::from);
        let credential_source = match var("CREDENTIAL_SOURCE")
            .unwrap_or_else(|| "api".to_string())
            .to_lowercase()
            .as_str()
        {
            "api" => CredentialSource::Api,
            "local" => CredentialSource::Local,
            other => {
                return Err(ConfigError::InvalidValue(
                    "CREDENTIAL_SOURCE".to_string(),
                    format!("'{}' is not one of: api, local", other),
                ));
            }
        };
        if credential_source == CredentialSource::Local && openai_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "OPENAI_API_KEY must be set when CREDENTIAL_SOURCE=local".to_string(),
            ));
        }

        let openai_api_base = var("OPENAI_API_BASE")
            .unwrap_or_else(|| openai_realtime::broker::DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        let realtime_model = var("REALTIME_MODEL")
            .unwrap_or_else(|| openai_realtime::broker::DEFAULT_REALTIME_MODEL.to_string());
        let progress_dir = var("PROGRESS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./progress"));
        let session_budget = parse_secs("SESSION_SECONDS", 600)?;
        let connect_timeout = parse_secs("CONNECT_TIMEOUT_SECONDS", 30)?;

        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_url,
            credential_source,
            openai_api_key,
            openai_api_base,
            realtime_model,
            progress_dir,
            session_budget,
            connect_timeout,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            for name in [
                "TUTOR_API_URL",
                "CREDENTIAL_SOURCE",
                "OPENAI_API_KEY",
                "OPENAI_API_BASE",
                "REALTIME_MODEL",
                "PROGRESS_DIR",
                "SESSION_SECONDS",
                "CONNECT_TIMEOUT_SECONDS",
                "RUST_LOG",
            ] {
                env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env_vars();
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:3000");
        assert_eq!(config.credential_source, CredentialSource::Api);
        assert_eq!(config.realtime_model, "gpt-realtime");
        assert_eq!(config.progress_dir, PathBuf::from("./progress"));
        assert_eq!(config.session_budget, Duration::from_secs(600));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_local_source_requires_key() {
        clear_env_vars();
        unsafe {
            env::set_var("CREDENTIAL_SOURCE", "local");
        }
        match ClientConfig::from_env().unwrap_err() {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            other => panic!("Expected MissingVar, got {:?}", other),
        }

        unsafe {
            env::set_var("OPENAI_API_KEY", "sk-local");
        }
        let config = ClientConfig::from_env().unwrap();
        assert_eq!(config.credential_source, CredentialSource::Local);
    }

    #[test]
    #[serial]
    fn test_invalid_values() {
        clear_env_vars();
        unsafe {
            env::set_var("SESSION_SECONDS", "ten");
        }
        match ClientConfig::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "SESSION_SECONDS"),
            other => panic!("Expected InvalidValue, got {:?}", other),
        }

        clear_env_vars();
        unsafe {
            env::set_var("CREDENTIAL_SOURCE", "carrier-pigeon");
        }
        match ClientConfig::from_env().unwrap_err() {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "CREDENTIAL_SOURCE"),
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }
}
