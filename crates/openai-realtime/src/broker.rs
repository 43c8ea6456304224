//! Token Broker: trades the long-lived API key for a short-lived,
//! session-scoped client secret so the key never leaves the server.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt;
use tracing::{info, instrument, warn};
use tutor_core::SessionError;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-realtime";
pub const DEFAULT_VOICE: &str = "alloy";

/// A short-lived secret authorising one realtime session.
#[derive(Clone)]
pub struct EphemeralCredential {
    pub value: SecretString,
    /// Unix seconds, when the issuer reports it.
    pub expires_at: Option<i64>,
}

impl EphemeralCredential {
    pub fn new(value: impl Into<String>, expires_at: Option<i64>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at,
        }
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Anything that can hand the client a session credential.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn request_ephemeral_credential(&self) -> Result<EphemeralCredential, SessionError>;
}

pub struct TokenBroker {
    http: reqwest::Client,
    api_key: Option<SecretString>,
    api_base: String,
    model: String,
    voice: Option<String>,
}

impl TokenBroker {
    /// A broker without a key is valid to build; issuing then fails with
    /// `SessionError::Config`.
    pub fn new(api_key: Option<SecretString>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: Some(DEFAULT_VOICE.to_string()),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self) -> Value {
        let mut session = json!({ "type": "realtime", "model": self.model });
        if let Some(voice) = &self.voice {
            session["audio"] = json!({ "output": { "voice": voice } });
        }
        json!({ "session": session })
    }
}

#[derive(Deserialize)]
struct ClientSecretResponse {
    value: Option<String>,
    expires_at: Option<i64>,
    client_secret: Option<NestedSecret>,
}

#[derive(Deserialize)]
struct NestedSecret {
    value: Option<String>,
    expires_at: Option<i64>,
}

#[async_trait]
impl CredentialProvider for TokenBroker {
    #[instrument(skip(self), fields(model = %self.model))]
    async fn request_ephemeral_credential(&self) -> Result<EphemeralCredential, SessionError> {
        let api_key = self
            .api_key
            .as_ref()
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| SessionError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let response = self
            .http
            .post(format!("{}/realtime/client_secrets", self.api_base))
            .bearer_auth(api_key.expose_secret())
            .json(&self.request_body())
            .send()
            .await
            .map_err(|e| SessionError::Upstream {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: format!("credential request failed: {}", e),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or_else(|| format!("Failed to create client secret: {}", text));
            warn!(status = status.as_u16(), %message, "Credential issuer rejected the request");
            return Err(SessionError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ClientSecretResponse =
            serde_json::from_str(&text).map_err(|e| SessionError::Upstream {
                status: status.as_u16(),
                message: format!("unreadable credential response: {}", e),
            })?;
        let (nested_value, nested_expiry) = parsed
            .client_secret
            .map(|s| (s.value, s.expires_at))
            .unwrap_or((None, None));
        let value = parsed
            .value
            .or(nested_value)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| SessionError::Upstream {
                status: status.as_u16(),
                message: format!("Token missing in issuer response: {}", text),
            })?;

        info!("Ephemeral credential issued");
        Ok(EphemeralCredential::new(
            value,
            parsed.expires_at.or(nested_expiry),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = TokenBroker::new(None).request_body();
        assert_eq!(body["session"]["type"], "realtime");
        assert_eq!(body["session"]["model"], "gpt-realtime");
        assert_eq!(body["session"]["audio"]["output"]["voice"], "alloy");

        let body = TokenBroker::new(None).with_voice(None).request_body();
        assert!(body["session"].get("audio").is_none());
    }

    #[test]
    fn test_credential_debug_redacts() {
        let cred = EphemeralCredential::new("ek_secret", Some(1));
        let shown = format!("{:?}", cred);
        assert!(!shown.contains("ek_secret"));
        assert!(shown.contains("REDACTED"));
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let err = TokenBroker::new(None)
            .request_ephemeral_credential()
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));

        let err = TokenBroker::new(Some(SecretString::from("  ".to_string())))
            .request_ephemeral_credential()
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }
}
