//! Ephemeral session credentials.
//!
//! The long-lived provider key stays on the backend; clients receive a
//! short-lived, single-use token minted per session. The credential is
//! consumed by the signaling exchange and discarded with the attempt.

use crate::error::VoiceError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// A short-lived authorization token for exactly one signaling exchange.
pub struct EphemeralCredential {
    secret: SecretString,
}

impl EphemeralCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
        }
    }

    /// The bearer value used to authenticate the signaling exchange.
    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl std::fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralCredential").finish_non_exhaustive()
    }
}

/// Source of ephemeral credentials. Called once per connection attempt.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<EphemeralCredential, VoiceError>;
}

/// Shape of the session endpoint's JSON body. The secret is nested so the
/// endpoint can also carry non-secret session metadata.
#[derive(Deserialize)]
struct SessionTokenResponse {
    client_secret: Option<ClientSecret>,
}

#[derive(Deserialize)]
struct ClientSecret {
    #[serde(default)]
    value: String,
}

/// Fetches credentials from the backend session endpoint over HTTP.
pub struct HttpCredentialProvider {
    http: reqwest::Client,
    endpoint: reqwest::Url,
}

impl HttpCredentialProvider {
    pub fn new(endpoint: reqwest::Url) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(http: reqwest::Client, endpoint: reqwest::Url) -> Self {
        Self { http, endpoint }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self) -> Result<EphemeralCredential, VoiceError> {
        let response = self
            .http
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| VoiceError::Credential(format!("session endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VoiceError::Credential(format!(
                "session endpoint returned {status}"
            )));
        }

        let body: SessionTokenResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Credential(format!("malformed session response: {e}")))?;

        match body.client_secret {
            Some(secret) if !secret.value.is_empty() => Ok(EphemeralCredential::new(secret.value)),
            _ => Err(VoiceError::Credential(
                "session response carried no client secret".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_never_prints_the_secret() {
        let credential = EphemeralCredential::new("ek_live_abc123");
        let debug = format!("{credential:?}");
        assert!(!debug.contains("ek_live_abc123"));
    }

    #[test]
    fn session_response_with_secret_parses() {
        let body: SessionTokenResponse = serde_json::from_str(
            r#"{"id":"sess_1","client_secret":{"value":"ek_test","expires_at":1736000000}}"#,
        )
        .unwrap();
        assert_eq!(body.client_secret.unwrap().value, "ek_test");
    }

    #[test]
    fn session_response_without_secret_is_detected() {
        let missing: SessionTokenResponse = serde_json::from_str(r#"{"id":"sess_1"}"#).unwrap();
        assert!(missing.client_secret.is_none());

        let empty: SessionTokenResponse =
            serde_json::from_str(r#"{"client_secret":{"value":""}}"#).unwrap();
        assert!(empty.client_secret.unwrap().value.is_empty());
    }
}
