//! Minting ephemeral realtime credentials.
//!
//! The server-held provider key never leaves this service: clients call
//! `GET /voice/session` and receive a short-lived `client_secret` minted
//! against the provider's session endpoint, good for exactly one signaling
//! exchange.

use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The provider endpoint that mints realtime session credentials.
pub const SESSIONS_URL: &str = "https://api.openai.com/v1/realtime/sessions";

#[derive(Serialize)]
struct MintRequest<'a> {
    model: &'a str,
    voice: &'a str,
}

/// A minted realtime session, passed through to the caller.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct MintedSession {
    /// Provider session identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// The model the credential is scoped to.
    #[serde(default)]
    pub model: Option<String>,
    pub client_secret: ClientSecret,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ClientSecret {
    /// The ephemeral bearer value.
    pub value: String,
    /// Unix timestamp after which the credential is useless.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Source of minted sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialMinter: Send + Sync {
    async fn mint(&self) -> Result<MintedSession>;
}

/// Mints sessions against the OpenAI realtime sessions endpoint.
pub struct OpenAiMinter {
    http: reqwest::Client,
    sessions_url: String,
    api_key: SecretString,
    model: String,
    voice: String,
}

impl OpenAiMinter {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            sessions_url: SESSIONS_URL.to_string(),
            api_key: config.openai_api_key.clone(),
            model: config.realtime_model.clone(),
            voice: config.realtime_voice.clone(),
        }
    }
}

#[async_trait]
impl CredentialMinter for OpenAiMinter {
    async fn mint(&self) -> Result<MintedSession> {
        let response = self
            .http
            .post(&self.sessions_url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&MintRequest {
                model: &self.model,
                voice: &self.voice,
            })
            .send()
            .await
            .context("session-minting request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("session-minting endpoint returned {status}: {body}");
        }

        response
            .json::<MintedSession>()
            .await
            .context("malformed session-minting response")
    }
}
