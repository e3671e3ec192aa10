//! Offer/answer exchange with the remote signaling endpoint.
//!
//! The exchange is a single HTTP round-trip: the offer SDP goes out as
//! `application/sdp` authenticated by the ephemeral credential, and the
//! response body is the raw answer SDP. No JSON envelope in either direction.

use crate::{credential::EphemeralCredential, error::VoiceError};
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// POSTs the offer SDP and returns the answer SDP.
    async fn exchange_offer(
        &self,
        credential: &EphemeralCredential,
        model: &str,
        offer_sdp: &str,
    ) -> Result<String, VoiceError>;
}

/// Talks to the provider's realtime signaling endpoint.
pub struct HttpSignalingClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSignalingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for HttpSignalingClient {
    fn default() -> Self {
        Self::new(crate::DEFAULT_SIGNALING_URL)
    }
}

#[async_trait]
impl SignalingClient for HttpSignalingClient {
    async fn exchange_offer(
        &self,
        credential: &EphemeralCredential,
        model: &str,
        offer_sdp: &str,
    ) -> Result<String, VoiceError> {
        let response = self
            .http
            .post(&self.base_url)
            .query(&[("model", model)])
            .bearer_auth(credential.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_owned())
            .send()
            .await
            .map_err(|e| VoiceError::Signaling(format!("signaling endpoint unreachable: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VoiceError::Signaling(format!("unreadable signaling response: {e}")))?;

        if !status.is_success() {
            return Err(VoiceError::Signaling(format!("{status}: {body}")));
        }
        Ok(body)
    }
}
