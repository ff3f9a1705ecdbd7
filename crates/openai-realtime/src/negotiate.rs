//! Credentials and SDP exchange for a realtime session.

use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use guesswho_core::card::RoundCard;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// What the token service needs to prime the host for a round.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RoundContext {
    pub description: String,
}

impl From<&RoundCard> for RoundContext {
    fn from(card: &RoundCard) -> Self {
        Self {
            description: card.description.clone(),
        }
    }
}

/// A short-lived client secret for one session.
#[derive(Debug)]
pub struct EphemeralKey {
    pub value: SecretString,
    pub expires_at: Option<i64>,
}

impl EphemeralKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at: None,
        }
    }
}

#[async_trait]
pub trait SessionTokenProvider: Send + Sync {
    async fn ephemeral_key(&self, round: &RoundContext) -> Result<EphemeralKey>;
}

#[async_trait]
pub trait SdpNegotiator: Send + Sync {
    /// Sends the local offer and returns the remote answer.
    async fn negotiate(&self, offer: &str, key: &EphemeralKey) -> Result<String>;
}

#[derive(Deserialize)]
struct SessionEnvelope {
    result: SessionResult,
}

#[derive(Deserialize)]
struct SessionResult {
    client_secret: ClientSecret,
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Parses `{result: {client_secret: {value, expires_at}}}`.
pub fn parse_session_response(body: &str) -> Result<EphemeralKey> {
    let envelope: SessionEnvelope = serde_json::from_str(body)
        .map_err(|e| RealtimeError::SessionToken(format!("unexpected response: {}", e)))?;
    let secret = envelope.result.client_secret;
    if secret.value.is_empty() {
        return Err(RealtimeError::SessionToken("empty client secret".into()));
    }
    Ok(EphemeralKey {
        value: SecretString::from(secret.value),
        expires_at: secret.expires_at,
    })
}

/// Fetches ephemeral keys from the game's `POST /api/session` endpoint.
pub struct HttpSessionTokenProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSessionTokenProvider {
    /// # Arguments
    ///
    /// * `base_url` - Root of the API service, e.g. `http://localhost:3000`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: format!("{}/api/session", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl SessionTokenProvider for HttpSessionTokenProvider {
    async fn ephemeral_key(&self, round: &RoundContext) -> Result<EphemeralKey> {
        let response = self.client.post(&self.endpoint).json(round).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RealtimeError::SessionToken(format!("{}: {}", status, body)));
        }
        let key = parse_session_response(&body)?;
        debug!(expires_at = ?key.expires_at, "Ephemeral key issued");
        Ok(key)
    }
}

/// An answer must be an SDP document, which always starts with its version line.
pub fn validate_answer(answer: &str) -> Result<()> {
    if answer.trim_start().starts_with("v=") {
        Ok(())
    } else {
        let preview: String = answer.chars().take(40).collect();
        Err(RealtimeError::MalformedAnswer(preview))
    }
}

/// Posts the offer straight to the realtime endpoint.
pub struct HttpSdpNegotiator {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpSdpNegotiator {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

impl Default for HttpSdpNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SdpNegotiator for HttpSdpNegotiator {
    async fn negotiate(&self, offer: &str, key: &EphemeralKey) -> Result<String> {
        let response = self
            .client
            .post(self.base_url.trim_end_matches('/'))
            .query(&[("model", self.model.as_str())])
            .header(AUTHORIZATION, format!("Bearer {}", key.value.expose_secret()))
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer.to_string())
            .send()
            .await?;
        let status = response.status();
        let answer = response.text().await?;
        if !status.is_success() {
            return Err(RealtimeError::Negotiation(format!("{}: {}", status, answer)));
        }
        validate_answer(&answer)?;
        info!(model = %self.model, "SDP answer received");
        Ok(answer)
    }
}
