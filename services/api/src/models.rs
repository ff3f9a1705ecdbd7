//! API Models
//!
//! Request and response payloads for the HTTP routes, annotated for OpenAPI
//! generation with `utoipa`.

use guesswho_core::card::RoundCard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct CreateVoiceSessionPayload {
    /// The hidden answer the host is primed with.
    #[schema(example = "Penguin baking a cake")]
    pub description: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct VoiceSessionResponse {
    /// The upstream realtime session; the ephemeral key is at `client_secret.value`.
    #[schema(value_type = Object)]
    pub result: Value,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ImageQuery {
    /// Missing is treated as empty and rejected by the handler.
    #[param(example = "Fox playing soccer")]
    #[serde(default)]
    pub description: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct ImageResponse {
    /// A URL or `data:` URI.
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CardResponse {
    #[schema(example = "Owl")]
    pub animal: String,
    #[schema(example = "flying a kite")]
    pub scenario: String,
    #[schema(example = "Owl flying a kite")]
    pub description: String,
}

impl From<RoundCard> for CardResponse {
    fn from(card: RoundCard) -> Self {
        Self {
            animal: card.animal,
            scenario: card.scenario,
            description: card.description,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

/// Multipart form accepted by the voice-chat route.
#[derive(ToSchema)]
pub struct VoiceChatUpload {
    /// A recorded clip, e.g. `voice.webm`.
    #[schema(value_type = String, format = Binary)]
    pub audio: Vec<u8>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceChatResponse {
    /// What the host said back.
    pub text: String,
    /// Where the spoken reply can be fetched, under `/voice-tts/`.
    #[schema(example = "/voice-tts/voice-1718000000000.mp3")]
    pub audio_url: String,
}

/// Error body of the voice-chat route, naming the stage that failed.
#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct VoiceChatErrorResponse {
    pub error: String,
}
