//! Axum Handlers for the REST API
//!
//! Session credentials, card drawing, card illustration and push-to-talk voice
//! chat. Each handler is annotated for `utoipa` so the OpenAPI document stays
//! in sync.

use axum::{
    extract::{Multipart, Query, State, multipart::MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use guesswho_core::{card::RoundCard, game::host_instructions};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{error, info, warn};

use crate::{
    models::{
        CardResponse, CreateVoiceSessionPayload, ErrorResponse, ImageQuery, ImageResponse,
        VoiceChatErrorResponse, VoiceChatResponse, VoiceChatUpload, VoiceSessionResponse,
    },
    state::AppState,
};

pub const IMAGE_FAILURE_MESSAGE: &str = "Failed to generate image";

pub const NO_AUDIO_MESSAGE: &str = "No audio file provided";
pub const TRANSCRIPTION_FAILURE_MESSAGE: &str = "Transcription failed";
pub const AGENT_FAILURE_MESSAGE: &str = "Agent failed";
pub const TTS_FAILURE_MESSAGE: &str = "TTS failed";

/// Route prefix the synthesized replies are served from.
pub const TTS_ROUTE: &str = "/voice-tts";

const DEFAULT_AUDIO_FILENAME: &str = "voice.webm";

pub enum ApiError {
    BadRequest(String),
    /// An upstream service refused or failed the request.
    Upstream(anyhow::Error),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Upstream(err) => {
                error!("Upstream error: {:?}", err);
                let message = format!("Upstream request failed: {}", err);
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Create a realtime voice session primed with the round's hidden answer.
#[utoipa::path(
    post,
    path = "/api/session",
    request_body = CreateVoiceSessionPayload,
    responses(
        (status = 200, description = "Session created", body = VoiceSessionResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 502, description = "Upstream failure", body = ErrorResponse)
    )
)]
pub async fn create_voice_session(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateVoiceSessionPayload>,
) -> Result<Json<VoiceSessionResponse>, ApiError> {
    let description = payload.description.trim();
    if description.is_empty() {
        return Err(ApiError::BadRequest("description must not be empty".to_string()));
    }

    let instructions = host_instructions(description);
    let result = state
        .sessions
        .create_session(&instructions)
        .await
        .map_err(ApiError::Upstream)?;

    info!(%description, "Voice session issued");
    Ok(Json(VoiceSessionResponse { result }))
}

/// Generate an illustration for a card description.
///
/// Failures still answer with an image: the configured fallback, plus an error message.
#[utoipa::path(
    get,
    path = "/api/image",
    params(ImageQuery),
    responses(
        (status = 200, description = "Generated image", body = ImageResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Generation failed; fallback image returned", body = ImageResponse)
    )
)]
pub async fn generate_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    let description = query.description.trim();
    if description.is_empty() {
        return Err(ApiError::BadRequest("description must not be empty".to_string()));
    }

    let prompt = format!("{}{}", description, state.config.image_style_suffix);
    match state.images.generate(&prompt).await {
        Ok(image) => Ok(Json(ImageResponse { image, error: None }).into_response()),
        Err(e) => {
            warn!(%description, error = ?e, "Image generation failed");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ImageResponse {
                    image: state.config.fallback_image.clone(),
                    error: Some(IMAGE_FAILURE_MESSAGE.to_string()),
                }),
            )
                .into_response())
        }
    }
}

/// Draw a random card for a new round.
#[utoipa::path(
    get,
    path = "/api/card",
    responses(
        (status = 200, description = "A fresh card", body = CardResponse)
    )
)]
pub async fn draw_card() -> Json<CardResponse> {
    let card = RoundCard::random(&mut rand::rng());
    info!(description = %card.description, "Card drawn");
    Json(card.into())
}

fn voice_chat_failure(status: StatusCode, error: &str) -> Response {
    (
        status,
        Json(VoiceChatErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Pulls the `audio` file part out of the form. Plain text parts don't count.
async fn read_audio(multipart: Result<Multipart, MultipartRejection>) -> Option<(String, Vec<u8>)> {
    let mut multipart = multipart.ok()?;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("audio") {
            continue;
        }
        let filename = match field.file_name()? {
            "" => DEFAULT_AUDIO_FILENAME.to_string(),
            name => name.to_string(),
        };
        let bytes = field.bytes().await.ok()?;
        return Some((filename, bytes.to_vec()));
    }
    None
}

/// Push-to-talk: transcribe a clip, answer it, and speak the answer.
#[utoipa::path(
    post,
    path = "/api/voice-chat",
    request_body(content = VoiceChatUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Spoken reply", body = VoiceChatResponse),
        (status = 400, description = "No audio file provided", body = VoiceChatErrorResponse),
        (status = 500, description = "A stage failed", body = VoiceChatErrorResponse)
    )
)]
pub async fn voice_chat(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let Some((filename, audio)) = read_audio(multipart).await else {
        return voice_chat_failure(StatusCode::BAD_REQUEST, NO_AUDIO_MESSAGE);
    };

    let transcript = match state.voice.transcribe(&filename, audio).await {
        Ok(transcript) => transcript,
        Err(e) => {
            warn!(error = ?e, "Transcription failed");
            return voice_chat_failure(StatusCode::INTERNAL_SERVER_ERROR, TRANSCRIPTION_FAILURE_MESSAGE);
        }
    };

    let text = match state.voice.reply(&transcript).await {
        Ok(text) => text,
        Err(e) => {
            warn!(%transcript, error = ?e, "Agent reply failed");
            return voice_chat_failure(StatusCode::INTERNAL_SERVER_ERROR, AGENT_FAILURE_MESSAGE);
        }
    };

    let audio_url = match synthesize(&state, &text).await {
        Ok(url) => url,
        Err(e) => {
            warn!(error = ?e, "Speech synthesis failed");
            return voice_chat_failure(StatusCode::INTERNAL_SERVER_ERROR, TTS_FAILURE_MESSAGE);
        }
    };

    info!(%transcript, %audio_url, "Voice chat answered");
    Json(VoiceChatResponse { text, audio_url }).into_response()
}

/// Speaks `text` and stores the mp3 under the TTS directory, returning its URL.
async fn synthesize(state: &AppState, text: &str) -> anyhow::Result<String> {
    let mp3 = state.voice.speak(text).await?;
    let millis = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();
    let file_name = format!("voice-{}.mp3", millis);

    tokio::fs::create_dir_all(&state.config.tts_dir).await?;
    tokio::fs::write(state.config.tts_dir.join(&file_name), mp3).await?;
    Ok(format!("{}/{}", TTS_ROUTE, file_name))
}
