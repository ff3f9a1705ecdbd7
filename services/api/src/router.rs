//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CardResponse, CreateVoiceSessionPayload, ErrorResponse, ImageResponse,
        VoiceChatErrorResponse, VoiceChatResponse, VoiceChatUpload, VoiceSessionResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::services::ServeDir;
use utoipa::OpenApi;

/// Upper bound on a push-to-talk upload (the transcription API's own limit).
const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_voice_session,
        handlers::generate_image,
        handlers::draw_card,
        handlers::voice_chat,
    ),
    components(
        schemas(
            CreateVoiceSessionPayload,
            VoiceSessionResponse,
            ImageResponse,
            CardResponse,
            ErrorResponse,
            VoiceChatUpload,
            VoiceChatResponse,
            VoiceChatErrorResponse
        )
    ),
    tags(
        (name = "Guess Who API", description = "Voice sessions and round cards for the animal guessing game")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let tts_files = ServeDir::new(&app_state.config.tts_dir);
    let api_router = Router::new()
        .route("/api/session", post(handlers::create_voice_session))
        .route("/api/image", get(handlers::generate_image))
        .route("/api/card", get(handlers::draw_card))
        .route(
            "/api/voice-chat",
            post(handlers::voice_chat).layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES)),
        )
        .nest_service(handlers::TTS_ROUTE, tts_files)
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
