use thiserror::Error;

/// Failures while establishing or running a realtime session.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// The microphone could not be opened (permission denied, no device).
    #[error("Microphone unavailable: {0}")]
    Media(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to obtain session token: {0}")]
    SessionToken(String),

    #[error("SDP negotiation failed: {0}")]
    Negotiation(String),

    #[error("Malformed SDP answer: {0}")]
    MalformedAnswer(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
