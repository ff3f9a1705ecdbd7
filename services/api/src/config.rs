use secrecy::SecretString;
use std::{net::SocketAddr, path::PathBuf};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const DEFAULT_REALTIME_VOICE: &str = "ballad";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-2";
pub const DEFAULT_IMAGE_STYLE_SUFFIX: &str = ", center focus, high energy, japanese animation style";
pub const DEFAULT_FALLBACK_IMAGE: &str = "/shark.jpg";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub const DEFAULT_SPEECH_MODEL: &str = "tts-1";
pub const DEFAULT_SPEECH_VOICE: &str = "nova";
pub const DEFAULT_TTS_DIR: &str = "public/voice-tts";

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub openai_api_base: String,
    pub realtime_model: String,
    pub realtime_voice: String,
    pub image_model: String,
    /// Appended to every card description before it is sent to the image model.
    pub image_style_suffix: String,
    /// Returned by the image route when generation fails.
    pub fallback_image: String,
    pub transcription_model: String,
    pub chat_model: String,
    pub speech_model: String,
    pub speech_voice: String,
    /// Where synthesized voice-chat replies are written; served under `/voice-tts`.
    pub tts_dir: PathBuf,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let openai_api_base = var_or("OPENAI_API_BASE", DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_api_base,
            realtime_model: var_or("REALTIME_MODEL", DEFAULT_REALTIME_MODEL),
            realtime_voice: var_or("REALTIME_VOICE", DEFAULT_REALTIME_VOICE),
            image_model: var_or("IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
            image_style_suffix: var_or("IMAGE_STYLE_SUFFIX", DEFAULT_IMAGE_STYLE_SUFFIX),
            fallback_image: var_or("FALLBACK_IMAGE", DEFAULT_FALLBACK_IMAGE),
            transcription_model: var_or("TRANSCRIPTION_MODEL", DEFAULT_TRANSCRIPTION_MODEL),
            chat_model: var_or("CHAT_MODEL", DEFAULT_CHAT_MODEL),
            speech_model: var_or("SPEECH_MODEL", DEFAULT_SPEECH_MODEL),
            speech_voice: var_or("SPEECH_VOICE", DEFAULT_SPEECH_VOICE),
            tts_dir: PathBuf::from(var_or("TTS_DIR", DEFAULT_TTS_DIR)),
            log_level,
        })
    }
}

#[cfg(test)]
impl Config {
    /// Default settings with a dummy key, pointed at `openai_api_base`.
    pub fn for_tests(openai_api_base: &str, tts_dir: PathBuf) -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            openai_api_key: SecretString::from("test-key".to_string()),
            openai_api_base: openai_api_base.to_string(),
            realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            realtime_voice: DEFAULT_REALTIME_VOICE.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            image_style_suffix: ", japanese animation style".to_string(),
            fallback_image: DEFAULT_FALLBACK_IMAGE.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            speech_model: DEFAULT_SPEECH_MODEL.to_string(),
            speech_voice: DEFAULT_SPEECH_VOICE.to_string(),
            tts_dir,
            log_level: Level::INFO,
        }
    }
}
