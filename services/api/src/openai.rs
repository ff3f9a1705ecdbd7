//! Upstream OpenAI services used by the HTTP routes.

use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        AudioInput, ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        CreateImageRequestArgs, CreateSpeechRequestArgs, CreateTranscriptionRequestArgs, Image,
        ImageModel, ImageResponseFormat, ImageSize, SpeechModel, SpeechResponseFormat, Voice,
    },
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info};

/// Creates realtime sessions and hands back their ephemeral credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    /// Returns the upstream session object, including `client_secret`.
    async fn create_session(&self, instructions: &str) -> Result<Value>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Returns a URL or a `data:` URI for the generated image.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// The three stages of a push-to-talk exchange.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceAssistant: Send + Sync {
    /// Speech to text. `filename` carries the container format (`voice.webm`).
    async fn transcribe(&self, filename: &str, audio: Vec<u8>) -> Result<String>;
    /// The host's answer to what the child said.
    async fn reply(&self, transcript: &str) -> Result<String>;
    /// Text to mp3 audio.
    async fn speak(&self, text: &str) -> Result<Vec<u8>>;
}

#[derive(Serialize)]
struct CreateRealtimeSession<'a> {
    model: &'a str,
    instructions: &'a str,
    voice: &'a str,
}

/// `POST {api_base}/realtime/sessions`.
pub struct RealtimeSessionIssuer {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
    voice: String,
}

impl RealtimeSessionIssuer {
    pub fn new(config: &Config) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/realtime/sessions", config.openai_api_base),
            api_key: config.openai_api_key.clone(),
            model: config.realtime_model.clone(),
            voice: config.realtime_voice.clone(),
        }
    }
}

#[async_trait]
impl SessionIssuer for RealtimeSessionIssuer {
    async fn create_session(&self, instructions: &str) -> Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&CreateRealtimeSession {
                model: &self.model,
                instructions,
                voice: &self.voice,
            })
            .send()
            .await
            .context("Failed to reach the realtime sessions endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Realtime session request failed ({}): {}", status, body));
        }
        let session: Value = response
            .json()
            .await
            .context("Realtime session response was not JSON")?;
        info!(model = %self.model, "Realtime session created");
        Ok(session)
    }
}

/// Generates round illustrations through the images API.
pub struct OpenAIImageGenerator {
    client: Client<OpenAIConfig>,
    model: ImageModel,
}

/// Maps a configured model name onto the client's model enum.
pub fn image_model(name: &str) -> ImageModel {
    match name {
        "dall-e-2" => ImageModel::DallE2,
        "dall-e-3" => ImageModel::DallE3,
        other => ImageModel::Other(other.to_string()),
    }
}

impl OpenAIImageGenerator {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.openai_api_key.expose_secret())
            .with_api_base(&config.openai_api_base);
        Self {
            client: Client::with_config(openai_config),
            model: image_model(&config.image_model),
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAIImageGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(self.model.clone())
            .n(1)
            .size(ImageSize::S1024x1024)
            .response_format(ImageResponseFormat::Url)
            .build()?;
        debug!(%prompt, "Requesting image");

        let response = self.client.images().create(request).await?;
        let image = response.data.first().context("No image returned")?;
        match image.as_ref() {
            Image::Url { url, .. } => Ok(url.clone()),
            Image::B64Json { b64_json, .. } => Ok(format!("data:image/png;base64,{}", b64_json)),
        }
    }
}

/// Parses a configured name into one of the client's string-tagged enums.
fn named<T: DeserializeOwned>(kind: &str, name: &str) -> Result<T> {
    serde_json::from_value(Value::String(name.to_string()))
        .with_context(|| format!("Unsupported {}: {}", kind, name))
}

/// Whisper, chat completions and text-to-speech through `async-openai`.
pub struct OpenAIVoiceAssistant {
    client: Client<OpenAIConfig>,
    transcription_model: String,
    chat_model: String,
    speech_model: SpeechModel,
    voice: Voice,
}

impl OpenAIVoiceAssistant {
    pub fn new(config: &Config) -> Result<Self> {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.openai_api_key.expose_secret())
            .with_api_base(&config.openai_api_base);
        Ok(Self {
            client: Client::with_config(openai_config),
            transcription_model: config.transcription_model.clone(),
            chat_model: config.chat_model.clone(),
            speech_model: named("speech model", &config.speech_model)?,
            voice: named("speech voice", &config.speech_voice)?,
        })
    }
}

#[async_trait]
impl VoiceAssistant for OpenAIVoiceAssistant {
    async fn transcribe(&self, filename: &str, audio: Vec<u8>) -> Result<String> {
        let request = CreateTranscriptionRequestArgs::default()
            .file(AudioInput::from_vec_u8(filename.to_string(), audio))
            .model(&self.transcription_model)
            .build()?;
        let response = self.client.audio().transcribe(request).await?;
        debug!(transcript = %response.text, "Audio transcribed");
        Ok(response.text)
    }

    async fn reply(&self, transcript: &str) -> Result<String> {
        let message: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(transcript)
            .build()?
            .into();
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(vec![message])
            .build()?;
        let response = self.client.chat().create(request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("Chat completion returned no content")
    }

    async fn speak(&self, text: &str) -> Result<Vec<u8>> {
        let request = CreateSpeechRequestArgs::default()
            .input(text)
            .model(self.speech_model.clone())
            .voice(self.voice.clone())
            .response_format(SpeechResponseFormat::Mp3)
            .build()?;
        let response = self.client.audio().speech(request).await?;
        Ok(response.bytes.to_vec())
    }
}
