//! Seams to the host's peer-connection and media stack.
//!
//! The session logic only needs a handful of operations from a WebRTC-style
//! runtime: a peer transport that can produce an offer and accept an answer,
//! one ordered text channel, local microphone tracks and a place to play the
//! remote audio. Each is a trait so the manager can be driven by any backend
//! (and by in-memory fakes in tests).

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Label of the single control channel every session opens.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

/// Frames kept for slow subscribers before they start lagging.
const FRAME_BUFFER: usize = 64;

/// Lifecycle and traffic of a control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Closed,
}

/// Notifications from the peer transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The remote side started sending audio.
    RemoteStream(RemoteAudioStream),
    Closed,
}

/// A block of mono PCM samples in `-1.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }
}

/// The inbound audio of a session.
///
/// Cloning shares the same underlying stream; identity is the `id`.
#[derive(Debug, Clone)]
pub struct RemoteAudioStream {
    id: String,
    frames: broadcast::Sender<AudioFrame>,
}

impl RemoteAudioStream {
    /// Creates a stream and returns the sender the backend feeds frames into.
    pub fn new(id: impl Into<String>) -> (Self, broadcast::Sender<AudioFrame>) {
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        (
            Self {
                id: id.into(),
                frames: frames.clone(),
            },
            frames,
        )
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }
}

impl PartialEq for RemoteAudioStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// A captured microphone track.
#[derive(Debug)]
pub struct LocalAudioTrack {
    pub id: String,
    pub frames: Option<mpsc::Receiver<AudioFrame>>,
}

impl LocalAudioTrack {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            frames: None,
        }
    }

    pub fn with_frames(mut self, frames: mpsc::Receiver<AudioFrame>) -> Self {
        self.frames = Some(frames);
        self
    }
}

/// An ordered, reliable text channel to the model.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    fn label(&self) -> &str;

    async fn send_text(&self, text: String) -> Result<()>;

    /// Closing an already closed channel is a no-op.
    async fn close(&self);
}

/// One peer connection.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Adds a track as a send/receive transceiver.
    async fn add_local_audio(&self, track: LocalAudioTrack) -> Result<()>;

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<(Arc<dyn ControlChannel>, mpsc::Receiver<ChannelEvent>)>;

    /// Creates an offer and sets it as the local description.
    async fn create_offer(&self) -> Result<String>;

    /// Sets the remote description from an answer.
    async fn apply_answer(&self, sdp: &str) -> Result<()>;

    /// Closing an already closed transport is a no-op.
    async fn close(&self);
}

/// Builds a fresh peer transport per session.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<TransportEvent>)>;
}

#[async_trait]
pub trait MediaCapture: Send + Sync {
    /// Fails with [`crate::RealtimeError::Media`] when permission is denied or no device exists.
    async fn open_microphone(&self) -> Result<Vec<LocalAudioTrack>>;
}

/// Where the remote audio is played.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn attach(&self, stream: RemoteAudioStream);
    async fn detach(&self);
}
