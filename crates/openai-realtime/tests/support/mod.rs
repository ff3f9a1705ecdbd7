//! In-memory stand-ins for the peer-connection stack and HTTP collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use openai_realtime::{
    EphemeralKey, RealtimeError, Result, RoundContext, SdpNegotiator, SessionTokenProvider,
    connection::Collaborators,
    transport::{
        AudioFrame, AudioSink, ChannelEvent, ControlChannel, LocalAudioTrack, MediaCapture,
        PeerTransport, RemoteAudioStream, TransportEvent, TransportFactory,
    },
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub const ANSWER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n";

pub struct FakeChannel {
    label: String,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
    /// Suspends once per send, as a real data channel may.
    yield_on_send: bool,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|event| event["type"].as_str().unwrap().to_string())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ControlChannel for FakeChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> Result<()> {
        if self.yield_on_send {
            tokio::task::yield_now().await;
        }
        if self.is_closed() {
            return Err(RealtimeError::Transport("channel closed".into()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeTransport {
    pub events: mpsc::Sender<TransportEvent>,
    yield_on_send: bool,
    channel: Mutex<Option<(Arc<FakeChannel>, mpsc::Sender<ChannelEvent>)>>,
    tracks: Mutex<Vec<String>>,
    answer: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn channel(&self) -> Arc<FakeChannel> {
        self.channel.lock().unwrap().as_ref().unwrap().0.clone()
    }

    /// Delivers an event on the control channel as the remote peer would.
    pub async fn emit(&self, event: ChannelEvent) {
        let tx = self.channel.lock().unwrap().as_ref().unwrap().1.clone();
        tx.send(event).await.unwrap();
    }

    pub async fn attach_remote_audio(&self, id: &str) -> broadcast::Sender<AudioFrame> {
        let (stream, frames) = RemoteAudioStream::new(id);
        self.events
            .send(TransportEvent::RemoteStream(stream))
            .await
            .unwrap();
        frames
    }

    pub fn tracks(&self) -> Vec<String> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn answer(&self) -> Option<String> {
        self.answer.lock().unwrap().clone()
    }

    pub fn has_channel(&self) -> bool {
        self.channel.lock().unwrap().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_local_audio(&self, track: LocalAudioTrack) -> Result<()> {
        self.tracks.lock().unwrap().push(track.id);
        Ok(())
    }

    async fn create_control_channel(
        &self,
        label: &str,
    ) -> Result<(Arc<dyn ControlChannel>, mpsc::Receiver<ChannelEvent>)> {
        let channel = Arc::new(FakeChannel {
            label: label.to_string(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            yield_on_send: self.yield_on_send,
        });
        let (tx, rx) = mpsc::channel(32);
        *self.channel.lock().unwrap() = Some((channel.clone(), tx));
        Ok((channel, rx))
    }

    async fn create_offer(&self) -> Result<String> {
        Ok("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=offer\r\n".to_string())
    }

    async fn apply_answer(&self, sdp: &str) -> Result<()> {
        *self.answer.lock().unwrap() = Some(sdp.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    pub yield_on_send: AtomicBool,
}

impl FakeFactory {
    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.created.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(&self) -> Result<(Arc<dyn PeerTransport>, mpsc::Receiver<TransportEvent>)> {
        let (events, rx) = mpsc::channel(8);
        let transport = Arc::new(FakeTransport {
            events,
            yield_on_send: self.yield_on_send.load(Ordering::SeqCst),
            channel: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            answer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.created.lock().unwrap().push(transport.clone());
        Ok((transport, rx))
    }
}

#[derive(Default)]
pub struct FakeMedia {
    pub deny: AtomicBool,
}

#[async_trait]
impl MediaCapture for FakeMedia {
    async fn open_microphone(&self) -> Result<Vec<LocalAudioTrack>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(RealtimeError::Media("Permission denied".into()));
        }
        Ok(vec![LocalAudioTrack::new("mic-0")])
    }
}

#[derive(Default)]
pub struct FakeTokens {
    pub requests: Mutex<Vec<String>>,
    /// Never answers while set.
    pub hang: AtomicBool,
}

#[async_trait]
impl SessionTokenProvider for FakeTokens {
    async fn ephemeral_key(&self, round: &RoundContext) -> Result<EphemeralKey> {
        self.requests.lock().unwrap().push(round.description.clone());
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(EphemeralKey::new("ek_test"))
    }
}

#[derive(Default)]
pub struct FakeNegotiator {
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl SdpNegotiator for FakeNegotiator {
    async fn negotiate(&self, _offer: &str, _key: &EphemeralKey) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RealtimeError::Negotiation("503 Service Unavailable".into()));
        }
        Ok(ANSWER_SDP.to_string())
    }
}

#[derive(Default)]
pub struct FakeSink {
    attached: Mutex<Option<String>>,
    pub detaches: AtomicUsize,
}

impl FakeSink {
    pub fn attached(&self) -> Option<String> {
        self.attached.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn attach(&self, stream: RemoteAudioStream) {
        *self.attached.lock().unwrap() = Some(stream.id().to_string());
    }

    async fn detach(&self) {
        *self.attached.lock().unwrap() = None;
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct Harness {
    pub factory: Arc<FakeFactory>,
    pub media: Arc<FakeMedia>,
    pub tokens: Arc<FakeTokens>,
    pub negotiator: Arc<FakeNegotiator>,
    pub sink: Arc<FakeSink>,
}

impl Harness {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transports: self.factory.clone(),
            media: self.media.clone(),
            tokens: self.tokens.clone(),
            negotiator: self.negotiator.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Polls `condition` until it holds or a second passes.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
