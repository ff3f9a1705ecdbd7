//! Connection Manager
//!
//! Owns the lifecycle of a single live voice session: building the peer
//! transport, negotiating it, running the per-session event task and tearing
//! everything down again.

use crate::{
    bridge::{Diagnostic, ToolBridge},
    error::Result,
    negotiate::{RoundContext, SdpNegotiator, SessionTokenProvider},
    transport::{
        AudioSink, CONTROL_CHANNEL_LABEL, ChannelEvent, ControlChannel, MediaCapture,
        PeerTransport, RemoteAudioStream, TransportEvent, TransportFactory,
    },
};
use guesswho_core::tools::ToolRegistry;
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{Instrument, error, info, instrument, warn};

const DIAGNOSTIC_BUFFER: usize = 32;

pub const START_ABANDONED: &str = "Voice session start was abandoned";

/// How long `stop` waits for the session task to finish the message in hand.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// What the caller observes about the session.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Human-readable reason the last `start` failed.
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// The external services a session is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub transports: Arc<dyn TransportFactory>,
    pub media: Arc<dyn MediaCapture>,
    pub tokens: Arc<dyn SessionTokenProvider>,
    pub negotiator: Arc<dyn SdpNegotiator>,
    pub sink: Arc<dyn AudioSink>,
}

struct ActiveSession {
    transport: Arc<dyn PeerTransport>,
    channel: Arc<dyn ControlChannel>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ActiveSession {
    /// Lets the session task finish the message it is handling, then closes
    /// everything. The task is aborted if it does not wind down in time.
    async fn wind_down(self, sink: Arc<dyn AudioSink>) {
        let Self {
            transport,
            channel,
            shutdown,
            mut task,
        } = self;
        // The task may already have exited after a remote hang-up.
        let _ = shutdown.send(());
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("Session task did not finish in time; aborting.");
            task.abort();
        }
        channel.close().await;
        transport.close().await;
        sink.detach().await;
    }
}

/// Objects created by an in-flight `start`.
///
/// If the attempt fails they are closed by [`Pending::fail`]. If the `start`
/// future is dropped before settling (a caller-side timeout, for instance) the
/// closes are spawned from `Drop` and the state returns to Idle.
struct Pending {
    transport: Option<Arc<dyn PeerTransport>>,
    channel: Option<Arc<dyn ControlChannel>>,
    status: watch::Sender<ConnectionStatus>,
    settled: bool,
}

impl Pending {
    fn new(status: watch::Sender<ConnectionStatus>) -> Self {
        Self {
            transport: None,
            channel: None,
            status,
            settled: false,
        }
    }

    /// The created objects now belong to the running session.
    fn settle(mut self) {
        self.settled = true;
    }

    async fn fail(mut self, message: String) {
        if let Some(channel) = &self.channel {
            channel.close().await;
        }
        if let Some(transport) = &self.transport {
            transport.close().await;
        }
        self.settled = true;
        self.status.send_replace(ConnectionStatus {
            state: ConnectionState::Idle,
            last_error: Some(message),
        });
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!("Voice session start abandoned before it completed.");
        let channel = self.channel.take();
        let transport = self.transport.take();
        if channel.is_some() || transport.is_some() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Some(channel) = channel {
                            channel.close().await;
                        }
                        if let Some(transport) = transport {
                            transport.close().await;
                        }
                    });
                }
                Err(_) => warn!("Start abandoned outside a runtime; transport not closed."),
            }
        }
        self.status.send_replace(ConnectionStatus {
            state: ConnectionState::Idle,
            last_error: Some(START_ABANDONED.to_string()),
        });
    }
}

struct Established {
    transport: Arc<dyn PeerTransport>,
    channel: Arc<dyn ControlChannel>,
    transport_events: mpsc::Receiver<TransportEvent>,
    channel_events: mpsc::Receiver<ChannelEvent>,
}

/// Drives at most one voice session at a time.
pub struct ConnectionManager {
    collaborators: Collaborators,
    session: Option<ActiveSession>,
    status: watch::Sender<ConnectionStatus>,
    stream: watch::Sender<Option<RemoteAudioStream>>,
    diagnostics: broadcast::Sender<Diagnostic>,
}

impl ConnectionManager {
    pub fn new(collaborators: Collaborators) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        let (stream, _) = watch::channel(None);
        let (diagnostics, _) = broadcast::channel(DIAGNOSTIC_BUFFER);
        Self {
            collaborators,
            session: None,
            status,
            stream,
            diagnostics,
        }
    }

    /// Opens a session for `round` with the given tool set.
    ///
    /// Does nothing while a session is connecting or connected. On failure every
    /// object created by the attempt is closed, the state returns to
    /// [`ConnectionState::Idle`] and the reason is kept in `last_error`. The same
    /// cleanup happens if the returned future is dropped before it resolves.
    #[instrument(name = "voice_session_start", skip_all, fields(description = %round.description))]
    pub async fn start(&mut self, round: &RoundContext, tools: ToolRegistry) -> Result<()> {
        if self.session.is_some() {
            if self.state() != ConnectionState::Closed {
                info!("Session already active; ignoring start.");
                return Ok(());
            }
            // The remote side hung up; release what is left before reconnecting.
            self.stop().await;
        }

        self.status.send_replace(ConnectionStatus {
            state: ConnectionState::Connecting,
            last_error: None,
        });

        let mut pending = Pending::new(self.status.clone());
        let established = match self.establish(round, &mut pending).await {
            Ok(established) => established,
            Err(e) => {
                error!(error = %e, "Voice session failed to start");
                pending
                    .fail(format!("Failed to start voice session: {}", e))
                    .await;
                return Err(e);
            }
        };
        pending.settle();

        let (shutdown, shutdown_rx) = oneshot::channel();

        let bridge = ToolBridge::new(Arc::new(tools), self.diagnostics.clone());
        let span = tracing::info_span!("voice_session", description = %round.description);
        let task = tokio::spawn(
            run_session(
                established.channel.clone(),
                established.channel_events,
                established.transport_events,
                shutdown_rx,
                bridge,
                self.collaborators.sink.clone(),
                self.status.clone(),
                self.stream.clone(),
            )
            .instrument(span),
        );

        self.session = Some(ActiveSession {
            transport: established.transport,
            channel: established.channel,
            shutdown,
            task,
        });
        info!("Voice session negotiated; waiting for control channel.");
        Ok(())
    }

    async fn establish(&self, round: &RoundContext, pending: &mut Pending) -> Result<Established> {
        let c = &self.collaborators;

        let (transport, transport_events) = c.transports.create().await?;
        pending.transport = Some(transport.clone());

        let (channel, channel_events) = transport.create_control_channel(CONTROL_CHANNEL_LABEL).await?;
        pending.channel = Some(channel.clone());

        for track in c.media.open_microphone().await? {
            transport.add_local_audio(track).await?;
        }

        let offer = transport.create_offer().await?;
        let key = c.tokens.ephemeral_key(round).await?;
        let answer = c.negotiator.negotiate(&offer, &key).await?;
        transport.apply_answer(&answer).await?;

        Ok(Established {
            transport,
            channel,
            transport_events,
            channel_events,
        })
    }

    /// Tears the session down. Safe to call at any time, any number of times.
    ///
    /// A tool call already being answered is allowed to send its output before
    /// the channel is closed.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.wind_down(self.collaborators.sink.clone()).await;
        self.stream.send_replace(None);
        self.status.send_modify(|status| status.state = ConnectionState::Closed);
        info!("Voice session stopped.");
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().is_connected()
    }

    pub fn last_error(&self) -> Option<String> {
        self.status.borrow().last_error.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Publishes the remote audio stream while one is attached.
    pub fn subscribe_streams(&self) -> watch::Receiver<Option<RemoteAudioStream>> {
        self.stream.subscribe()
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(session.wind_down(self.collaborators.sink.clone()));
            }
            Err(_) => {
                session.task.abort();
                warn!("Connection manager dropped outside a runtime; session not closed.");
            }
        }
        self.stream.send_replace(None);
        self.status.send_modify(|status| status.state = ConnectionState::Closed);
    }
}

/// The per-session event loop. Control messages are handled strictly in order.
async fn run_session(
    channel: Arc<dyn ControlChannel>,
    mut channel_events: mpsc::Receiver<ChannelEvent>,
    mut transport_events: mpsc::Receiver<TransportEvent>,
    mut shutdown: oneshot::Receiver<()>,
    mut bridge: ToolBridge,
    sink: Arc<dyn AudioSink>,
    status: watch::Sender<ConnectionStatus>,
    stream: watch::Sender<Option<RemoteAudioStream>>,
) {
    let mut announced = false;
    let mut transport_open = true;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Session shutting down.");
                break;
            }
            event = channel_events.recv() => match event {
                Some(ChannelEvent::Open) => {
                    if announced {
                        continue;
                    }
                    announced = true;
                    if let Err(e) = bridge.announce(channel.as_ref()).await {
                        error!(error = %e, "Failed to announce tool set");
                        status.send_replace(ConnectionStatus {
                            state: ConnectionState::Closed,
                            last_error: Some(format!("Failed to announce tool set: {}", e)),
                        });
                        break;
                    }
                    status.send_modify(|s| s.state = ConnectionState::Connected);
                    info!(label = channel.label(), "Control channel open.");
                }
                Some(ChannelEvent::Message(text)) => {
                    if let Err(e) = bridge.handle_message(channel.as_ref(), &text).await {
                        error!(error = %e, "Failed to answer control message");
                    }
                }
                Some(ChannelEvent::Closed) | None => {
                    info!("Control channel closed by remote.");
                    status.send_modify(|s| s.state = ConnectionState::Closed);
                    break;
                }
            },
            event = transport_events.recv(), if transport_open => match event {
                Some(TransportEvent::RemoteStream(remote)) => {
                    info!(stream = remote.id(), "Remote audio attached.");
                    sink.attach(remote.clone()).await;
                    stream.send_replace(Some(remote));
                }
                Some(TransportEvent::Closed) => {
                    info!("Peer transport closed by remote.");
                    status.send_modify(|s| s.state = ConnectionState::Closed);
                    break;
                }
                None => transport_open = false,
            },
        }
    }
}
