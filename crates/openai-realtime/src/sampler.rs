//! Audio Energy Sampler
//!
//! Watches the remote audio stream published by the connection manager and
//! turns its loudness into a display scale, refreshed at roughly display rate.

use crate::transport::{AudioFrame, RemoteAudioStream};
use guesswho_core::energy::{DEFAULT_FFT_SIZE, EnergyConfig, FrequencyAnalyzer, NEUTRAL_SCALE};
use std::time::Duration;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, warn};

/// About 60 Hz.
pub const DEFAULT_TICK: Duration = Duration::from_millis(16);

#[derive(Debug, Clone)]
pub struct EnergySampler {
    config: EnergyConfig,
    tick: Duration,
    fft_size: usize,
}

/// A running sampler. Dropping the handle stops it.
pub struct SamplerHandle {
    scale: watch::Receiver<f32>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// The latest scale.
    pub fn scale(&self) -> f32 {
        *self.scale.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.scale.clone()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl EnergySampler {
    pub fn new(config: EnergyConfig) -> Self {
        Self {
            config,
            tick: DEFAULT_TICK,
            fft_size: DEFAULT_FFT_SIZE,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self
    }

    /// Starts sampling whatever stream `streams` currently announces.
    pub fn spawn(self, streams: watch::Receiver<Option<RemoteAudioStream>>) -> SamplerHandle {
        let (tx, scale) = watch::channel(NEUTRAL_SCALE);
        let task = tokio::spawn(self.run(streams, tx));
        SamplerHandle { scale, task }
    }

    async fn run(
        self,
        mut streams: watch::Receiver<Option<RemoteAudioStream>>,
        scale: watch::Sender<f32>,
    ) {
        loop {
            let current = streams.borrow_and_update().clone();
            let end = match current {
                Some(stream) => {
                    debug!(stream = stream.id(), "Sampling remote audio");
                    self.sample(&stream, &mut streams, &scale).await
                }
                None => SampleEnd::Ended,
            };
            // Neutral until the next stream produces a reading.
            scale.send_replace(NEUTRAL_SCALE);
            match end {
                SampleEnd::Replaced => {}
                SampleEnd::Ended => {
                    if streams.changed().await.is_err() {
                        return;
                    }
                }
                SampleEnd::WatchClosed => return,
            }
        }
    }

    /// Samples one stream until it is replaced, withdrawn or ends.
    async fn sample(
        &self,
        stream: &RemoteAudioStream,
        streams: &mut watch::Receiver<Option<RemoteAudioStream>>,
        scale: &watch::Sender<f32>,
    ) -> SampleEnd {
        let mut analyzer = FrequencyAnalyzer::new(self.fft_size);
        let mut frames = stream.subscribe();
        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = streams.changed() => {
                    if changed.is_err() {
                        return SampleEnd::WatchClosed;
                    }
                    let same = streams
                        .borrow()
                        .as_ref()
                        .is_some_and(|next| next == stream);
                    if !same {
                        return SampleEnd::Replaced;
                    }
                }
                frame = frames.recv() => match frame {
                    Ok(AudioFrame { samples, .. }) => analyzer.push_samples(&samples),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Energy sampler fell behind the audio stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => return SampleEnd::Ended,
                },
                _ = ticker.tick() => {
                    let energy = analyzer.average_energy();
                    scale.send_replace(self.config.scale_for(energy));
                }
            }
        }
    }
}

enum SampleEnd {
    /// The published stream changed; read it again.
    Replaced,
    /// The stream stopped producing audio; wait for a new one.
    Ended,
    WatchClosed,
}

impl Default for EnergySampler {
    fn default() -> Self {
        Self::new(EnergyConfig::default())
    }
}
