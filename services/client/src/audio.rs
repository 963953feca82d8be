//! Turning received audio messages into sequential playback.

use crate::audio_utils::{
    convert_f32_to_i16, convert_i16_to_f32, pcm16_from_bytes, pcm16_to_bytes, resample,
};
use crate::ws::{SessionConnection, SessionEvent, events};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use parley_core::{AudioSink, EventBus, PlaybackQueue, SubscriptionId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::{fs::File, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};

/// Turns the bytes of one audio message into something a sink can play.
#[async_trait]
pub trait AudioDecoder: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn decode(&self, data: Bytes) -> anyhow::Result<Self::Output>;
}

/// Mono f32 samples at a known rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Decodes little-endian PCM16, resampling when the stream rate differs
/// from the output rate.
#[derive(Debug, Clone, Copy)]
pub struct Pcm16Decoder {
    source_rate: u32,
    target_rate: u32,
}

impl Pcm16Decoder {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate,
        }
    }
}

#[async_trait]
impl AudioDecoder for Pcm16Decoder {
    type Output = DecodedAudio;

    async fn decode(&self, data: Bytes) -> anyhow::Result<DecodedAudio> {
        if data.len() % 2 != 0 {
            warn!(len = data.len(), "PCM16 payload has a trailing odd byte");
        }
        let samples = convert_i16_to_f32(&pcm16_from_bytes(&data));
        let (source_rate, target_rate) = (self.source_rate, self.target_rate);
        let samples = if source_rate == target_rate {
            samples
        } else {
            tokio::task::spawn_blocking(move || resample(&samples, source_rate, target_rate))
                .await
                .context("Resampling task failed")??
        };
        Ok(DecodedAudio {
            samples,
            sample_rate: target_rate,
        })
    }
}

/// Writes played audio to a raw PCM16 file, taking as long as the audio lasts.
pub struct PcmFileSink {
    path: PathBuf,
    file: Mutex<File>,
    paced: bool,
}

impl PcmFileSink {
    pub async fn create(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .await
            .with_context(|| format!("Failed to create audio output {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            paced: true,
        })
    }

    /// Disable real-time pacing, e.g. when only the file contents matter.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AudioSink for PcmFileSink {
    type Buffer = DecodedAudio;

    async fn play(&self, buffer: DecodedAudio) -> anyhow::Result<()> {
        let bytes = pcm16_to_bytes(&convert_f32_to_i16(&buffer.samples));
        {
            let mut file = self.file.lock().await;
            file.write_all(&bytes)
                .await
                .with_context(|| format!("Failed to write audio to {}", self.path.display()))?;
            file.flush().await?;
        }
        if self.paced {
            tokio::time::sleep(buffer.duration()).await;
        }
        Ok(())
    }

    fn release(&self) {
        debug!(path = %self.path.display(), "Audio output released");
    }
}

/// Plays every `audio-received` message of a session, one after another.
pub struct AudioPlayer<S: AudioSink> {
    queue: Arc<PlaybackQueue<S>>,
    events: Arc<EventBus<SessionEvent>>,
    subscription: SubscriptionId,
}

impl<S: AudioSink> AudioPlayer<S> {
    pub fn attach<D>(connection: &SessionConnection, decoder: D, sink: S) -> Self
    where
        D: AudioDecoder<Output = S::Buffer>,
    {
        let queue = Arc::new(PlaybackQueue::new(sink));
        let decoder = Arc::new(decoder);
        let playback = queue.clone();
        let subscription = connection.on(events::AUDIO_RECEIVED, move |event| {
            if let SessionEvent::AudioReceived { message_id, data } = event {
                debug!(%message_id, len = data.len(), "Queueing audio message");
                let decoder = decoder.clone();
                let data = data.clone();
                playback.enqueue_decoding(async move { decoder.decode(data).await });
            }
            Ok(())
        });

        Self {
            queue,
            events: connection.events(),
            subscription,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.queue.is_playing()
    }

    pub fn backlog_len(&self) -> usize {
        self.queue.backlog_len()
    }

    /// Drop everything queued and stop the current message.
    pub fn stop(&self) {
        self.queue.cleanup();
    }
}

impl<S: AudioSink> Drop for AudioPlayer<S> {
    fn drop(&mut self) {
        self.events.off(events::AUDIO_RECEIVED, self.subscription);
        self.queue.cleanup();
    }
}
