//! Strictly sequential audio playback.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

/// Something that can play a decoded buffer and report when it is done.
#[async_trait]
pub trait AudioSink: Send + Sync + 'static {
    type Buffer: Send + 'static;

    /// Play `buffer`, resolving once playback has completed.
    async fn play(&self, buffer: Self::Buffer) -> anyhow::Result<()>;

    /// Release any held output resource. Called from [`PlaybackQueue::cleanup`].
    fn release(&self) {}
}

enum Slot<B> {
    Ready(B),
    Decoding(JoinHandle<anyhow::Result<B>>),
}

struct QueueState<B> {
    backlog: VecDeque<Slot<B>>,
    playing: bool,
    generation: u64,
    driver: Option<JoinHandle<()>>,
    /// The decode the driver is currently waiting on.
    decoding: Option<AbortHandle>,
}

impl<B> QueueState<B> {
    /// Abort the driver and every decode it owns or is waiting on.
    fn abort_tasks(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        if let Some(decode) = self.decoding.take() {
            decode.abort();
        }
        for slot in self.backlog.drain(..) {
            if let Slot::Decoding(handle) = slot {
                handle.abort();
            }
        }
    }
}

/// Plays buffers one at a time in the order they were enqueued.
///
/// A second buffer never starts before the previous one reports completion.
/// Buffers still being decoded hold their place in line, so a slow decode
/// delays everything behind it rather than being overtaken.
pub struct PlaybackQueue<S: AudioSink> {
    sink: Arc<S>,
    state: Arc<Mutex<QueueState<S::Buffer>>>,
}

impl<S: AudioSink> PlaybackQueue<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(sink),
            state: Arc::new(Mutex::new(QueueState {
                backlog: VecDeque::new(),
                playing: false,
                generation: 0,
                driver: None,
                decoding: None,
            })),
        }
    }

    /// Queue a buffer that is ready to play.
    pub fn enqueue(&self, buffer: S::Buffer) {
        self.push(Slot::Ready(buffer));
    }

    /// Queue a buffer that is still being decoded.
    ///
    /// The decode starts immediately; playback order is still enqueue order.
    pub fn enqueue_decoding<F>(&self, decode: F)
    where
        F: Future<Output = anyhow::Result<S::Buffer>> + Send + 'static,
    {
        self.push(Slot::Decoding(tokio::spawn(decode)));
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    /// Buffers waiting behind the one currently playing.
    pub fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// Discard the backlog, stop the current item, and release the sink.
    pub fn cleanup(&self) {
        {
            let mut state = self.state.lock();
            state.playing = false;
            state.generation += 1;
            state.abort_tasks();
        }
        self.sink.release();
        debug!("Playback queue cleaned up");
    }

    fn push(&self, slot: Slot<S::Buffer>) {
        let mut state = self.state.lock();
        state.backlog.push_back(slot);
        if !state.playing {
            state.playing = true;
            let generation = state.generation;
            state.driver = Some(tokio::spawn(drive(
                self.sink.clone(),
                self.state.clone(),
                generation,
            )));
        }
    }
}

impl<S: AudioSink> Drop for PlaybackQueue<S> {
    fn drop(&mut self) {
        self.state.lock().abort_tasks();
    }
}

async fn drive<S: AudioSink>(
    sink: Arc<S>,
    state: Arc<Mutex<QueueState<S::Buffer>>>,
    generation: u64,
) {
    loop {
        let slot = {
            let mut state = state.lock();
            if state.generation != generation {
                return;
            }
            match state.backlog.pop_front() {
                Some(slot) => {
                    if let Slot::Decoding(handle) = &slot {
                        state.decoding = Some(handle.abort_handle());
                    }
                    slot
                }
                None => {
                    state.playing = false;
                    state.driver = None;
                    return;
                }
            }
        };

        let buffer = match slot {
            Slot::Ready(buffer) => buffer,
            Slot::Decoding(handle) => match finish_decode(&state, handle).await {
                Ok(Ok(buffer)) => buffer,
                Ok(Err(e)) => {
                    warn!(error = ?e, "Audio decode failed, skipping buffer");
                    continue;
                }
                Err(e) => {
                    warn!(error = ?e, "Audio decode task did not complete");
                    continue;
                }
            },
        };

        if let Err(e) = sink.play(buffer).await {
            warn!(error = ?e, "Audio playback failed");
        }
    }
}

async fn finish_decode<B>(
    state: &Mutex<QueueState<B>>,
    handle: JoinHandle<anyhow::Result<B>>,
) -> Result<anyhow::Result<B>, tokio::task::JoinError> {
    let result = handle.await;
    state.lock().decoding = None;
    result
}
