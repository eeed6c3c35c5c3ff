//! Single-producer, multi-consumer egress track.
//!
//! ```text
//! FrameSource ──> PlayoutScheduler ──> TrackWriter ──broadcast──> TrackReader (viewer 1)
//!                                                          ├────> TrackReader (viewer 2)
//!                                                          └────> ...
//! ```
//!
//! The composition root builds one [`SharedTrack`] per process and hands
//! clones to whoever attaches viewers. The first [`attach`](SharedTrack::attach)
//! starts the scheduler; later attaches only subscribe. Every reader sees
//! the same packets, byte for byte, in producer order, starting from the
//! moment it attached.
//!
//! If the scheduler fails the track stays open: attaches still succeed,
//! and every reader simply stops receiving packets. Only
//! [`stop`](SharedTrack::stop) closes the track.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::container::FrameSource;
use crate::error::{RelayError, Result};
use crate::media::RtpPacket;
use crate::playout::{PacketSink, PlayoutConfig, PlayoutScheduler};

/// Activation state. The frame source lives in `Idle` until the first
/// attach moves it into the scheduler task.
enum PlayoutState {
    Idle(Box<dyn FrameSource>),
    Streaming,
}

struct Inner {
    state: Mutex<PlayoutState>,
    config: PlayoutConfig,
    /// `None` once the track is stopped.
    sender: Mutex<Option<broadcast::Sender<RtpPacket>>>,
    shutdown: watch::Sender<bool>,
    activations: AtomicUsize,
    failed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the process-wide egress track. Cheap to clone.
#[derive(Clone)]
pub struct SharedTrack {
    inner: Arc<Inner>,
}

impl SharedTrack {
    /// Build an idle track over an already opened frame source.
    pub fn new(source: impl FrameSource + 'static, config: PlayoutConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PlayoutState::Idle(Box::new(source))),
                config,
                sender: Mutex::new(Some(sender)),
                shutdown,
                activations: AtomicUsize::new(0),
                failed: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        }
    }

    /// Subscribe a new reader, starting playout if this is the first one.
    ///
    /// Must be called from within a Tokio runtime. Fails with
    /// [`RelayError::TrackClosed`] after [`stop`](Self::stop), and with
    /// [`RelayError::InvalidConfig`] if the playout settings are unusable.
    pub fn attach(&self) -> Result<TrackReader> {
        self.inner.config.validate()?;
        let receiver = match &*self.inner.sender.lock() {
            Some(sender) => sender.subscribe(),
            None => return Err(RelayError::TrackClosed),
        };

        let source = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut *state, PlayoutState::Streaming) {
                PlayoutState::Idle(source) => Some(source),
                PlayoutState::Streaming => None,
            }
        };
        if let Some(source) = source {
            self.activate(source)?;
        }

        tracing::debug!(readers = receiver_len(&self.inner), "track reader attached");
        Ok(TrackReader {
            receiver,
            lagged: 0,
        })
    }

    fn activate(&self, source: Box<dyn FrameSource>) -> Result<()> {
        let sender = self
            .inner
            .sender
            .lock()
            .clone()
            .ok_or(RelayError::TrackClosed)?;
        let scheduler = PlayoutScheduler::new(source, TrackWriter { sender }, &self.inner.config)?;
        let shutdown = self.inner.shutdown.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let activation = self.inner.activations.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(activation, "track activated");

        let handle = tokio::spawn(async move {
            if let Err(e) = scheduler.run(shutdown).await {
                tracing::error!(error = %e, "track scheduler failed, delivery stalled");
                if let Some(inner) = weak.upgrade() {
                    inner.failed.store(true, Ordering::SeqCst);
                }
            }
        });
        *self.inner.task.lock() = Some(handle);
        Ok(())
    }

    /// How many times the scheduler has been started. Never more than one.
    pub fn activations(&self) -> usize {
        self.inner.activations.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(*self.inner.state.lock(), PlayoutState::Streaming)
    }

    /// The scheduler exited with an error. Readers get no more packets.
    pub fn is_failed(&self) -> bool {
        self.inner.failed.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// Stop playout. Readers drain what is buffered and then see `None`.
    pub fn stop(&self) {
        self.inner.sender.lock().take();
        self.inner.shutdown.send_replace(true);
        tracing::info!("track stopped");
    }

    /// Wait for the scheduler task to exit, if it was ever started.
    pub async fn join(&self) {
        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn receiver_len(inner: &Inner) -> usize {
    inner
        .sender
        .lock()
        .as_ref()
        .map_or(0, |sender| sender.receiver_count())
}

/// Scheduler-side end of the track.
pub struct TrackWriter {
    sender: broadcast::Sender<RtpPacket>,
}

impl PacketSink for TrackWriter {
    fn write_rtp(&mut self, packet: RtpPacket) -> Result<()> {
        // no readers right now is not a failure
        let _ = self.sender.send(packet);
        Ok(())
    }
}

/// Viewer-side end of the track.
pub struct TrackReader {
    receiver: broadcast::Receiver<RtpPacket>,
    lagged: u64,
}

impl TrackReader {
    /// Next packet, or `None` once the track has closed.
    ///
    /// A reader that falls more than the channel capacity behind loses the
    /// oldest packets and carries on.
    pub async fn recv(&mut self) -> Option<RtpPacket> {
        loop {
            match self.receiver.recv().await {
                Ok(packet) => return Some(packet),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.lagged += skipped;
                    tracing::warn!(skipped, "track reader lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Packets lost to lag so far.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}
