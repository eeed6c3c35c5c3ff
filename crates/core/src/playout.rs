//! Playout scheduler: paces a recorded IVF file out as VP8 RTP.
//!
//! One frame per timebase unit. Each frame is fragmented by the VP8
//! payloader, wrapped in RTP headers from a [`Sequencer`] (marker on the
//! last chunk), and written to a [`PacketSink`]. At end of file the
//! source rewinds and playback continues; the RTP timestamp keeps growing
//! across the wrap so receivers never see time go backwards.

use rand::RngExt;
use tokio::sync::watch;

use crate::codec::VIDEO_CLOCK_RATE;
use crate::container::{FrameSource, IvfHeader, Looping};
use crate::error::{RelayError, Result};
use crate::media::vp8::{VP8_DESCRIPTOR_LEN, Vp8Payloader};
use crate::media::{Payloader, RtpPacket, Sequencer};

pub const DEFAULT_MTU: usize = 1200;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Egress-side configuration.
#[derive(Debug, Clone)]
pub struct PlayoutConfig {
    /// Largest RTP payload emitted, descriptor included.
    pub mtu: usize,
    pub payload_type: u8,
    /// Random when `None`.
    pub ssrc: Option<u32>,
    /// Random when `None`.
    pub initial_sequence: Option<u16>,
    /// Packets buffered per viewer before a slow viewer starts losing them.
    pub channel_capacity: usize,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            payload_type: 96,
            ssrc: None,
            initial_sequence: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl PlayoutConfig {
    /// Reject settings under which no packet could ever be emitted.
    pub fn validate(&self) -> Result<()> {
        if self.mtu <= VP8_DESCRIPTOR_LEN {
            return Err(RelayError::InvalidConfig(format!(
                "mtu {} leaves no room after the {VP8_DESCRIPTOR_LEN}-byte payload descriptor",
                self.mtu
            )));
        }
        if self.channel_capacity == 0 {
            return Err(RelayError::InvalidConfig("channel capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Where the scheduler delivers packets.
///
/// A failed write stops the scheduler.
pub trait PacketSink: Send {
    fn write_rtp(&mut self, packet: RtpPacket) -> Result<()>;
}

/// Convert a container pts into 90 kHz RTP ticks.
pub fn rescale_pts(pts: u64, header: &IvfHeader) -> u64 {
    let ticks = pts as u128 * VIDEO_CLOCK_RATE as u128 * header.timebase_numerator as u128
        / header.timebase_denominator.max(1) as u128;
    ticks as u64
}

pub struct PlayoutScheduler<S, K> {
    frames: Looping<S>,
    sink: K,
    payloader: Vp8Payloader,
    sequencer: Sequencer,
    mtu: usize,
    /// Added to every pts; grows by one pass length per wrap.
    loop_offset: u64,
    /// First pts of the current pass through the file.
    pass_start: Option<u64>,
    last_pts: u64,
    frames_sent: u64,
}

impl<S: FrameSource, K: PacketSink> PlayoutScheduler<S, K> {
    pub fn new(source: S, sink: K, config: &PlayoutConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = rand::rng();
        let sequencer = Sequencer::new(
            config.payload_type,
            config.ssrc.unwrap_or_else(|| rng.random()),
            config.initial_sequence.unwrap_or_else(|| rng.random()),
        );

        tracing::debug!(
            ssrc = sequencer.ssrc,
            payload_type = config.payload_type,
            mtu = config.mtu,
            "playout scheduler created"
        );

        Ok(Self {
            frames: Looping::new(source),
            sink,
            payloader: Vp8Payloader::default(),
            sequencer,
            mtu: config.mtu,
            loop_offset: 0,
            pass_start: None,
            last_pts: 0,
            frames_sent: 0,
        })
    }

    pub fn header(&self) -> &IvfHeader {
        self.frames.header()
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Read the next frame and emit it as RTP. Returns the packet count.
    pub fn emit_frame(&mut self) -> Result<usize> {
        let (frame, wrapped) = self.frames.next_frame()?;
        let pass_start = *self.pass_start.get_or_insert(frame.pts);
        if wrapped {
            // one pass spans first..=last pts, whatever the first pts is
            self.loop_offset += (self.last_pts + 1).saturating_sub(pass_start);
            self.pass_start = Some(frame.pts);
            tracing::debug!(loop_offset = self.loop_offset, "playout looped");
        }
        self.last_pts = frame.pts;

        let timestamp = rescale_pts(frame.pts + self.loop_offset, self.frames.header()) as u32;
        let chunks = self.payloader.payload(self.mtu, &frame.data);
        let count = chunks.len();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let header = self.sequencer.next_header(i + 1 == count, timestamp);
            self.sink.write_rtp(RtpPacket::new(header, chunk))?;
        }

        self.frames_sent += 1;
        tracing::trace!(pts = frame.pts, timestamp, packets = count, "frame sent");
        Ok(count)
    }

    /// Emit frames forever, one per frame interval, until `shutdown`
    /// becomes `true` (or its sender is dropped) or an error occurs.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let interval = self.frames.header().frame_interval();
        tracing::info!(?interval, "playout started");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            if let Err(e) = self.emit_frame() {
                tracing::error!(error = %e, frames = self.frames_sent, "playout stopped");
                return Err(e);
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(frames = self.frames_sent, "playout finished");
        Ok(())
    }
}
