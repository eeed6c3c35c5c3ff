use std::io::Write;

use crate::error::Result;
use crate::media::RtpPacket;
use crate::media::h264::{self, H264Depacketizer};

/// Writes an H.264 RTP stream as an Annex B byte stream.
///
/// Packets before the first key frame (SPS) are discarded so the file
/// starts decodable. There is no file header and no geometry.
pub struct AnnexBWriter<W: Write> {
    inner: W,
    depacketizer: H264Depacketizer,
    seen_keyframe: bool,
    frames: u64,
}

impl<W: Write> AnnexBWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            depacketizer: H264Depacketizer::new(),
            seen_keyframe: false,
            frames: 0,
        }
    }

    pub fn write_rtp(&mut self, packet: &RtpPacket) -> Result<()> {
        if packet.payload.is_empty() {
            return Ok(());
        }
        if !self.seen_keyframe {
            if !h264::is_keyframe(&packet.payload) {
                return Ok(());
            }
            tracing::debug!(seq = packet.header.sequence_number, "first H.264 key frame");
            self.seen_keyframe = true;
        }

        let annex_b = self.depacketizer.depacketize(&packet.payload);
        if !annex_b.is_empty() {
            self.inner.write_all(&annex_b)?;
        }
        if packet.header.marker {
            self.frames += 1;
        }
        Ok(())
    }

    /// Access units completed so far (marker-bit packets written).
    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    pub fn finalize(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
