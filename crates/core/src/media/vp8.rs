//! VP8 RTP payload format (RFC 7741).
//!
//! Every VP8 RTP payload starts with a payload descriptor:
//!
//! ```text
//!       0 1 2 3 4 5 6 7
//!      +-+-+-+-+-+-+-+-+
//!      |X|R|N|S|R| PID | (REQUIRED)
//!      +-+-+-+-+-+-+-+-+
//! X:   |I|L|T|K| RSV   | (OPTIONAL)
//!      +-+-+-+-+-+-+-+-+
//! I:   |M| PictureID   | (OPTIONAL, 7 or 15 bits)
//!      +-+-+-+-+-+-+-+-+
//! L:   |   TL0PICIDX   | (OPTIONAL)
//!      +-+-+-+-+-+-+-+-+
//! T/K: |TID|Y| KEYIDX  | (OPTIONAL)
//!      +-+-+-+-+-+-+-+-+
//! ```
//!
//! `S=1, PID=0` marks the first packet of a frame. The VP8 bitstream
//! follows the descriptor; on the first packet it begins with the frame
//! tag, whose low bit is 0 for key frames.

use bytes::Bytes;

use super::Payloader;

const KEYFRAME_MIN_LEN: usize = 10;
const KEYFRAME_START_CODE: [u8; 3] = [0x9D, 0x01, 0x2A];

/// Parsed VP8 payload descriptor plus the bitstream slice it prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vp8Packet {
    /// S bit: start of a VP8 partition.
    pub start_of_partition: bool,
    /// Partition index (PID).
    pub partition_id: u8,
    pub picture_id: Option<u16>,
    /// VP8 bitstream bytes after the descriptor.
    pub payload: Bytes,
}

impl Vp8Packet {
    /// Split an RTP payload into descriptor fields and VP8 bitstream.
    ///
    /// Returns `None` when the descriptor runs past the end of the payload
    /// or leaves no bitstream bytes.
    pub fn parse(rtp_payload: &Bytes) -> Option<Self> {
        let b = rtp_payload.as_ref();
        let first = *b.first()?;
        let mut idx = 1usize;
        let mut picture_id = None;

        if first & 0x80 != 0 {
            let ext = *b.get(idx)?;
            idx += 1;
            if ext & 0x80 != 0 {
                let pid = *b.get(idx)?;
                if pid & 0x80 != 0 {
                    let low = *b.get(idx + 1)?;
                    picture_id = Some((((pid & 0x7f) as u16) << 8) | low as u16);
                    idx += 2;
                } else {
                    picture_id = Some(pid as u16);
                    idx += 1;
                }
            }
            if ext & 0x40 != 0 {
                idx += 1;
            }
            if ext & 0x30 != 0 {
                idx += 1;
            }
        }

        if idx >= b.len() {
            return None;
        }

        Some(Self {
            start_of_partition: first & 0x10 != 0,
            partition_id: first & 0x07,
            picture_id,
            payload: rtp_payload.slice(idx..),
        })
    }

    /// Whether this packet carries the first bytes of a frame.
    pub fn is_frame_start(&self) -> bool {
        self.start_of_partition && self.partition_id == 0
    }
}

/// Inspect the start of a VP8 frame for a key frame header.
///
/// Returns `(true, width, height)` for a key frame and `(false, 0, 0)`
/// otherwise. Short or non-matching input is not an error. Width and
/// height are the low 14 bits of their 16-bit little-endian fields; the
/// top two bits carry the scaling mode and are dropped.
pub fn keyframe_dimensions(payload: &[u8]) -> (bool, u16, u16) {
    if payload.len() < KEYFRAME_MIN_LEN {
        return (false, 0, 0);
    }
    // frame tag: low bit 0 means key frame
    if payload[0] & 0x01 != 0 {
        return (false, 0, 0);
    }
    if payload[3..6] != KEYFRAME_START_CODE {
        return (false, 0, 0);
    }

    let width = u16::from_le_bytes([payload[6], payload[7]]) & 0x3FFF;
    let height = u16::from_le_bytes([payload[8], payload[9]]) & 0x3FFF;
    (true, width, height)
}

/// VP8 RTP payloader.
///
/// Uses the minimal one-byte descriptor without a picture ID: `0x10`
/// (S=1, PID=0) on the first chunk of a frame and `0x00` on the rest.
#[derive(Debug, Default)]
pub struct Vp8Payloader;

pub const VP8_DESCRIPTOR_LEN: usize = 1;

impl Payloader for Vp8Payloader {
    fn payload(&mut self, mtu: usize, frame: &[u8]) -> Vec<Bytes> {
        if frame.is_empty() || mtu <= VP8_DESCRIPTOR_LEN {
            return Vec::new();
        }

        let max_fragment = mtu - VP8_DESCRIPTOR_LEN;
        let payloads: Vec<Bytes> = frame
            .chunks(max_fragment)
            .enumerate()
            .map(|(i, chunk)| {
                let mut out = Vec::with_capacity(VP8_DESCRIPTOR_LEN + chunk.len());
                out.push(if i == 0 { 0x10 } else { 0x00 });
                out.extend_from_slice(chunk);
                Bytes::from(out)
            })
            .collect();

        tracing::trace!(
            frame_bytes = frame.len(),
            fragments = payloads.len(),
            "VP8 frame payloaded"
        );

        payloads
    }

    fn codec_name(&self) -> &'static str {
        "VP8"
    }
}
