//! RTP packet model and codec payload formats.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded video frame travels as one or more RTP packets.
//! Every packet carries a 12-byte fixed header ([`rtp::RtpHeader`])
//! containing:
//!
//! - **Sequence number** (16-bit, wrapping): for reordering and loss detection.
//! - **Timestamp** (32-bit): media clock, 90 kHz for video.
//! - **SSRC** (32-bit): randomly chosen to identify the sender.
//! - **Marker bit**: set on the last packet of a frame.
//!
//! ## Codecs
//!
//! | Codec | Module | Direction |
//! |-------|--------|-----------|
//! | VP8 | [`vp8`] | payload (egress), depacketize + keyframe inspection (ingest) |
//! | H.264 | [`h264`] | depacketize to Annex B (ingest) |
//! | AV1 | [`av1`] | depacketize to OBU stream (ingest) |

pub mod av1;
pub mod h264;
pub mod rtp;
pub mod vp8;

use bytes::Bytes;

pub use rtp::{RtpHeader, RtpPacket, Sequencer};

/// Codec-specific RTP payloader.
///
/// Splits one encoded frame into RTP payloads no larger than `mtu` bytes,
/// each already carrying the codec's payload header. The caller wraps
/// them in RTP headers; the last payload of a frame gets the marker bit.
///
/// RTP header state lives in [`rtp::Sequencer`]; payloaders compose with
/// it rather than owning sequence numbers themselves.
pub trait Payloader: Send {
    /// Fragment `frame` into payloads of at most `mtu` bytes.
    ///
    /// Returns an empty vector for an empty frame or an `mtu` too small to
    /// carry any frame data.
    fn payload(&mut self, mtu: usize, frame: &[u8]) -> Vec<Bytes>;

    /// Codec name, e.g. `"VP8"`.
    fn codec_name(&self) -> &'static str;
}
