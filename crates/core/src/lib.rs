//! Record one inbound RTP video stream to disk, and replay a recording to
//! any number of viewers.
//!
//! ```text
//! ingest:  PacketSource ──> IngestSession ──> ContainerWriter ──> recordings/VP8.ivf
//! egress:  IvfReader ──> PlayoutScheduler ──> SharedTrack ──> TrackReader per viewer
//! ```

pub mod codec;
pub mod container;
pub mod error;
pub mod ingest;
pub mod media;
pub mod playout;
pub mod server;
pub mod session;
pub mod track;
pub mod transport;

pub use codec::{CodecDescriptor, CodecKind, find_by_payload_type, video_codecs};
pub use container::{ContainerWriter, Frame, FrameSource, IvfReader, Looping, open_ivf};
pub use error::{ContainerErrorKind, RelayError, Result};
pub use ingest::{IngestConfig, IngestSession, IngestStats, PacketSource};
pub use media::{RtpHeader, RtpPacket};
pub use playout::{PacketSink, PlayoutConfig, PlayoutScheduler};
pub use server::{Server, Viewer};
pub use track::{SharedTrack, TrackReader};
