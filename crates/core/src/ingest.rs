//! Ingest demuxer: one inbound RTP stream into one recording.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::codec::{CodecDescriptor, CodecKind};
use crate::container::ContainerWriter;
use crate::error::Result;
use crate::media::RtpPacket;
use crate::media::vp8::{self, Vp8Packet};

pub const DEFAULT_RECORDINGS_DIR: &str = "recordings";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ingest-side configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory recordings are written into. Created if missing.
    pub recordings_dir: PathBuf,
    /// A source that delivers nothing for this long ends the session.
    pub idle_timeout: Duration,
    /// IVF timebase; one unit lasts `numerator / denominator` seconds.
    pub timebase_numerator: u32,
    pub timebase_denominator: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            recordings_dir: PathBuf::from(DEFAULT_RECORDINGS_DIR),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            timebase_numerator: 1,
            timebase_denominator: 30,
        }
    }
}

/// Inbound side of a transport session.
pub trait PacketSource: Send {
    /// Next packet in arrival order. `Ok(None)` means the stream ended.
    fn read_rtp(&mut self) -> impl Future<Output = Result<Option<RtpPacket>>> + Send;
}

impl PacketSource for mpsc::Receiver<RtpPacket> {
    async fn read_rtp(&mut self) -> Result<Option<RtpPacket>> {
        Ok(self.recv().await)
    }
}

/// Counters reported when an ingest session finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub packets: u64,
    pub frames_written: u64,
    pub keyframes: u64,
    /// Dimensions of the most recent key frame seen (VP8 only).
    pub dimensions: Option<(u16, u16)>,
}

/// Records a single inbound stream.
pub struct IngestSession {
    codec: &'static CodecDescriptor,
    writer: ContainerWriter,
    stats: IngestStats,
}

impl IngestSession {
    /// Select and create the container writer for `codec`.
    ///
    /// Fails with [`UnsupportedCodec`](crate::RelayError::UnsupportedCodec)
    /// before anything touches the filesystem.
    pub fn open(codec: &'static CodecDescriptor, config: &IngestConfig) -> Result<Self> {
        let writer = ContainerWriter::create(codec, config)?;
        tracing::info!(
            codec = codec.mime_type,
            payload_type = codec.payload_type,
            path = %writer.path().display(),
            "ingest session opened"
        );
        Ok(Self {
            codec,
            writer,
            stats: IngestStats::default(),
        })
    }

    pub fn codec(&self) -> &'static CodecDescriptor {
        self.codec
    }

    pub fn writer(&self) -> &ContainerWriter {
        &self.writer
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Inspect one packet and forward it to the writer.
    pub fn handle_packet(&mut self, packet: &RtpPacket) -> Result<()> {
        self.stats.packets += 1;

        if self.codec.kind() == Some(CodecKind::Vp8) {
            match Vp8Packet::parse(&packet.payload) {
                Some(parsed) if parsed.is_frame_start() => {
                    let (keyframe, width, height) = vp8::keyframe_dimensions(&parsed.payload);
                    if keyframe {
                        self.stats.keyframes += 1;
                        self.stats.dimensions = Some((width, height));
                        tracing::info!(width, height, seq = packet.header.sequence_number, "key frame");
                    }
                }
                Some(_) => {}
                None => {
                    tracing::debug!(seq = packet.header.sequence_number, "VP8 descriptor parse failed");
                }
            }
        }

        self.writer.write(packet)
    }

    /// Drain `source` into the recording until it reports end-of-stream.
    ///
    /// The writer is closed here on a clean end. On an error return the
    /// session is dropped and the writer closes itself.
    pub async fn run<S: PacketSource>(mut self, mut source: S) -> Result<IngestStats> {
        while let Some(packet) = source.read_rtp().await? {
            self.handle_packet(&packet)?;
        }

        self.stats.frames_written = self.writer.frames_written();
        self.writer.close()?;

        tracing::info!(
            codec = self.codec.mime_type,
            packets = self.stats.packets,
            frames = self.stats.frames_written,
            keyframes = self.stats.keyframes,
            "ingest session finished"
        );
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RelayError;
    use crate::codec::find_by_payload_type;
    use crate::container::{FrameSource, open_ivf};
    use crate::media::RtpHeader;

    fn config(dir: &tempfile::TempDir) -> IngestConfig {
        IngestConfig {
            recordings_dir: dir.path().join("recordings"),
            ..IngestConfig::default()
        }
    }

    fn packet(seq: u16, ts: u32, marker: bool, payload: &[u8]) -> RtpPacket {
        RtpPacket::new(
            RtpHeader {
                marker,
                payload_type: 96,
                sequence_number: seq,
                timestamp: ts,
                ssrc: 1,
            },
            payload.to_vec(),
        )
    }

    #[test]
    fn unsupported_codec_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir);
        let vp9 = find_by_payload_type(98).unwrap();
        assert!(matches!(IngestSession::open(vp9, &cfg), Err(RelayError::UnsupportedCodec(_))));
        assert!(!cfg.recordings_dir.exists());
    }

    #[test]
    fn counts_keyframes_on_frame_start_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = IngestSession::open(find_by_payload_type(96).unwrap(), &config(&dir)).unwrap();

        let key = [0x10, 0x50, 0x42, 0x00, 0x9D, 0x01, 0x2A, 0x80, 0x02, 0xE0, 0x01];
        session.handle_packet(&packet(0, 0, false, &key)).unwrap();
        // same bytes in a continuation packet are not a frame start
        let mut cont = key;
        cont[0] = 0x00;
        session.handle_packet(&packet(1, 0, true, &cont)).unwrap();
        // malformed descriptor: ignored, not an error
        session.handle_packet(&packet(2, 3000, true, &[0x80])).unwrap();

        assert_eq!(session.stats().packets, 3);
        assert_eq!(session.stats().keyframes, 1);
        assert_eq!(session.stats().dimensions, Some((640, 480)));
    }

    #[tokio::test]
    async fn run_closes_writer_at_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let session = IngestSession::open(find_by_payload_type(96).unwrap(), &config(&dir)).unwrap();
        let path = session.writer().path().to_path_buf();

        let (tx, rx) = mpsc::channel(8);
        let key = [0x10, 0x50, 0x42, 0x00, 0x9D, 0x01, 0x2A, 0x40, 0x01, 0xF0, 0x00];
        tx.send(packet(0, 0, true, &key)).await.unwrap();
        tx.send(packet(1, 3000, true, &[0x10, 0x01, 0x02])).await.unwrap();
        drop(tx);

        let stats = session.run(rx).await.unwrap();
        assert_eq!(stats.packets, 2);
        assert_eq!(stats.frames_written, 2);
        assert_eq!(stats.dimensions, Some((320, 240)));

        let reader = open_ivf(&path).unwrap();
        assert_eq!(reader.header().frame_count, 2);
        assert_eq!((reader.header().width, reader.header().height), (320, 240));
    }
}
