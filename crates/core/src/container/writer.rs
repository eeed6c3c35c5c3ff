use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::annexb::AnnexBWriter;
use super::ivf::{FOURCC_AV1, FOURCC_VP8, IvfHeader, IvfWriter};
use crate::codec::{CodecDescriptor, CodecKind, VIDEO_CLOCK_RATE};
use crate::error::{RelayError, Result};
use crate::ingest::IngestConfig;
use crate::media::RtpPacket;
use crate::media::av1::{self, Av1Depacketizer, TEMPORAL_DELIMITER};
use crate::media::vp8::{self, Vp8Packet};

/// Which container a negotiated codec is recorded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// IVF with the given FourCC (VP8, AV1).
    Ivf([u8; 4]),
    /// Annex B byte stream (H.264).
    AnnexB,
}

impl ContainerKind {
    /// Total mapping from codec to container. Codecs without a writer
    /// (VP9, rtx, anything unknown) are a configuration error.
    pub fn for_codec(codec: &CodecDescriptor) -> Result<Self> {
        match codec.kind() {
            Some(CodecKind::Vp8) => Ok(Self::Ivf(FOURCC_VP8)),
            Some(CodecKind::Av1) => Ok(Self::Ivf(FOURCC_AV1)),
            Some(CodecKind::H264) => Ok(Self::AnnexB),
            Some(CodecKind::Vp9) | None => Err(RelayError::UnsupportedCodec(codec.mime_type.to_string())),
        }
    }

    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ivf(_) => "ivf",
            Self::AnnexB => "h264",
        }
    }

    /// `<dir>/<subtype>.<ext>`, e.g. `recordings/VP8.ivf`.
    pub fn recording_path(&self, dir: &Path, codec: &CodecDescriptor) -> PathBuf {
        dir.join(format!("{}.{}", codec.subtype(), self.extension()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IvfCodec {
    Vp8,
    Av1,
}

/// Unwraps 32-bit RTP timestamps into a monotonically growing tick count.
#[derive(Debug, Default)]
struct RtpClock {
    last: Option<u32>,
    elapsed: u64,
}

impl RtpClock {
    fn advance(&mut self, timestamp: u32) -> u64 {
        match self.last {
            None => self.last = Some(timestamp),
            Some(last) => {
                let delta = timestamp.wrapping_sub(last) as i32;
                // reordered frames keep the current position
                if delta > 0 {
                    self.elapsed += delta as u64;
                    self.last = Some(timestamp);
                }
            }
        }
        self.elapsed
    }
}

/// Assembles VP8 or AV1 RTP packets into IVF frames.
///
/// A frame is the run of packets sharing one timestamp, ended by the
/// marker bit. Written pts strictly increase, even when the sender's
/// frame rate is finer than the timebase. If the timestamp changes before a marker arrives, the
/// pending frame is written as it stands. Nothing is written before the
/// first key frame (VP8) or new coded video sequence (AV1).
pub struct IvfRtpWriter<W: Write + Seek> {
    ivf: IvfWriter<W>,
    codec: IvfCodec,
    av1: Av1Depacketizer,
    seen_keyframe: bool,
    dimensions_known: bool,
    frame: Vec<u8>,
    frame_timestamp: Option<u32>,
    clock: RtpClock,
    last_pts: Option<u64>,
}

impl<W: Write + Seek> IvfRtpWriter<W> {
    pub fn new(inner: W, fourcc: [u8; 4], timebase_numerator: u32, timebase_denominator: u32) -> Result<Self> {
        let codec = if fourcc == FOURCC_AV1 { IvfCodec::Av1 } else { IvfCodec::Vp8 };
        let header = IvfHeader::new(fourcc, timebase_numerator, timebase_denominator);
        Ok(Self {
            ivf: IvfWriter::new(inner, header)?,
            codec,
            av1: Av1Depacketizer::new(),
            seen_keyframe: false,
            dimensions_known: false,
            frame: Vec::new(),
            frame_timestamp: None,
            clock: RtpClock::default(),
            last_pts: None,
        })
    }

    pub fn header(&self) -> &IvfHeader {
        self.ivf.header()
    }

    pub fn write_rtp(&mut self, packet: &RtpPacket) -> Result<()> {
        if packet.payload.is_empty() {
            return Ok(());
        }
        let timestamp = packet.header.timestamp;
        if self.frame_timestamp.is_some_and(|ts| ts != timestamp) {
            tracing::debug!(timestamp, "frame ended without marker");
            self.flush_frame()?;
        }

        match self.codec {
            IvfCodec::Vp8 => {
                let Some(parsed) = Vp8Packet::parse(&packet.payload) else {
                    tracing::debug!(seq = packet.header.sequence_number, "malformed VP8 descriptor");
                    return Ok(());
                };
                if parsed.is_frame_start() {
                    let (keyframe, width, height) = vp8::keyframe_dimensions(&parsed.payload);
                    if !self.seen_keyframe && parsed.payload[0] & 0x01 != 0 {
                        return Ok(());
                    }
                    self.seen_keyframe = true;
                    if keyframe && !self.dimensions_known {
                        self.ivf.set_dimensions(width, height);
                        self.dimensions_known = true;
                    }
                } else if self.frame.is_empty() {
                    // continuation of a frame we never started
                    return Ok(());
                }
                self.frame.extend_from_slice(&parsed.payload);
            }
            IvfCodec::Av1 => {
                if !self.seen_keyframe {
                    if !av1::starts_new_sequence(&packet.payload) {
                        return Ok(());
                    }
                    self.seen_keyframe = true;
                }
                let obus = self.av1.depacketize(&packet.payload);
                self.frame.extend_from_slice(&obus);
            }
        }

        self.frame_timestamp = Some(timestamp);
        if packet.header.marker {
            self.flush_frame()?;
        }
        Ok(())
    }

    fn flush_frame(&mut self) -> Result<()> {
        let Some(timestamp) = self.frame_timestamp.take() else {
            return Ok(());
        };
        if self.frame.is_empty() {
            return Ok(());
        }

        let header = self.ivf.header();
        let ticks = self.clock.advance(timestamp);
        let rescaled = ticks * header.timebase_denominator as u64
            / (VIDEO_CLOCK_RATE as u64 * header.timebase_numerator as u64);
        // frames closer together than one timebase unit still get distinct pts
        let pts = match self.last_pts {
            Some(last) => rescaled.max(last + 1),
            None => rescaled,
        };
        self.last_pts = Some(pts);

        let frame = std::mem::take(&mut self.frame);
        match self.codec {
            IvfCodec::Vp8 => self.ivf.write_frame(&frame, pts)?,
            IvfCodec::Av1 => {
                let mut unit = Vec::with_capacity(TEMPORAL_DELIMITER.len() + frame.len());
                unit.extend_from_slice(&TEMPORAL_DELIMITER);
                unit.extend_from_slice(&frame);
                self.ivf.write_frame(&unit, pts)?;
            }
        }

        tracing::trace!(pts, bytes = frame.len(), "IVF frame written");
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.ivf.header().frame_count as u64
    }

    /// Discard any partial frame and rewrite the header.
    pub fn finalize(&mut self) -> Result<()> {
        if !self.frame.is_empty() {
            tracing::debug!(bytes = self.frame.len(), "partial frame discarded on close");
            self.frame.clear();
            self.frame_timestamp = None;
        }
        self.ivf.finalize()
    }

    pub fn into_inner(self) -> W {
        self.ivf.into_inner()
    }
}

enum Variant {
    Ivf(IvfRtpWriter<BufWriter<File>>),
    AnnexB(AnnexBWriter<BufWriter<File>>),
}

enum WriterState {
    Open(Variant),
    Closed,
}

/// Per-session container writer.
///
/// A closed set of variants behind `write`/`close`, selected once from
/// the negotiated codec. The internal lock lets a finalize path close the
/// writer while the ingest loop is mid-write. The file is closed exactly
/// once: by [`close`](Self::close) or, on any other exit path, by `Drop`.
pub struct ContainerWriter {
    path: PathBuf,
    kind: ContainerKind,
    state: Mutex<WriterState>,
}

impl ContainerWriter {
    /// Create the recording file for `codec` under the configured
    /// directory, replacing any previous recording of the same codec.
    pub fn create(codec: &CodecDescriptor, config: &IngestConfig) -> Result<Self> {
        let kind = ContainerKind::for_codec(codec)?;
        fs::create_dir_all(&config.recordings_dir)?;
        let path = kind.recording_path(&config.recordings_dir, codec);
        let file = BufWriter::new(File::create(&path)?);

        let variant = match kind {
            ContainerKind::Ivf(fourcc) => Variant::Ivf(IvfRtpWriter::new(
                file,
                fourcc,
                config.timebase_numerator,
                config.timebase_denominator,
            )?),
            ContainerKind::AnnexB => Variant::AnnexB(AnnexBWriter::new(file)),
        };

        tracing::info!(path = %path.display(), codec = codec.mime_type, "recording opened");

        Ok(Self {
            path,
            kind,
            state: Mutex::new(WriterState::Open(variant)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), WriterState::Closed)
    }

    pub fn write(&self, packet: &RtpPacket) -> Result<()> {
        match &mut *self.state.lock() {
            WriterState::Open(Variant::Ivf(w)) => w.write_rtp(packet),
            WriterState::Open(Variant::AnnexB(w)) => w.write_rtp(packet),
            WriterState::Closed => Err(RelayError::WriterClosed),
        }
    }

    pub fn frames_written(&self) -> u64 {
        match &*self.state.lock() {
            WriterState::Open(Variant::Ivf(w)) => w.frames_written(),
            WriterState::Open(Variant::AnnexB(w)) => w.frames_written(),
            WriterState::Closed => 0,
        }
    }

    /// Flush and finalize the file. A second call returns
    /// [`RelayError::AlreadyClosed`].
    pub fn close(&self) -> Result<()> {
        let state = std::mem::replace(&mut *self.state.lock(), WriterState::Closed);
        let frames = match state {
            WriterState::Closed => return Err(RelayError::AlreadyClosed),
            WriterState::Open(Variant::Ivf(mut w)) => {
                w.finalize()?;
                w.frames_written()
            }
            WriterState::Open(Variant::AnnexB(mut w)) => {
                w.finalize()?;
                w.frames_written()
            }
        };
        tracing::info!(path = %self.path.display(), frames, "recording closed");
        Ok(())
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!(path = %self.path.display(), error = %e, "closing recording on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::find_by_payload_type;
    use crate::container::FrameSource;
    use crate::container::ivf::IvfReader;
    use crate::media::RtpHeader;
    use std::io::Cursor;

    fn packet(seq: u16, ts: u32, marker: bool, payload: Vec<u8>) -> RtpPacket {
        RtpPacket::new(
            RtpHeader {
                marker,
                payload_type: 96,
                sequence_number: seq,
                timestamp: ts,
                ssrc: 7,
            },
            payload,
        )
    }

    fn vp8_keyframe(width: u16, height: u16) -> Vec<u8> {
        let mut b = vec![0x10, 0x50, 0x42, 0x00, 0x9D, 0x01, 0x2A];
        b.extend_from_slice(&width.to_le_bytes());
        b.extend_from_slice(&height.to_le_bytes());
        b
    }

    #[test]
    fn container_selection() {
        let vp8 = find_by_payload_type(96).unwrap();
        let h264 = find_by_payload_type(102).unwrap();
        let av1 = find_by_payload_type(45).unwrap();
        assert_eq!(ContainerKind::for_codec(vp8).unwrap(), ContainerKind::Ivf(FOURCC_VP8));
        assert_eq!(ContainerKind::for_codec(av1).unwrap(), ContainerKind::Ivf(FOURCC_AV1));
        assert_eq!(ContainerKind::for_codec(h264).unwrap(), ContainerKind::AnnexB);

        let dir = Path::new("recordings");
        assert_eq!(
            ContainerKind::Ivf(FOURCC_VP8).recording_path(dir, vp8),
            dir.join("VP8.ivf")
        );
        assert_eq!(ContainerKind::AnnexB.recording_path(dir, h264), dir.join("H264.h264"));
    }

    #[test]
    fn vp9_and_rtx_unsupported() {
        for pt in [98, 97] {
            let codec = find_by_payload_type(pt).unwrap();
            assert!(matches!(
                ContainerKind::for_codec(codec),
                Err(RelayError::UnsupportedCodec(_))
            ));
        }
    }

    #[test]
    fn vp8_frames_assembled_after_keyframe() {
        let mut w = IvfRtpWriter::new(Cursor::new(Vec::new()), FOURCC_VP8, 1, 30).unwrap();

        // interframe before any key frame: dropped
        w.write_rtp(&packet(0, 0, true, vec![0x10, 0x01, 0xAA])).unwrap();
        assert_eq!(w.frames_written(), 0);

        let key = vp8_keyframe(352, 288);
        w.write_rtp(&packet(1, 3000, false, key.clone())).unwrap();
        w.write_rtp(&packet(2, 3000, true, vec![0x00, 0xEE, 0xFF])).unwrap();
        w.write_rtp(&packet(3, 6000, true, vec![0x10, 0x01, 0x11])).unwrap();
        w.finalize().unwrap();
        assert_eq!(w.frames_written(), 2);

        let mut r = IvfReader::new(Cursor::new(w.into_inner().into_inner())).unwrap();
        assert_eq!((r.header().width, r.header().height), (352, 288));

        let f0 = r.next_frame().unwrap().unwrap();
        let mut expected = key[1..].to_vec();
        expected.extend_from_slice(&[0xEE, 0xFF]);
        assert_eq!(&f0.data[..], &expected[..]);
        assert_eq!(f0.pts, 0);
        assert!(f0.keyframe);

        let f1 = r.next_frame().unwrap().unwrap();
        assert_eq!(&f1.data[..], &[0x01, 0x11]);
        assert_eq!(f1.pts, 1);
    }

    #[test]
    fn timestamp_change_flushes_frame_missing_marker() {
        let mut w = IvfRtpWriter::new(Cursor::new(Vec::new()), FOURCC_VP8, 1, 30).unwrap();
        w.write_rtp(&packet(0, 0, false, vp8_keyframe(64, 64))).unwrap();
        w.write_rtp(&packet(1, 3000, true, vec![0x10, 0x01])).unwrap();
        assert_eq!(w.frames_written(), 2);
    }

    #[test]
    fn rtp_timestamp_wrap_keeps_pts_growing() {
        let mut w = IvfRtpWriter::new(Cursor::new(Vec::new()), FOURCC_VP8, 1, 30).unwrap();
        let start = u32::MAX - 2999;
        w.write_rtp(&packet(0, start, true, vp8_keyframe(64, 64))).unwrap();
        w.write_rtp(&packet(1, start.wrapping_add(3000), true, vec![0x10, 0x01])).unwrap();
        w.write_rtp(&packet(2, start.wrapping_add(6000), true, vec![0x10, 0x01])).unwrap();
        w.finalize().unwrap();

        let mut r = IvfReader::new(Cursor::new(w.into_inner().into_inner())).unwrap();
        let pts: Vec<u64> = std::iter::from_fn(|| r.next_frame().unwrap()).map(|f| f.pts).collect();
        assert_eq!(pts, vec![0, 1, 2]);
    }

    #[test]
    fn pts_stay_distinct_above_timebase_rate() {
        // 60 fps into a 1/30 timebase
        let mut w = IvfRtpWriter::new(Cursor::new(Vec::new()), FOURCC_VP8, 1, 30).unwrap();
        w.write_rtp(&packet(0, 0, true, vp8_keyframe(64, 64))).unwrap();
        for (i, ts) in [1500u32, 3000, 4500].into_iter().enumerate() {
            w.write_rtp(&packet(i as u16 + 1, ts, true, vec![0x10, 0x01])).unwrap();
        }
        w.finalize().unwrap();

        let mut r = IvfReader::new(Cursor::new(w.into_inner().into_inner())).unwrap();
        let pts: Vec<u64> = std::iter::from_fn(|| r.next_frame().unwrap()).map(|f| f.pts).collect();
        assert_eq!(pts, vec![0, 1, 2, 3]);
    }

    #[test]
    fn av1_temporal_units_written_after_sequence_start() {
        let mut w = IvfRtpWriter::new(Cursor::new(Vec::new()), FOURCC_AV1, 1, 30).unwrap();
        let frame_hdr = 6 << 3;
        // no N bit yet: skipped
        w.write_rtp(&packet(0, 0, true, vec![0x10, frame_hdr, 0x01])).unwrap();
        w.write_rtp(&packet(1, 3000, true, vec![0x18, frame_hdr, 0xAB])).unwrap();
        w.finalize().unwrap();
        assert_eq!(w.frames_written(), 1);

        let mut r = IvfReader::new(Cursor::new(w.into_inner().into_inner())).unwrap();
        assert_eq!(&r.header().fourcc, b"AV01");
        let f = r.next_frame().unwrap().unwrap();
        assert_eq!(&f.data[..], &[0x12, 0x00, frame_hdr | 0x02, 1, 0xAB]);
        assert!(!f.keyframe);
    }

    #[test]
    fn av1_sequence_header_marks_keyframe() {
        let mut w = IvfRtpWriter::new(Cursor::new(Vec::new()), FOURCC_AV1, 1, 30).unwrap();
        let (seq_hdr, frame_hdr) = (1 << 3, 6 << 3);
        // W=2, N=1: sequence header then frame
        w.write_rtp(&packet(0, 0, true, vec![0x28, 2, seq_hdr, 0x01, frame_hdr, 0xAB])).unwrap();
        w.write_rtp(&packet(1, 3000, true, vec![0x10, frame_hdr, 0xCD])).unwrap();
        w.finalize().unwrap();

        let mut r = IvfReader::new(Cursor::new(w.into_inner().into_inner())).unwrap();
        let first = r.next_frame().unwrap().unwrap();
        assert_eq!(&first.data[..], &[0x12, 0x00, seq_hdr | 0x02, 1, 0x01, frame_hdr | 0x02, 1, 0xAB]);
        assert!(first.keyframe);
        assert!(!r.next_frame().unwrap().unwrap().keyframe);
    }

    #[test]
    fn close_twice_and_write_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig {
            recordings_dir: dir.path().to_path_buf(),
            ..IngestConfig::default()
        };
        let writer = ContainerWriter::create(find_by_payload_type(96).unwrap(), &config).unwrap();
        assert_eq!(writer.path(), dir.path().join("VP8.ivf"));

        writer.close().unwrap();
        assert!(writer.is_closed());
        assert!(matches!(writer.close(), Err(RelayError::AlreadyClosed)));
        assert!(matches!(
            writer.write(&packet(0, 0, true, vp8_keyframe(1, 1))),
            Err(RelayError::WriterClosed)
        ));
    }

    #[test]
    fn drop_closes_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig {
            recordings_dir: dir.path().to_path_buf(),
            ..IngestConfig::default()
        };
        let path = {
            let writer = ContainerWriter::create(find_by_payload_type(96).unwrap(), &config).unwrap();
            writer.write(&packet(0, 0, true, vp8_keyframe(176, 144))).unwrap();
            writer.path().to_path_buf()
        };
        let mut r = IvfReader::new(File::open(path).unwrap()).unwrap();
        assert_eq!(r.header().frame_count, 1);
        assert_eq!(r.header().width, 176);
        assert!(r.next_frame().unwrap().is_some());
    }

    #[test]
    fn close_races_write_burst() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::thread;

        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig {
            recordings_dir: dir.path().to_path_buf(),
            ..IngestConfig::default()
        };
        let writer = Arc::new(ContainerWriter::create(find_by_payload_type(96).unwrap(), &config).unwrap());
        let path = writer.path().to_path_buf();
        let attempted = Arc::new(AtomicUsize::new(0));

        let burst = {
            let writer = writer.clone();
            let attempted = attempted.clone();
            thread::spawn(move || {
                let mut results = Vec::new();
                for i in 0..2000u32 {
                    // every packet is a complete key frame
                    results.push(writer.write(&packet(i as u16, i * 3000, true, vp8_keyframe(320, 240))));
                    attempted.fetch_add(1, Ordering::SeqCst);
                }
                results
            })
        };
        let closer = {
            let writer = writer.clone();
            let attempted = attempted.clone();
            thread::spawn(move || {
                while attempted.load(Ordering::SeqCst) < 50 {
                    thread::yield_now();
                }
                writer.close()
            })
        };

        let results = burst.join().unwrap();
        closer.join().unwrap().unwrap();
        assert!(matches!(writer.close(), Err(RelayError::AlreadyClosed)));

        let ok = results.iter().take_while(|r| r.is_ok()).count();
        assert!(ok >= 50);
        assert!(
            results[ok..]
                .iter()
                .all(|r| matches!(r, Err(RelayError::WriterClosed)))
        );

        drop(writer);
        let mut r = IvfReader::new(File::open(path).unwrap()).unwrap();
        assert_eq!(r.header().frame_count as usize, ok);
        assert_eq!((r.header().width, r.header().height), (320, 240));
        let mut frames = 0;
        while r.next_frame().unwrap().is_some() {
            frames += 1;
        }
        assert_eq!(frames, ok);
    }
}
