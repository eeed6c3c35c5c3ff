//! IVF container.
//!
//! A 32-byte file header followed by frame records:
//!
//! ```text
//! offset  size  field
//!      0     4  signature "DKIF"
//!      4     2  version (0)
//!      6     2  header length in bytes (32)
//!      8     4  codec FourCC ("VP80", "AV01")
//!     12     2  width
//!     14     2  height
//!     16     4  timebase denominator
//!     20     4  timebase numerator
//!     24     4  frame count
//!     28     4  unused
//!
//! frame record:
//!      0     4  payload length
//!      4     8  presentation timestamp (timebase units)
//!     12     n  payload
//! ```
//!
//! All integers are little-endian. One timebase unit lasts
//! `numerator / denominator` seconds.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::time::Duration;

use bytes::Bytes;

use super::{Frame, FrameSource};
use crate::error::{ContainerErrorKind, RelayError, Result};
use crate::media::av1;

pub const IVF_HEADER_LEN: usize = 32;
pub const IVF_FRAME_HEADER_LEN: usize = 12;

const IVF_SIGNATURE: &[u8; 4] = b"DKIF";
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub const FOURCC_VP8: [u8; 4] = *b"VP80";
pub const FOURCC_AV1: [u8; 4] = *b"AV01";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub timebase_denominator: u32,
    pub timebase_numerator: u32,
    pub frame_count: u32,
}

impl IvfHeader {
    pub fn new(fourcc: [u8; 4], timebase_numerator: u32, timebase_denominator: u32) -> Self {
        Self {
            fourcc,
            width: 640,
            height: 480,
            timebase_denominator,
            timebase_numerator,
            frame_count: 0,
        }
    }

    /// Nominal time between frames: one timebase unit.
    pub fn frame_interval(&self) -> Duration {
        if self.timebase_denominator == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(
            self.timebase_numerator as u64 * 1_000_000_000 / self.timebase_denominator as u64,
        )
    }

    pub fn to_bytes(&self) -> [u8; IVF_HEADER_LEN] {
        let mut buf = [0u8; IVF_HEADER_LEN];
        buf[0..4].copy_from_slice(IVF_SIGNATURE);
        buf[4..6].copy_from_slice(&0u16.to_le_bytes());
        buf[6..8].copy_from_slice(&(IVF_HEADER_LEN as u16).to_le_bytes());
        buf[8..12].copy_from_slice(&self.fourcc);
        buf[12..14].copy_from_slice(&self.width.to_le_bytes());
        buf[14..16].copy_from_slice(&self.height.to_le_bytes());
        buf[16..20].copy_from_slice(&self.timebase_denominator.to_le_bytes());
        buf[20..24].copy_from_slice(&self.timebase_numerator.to_le_bytes());
        buf[24..28].copy_from_slice(&self.frame_count.to_le_bytes());
        buf
    }

    /// Parse and validate a header, returning it with its declared length.
    pub fn parse(buf: &[u8; IVF_HEADER_LEN]) -> Result<(Self, u16)> {
        if &buf[0..4] != IVF_SIGNATURE {
            return Err(RelayError::container(ContainerErrorKind::BadSignature));
        }
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version != 0 {
            return Err(RelayError::container(ContainerErrorKind::UnknownVersion(version)));
        }
        let header_len = u16::from_le_bytes([buf[6], buf[7]]);
        if (header_len as usize) < IVF_HEADER_LEN {
            return Err(RelayError::container(ContainerErrorKind::BadHeaderLength(header_len)));
        }

        let le32 = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        let header = Self {
            fourcc: [buf[8], buf[9], buf[10], buf[11]],
            width: u16::from_le_bytes([buf[12], buf[13]]),
            height: u16::from_le_bytes([buf[14], buf[15]]),
            timebase_denominator: le32(16),
            timebase_numerator: le32(20),
            frame_count: le32(24),
        };
        if header.timebase_denominator == 0 || header.timebase_numerator == 0 {
            return Err(RelayError::container(ContainerErrorKind::ZeroTimebase));
        }
        Ok((header, header_len))
    }
}

/// Frame-level IVF writer.
///
/// Writes the header up front with a zero frame count and rewrites it in
/// [`finalize`](Self::finalize) once the count and dimensions are known.
pub struct IvfWriter<W: Write + Seek> {
    inner: W,
    header: IvfHeader,
}

impl<W: Write + Seek> IvfWriter<W> {
    pub fn new(mut inner: W, header: IvfHeader) -> Result<Self> {
        inner.write_all(&header.to_bytes())?;
        Ok(Self { inner, header })
    }

    pub fn header(&self) -> &IvfHeader {
        &self.header
    }

    pub fn set_dimensions(&mut self, width: u16, height: u16) {
        self.header.width = width;
        self.header.height = height;
    }

    pub fn write_frame(&mut self, data: &[u8], pts: u64) -> Result<()> {
        let mut record = [0u8; IVF_FRAME_HEADER_LEN];
        record[0..4].copy_from_slice(&(data.len() as u32).to_le_bytes());
        record[4..12].copy_from_slice(&pts.to_le_bytes());
        self.inner.write_all(&record)?;
        self.inner.write_all(data)?;
        self.header.frame_count += 1;
        Ok(())
    }

    /// Rewrite the header with the final frame count and flush.
    pub fn finalize(&mut self) -> Result<()> {
        self.inner.seek(SeekFrom::Start(0))?;
        self.inner.write_all(&self.header.to_bytes())?;
        self.inner.seek(SeekFrom::End(0))?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// IVF frame reader over any seekable byte source.
pub struct IvfReader<R: Read + Seek> {
    inner: R,
    header: IvfHeader,
    data_start: u64,
}

impl<R: Read + Seek> IvfReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let mut buf = [0u8; IVF_HEADER_LEN];
        inner.read_exact(&mut buf).map_err(truncated_or_io)?;
        let (header, header_len) = IvfHeader::parse(&buf)?;

        let data_start = header_len as u64;
        if data_start > IVF_HEADER_LEN as u64 {
            inner.seek(SeekFrom::Start(data_start))?;
        }

        tracing::debug!(
            fourcc = %String::from_utf8_lossy(&header.fourcc),
            width = header.width,
            height = header.height,
            timebase = format_args!("{}/{}", header.timebase_numerator, header.timebase_denominator),
            frames = header.frame_count,
            "IVF header parsed"
        );

        Ok(Self {
            inner,
            header,
            data_start,
        })
    }
}

impl<R: Read + Seek + Send> FrameSource for IvfReader<R> {
    fn header(&self) -> &IvfHeader {
        &self.header
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut record = [0u8; IVF_FRAME_HEADER_LEN];
        let filled = read_full(&mut self.inner, &mut record)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < IVF_FRAME_HEADER_LEN {
            return Err(RelayError::container(ContainerErrorKind::Truncated));
        }

        let size = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        if size > MAX_FRAME_LEN {
            return Err(RelayError::container(ContainerErrorKind::OversizedFrame(size)));
        }
        let mut pts_bytes = [0u8; 8];
        pts_bytes.copy_from_slice(&record[4..12]);
        let pts = u64::from_le_bytes(pts_bytes);

        let mut data = vec![0u8; size as usize];
        self.inner.read_exact(&mut data).map_err(truncated_or_io)?;

        let keyframe = match self.header.fourcc {
            FOURCC_VP8 => data.first().is_some_and(|b| b & 0x01 == 0),
            FOURCC_AV1 => av1::contains_sequence_header(&data),
            _ => false,
        };

        Ok(Some(Frame {
            data: Bytes::from(data),
            pts,
            keyframe,
        }))
    }

    fn rewind(&mut self) -> Result<()> {
        self.inner.seek(SeekFrom::Start(self.data_start))?;
        Ok(())
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn truncated_or_io(e: std::io::Error) -> RelayError {
    if e.kind() == ErrorKind::UnexpectedEof {
        RelayError::container(ContainerErrorKind::Truncated)
    } else {
        RelayError::Io(e)
    }
}
