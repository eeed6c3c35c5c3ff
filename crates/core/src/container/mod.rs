//! On-disk containers.
//!
//! Ingest writes one file per session through [`ContainerWriter`]: IVF for
//! VP8 and AV1, an Annex B byte stream for H.264. Egress reads IVF back
//! through the [`FrameSource`] trait, usually wrapped in [`Looping`] so the
//! file plays forever.

pub mod annexb;
pub mod ivf;
pub mod writer;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use bytes::Bytes;

use crate::error::{ContainerErrorKind, RelayError, Result};
pub use ivf::{IvfHeader, IvfReader, IvfWriter};
pub use writer::{ContainerKind, ContainerWriter, IvfRtpWriter};

/// One encoded frame read from a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    /// Presentation timestamp in container timebase units.
    pub pts: u64,
    pub keyframe: bool,
}

/// A rewindable sequence of frames.
pub trait FrameSource: Send {
    fn header(&self) -> &IvfHeader;

    /// Next frame, or `None` at a clean end of file.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn header(&self) -> &IvfHeader {
        (**self).header()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn rewind(&mut self) -> Result<()> {
        (**self).rewind()
    }
}

/// Open an IVF file for playout.
pub fn open_ivf(path: impl AsRef<Path>) -> Result<IvfReader<BufReader<File>>> {
    let file = File::open(path.as_ref())?;
    IvfReader::new(BufReader::new(file))
}

/// Endless view of a [`FrameSource`]: rewinds at end of file.
pub struct Looping<S> {
    source: S,
    yielded_this_pass: bool,
    passes: u64,
}

impl<S: FrameSource> Looping<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            yielded_this_pass: false,
            passes: 0,
        }
    }

    pub fn header(&self) -> &IvfHeader {
        self.source.header()
    }

    /// Completed passes over the source.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Next frame, and whether the source wrapped around to produce it.
    ///
    /// A pass that yields no frames at all is reported as
    /// [`ContainerErrorKind::Empty`] instead of rewinding forever.
    pub fn next_frame(&mut self) -> Result<(Frame, bool)> {
        let mut wrapped = false;
        loop {
            if let Some(frame) = self.source.next_frame()? {
                self.yielded_this_pass = true;
                return Ok((frame, wrapped));
            }
            if !self.yielded_this_pass {
                return Err(RelayError::container(ContainerErrorKind::Empty));
            }
            self.source.rewind()?;
            self.yielded_this_pass = false;
            self.passes += 1;
            wrapped = true;
            tracing::debug!(passes = self.passes, "frame source rewound");
        }
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ivf_with(frames: &[&[u8]]) -> IvfReader<Cursor<Vec<u8>>> {
        let mut w = IvfWriter::new(Cursor::new(Vec::new()), IvfHeader::new(ivf::FOURCC_VP8, 1, 30)).unwrap();
        for (i, data) in frames.iter().enumerate() {
            w.write_frame(data, i as u64).unwrap();
        }
        w.finalize().unwrap();
        IvfReader::new(Cursor::new(w.into_inner().into_inner())).unwrap()
    }

    #[test]
    fn loops_transparently() {
        let mut looping = Looping::new(ivf_with(&[&[0], &[1], &[2]]));
        let mut seen = Vec::new();
        let mut wraps = Vec::new();
        for _ in 0..7 {
            let (frame, wrapped) = looping.next_frame().unwrap();
            seen.push(frame.data[0]);
            wraps.push(wrapped);
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(wraps, vec![false, false, false, true, false, false, true]);
        assert_eq!(looping.passes(), 2);
    }

    #[test]
    fn empty_source_is_error() {
        let mut looping = Looping::new(ivf_with(&[]));
        assert!(matches!(
            looping.next_frame(),
            Err(RelayError::InvalidContainer { kind: ContainerErrorKind::Empty })
        ));
    }

    #[test]
    fn boxed_source_delegates() {
        let mut boxed: Box<dyn FrameSource> = Box::new(ivf_with(&[&[9]]));
        assert_eq!(boxed.header().frame_count, 1);
        assert_eq!(boxed.next_frame().unwrap().unwrap().data[..], [9]);
        assert!(boxed.next_frame().unwrap().is_none());
        boxed.rewind().unwrap();
        assert!(boxed.next_frame().unwrap().is_some());
    }
}
