//! Error types for the relay library.

use std::fmt;

/// Errors that can occur while recording or replaying a stream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Configuration**: [`UnsupportedCodec`](Self::UnsupportedCodec),
///   [`UnknownPayloadType`](Self::UnknownPayloadType),
///   [`InvalidContainer`](Self::InvalidContainer),
///   [`InvalidConfig`](Self::InvalidConfig). Fatal to the one
///   operation that hit them.
/// - **Transport**: [`Io`](Self::Io), [`RtpParse`](Self::RtpParse).
/// - **Lifecycle**: [`WriterClosed`](Self::WriterClosed),
///   [`AlreadyClosed`](Self::AlreadyClosed),
///   [`TrackClosed`](Self::TrackClosed). The operation is refused, nothing
///   else is affected.
/// - **Egress**: [`ViewerNotFound`](Self::ViewerNotFound).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Underlying file or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The negotiated codec has no container writer.
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// No entry in the codec capability table carries this payload type.
    #[error("unknown payload type: {0}")]
    UnknownPayloadType(u8),

    /// The container file is malformed or truncated.
    #[error("invalid container: {kind}")]
    InvalidContainer { kind: ContainerErrorKind },

    /// A configuration value can never produce output.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An RTP datagram could not be unmarshaled.
    #[error("RTP parse error: {0}")]
    RtpParse(&'static str),

    /// `write` was called on a container writer that is already closed.
    #[error("container writer is closed")]
    WriterClosed,

    /// `close` was called twice on the same container writer.
    #[error("container writer already closed")]
    AlreadyClosed,

    /// The shared track has no producer left.
    #[error("shared track closed")]
    TrackClosed,

    /// No viewer session with the given ID exists.
    #[error("viewer not found: {0}")]
    ViewerNotFound(String),
}

/// Specific kind of container failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerErrorKind {
    /// File header does not start with `DKIF`.
    BadSignature,
    /// Header version other than 0.
    UnknownVersion(u16),
    /// Header length field smaller than the fixed 32-byte header.
    BadHeaderLength(u16),
    /// Timebase numerator or denominator is zero.
    ZeroTimebase,
    /// File ended inside the header or a frame record.
    Truncated,
    /// A frame record declares an implausible payload length.
    OversizedFrame(u32),
    /// A full pass over the file produced no frames.
    Empty,
}

impl fmt::Display for ContainerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadSignature => write!(f, "bad signature"),
            Self::UnknownVersion(v) => write!(f, "unknown version {v}"),
            Self::BadHeaderLength(len) => write!(f, "bad header length {len}"),
            Self::ZeroTimebase => write!(f, "zero timebase"),
            Self::Truncated => write!(f, "truncated"),
            Self::OversizedFrame(len) => write!(f, "frame of {len} bytes"),
            Self::Empty => write!(f, "no frames"),
        }
    }
}

impl RelayError {
    pub(crate) fn container(kind: ContainerErrorKind) -> Self {
        Self::InvalidContainer { kind }
    }
}

/// Convenience alias for `Result<T, RelayError>`.
pub type Result<T> = std::result::Result<T, RelayError>;
