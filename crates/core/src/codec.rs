//! Codec capability table.
//!
//! The ordered list of video formats the ingest side accepts. Entries
//! earlier in the list are preferred when several could satisfy a
//! negotiation. Each primary codec is followed by its retransmission
//! (`video/rtx`) format, which points back at it with `apt=<pt>`.

pub const MIME_TYPE_VP8: &str = "video/VP8";
pub const MIME_TYPE_VP9: &str = "video/VP9";
pub const MIME_TYPE_H264: &str = "video/H264";
pub const MIME_TYPE_AV1: &str = "video/AV1";
pub const MIME_TYPE_RTX: &str = "video/rtx";

/// RTP clock rate used for every video format in the table.
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// RTCP feedback mechanism advertised for a codec (`a=rtcp-fb`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcpFeedback {
    pub kind: &'static str,
    pub parameter: &'static str,
}

const VIDEO_FEEDBACK: &[RtcpFeedback] = &[
    RtcpFeedback { kind: "goog-remb", parameter: "" },
    RtcpFeedback { kind: "ccm", parameter: "fir" },
    RtcpFeedback { kind: "nack", parameter: "" },
    RtcpFeedback { kind: "nack", parameter: "pli" },
];

/// One negotiable media format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub mime_type: &'static str,
    pub clock_rate: u32,
    pub payload_type: u8,
    pub fmtp_line: &'static str,
    pub rtcp_feedback: &'static [RtcpFeedback],
}

/// Codec families the relay knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Vp8,
    Vp9,
    H264,
    Av1,
}

impl CodecKind {
    /// Case-insensitive lookup by full mime type (`video/VP8`).
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        [
            (MIME_TYPE_VP8, Self::Vp8),
            (MIME_TYPE_VP9, Self::Vp9),
            (MIME_TYPE_H264, Self::H264),
            (MIME_TYPE_AV1, Self::Av1),
        ]
        .into_iter()
        .find(|(m, _)| m.eq_ignore_ascii_case(mime))
        .map(|(_, kind)| kind)
    }
}

impl CodecDescriptor {
    const fn primary(mime_type: &'static str, payload_type: u8, fmtp_line: &'static str) -> Self {
        Self {
            mime_type,
            clock_rate: VIDEO_CLOCK_RATE,
            payload_type,
            fmtp_line,
            rtcp_feedback: VIDEO_FEEDBACK,
        }
    }

    const fn rtx(payload_type: u8, fmtp_line: &'static str) -> Self {
        Self {
            mime_type: MIME_TYPE_RTX,
            clock_rate: VIDEO_CLOCK_RATE,
            payload_type,
            fmtp_line,
            rtcp_feedback: &[],
        }
    }

    /// The part of the mime type after `video/`, e.g. `VP8`.
    pub fn subtype(&self) -> &'static str {
        match self.mime_type.split_once('/') {
            Some((_, sub)) => sub,
            None => self.mime_type,
        }
    }

    pub fn kind(&self) -> Option<CodecKind> {
        CodecKind::from_mime_type(self.mime_type)
    }

    pub fn is_retransmission(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case(MIME_TYPE_RTX)
    }

    /// Payload type referenced by an `apt=` format parameter, if present.
    pub fn associated_payload_type(&self) -> Option<u8> {
        self.fmtp_line
            .split(';')
            .find_map(|param| param.trim().strip_prefix("apt="))
            .and_then(|pt| pt.parse().ok())
    }
}

const VIDEO_CODECS: &[CodecDescriptor] = &[
    CodecDescriptor::primary(MIME_TYPE_VP8, 96, ""),
    CodecDescriptor::rtx(97, "apt=96"),
    CodecDescriptor::primary(
        MIME_TYPE_H264,
        102,
        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f",
    ),
    CodecDescriptor::rtx(103, "apt=102"),
    CodecDescriptor::primary(
        MIME_TYPE_H264,
        104,
        "level-asymmetry-allowed=1;packetization-mode=0;profile-level-id=42001f",
    ),
    CodecDescriptor::rtx(105, "apt=104"),
    CodecDescriptor::primary(
        MIME_TYPE_H264,
        106,
        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
    ),
    CodecDescriptor::rtx(107, "apt=106"),
    CodecDescriptor::primary(
        MIME_TYPE_H264,
        108,
        "level-asymmetry-allowed=1;packetization-mode=0;profile-level-id=42e01f",
    ),
    CodecDescriptor::rtx(109, "apt=108"),
    CodecDescriptor::primary(
        MIME_TYPE_H264,
        127,
        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=4d001f",
    ),
    CodecDescriptor::rtx(125, "apt=127"),
    CodecDescriptor::primary(
        MIME_TYPE_H264,
        39,
        "level-asymmetry-allowed=1;packetization-mode=0;profile-level-id=4d001f",
    ),
    CodecDescriptor::rtx(40, "apt=39"),
    CodecDescriptor::primary(MIME_TYPE_AV1, 45, ""),
    CodecDescriptor::rtx(46, "apt=45"),
    CodecDescriptor::primary(MIME_TYPE_VP9, 98, "profile-id=0"),
    CodecDescriptor::rtx(99, "apt=98"),
    CodecDescriptor::primary(MIME_TYPE_VP9, 100, "profile-id=2"),
    CodecDescriptor::rtx(101, "apt=100"),
    CodecDescriptor::primary(
        MIME_TYPE_H264,
        112,
        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=64001f",
    ),
    CodecDescriptor::rtx(113, "apt=112"),
];

/// Video formats in ingest preference order.
pub fn video_codecs() -> &'static [CodecDescriptor] {
    VIDEO_CODECS
}

pub fn find_by_payload_type(pt: u8) -> Option<&'static CodecDescriptor> {
    VIDEO_CODECS.iter().find(|c| c.payload_type == pt)
}
