use bytes::Bytes;
use rand::RngExt;

use crate::error::{RelayError, Result};

/// Size of the RTP fixed header without CSRCs or extensions.
pub const RTP_HEADER_LEN: usize = 12;

/// RTP fixed header fields (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Only the fields the relay acts on are kept. CSRCs, header extensions
/// and padding are accepted on the wire and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtpHeader {
    /// Set on the last packet of a frame.
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
}

/// One RTP packet: header plus opaque codec payload.
///
/// The payload is a [`Bytes`] so fan-out to many viewers clones a
/// reference count, not the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Parse a datagram into a packet.
    pub fn unmarshal(buf: &[u8]) -> Result<Self> {
        if buf.len() < RTP_HEADER_LEN {
            return Err(RelayError::RtpParse("packet shorter than fixed header"));
        }
        if buf[0] >> 6 != 2 {
            return Err(RelayError::RtpParse("unsupported RTP version"));
        }

        let has_padding = buf[0] & 0x20 != 0;
        let has_extension = buf[0] & 0x10 != 0;
        let csrc_count = (buf[0] & 0x0f) as usize;

        let header = RtpHeader {
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            sequence_number: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        };

        let mut offset = RTP_HEADER_LEN + csrc_count * 4;
        if buf.len() < offset {
            return Err(RelayError::RtpParse("CSRC list truncated"));
        }

        if has_extension {
            if buf.len() < offset + 4 {
                return Err(RelayError::RtpParse("extension header truncated"));
            }
            let words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4 + words * 4;
            if buf.len() < offset {
                return Err(RelayError::RtpParse("extension truncated"));
            }
        }

        let mut end = buf.len();
        if has_padding {
            let padding = buf[end - 1] as usize;
            if padding == 0 || offset + padding > end {
                return Err(RelayError::RtpParse("invalid padding length"));
            }
            end -= padding;
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&buf[offset..end]),
        })
    }

    /// Serialize with a 12-byte header. Version is always 2; padding,
    /// extension and CSRC count are always 0.
    pub fn marshal(&self) -> Vec<u8> {
        let h = &self.header;
        let mut buf = Vec::with_capacity(RTP_HEADER_LEN + self.payload.len());
        buf.push(2 << 6);
        buf.push(((h.marker as u8) << 7) | (h.payload_type & 0x7f));
        buf.extend_from_slice(&h.sequence_number.to_be_bytes());
        buf.extend_from_slice(&h.timestamp.to_be_bytes());
        buf.extend_from_slice(&h.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// Outbound header state for one stream.
///
/// Hands out contiguous sequence numbers (16-bit, wrapping) under a fixed
/// payload type and SSRC. Timestamps are supplied by the caller since the
/// playout clock lives in the scheduler.
#[derive(Debug)]
pub struct Sequencer {
    pub payload_type: u8,
    pub ssrc: u32,
    sequence: u16,
}

impl Sequencer {
    pub fn new(payload_type: u8, ssrc: u32, initial_sequence: u16) -> Self {
        tracing::debug!(
            payload_type,
            ssrc = format_args!("{:#010X}", ssrc),
            initial_sequence,
            "RTP sequencer created"
        );
        Self {
            payload_type,
            ssrc,
            sequence: initial_sequence,
        }
    }

    /// Random SSRC and starting sequence number.
    ///
    /// Per RFC 3550 §5.1 and §8.1 both should be random to make collisions
    /// and known-plaintext attacks less likely.
    pub fn with_random_state(payload_type: u8) -> Self {
        let mut rng = rand::rng();
        Self::new(payload_type, rng.random::<u32>(), rng.random::<u16>())
    }

    /// Sequence number the next [`next_header`](Self::next_header) call uses.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Build the header for the next packet and advance the sequence number.
    pub fn next_header(&mut self, marker: bool, timestamp: u32) -> RtpHeader {
        let header = RtpHeader {
            marker,
            payload_type: self.payload_type,
            sequence_number: self.sequence,
            timestamp,
            ssrc: self.ssrc,
        };
        self.sequence = self.sequence.wrapping_add(1);
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet(marker: bool) -> RtpPacket {
        RtpPacket::new(
            RtpHeader {
                marker,
                payload_type: 96,
                sequence_number: 0x1234,
                timestamp: 0xDEADBEEF,
                ssrc: 0xAABBCCDD,
            },
            vec![1u8, 2, 3],
        )
    }

    #[test]
    fn marshal_layout() {
        let buf = make_packet(true).marshal();
        assert_eq!(buf.len(), 15);
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(buf[1] & 0x80, 0x80);
        assert_eq!(buf[1] & 0x7f, 96);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 0x1234);
        assert_eq!(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]), 0xAABBCCDD);
        assert_eq!(&buf[12..], &[1, 2, 3]);
    }

    #[test]
    fn unmarshal_marshaled() {
        let packet = make_packet(false);
        assert_eq!(RtpPacket::unmarshal(&packet.marshal()).unwrap(), packet);
    }

    #[test]
    fn unmarshal_skips_csrc_extension_and_padding() {
        let mut buf = vec![0x80 | 0x20 | 0x10 | 0x01, 0x80 | 96, 0, 7, 0, 0, 0, 9, 0, 0, 0, 1];
        buf.extend_from_slice(&[0xCA, 0xFE, 0xBA, 0xBE]); // one CSRC
        buf.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 9, 9, 9, 9]); // one-word extension
        buf.extend_from_slice(&[0x55, 0x66]);
        buf.extend_from_slice(&[0, 0, 3]); // three bytes of padding

        let packet = RtpPacket::unmarshal(&buf).unwrap();
        assert!(packet.header.marker);
        assert_eq!(packet.header.sequence_number, 7);
        assert_eq!(packet.header.timestamp, 9);
        assert_eq!(packet.header.ssrc, 1);
        assert_eq!(&packet.payload[..], &[0x55, 0x66]);
    }

    #[test]
    fn unmarshal_rejects_short_and_bad_version() {
        assert!(RtpPacket::unmarshal(&[0x80, 96, 0]).is_err());
        let mut buf = make_packet(false).marshal();
        buf[0] = 0x40;
        assert!(RtpPacket::unmarshal(&buf).is_err());
    }

    #[test]
    fn unmarshal_rejects_oversized_padding() {
        let mut buf = make_packet(false).marshal();
        buf[0] |= 0x20;
        *buf.last_mut().unwrap() = 200;
        assert!(matches!(
            RtpPacket::unmarshal(&buf),
            Err(RelayError::RtpParse(_))
        ));
    }

    #[test]
    fn sequencer_increments_and_wraps() {
        let mut s = Sequencer::new(96, 0x1234, u16::MAX - 1);
        let seqs: Vec<u16> = (0..4)
            .map(|_| s.next_header(false, 0).sequence_number)
            .collect();
        assert_eq!(seqs, vec![u16::MAX - 1, u16::MAX, 0, 1]);
        assert_eq!(s.sequence(), 2);
    }

    #[test]
    fn sequencer_carries_marker_and_timestamp() {
        let mut s = Sequencer::new(96, 0x1234, 0);
        let h = s.next_header(true, 3000);
        assert!(h.marker);
        assert_eq!(h.timestamp, 3000);
        assert_eq!(h.payload_type, 96);
        assert_eq!(h.ssrc, 0x1234);
    }

    #[test]
    fn random_ssrc_differs() {
        let s1 = Sequencer::with_random_state(96);
        let s2 = Sequencer::with_random_state(96);
        assert_ne!(s1.ssrc, s2.ssrc);
    }
}
