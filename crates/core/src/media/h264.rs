/// Annex B start code written before every NAL unit.
pub const ANNEX_B_START_CODE: [u8; 4] = [0, 0, 0, 1];

const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_STAP_A: u8 = 24;
const NAL_TYPE_STAP_B: u8 = 25;
const NAL_TYPE_MTAP16: u8 = 26;
const NAL_TYPE_MTAP24: u8 = 27;
const NAL_TYPE_FU_A: u8 = 28;
const NAL_TYPE_FU_B: u8 = 29;

/// H.264 RTP depacketizer (RFC 6184).
///
/// Converts RTP payloads back into an H.264 Annex B bitstream. Handles
/// the three packetization structures a WebRTC sender produces:
///
/// - **Single NAL Unit** (§5.6): NAL types 1–23, payload is the NAL as-is.
///
/// - **STAP-A** (§5.7.1): several small NALs aggregated into one packet,
///   each preceded by a 16-bit big-endian size:
///
///   ```text
///   [STAP-A hdr][size 1][NAL 1][size 2][NAL 2]...
///   ```
///
/// - **FU-A** (§5.8): one large NAL split across packets. Each fragment
///   carries a 2-byte FU header:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   ```
///
///   The original NAL header is rebuilt as `F|NRI` from the indicator
///   plus `NAL_Type` from the FU header.
///
/// Every NAL unit is emitted behind a 4-byte start code. Interleaved
/// modes (STAP-B, MTAP, FU-B) are not produced by WebRTC senders and are
/// dropped.
#[derive(Debug, Default)]
pub struct H264Depacketizer {
    fu_buffer: Option<Vec<u8>>,
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depacketize one RTP payload, returning the Annex B bytes it
    /// completes. FU-A fragments return nothing until the end fragment.
    pub fn depacketize(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let Some(&first) = payload.first() else {
            return out;
        };

        match first & 0x1f {
            1..=23 => {
                push_nal(&mut out, payload);
            }
            NAL_TYPE_STAP_A => {
                let mut offset = 1usize;
                while offset + 2 <= payload.len() {
                    let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
                    offset += 2;
                    if size == 0 || offset + size > payload.len() {
                        tracing::debug!(size, offset, "STAP-A NAL size out of bounds");
                        break;
                    }
                    push_nal(&mut out, &payload[offset..offset + size]);
                    offset += size;
                }
            }
            NAL_TYPE_FU_A => {
                if payload.len() < 3 {
                    tracing::debug!(len = payload.len(), "FU-A fragment too short");
                    return out;
                }
                let fu_header = payload[1];
                let start = fu_header & 0x80 != 0;
                let end = fu_header & 0x40 != 0;

                if start {
                    let nal_header = (first & 0xe0) | (fu_header & 0x1f);
                    self.fu_buffer = Some(vec![nal_header]);
                }

                match self.fu_buffer.as_mut() {
                    Some(buf) => buf.extend_from_slice(&payload[2..]),
                    None => {
                        tracing::debug!("FU-A continuation without start fragment, dropped");
                        return out;
                    }
                }

                if end {
                    if let Some(nal) = self.fu_buffer.take() {
                        tracing::trace!(
                            nal_type = nal[0] & 0x1f,
                            nal_size = nal.len(),
                            "FU-A NAL unit reassembled"
                        );
                        push_nal(&mut out, &nal);
                    }
                }
            }
            t @ (NAL_TYPE_STAP_B | NAL_TYPE_MTAP16 | NAL_TYPE_MTAP24 | NAL_TYPE_FU_B) => {
                tracing::warn!(nal_type = t, "interleaved H.264 packetization not supported");
            }
            t => {
                tracing::debug!(nal_type = t, "reserved NAL type dropped");
            }
        }

        out
    }
}

fn push_nal(out: &mut Vec<u8>, nal: &[u8]) {
    out.extend_from_slice(&ANNEX_B_START_CODE);
    out.extend_from_slice(nal);
}

/// Whether an RTP payload opens a decodable sequence.
///
/// True when the first NAL unit it carries is an SPS, either as a single
/// NAL packet or as the first unit in a STAP-A.
pub fn is_keyframe(payload: &[u8]) -> bool {
    if payload.len() < 4 {
        return false;
    }
    match payload[0] & 0x1f {
        NAL_TYPE_SPS => true,
        NAL_TYPE_STAP_A => payload[3] & 0x1f == NAL_TYPE_SPS,
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Split an Annex B bitstream on 3- or 4-byte start codes.
    pub(crate) fn extract_nal_units(data: &[u8]) -> Vec<Vec<u8>> {
        let mut nal_units = Vec::new();
        let mut i = 0usize;

        // (nal_data_start_index, start_code_length)
        let mut start_entries: Vec<(usize, usize)> = Vec::new();

        while i < data.len() {
            if i + 3 < data.len() && data[i..i + 4] == [0, 0, 0, 1] {
                start_entries.push((i + 4, 4));
                i += 4;
            } else if i + 2 < data.len() && data[i..i + 3] == [0, 0, 1] {
                start_entries.push((i + 3, 3));
                i += 3;
            } else {
                i += 1;
            }
        }

        for (idx, &(start, _)) in start_entries.iter().enumerate() {
            let end = if idx + 1 < start_entries.len() {
                let (next_start, next_sc_len) = start_entries[idx + 1];
                next_start - next_sc_len
            } else {
                data.len()
            };

            if start < end {
                nal_units.push(data[start..end].to_vec());
            }
        }

        nal_units
    }

    #[test]
    fn single_nal_gets_start_code() {
        let mut d = H264Depacketizer::new();
        let out = d.depacketize(&[0x65, 0xAA, 0xBB]);
        assert_eq!(out, vec![0, 0, 0, 1, 0x65, 0xAA, 0xBB]);
    }

    #[test]
    fn stap_a_split() {
        let mut d = H264Depacketizer::new();
        let payload = [
            0x78, // STAP-A
            0x00, 0x03, 0x67, 0x42, 0x00, // SPS
            0x00, 0x02, 0x68, 0xCE, // PPS
        ];
        let nals = extract_nal_units(&d.depacketize(&payload));
        assert_eq!(nals, vec![vec![0x67, 0x42, 0x00], vec![0x68, 0xCE]]);
    }

    #[test]
    fn stap_a_bad_size_stops() {
        let mut d = H264Depacketizer::new();
        let payload = [0x78, 0x00, 0x02, 0x67, 0x42, 0x00, 0x09, 0x68];
        let nals = extract_nal_units(&d.depacketize(&payload));
        assert_eq!(nals, vec![vec![0x67, 0x42]]);
    }

    #[test]
    fn fu_a_reassembled() {
        let mut d = H264Depacketizer::new();
        // original NAL: 0x65 (NRI=3, type 5) + 6 bytes
        assert!(d.depacketize(&[0x7C, 0x85, 1, 2]).is_empty());
        assert!(d.depacketize(&[0x7C, 0x05, 3, 4]).is_empty());
        let out = d.depacketize(&[0x7C, 0x45, 5, 6]);
        assert_eq!(out, vec![0, 0, 0, 1, 0x65, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn fu_a_without_start_dropped() {
        let mut d = H264Depacketizer::new();
        assert!(d.depacketize(&[0x7C, 0x05, 3, 4]).is_empty());
        assert!(d.depacketize(&[0x7C, 0x45, 5, 6]).is_empty());
    }

    #[test]
    fn interleaved_modes_dropped() {
        let mut d = H264Depacketizer::new();
        assert!(d.depacketize(&[0x7A, 0, 0, 0]).is_empty());
        assert!(d.depacketize(&[]).is_empty());
    }

    #[test]
    fn keyframe_detection() {
        assert!(is_keyframe(&[0x67, 0x42, 0x00, 0x1f]));
        assert!(is_keyframe(&[0x78, 0x00, 0x04, 0x67, 0x42]));
        assert!(!is_keyframe(&[0x65, 0x88, 0x00, 0x00]));
        assert!(!is_keyframe(&[0x78, 0x00, 0x04, 0x68, 0xCE]));
        assert!(!is_keyframe(&[0x67]));
    }

    #[test]
    fn extract_mixed_start_codes() {
        let mut data = vec![0, 0, 0, 1, 0x67, 0x42];
        data.extend_from_slice(&[0, 0, 1, 0x68, 0xCE]);
        let nals = extract_nal_units(&data);
        assert_eq!(nals, vec![vec![0x67, 0x42], vec![0x68, 0xCE]]);
    }
}
