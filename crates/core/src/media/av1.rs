//! AV1 RTP depacketizer (AV1 RTP payload format, §4).
//!
//! Each RTP payload starts with a one-byte aggregation header:
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! |Z|Y| W |N|-|-|-|
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! - **Z**: the first OBU element continues a fragment from the previous packet.
//! - **Y**: the last OBU element continues in the next packet.
//! - **W**: number of OBU elements; 0 means every element is
//!   LEB128-length-prefixed, otherwise all but the last are.
//! - **N**: first packet of a new coded video sequence.
//!
//! OBUs travel without `obu_size` fields. The depacketizer reassembles
//! fragments and rewrites each OBU into the low-overhead bitstream format
//! (`obu_has_size_field = 1`) expected inside IVF. Temporal delimiters are
//! dropped; the container writer inserts its own per temporal unit.

const OBU_TYPE_SEQUENCE_HEADER: u8 = 1;
const OBU_TYPE_TEMPORAL_DELIMITER: u8 = 2;
const OBU_HAS_SIZE_FIELD: u8 = 0x02;
const OBU_EXTENSION_FLAG: u8 = 0x04;

/// A temporal delimiter OBU with an explicit zero size.
pub const TEMPORAL_DELIMITER: [u8; 2] = [0x12, 0x00];

/// Whether this RTP payload opens a new coded video sequence (N bit).
pub fn starts_new_sequence(payload: &[u8]) -> bool {
    payload.first().is_some_and(|b| b & 0x08 != 0)
}

/// Whether a temporal unit carries a sequence header OBU, which marks a
/// random access point in recorded AV1.
///
/// OBUs without a size field run to the end of `data`.
pub fn contains_sequence_header(mut data: &[u8]) -> bool {
    while let Some(&header) = data.first() {
        if (header >> 3) & 0x0f == OBU_TYPE_SEQUENCE_HEADER {
            return true;
        }
        let header_len = if header & OBU_EXTENSION_FLAG != 0 { 2 } else { 1 };
        if header & OBU_HAS_SIZE_FIELD == 0 || data.len() < header_len {
            return false;
        }
        let Some((size, size_len)) = read_leb128(&data[header_len..]) else {
            return false;
        };
        let Some(next) = usize::try_from(size)
            .ok()
            .and_then(|size| (header_len + size_len).checked_add(size))
            .filter(|&next| next <= data.len())
        else {
            return false;
        };
        data = &data[next..];
    }
    false
}

#[derive(Debug, Default)]
pub struct Av1Depacketizer {
    fragment: Option<Vec<u8>>,
}

impl Av1Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Depacketize one RTP payload, returning the complete OBUs it
    /// finishes in low-overhead format.
    pub fn depacketize(&mut self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let Some(&aggregation) = payload.first() else {
            return out;
        };
        let continues_previous = aggregation & 0x80 != 0;
        let continues_next = aggregation & 0x40 != 0;
        let count = ((aggregation >> 4) & 0x03) as usize;

        let elements = split_elements(&payload[1..], count);
        let last = elements.len().saturating_sub(1);

        if !continues_previous && self.fragment.take().is_some() {
            tracing::debug!("AV1 fragment abandoned by packet loss");
        }

        for (i, element) in elements.into_iter().enumerate() {
            let obu = if i == 0 && continues_previous {
                match self.fragment.take() {
                    Some(mut frag) => {
                        frag.extend_from_slice(element);
                        frag
                    }
                    None => {
                        tracing::debug!("AV1 continuation without start, dropped");
                        continue;
                    }
                }
            } else {
                element.to_vec()
            };

            if i == last && continues_next {
                self.fragment = Some(obu);
            } else {
                write_obu(&mut out, &obu);
            }
        }

        out
    }
}

fn split_elements(mut data: &[u8], count: usize) -> Vec<&[u8]> {
    let mut elements = Vec::new();
    while !data.is_empty() {
        let is_last_counted = count != 0 && elements.len() + 1 == count;
        let size = if is_last_counted {
            data.len()
        } else {
            match read_leb128(data) {
                Some((value, consumed)) => {
                    data = &data[consumed..];
                    value as usize
                }
                None => {
                    tracing::debug!("AV1 element length truncated");
                    break;
                }
            }
        };
        if size > data.len() {
            tracing::debug!(size, remaining = data.len(), "AV1 element overruns payload");
            break;
        }
        elements.push(&data[..size]);
        data = &data[size..];
        if is_last_counted {
            break;
        }
    }
    elements
}

fn write_obu(out: &mut Vec<u8>, obu: &[u8]) {
    let Some(&header) = obu.first() else {
        return;
    };
    if (header >> 3) & 0x0f == OBU_TYPE_TEMPORAL_DELIMITER {
        return;
    }
    if header & OBU_HAS_SIZE_FIELD != 0 {
        out.extend_from_slice(obu);
        return;
    }

    let header_len = if header & OBU_EXTENSION_FLAG != 0 { 2 } else { 1 };
    if obu.len() < header_len {
        tracing::debug!("AV1 OBU shorter than its header");
        return;
    }
    out.push(header | OBU_HAS_SIZE_FIELD);
    out.extend_from_slice(&obu[1..header_len]);
    write_leb128(out, (obu.len() - header_len) as u64);
    out.extend_from_slice(&obu[header_len..]);
}

/// Decode an unsigned LEB128 value, returning it with its encoded length.
pub fn read_leb128(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(8).enumerate() {
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

pub fn write_leb128(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}
