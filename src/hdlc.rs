//! HDLC-style framing codec used by Streaming DLOAD.
//!
//! Frame layout on the wire: `payload | CRC16 (little-endian) | 0x7E`. Within
//! `payload | CRC`, any byte equal to `0x7E` or `0x7D` is escaped as `0x7D`
//! followed by the original byte XOR `0x20`. The CRC is CRC-16/X-25
//! (polynomial 0x1021, init 0xFFFF, reflected in/out, xorout 0xFFFF) — the
//! conventional CCITT variant for HDLC-framed links.
//!
//! This codec is pure (no I/O) and safe to fuzz in isolation.

use crc::{Crc, CRC_16_X25};

use crate::config::{HDLC_ESCAPE, HDLC_ESCAPE_XOR, HDLC_FRAME_DELIMITER};
use crate::error::{Error, Result};

const CRC16_X25: Crc<u16> = Crc::<u16>::new(&CRC_16_X25);

/// Encode `payload` into a complete HDLC frame: escaped payload, escaped
/// CRC16 trailer, trailing delimiter. Does not prepend a leading delimiter;
/// callers write delimiters between frames, not around each one.
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let crc = CRC16_X25.checksum(payload);
    let mut raw = Vec::with_capacity(payload.len() + 2);
    raw.extend_from_slice(payload);
    raw.extend_from_slice(&crc.to_le_bytes());

    let mut framed = Vec::with_capacity(raw.len() + raw.len() / 8 + 1);
    for &b in &raw {
        match b {
            HDLC_FRAME_DELIMITER | HDLC_ESCAPE => {
                framed.push(HDLC_ESCAPE);
                framed.push(b ^ HDLC_ESCAPE_XOR);
            }
            _ => framed.push(b),
        }
    }
    framed.push(HDLC_FRAME_DELIMITER);
    framed
}

/// Decode one HDLC frame. `framed` must contain exactly the escaped
/// payload+CRC bytes followed by the trailing `0x7E` delimiter (as produced
/// by [`encode`], or as extracted by [`HdlcDecoder`]).
///
/// Returns the unescaped, CRC-verified payload, or `framing_error` on a CRC
/// mismatch, a dangling escape, or a frame too short to contain a CRC.
pub fn decode(framed: &[u8]) -> Result<Vec<u8>> {
    let body = framed
        .strip_suffix(&[HDLC_FRAME_DELIMITER])
        .unwrap_or(framed);
    if body.is_empty() {
        return Err(Error::Framing("empty frame".into()));
    }

    let mut raw = Vec::with_capacity(body.len());
    let mut escape_next = false;
    for &b in body {
        if escape_next {
            raw.push(b ^ HDLC_ESCAPE_XOR);
            escape_next = false;
        } else if b == HDLC_ESCAPE {
            escape_next = true;
        } else {
            raw.push(b);
        }
    }
    if escape_next {
        return Err(Error::Framing("dangling escape at end of frame".into()));
    }

    if raw.len() < 2 {
        return Err(Error::Framing("frame too short to contain a CRC".into()));
    }
    let split = raw.len() - 2;
    let (payload, crc_bytes) = raw.split_at(split);
    let received_crc = u16::from_le_bytes([crc_bytes[0], crc_bytes[1]]);
    let expected_crc = CRC16_X25.checksum(payload);
    if received_crc != expected_crc {
        return Err(Error::Framing(format!(
            "CRC mismatch: expected 0x{expected_crc:04x}, got 0x{received_crc:04x}"
        )));
    }

    Ok(payload.to_vec())
}

/// Streaming decoder that accumulates bytes read off the wire and yields a
/// complete, CRC-verified payload once an unescaped frame delimiter arrives.
#[derive(Debug, Default)]
pub struct HdlcDecoder {
    buffer: Vec<u8>,
}

impl HdlcDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte read from the transport.
    ///
    /// Returns `Some(Ok(payload))` on a complete, valid frame,
    /// `Some(Err(_))` on a framing error (the decoder resets itself so the
    /// next frame starts clean), or `None` if more bytes are needed.
    pub fn feed(&mut self, byte: u8) -> Option<Result<Vec<u8>>> {
        if byte == HDLC_FRAME_DELIMITER {
            if self.buffer.is_empty() {
                return None;
            }
            let frame = std::mem::take(&mut self.buffer);
            return Some(decode(&frame));
        }
        self.buffer.push(byte);
        None
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_simple_payload() {
        let payload = vec![0x01, 0x02, 0x03];
        let framed = encode(&payload);
        assert_eq!(*framed.last().unwrap(), HDLC_FRAME_DELIMITER);
        let decoded = decode(&framed).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trip_escapes_delimiter_and_escape_bytes() {
        let payload = vec![HDLC_FRAME_DELIMITER, HDLC_ESCAPE, 0xAA];
        let framed = encode(&payload);
        let decoded = decode(&framed).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trip_all_byte_values() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let framed = encode(&payload);
        let decoded = decode(&framed).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trip_empty_payload() {
        let framed = encode(&[]);
        let decoded = decode(&framed).unwrap();
        assert_eq!(decoded, Vec::<u8>::new());
    }

    #[test]
    fn corrupted_crc_is_framing_error() {
        let mut framed = encode(&[0x01, 0x02, 0x03]);
        // Flip a bit in the payload region, before the CRC/delimiter.
        framed[0] ^= 0x01;
        let err = decode(&framed).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn dangling_escape_is_framing_error() {
        // 0x7D 0x7E with no delimiter afterwards: the decode() path sees this
        // as a body ending in an escape byte with nothing to unescape it.
        let framed = vec![0x01, HDLC_ESCAPE];
        let err = decode(&framed).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn empty_frame_is_framing_error() {
        let err = decode(&[HDLC_FRAME_DELIMITER]).unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[test]
    fn streaming_decoder_feeds_byte_at_a_time() {
        let payload = vec![0xDE, 0xAD, 0xBE, 0xEF];
        let framed = encode(&payload);
        let mut decoder = HdlcDecoder::new();
        let mut result = None;
        for &b in &framed {
            if let Some(r) = decoder.feed(b) {
                result = Some(r);
            }
        }
        assert_eq!(result.unwrap().unwrap(), payload);
    }

    #[test]
    fn streaming_decoder_recovers_after_framing_error() {
        let mut decoder = HdlcDecoder::new();
        // Feed a frame with a corrupted CRC.
        let mut bad = encode(&[0x01, 0x02]);
        bad[0] ^= 0xFF;
        let mut saw_error = false;
        for &b in &bad {
            if let Some(r) = decoder.feed(b) {
                assert!(r.is_err());
                saw_error = true;
            }
        }
        assert!(saw_error);

        // Decoder must accept a fresh, valid frame afterwards.
        let good = encode(&[0xAA, 0xBB]);
        let mut result = None;
        for &b in &good {
            if let Some(r) = decoder.feed(b) {
                result = Some(r);
            }
        }
        assert_eq!(result.unwrap().unwrap(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn single_bit_corruption_never_silently_succeeds_with_original_payload() {
        let payload = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let framed = encode(&payload);
        for byte_idx in 0..framed.len() - 1 {
            for bit in 0..8u8 {
                let mut corrupted = framed.clone();
                corrupted[byte_idx] ^= 1 << bit;
                match decode(&corrupted) {
                    Err(_) => {}
                    Ok(p) => assert_ne!(p, payload, "corruption silently preserved payload"),
                }
            }
        }
    }
}
