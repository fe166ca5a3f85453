//! Payload framing: several packets in one HTTP body.
//!
//! - v4: text packets joined by the record separator `\x1e`.
//! - v3: each packet prefixed with `<length>:`, where the length counts
//!   UTF-16 code units (the unit the JavaScript client measures in).
//!
//! Binary data inside a text payload is always base64 text. v3 clients may
//! instead POST an `application/octet-stream` body, framed as records of
//! `<0|1><length digits as bytes 0-9>0xFF<packet>`; see
//! [`decode_binary_payload`].

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;

use crate::error::{Error, Result};

use super::packet::{
    EncodedPacket, Packet, ProtocolVersion, decode_binary_packet, decode_text_packet,
    encode_packet,
};

// ============================================================================
// Constants
// ============================================================================

/// v4 packet separator.
pub const SEPARATOR: char = '\x1e';

/// Ends the length digits of a v3 binary payload record.
const LENGTH_TERMINATOR: u8 = 0xff;

/// More digits than this cannot describe a body we would accept.
const MAX_LENGTH_DIGITS: usize = 20;

// ============================================================================
// Encoding
// ============================================================================

/// Encodes packets into one text payload.
#[must_use]
pub fn encode_payload(packets: &[Packet], protocol: ProtocolVersion) -> String {
    let mut payload = String::new();

    for (index, packet) in packets.iter().enumerate() {
        let encoded = match encode_packet(packet, false, protocol) {
            EncodedPacket::Text(text) => text,
            // `supports_binary = false` always yields text
            EncodedPacket::Binary(_) => continue,
        };

        match protocol {
            ProtocolVersion::V4 => {
                if index > 0 {
                    payload.push(SEPARATOR);
                }
                payload.push_str(&encoded);
            }
            ProtocolVersion::V3 => {
                payload.push_str(&encoded.encode_utf16().count().to_string());
                payload.push(':');
                payload.push_str(&encoded);
            }
        }
    }

    payload
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a text payload into packets, in order.
///
/// # Errors
///
/// Returns [`Error::Decode`] if any packet or length prefix is malformed.
/// Nothing is returned for a payload that fails part-way.
pub fn decode_payload(payload: &str, protocol: ProtocolVersion) -> Result<Vec<Packet>> {
    match protocol {
        ProtocolVersion::V4 => payload
            .split(SEPARATOR)
            .map(|encoded| decode_text_packet(encoded, protocol))
            .collect(),
        ProtocolVersion::V3 => decode_length_prefixed(payload),
    }
}

fn decode_length_prefixed(payload: &str) -> Result<Vec<Packet>> {
    if payload.is_empty() {
        return Err(Error::decode("empty payload"));
    }

    let mut packets = Vec::new();
    let mut rest = payload;

    while !rest.is_empty() {
        let colon = rest
            .find(':')
            .ok_or_else(|| Error::decode("missing length prefix"))?;
        let length: usize = rest[..colon]
            .parse()
            .map_err(|_| Error::decode(format!("invalid length prefix {:?}", &rest[..colon])))?;
        rest = &rest[colon + 1..];

        let end = utf16_offset(rest, length)
            .ok_or_else(|| Error::decode("length prefix exceeds payload"))?;
        packets.push(decode_text_packet(&rest[..end], ProtocolVersion::V3)?);
        rest = &rest[end..];
    }

    Ok(packets)
}

/// Decodes a v3 binary payload into packets, in order.
///
/// Each record starts with `0` (string packet, UTF-8 text) or `1` (binary
/// packet, first byte is the packet type), then the record length as one
/// byte per decimal digit, then `0xFF`.
///
/// # Errors
///
/// Returns [`Error::Decode`] if a record is truncated, its kind or length is
/// malformed, or its packet fails to decode.
pub fn decode_binary_payload(payload: &[u8]) -> Result<Vec<Packet>> {
    if payload.is_empty() {
        return Err(Error::decode("empty payload"));
    }

    let mut packets = Vec::new();
    let mut rest = payload;

    while let Some((&kind, tail)) = rest.split_first() {
        let is_string = match kind {
            0 => true,
            1 => false,
            other => return Err(Error::decode(format!("invalid record kind {other}"))),
        };

        let terminator = tail
            .iter()
            .position(|&b| b == LENGTH_TERMINATOR)
            .ok_or_else(|| Error::decode("missing length terminator"))?;
        let digits = &tail[..terminator];
        if digits.is_empty() || digits.len() > MAX_LENGTH_DIGITS {
            return Err(Error::decode("invalid record length"));
        }
        let length = digits.iter().try_fold(0usize, |acc, &digit| {
            if digit > 9 {
                return None;
            }
            acc.checked_mul(10)?.checked_add(usize::from(digit))
        });
        let length = length.ok_or_else(|| Error::decode("invalid record length"))?;

        let body = &tail[terminator + 1..];
        if body.len() < length {
            return Err(Error::decode("length prefix exceeds payload"));
        }
        let (record, remaining) = body.split_at(length);

        let packet = if is_string {
            let text = std::str::from_utf8(record)
                .map_err(|_| Error::decode("string record is not UTF-8"))?;
            decode_text_packet(text, ProtocolVersion::V3)?
        } else {
            decode_binary_packet(Bytes::copy_from_slice(record), ProtocolVersion::V3)?
        };
        packets.push(packet);
        rest = remaining;
    }

    Ok(packets)
}

/// Byte offset after `units` UTF-16 code units, if the string is long enough.
fn utf16_offset(text: &str, units: usize) -> Option<usize> {
    let mut counted = 0;
    for (offset, c) in text.char_indices() {
        if counted == units {
            return Some(offset);
        }
        counted += c.len_utf16();
        if counted > units {
            return None;
        }
    }
    (counted == units).then_some(text.len())
}

// ============================================================================
// Tests
// ============================================================================
