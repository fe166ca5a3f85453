//! Packet types and single-packet encoding.
//!
//! A packet is one protocol message unit. On the wire a text packet is the
//! type digit followed by its data (`4hello`). Binary data travels as a raw
//! WebSocket frame when the carrier supports it, otherwise base64-encoded
//! behind a `b` prefix.
//!
//! | Type | Digit | Meaning |
//! |------|-------|---------|
//! | `open` | `0` | Handshake data, sent by the server |
//! | `close` | `1` | Transport close request |
//! | `ping` | `2` | Heartbeat / upgrade probe |
//! | `pong` | `3` | Heartbeat / probe reply |
//! | `message` | `4` | Application data |
//! | `upgrade` | `5` | Commits a transport upgrade |
//! | `noop` | `6` | Releases a pending long-poll |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Data carried by the upgrade probe `ping` / `pong` pair.
pub const PROBE: &str = "probe";

/// Prefix marking a base64-encoded binary packet inside a text payload.
const BINARY_PREFIX: char = 'b';

// ============================================================================
// ProtocolVersion
// ============================================================================

/// Engine.IO protocol revision negotiated through the `EIO` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    /// Legacy revision 3 (client-initiated heartbeat, length-prefixed payloads).
    V3,
    /// Current revision 4.
    #[default]
    V4,
}

impl ProtocolVersion {
    /// Resolves the `EIO` query value. Anything other than `"4"` is v3.
    #[inline]
    #[must_use]
    pub fn from_query(eio: Option<&str>) -> Self {
        match eio {
            Some("4") => Self::V4,
            _ => Self::V3,
        }
    }

    /// Returns the revision number.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::V3 => 3,
            Self::V4 => 4,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

// ============================================================================
// PacketType
// ============================================================================

/// Kind of an Engine.IO packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Handshake data.
    Open,
    /// Close request.
    Close,
    /// Heartbeat or probe.
    Ping,
    /// Heartbeat or probe reply.
    Pong,
    /// Application payload.
    Message,
    /// Upgrade commit.
    Upgrade,
    /// No operation.
    Noop,
}

impl PacketType {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Close => 1,
            Self::Ping => 2,
            Self::Pong => 3,
            Self::Message => 4,
            Self::Upgrade => 5,
            Self::Noop => 6,
        }
    }

    /// Returns the ASCII digit used in text encodings.
    #[inline]
    #[must_use]
    pub const fn as_char(self) -> char {
        (b'0' + self.as_u8()) as char
    }

    /// Parses a numeric code.
    #[inline]
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Open),
            1 => Some(Self::Close),
            2 => Some(Self::Ping),
            3 => Some(Self::Pong),
            4 => Some(Self::Message),
            5 => Some(Self::Upgrade),
            6 => Some(Self::Noop),
            _ => None,
        }
    }

    /// Parses an ASCII digit.
    #[inline]
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        c.to_digit(10).and_then(|d| Self::from_u8(d as u8))
    }

    /// Returns the lowercase name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// PacketData
// ============================================================================

/// Packet body: UTF-8 text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketData {
    /// Text data.
    Text(String),
    /// Binary data.
    Binary(Bytes),
}

impl PacketData {
    /// Returns `true` for binary data.
    #[inline]
    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Returns the text, if this is text data.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the data is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for PacketData {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for PacketData {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<Bytes> for PacketData {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for PacketData {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(value))
    }
}

// ============================================================================
// Packet
// ============================================================================

/// One protocol-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet kind.
    pub packet_type: PacketType,
    /// Optional body.
    pub data: Option<PacketData>,
}

impl Packet {
    /// Creates a packet.
    #[inline]
    #[must_use]
    pub fn new(packet_type: PacketType, data: Option<PacketData>) -> Self {
        Self { packet_type, data }
    }

    /// Creates an `open` packet carrying handshake JSON.
    #[inline]
    #[must_use]
    pub fn open(handshake: impl Into<String>) -> Self {
        Self::new(PacketType::Open, Some(PacketData::Text(handshake.into())))
    }

    /// Creates a `close` packet.
    #[inline]
    #[must_use]
    pub fn close() -> Self {
        Self::new(PacketType::Close, None)
    }

    /// Creates a `ping` packet.
    #[inline]
    #[must_use]
    pub fn ping() -> Self {
        Self::new(PacketType::Ping, None)
    }

    /// Creates a `pong` packet.
    #[inline]
    #[must_use]
    pub fn pong() -> Self {
        Self::new(PacketType::Pong, None)
    }

    /// Creates the `pong` reply to an upgrade probe.
    #[inline]
    #[must_use]
    pub fn pong_probe() -> Self {
        Self::new(PacketType::Pong, Some(PacketData::from(PROBE)))
    }

    /// Creates a `message` packet.
    #[inline]
    #[must_use]
    pub fn message(data: impl Into<PacketData>) -> Self {
        Self::new(PacketType::Message, Some(data.into()))
    }

    /// Creates an `upgrade` packet.
    #[inline]
    #[must_use]
    pub fn upgrade() -> Self {
        Self::new(PacketType::Upgrade, None)
    }

    /// Creates a `noop` packet.
    #[inline]
    #[must_use]
    pub fn noop() -> Self {
        Self::new(PacketType::Noop, None)
    }

    /// Returns the text body, if any.
    #[inline]
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.data.as_ref().and_then(PacketData::as_text)
    }

    /// Returns `true` for a `ping` carrying the probe marker.
    #[inline]
    #[must_use]
    pub fn is_probe_ping(&self) -> bool {
        self.packet_type == PacketType::Ping && self.text() == Some(PROBE)
    }
}

// ============================================================================
// EncodedPacket
// ============================================================================

/// Wire form of one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedPacket {
    /// Sent as a text frame or appended to a text payload.
    Text(String),
    /// Sent as a binary frame.
    Binary(Bytes),
}

impl EncodedPacket {
    /// Returns the text form, if this is text.
    #[inline]
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encodes one packet.
///
/// Binary data is emitted as a raw frame only when `supports_binary` is set;
/// otherwise it is base64-encoded behind a `b` prefix (v3 also keeps the
/// type digit after the prefix).
#[must_use]
pub fn encode_packet(
    packet: &Packet,
    supports_binary: bool,
    protocol: ProtocolVersion,
) -> EncodedPacket {
    match &packet.data {
        Some(PacketData::Binary(bytes)) if supports_binary => match protocol {
            ProtocolVersion::V4 => EncodedPacket::Binary(bytes.clone()),
            ProtocolVersion::V3 => {
                let mut buf = BytesMut::with_capacity(bytes.len() + 1);
                buf.put_u8(packet.packet_type.as_u8());
                buf.put_slice(bytes);
                EncodedPacket::Binary(buf.freeze())
            }
        },
        Some(PacketData::Binary(bytes)) => {
            let mut text = String::with_capacity(bytes.len() * 4 / 3 + 4);
            text.push(BINARY_PREFIX);
            if protocol == ProtocolVersion::V3 {
                text.push(packet.packet_type.as_char());
            }
            STANDARD.encode_string(bytes, &mut text);
            EncodedPacket::Text(text)
        }
        Some(PacketData::Text(data)) => {
            let mut text = String::with_capacity(data.len() + 1);
            text.push(packet.packet_type.as_char());
            text.push_str(data);
            EncodedPacket::Text(text)
        }
        None => EncodedPacket::Text(packet.packet_type.as_char().to_string()),
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes one text-encoded packet.
///
/// # Errors
///
/// Returns [`Error::Decode`] for an empty string, an unknown type digit, or
/// invalid base64 in a binary packet.
pub fn decode_text_packet(encoded: &str, protocol: ProtocolVersion) -> Result<Packet> {
    let mut chars = encoded.chars();
    let first = chars
        .next()
        .ok_or_else(|| Error::decode("empty packet"))?;

    if first == BINARY_PREFIX {
        let (packet_type, body) = match protocol {
            ProtocolVersion::V4 => (PacketType::Message, chars.as_str()),
            ProtocolVersion::V3 => {
                let type_char = chars
                    .next()
                    .ok_or_else(|| Error::decode("truncated binary packet"))?;
                let packet_type = PacketType::from_char(type_char)
                    .ok_or_else(|| Error::decode(format!("unknown packet type {type_char:?}")))?;
                (packet_type, chars.as_str())
            }
        };
        let bytes = STANDARD
            .decode(body)
            .map_err(|e| Error::decode(format!("invalid base64: {e}")))?;
        return Ok(Packet::new(
            packet_type,
            Some(PacketData::Binary(Bytes::from(bytes))),
        ));
    }

    let packet_type = PacketType::from_char(first)
        .ok_or_else(|| Error::decode(format!("unknown packet type {first:?}")))?;
    let rest = chars.as_str();
    let data = (!rest.is_empty()).then(|| PacketData::Text(rest.to_owned()));

    Ok(Packet::new(packet_type, data))
}

/// Decodes one binary WebSocket frame.
///
/// v4 frames are always `message` packets; v3 frames carry the type as the
/// first byte.
///
/// # Errors
///
/// Returns [`Error::Decode`] for an empty v3 frame or unknown type byte.
pub fn decode_binary_packet(frame: Bytes, protocol: ProtocolVersion) -> Result<Packet> {
    match protocol {
        ProtocolVersion::V4 => Ok(Packet::message(frame)),
        ProtocolVersion::V3 => {
            let code = *frame
                .first()
                .ok_or_else(|| Error::decode("empty binary frame"))?;
            let packet_type = PacketType::from_u8(code)
                .ok_or_else(|| Error::decode(format!("unknown packet type {code}")))?;
            Ok(Packet::new(
                packet_type,
                Some(PacketData::Binary(frame.slice(1..))),
            ))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_codes() {
        assert_eq!(PacketType::Open.as_char(), '0');
        assert_eq!(PacketType::Noop.as_char(), '6');
        assert_eq!(PacketType::from_char('4'), Some(PacketType::Message));
        assert_eq!(PacketType::from_char('7'), None);
        assert_eq!(PacketType::from_char('x'), None);
    }

    #[test]
    fn test_protocol_from_query() {
        assert_eq!(ProtocolVersion::from_query(Some("4")), ProtocolVersion::V4);
        assert_eq!(ProtocolVersion::from_query(Some("3")), ProtocolVersion::V3);
        assert_eq!(ProtocolVersion::from_query(None), ProtocolVersion::V3);
    }

    #[test]
    fn test_encode_text_message() {
        let encoded = encode_packet(&Packet::message("hello"), true, ProtocolVersion::V4);
        assert_eq!(encoded, EncodedPacket::Text("4hello".into()));
    }

    #[test]
    fn test_encode_packet_without_data() {
        let encoded = encode_packet(&Packet::noop(), false, ProtocolVersion::V4);
        assert_eq!(encoded, EncodedPacket::Text("6".into()));
    }

    #[test]
    fn test_encode_binary_as_frame_v4() {
        let packet = Packet::message(vec![1u8, 2, 3]);
        let encoded = encode_packet(&packet, true, ProtocolVersion::V4);
        assert_eq!(encoded, EncodedPacket::Binary(Bytes::from_static(&[1, 2, 3])));
    }

    #[test]
    fn test_encode_binary_as_frame_v3_prefixes_type() {
        let packet = Packet::message(vec![1u8, 2, 3]);
        let encoded = encode_packet(&packet, true, ProtocolVersion::V3);
        assert_eq!(
            encoded,
            EncodedPacket::Binary(Bytes::from_static(&[4, 1, 2, 3]))
        );
    }

    #[test]
    fn test_encode_binary_as_base64() {
        let packet = Packet::message(vec![1u8, 2, 3, 4]);
        assert_eq!(
            encode_packet(&packet, false, ProtocolVersion::V4),
            EncodedPacket::Text("bAQIDBA==".into())
        );
        assert_eq!(
            encode_packet(&packet, false, ProtocolVersion::V3),
            EncodedPacket::Text("b4AQIDBA==".into())
        );
    }

    #[test]
    fn test_decode_text_packet() {
        let packet = decode_text_packet("2probe", ProtocolVersion::V4).unwrap();
        assert!(packet.is_probe_ping());

        let packet = decode_text_packet("5", ProtocolVersion::V4).unwrap();
        assert_eq!(packet.packet_type, PacketType::Upgrade);
        assert!(packet.data.is_none());
    }

    #[test]
    fn test_decode_base64_packet() {
        let packet = decode_text_packet("bAQIDBA==", ProtocolVersion::V4).unwrap();
        assert_eq!(packet, Packet::message(vec![1u8, 2, 3, 4]));

        let packet = decode_text_packet("b4AQIDBA==", ProtocolVersion::V3).unwrap();
        assert_eq!(packet, Packet::message(vec![1u8, 2, 3, 4]));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_text_packet("", ProtocolVersion::V4).is_err());
        assert!(decode_text_packet("9nine", ProtocolVersion::V4).is_err());
        assert!(decode_text_packet("b!!!", ProtocolVersion::V4).is_err());
    }

    #[test]
    fn test_decode_binary_frame() {
        let frame = Bytes::from_static(&[4, 9, 9]);
        let v4 = decode_binary_packet(frame.clone(), ProtocolVersion::V4).unwrap();
        assert_eq!(v4, Packet::message(frame));

        let v3 = decode_binary_packet(Bytes::from_static(&[4, 9, 9]), ProtocolVersion::V3).unwrap();
        assert_eq!(v3, Packet::message(vec![9u8, 9]));

        assert!(decode_binary_packet(Bytes::new(), ProtocolVersion::V3).is_err());
    }

    #[test]
    fn test_utf8_text_survives() {
        let packet = Packet::message("héllo €");
        let EncodedPacket::Text(text) = encode_packet(&packet, false, ProtocolVersion::V4) else {
            panic!("expected text");
        };
        assert_eq!(decode_text_packet(&text, ProtocolVersion::V4).unwrap(), packet);
    }
}
