//! Engine.IO wire protocol.
//!
//! Packets are the unit of exchange; payloads batch several packets into
//! one HTTP body; the handshake is the JSON body of the first `open` packet.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `packet` | Packet types, single packet encode/decode |
//! | `payload` | Multi-packet framing for polling bodies |
//! | `handshake` | `open` packet data |

// ============================================================================
// Submodules
// ============================================================================

/// Packet types and single-packet codec.
pub mod packet;

/// Payload framing.
pub mod payload;

/// Handshake data.
pub mod handshake;

// ============================================================================
// Re-exports
// ============================================================================

pub use handshake::HandshakeData;
pub use packet::{
    EncodedPacket, PROBE, Packet, PacketData, PacketType, ProtocolVersion, decode_binary_packet,
    decode_text_packet, encode_packet,
};
pub use payload::{SEPARATOR, decode_binary_payload, decode_payload, encode_payload};
