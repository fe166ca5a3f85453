//! Error types for the Engine.IO server.
//!
//! This module defines the Rust-level error type used throughout the crate.
//! Wire-visible rejection codes (the `{code, message}` body sent to clients)
//! live in [`crate::server::ErrorCode`] and are not errors in this sense:
//! a rejected handshake is a normal outcome for the server.
//!
//! # Usage
//!
//! ```ignore
//! use engine_io_server::{Error, Result};
//!
//! fn example(ctx: &HttpContext) -> Result<()> {
//!     ctx.write("ok")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Transport`], [`Error::TransportClosed`], [`Error::RepeatedWrite`] |
//! | Protocol | [`Error::Decode`], [`Error::UnknownTransport`], [`Error::SessionNotFound`] |
//! | Session | [`Error::UpgradeRejected`], [`Error::Middleware`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Http`], [`Error::Hyper`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::Sid;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when server or attach options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport-level failure.
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// Write attempted on a transport that is closing or closed.
    #[error("Transport closed")]
    TransportClosed,

    /// Second write attempted on an already completed HTTP response.
    #[error("you cannot write data repeatedly")]
    RepeatedWrite,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Malformed packet or payload.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decoding failure.
        message: String,
    },

    /// Transport name not recognized by the registry.
    #[error("Unknown transport: {name}")]
    UnknownTransport {
        /// The unrecognized transport name.
        name: String,
    },

    /// No session registered under the given id.
    #[error("Session not found: {sid}")]
    SessionNotFound {
        /// The missing session id.
        sid: Sid,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Upgrade attempt refused by the session state machine.
    #[error("Upgrade rejected: {reason}")]
    UpgradeRejected {
        /// Why the upgrade was refused.
        reason: String,
    },

    /// A request middleware failed.
    #[error("Middleware error: {message}")]
    Middleware {
        /// Description of the middleware failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP message construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// HTTP server error.
    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an unknown transport error.
    #[inline]
    pub fn unknown_transport(name: impl Into<String>) -> Self {
        Self::UnknownTransport { name: name.into() }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(sid: Sid) -> Self {
        Self::SessionNotFound { sid }
    }

    /// Creates an upgrade rejected error.
    #[inline]
    pub fn upgrade_rejected(reason: impl Into<String>) -> Self {
        Self::UpgradeRejected {
            reason: reason.into(),
        }
    }

    /// Creates a middleware error.
    #[inline]
    pub fn middleware(message: impl Into<String>) -> Self {
        Self::Middleware {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error only affects a single transport.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::TransportClosed | Self::WebSocket(_) | Self::Io(_)
        )
    }

    /// Returns `true` if this error stems from malformed client input.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::UnknownTransport { .. } | Self::SessionNotFound { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::transport("socket gone");
        assert_eq!(err.to_string(), "Transport error: socket gone");
    }

    #[test]
    fn test_repeated_write_message() {
        assert_eq!(
            Error::RepeatedWrite.to_string(),
            "you cannot write data repeatedly"
        );
    }

    #[test]
    fn test_is_transport_error() {
        assert!(Error::TransportClosed.is_transport_error());
        assert!(Error::transport("x").is_transport_error());
        assert!(!Error::config("x").is_transport_error());
    }

    #[test]
    fn test_is_protocol_error() {
        assert!(Error::decode("bad").is_protocol_error());
        assert!(Error::unknown_transport("carrier-pigeon").is_protocol_error());
        assert!(!Error::RepeatedWrite.is_protocol_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::BrokenPipe, "pipe");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
