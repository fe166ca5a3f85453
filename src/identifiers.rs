//! Type-safe identifiers.
//!
//! Newtype wrappers keep session ids and transport ids from being mixed
//! with arbitrary strings and integers.
//!
//! | Type | Inner | Source |
//! |------|-------|--------|
//! | [`Sid`] | `String` | Generated at handshake, 22-char base64url |
//! | [`TransportId`] | `u64` | Process-wide counter |

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Borrow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Sid
// ============================================================================

/// Session identifier.
///
/// Opaque to clients; used as the `sid` query parameter on every request
/// after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sid(String);

impl Sid {
    /// Generates a fresh random session id.
    ///
    /// 128 random bits from a v4 UUID, base64url-encoded without padding.
    #[must_use]
    pub fn generate() -> Self {
        Self(URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes()))
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Sid {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Sid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for Sid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TransportId
// ============================================================================

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one transport instance for the lifetime of the process.
///
/// Sessions tag transport events with this id so that events from a
/// superseded or probing transport are never confused with the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(u64);

impl TransportId {
    /// Allocates the next transport id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashMap;

    #[test]
    fn test_sid_generate_shape() {
        let sid = Sid::generate();
        assert_eq!(sid.as_str().len(), 22);
        assert!(
            sid.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_sid_generate_unique() {
        let a = Sid::generate();
        let b = Sid::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_sid_lookup_by_str() {
        let sid = Sid::from("abc");
        let mut map = FxHashMap::default();
        map.insert(sid.clone(), 1);
        assert_eq!(map.get("abc"), Some(&1));
    }

    #[test]
    fn test_sid_serializes_as_string() {
        let sid = Sid::from("xyz");
        assert_eq!(serde_json::to_string(&sid).unwrap(), "\"xyz\"");
    }

    #[test]
    fn test_transport_id_increments() {
        let a = TransportId::next();
        let b = TransportId::next();
        assert!(b.as_u64() > a.as_u64());
    }
}
