//! Polling response compression.
//!
//! Responses at or above the configured threshold are gzip- or
//! deflate-encoded when the client's `Accept-Encoding` allows it.

use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::error::Result;

/// Default minimum body size worth compressing, in bytes.
pub const DEFAULT_THRESHOLD: usize = 1024;

// ============================================================================
// HttpCompression
// ============================================================================

/// HTTP compression settings for polling responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpCompression {
    /// Smallest body that gets compressed.
    pub threshold: usize,
}

impl Default for HttpCompression {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

// ============================================================================
// ContentEncoding
// ============================================================================

/// Supported `Content-Encoding` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// gzip container.
    Gzip,
    /// zlib-wrapped deflate, as HTTP `deflate` specifies.
    Deflate,
}

impl ContentEncoding {
    /// Header value.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// Picks an encoding from an `Accept-Encoding` header.
    ///
    /// Highest quality wins; on a tie gzip is preferred. `*` matches gzip.
    /// Entries with `q=0` are refused.
    #[must_use]
    pub fn negotiate(accept_encoding: Option<&str>) -> Option<Self> {
        let header = accept_encoding?;
        let mut best: Option<(Self, f32)> = None;

        for entry in header.split(',') {
            let mut parts = entry.split(';');
            let name = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            let quality = parts
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);

            let encoding = match name.as_str() {
                "gzip" | "*" => Self::Gzip,
                "deflate" => Self::Deflate,
                _ => continue,
            };
            if quality <= 0.0 {
                continue;
            }

            best = match best {
                Some((current, q))
                    if q > quality || (q == quality && current == Self::Gzip) =>
                {
                    Some((current, q))
                }
                _ => Some((encoding, quality)),
            };
        }

        best.map(|(encoding, _)| encoding)
    }

    /// Compresses `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the encoder fails.
    pub fn encode(self, data: &[u8]) -> Result<Bytes> {
        let out = match self {
            Self::Gzip => {
                let mut encoder =
                    GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()?
            }
            Self::Deflate => {
                let mut encoder =
                    ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
                encoder.write_all(data)?;
                encoder.finish()?
            }
        };
        Ok(Bytes::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;

    use flate2::read::{GzDecoder, ZlibDecoder};

    #[test]
    fn test_negotiate() {
        assert_eq!(ContentEncoding::negotiate(None), None);
        assert_eq!(ContentEncoding::negotiate(Some("identity")), None);
        assert_eq!(
            ContentEncoding::negotiate(Some("gzip, deflate, br")),
            Some(ContentEncoding::Gzip)
        );
        assert_eq!(
            ContentEncoding::negotiate(Some("deflate, gzip")),
            Some(ContentEncoding::Gzip)
        );
        assert_eq!(
            ContentEncoding::negotiate(Some("gzip;q=0.5, deflate")),
            Some(ContentEncoding::Deflate)
        );
        assert_eq!(ContentEncoding::negotiate(Some("gzip;q=0")), None);
        assert_eq!(ContentEncoding::negotiate(Some("*")), Some(ContentEncoding::Gzip));
    }

    #[test]
    fn test_gzip_decodes_back() {
        let data = "4hello".repeat(500);
        let compressed = ContentEncoding::Gzip.encode(data.as_bytes()).unwrap();
        assert!(compressed.len() < data.len());

        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_deflate_decodes_back() {
        let data = "4world".repeat(500);
        let compressed = ContentEncoding::Deflate.encode(data.as_bytes()).unwrap();

        let mut decoded = String::new();
        ZlibDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, data);
    }
}
