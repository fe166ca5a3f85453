//! JSONP polling.
//!
//! [`Jsonp`] is long-polling for clients without XHR. Responses are wrapped
//! as a script call `___eio[<j>]("<payload>");`. Requests arrive as a form
//! body whose `d` field holds the payload with newlines escaped by the
//! client.

use std::fmt;
use std::result::Result as StdResult;
use std::sync::{Arc, LazyLock};

use regex::{Captures, NoExpand, Regex};

use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::protocol::Packet;

use super::{CloseCallback, Polling, RawData, Transport, TransportBase, TransportOptions};

/// Script call suffix.
const FOOT: &str = ");";

/// `\n` (unescape) or `\\n` (keep).
static ESCAPED_NEWLINE: LazyLock<StdResult<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(\\)?\\n"));

/// `\\n` written by the client for a literal backslash-n.
static DOUBLE_ESCAPED_NEWLINE: LazyLock<StdResult<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\\\\n"));

fn pattern(re: &'static StdResult<Regex, regex::Error>) -> Result<&'static Regex> {
    re.as_ref()
        .map_err(|e| Error::decode(format!("jsonp pattern: {e}")))
}

// ============================================================================
// Jsonp
// ============================================================================

/// JSONP polling transport.
///
/// Same half-duplex semantics as [`Polling`], with script responses and
/// form-encoded requests.
pub struct Jsonp {
    polling: Arc<Polling>,
}

impl fmt::Debug for Jsonp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Jsonp").field(&self.polling).finish()
    }
}

impl Jsonp {
    /// Creates an open JSONP transport answering callback `index`.
    #[must_use]
    pub fn new(options: &TransportOptions, index: &str) -> Arc<Self> {
        let envelope = JsonpEnvelope::new(index);
        Arc::new(Self {
            polling: Polling::with_envelope(options, Some(envelope)),
        })
    }
}

impl Transport for Jsonp {
    fn base(&self) -> &TransportBase {
        self.polling.base()
    }

    fn handles_upgrades(&self) -> bool {
        false
    }

    fn supports_framing(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        self.polling.writable()
    }

    fn on_request(&self, ctx: Arc<HttpContext>) -> Result<()> {
        self.polling.on_request(ctx)
    }

    fn send(&self, packets: Vec<Packet>) -> Result<()> {
        self.polling.send(packets)
    }

    fn close(&self, callback: Option<CloseCallback>) {
        self.polling.close(callback);
    }

    fn on_data(&self, data: RawData) {
        self.polling.on_data(data);
    }
}

// ============================================================================
// JsonpEnvelope
// ============================================================================

/// Script envelope bound to one client callback index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonpEnvelope {
    head: String,
}

impl JsonpEnvelope {
    /// Creates the envelope for the `j` query value.
    ///
    /// Everything but ASCII digits is dropped so the value cannot inject
    /// script.
    #[must_use]
    pub fn new(index: &str) -> Self {
        let digits: String = index.chars().filter(char::is_ascii_digit).collect();
        Self {
            head: format!("___eio[{digits}]("),
        }
    }

    /// Script call prefix, e.g. `___eio[3](`.
    #[inline]
    #[must_use]
    pub fn head(&self) -> &str {
        &self.head
    }

    /// Wraps an encoded payload as a script call.
    ///
    /// The payload becomes a JavaScript string literal: JSON-quoted, with
    /// U+2028 and U+2029 escaped since JSON allows them raw and JavaScript
    /// does not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if quoting fails.
    pub fn wrap(&self, payload: &str) -> Result<String> {
        let literal = serde_json::to_string(payload)?
            .replace('\u{2028}', "\\u2028")
            .replace('\u{2029}', "\\u2029");
        Ok(format!("{}{literal}{FOOT}", self.head))
    }

    /// Extracts and unescapes the `d` field of a form body.
    ///
    /// Returns `Ok(None)` when there is no `d` field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the unescape patterns are unavailable.
    pub fn decode_body(body: &[u8]) -> Result<Option<String>> {
        let Some(data) = url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "d")
            .map(|(_, value)| value.into_owned())
        else {
            return Ok(None);
        };

        unescape_newlines(&data).map(Some)
    }
}

/// Reverses the client's newline escaping.
///
/// The client sends a newline as `\n` and a literal backslash-n as `\\n`.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the unescape patterns are unavailable.
pub fn unescape_newlines(data: &str) -> Result<String> {
    let single = pattern(&ESCAPED_NEWLINE)?.replace_all(data, |caps: &Captures<'_>| {
        if caps.get(1).is_some() {
            caps[0].to_owned()
        } else {
            "\n".to_owned()
        }
    });
    let unescaped = pattern(&DOUBLE_ESCAPED_NEWLINE)?.replace_all(&single, NoExpand(r"\n"));
    Ok(unescaped.into_owned())
}
