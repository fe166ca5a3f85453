//! Connection rejection.
//!
//! Rejections before a session exists are wire outcomes, not crate errors:
//! the client receives a `{code, message}` JSON body, or a close frame once
//! the request has been promoted to a WebSocket.
//!
//! | Code | Message | HTTP status |
//! |------|---------|-------------|
//! | 0 | Transport unknown | 400 |
//! | 1 | Session ID unknown | 400 |
//! | 2 | Bad handshake method | 400 |
//! | 3 | Bad request | 400 |
//! | 4 | Forbidden | 403 |
//! | 5 | Unsupported protocol version | 400 |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;

use crate::context::HttpContext;

// ============================================================================
// ErrorCode
// ============================================================================

/// Wire-level rejection code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Transport missing, unknown or disabled.
    UnknownTransport = 0,
    /// `sid` names no live session.
    UnknownSid = 1,
    /// Handshake with the wrong method or without a socket upgrade.
    BadHandshakeMethod = 2,
    /// Request refused by verification or middleware.
    BadRequest = 3,
    /// Refused by the allow-request hook.
    Forbidden = 4,
    /// `EIO` names a revision the server does not accept.
    UnsupportedProtocolVersion = 5,
}

impl ErrorCode {
    /// Numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Default message sent to the client.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::UnknownTransport => "Transport unknown",
            Self::UnknownSid => "Session ID unknown",
            Self::BadHandshakeMethod => "Bad handshake method",
            Self::BadRequest => "Bad request",
            Self::Forbidden => "Forbidden",
            Self::UnsupportedProtocolVersion => "Unsupported protocol version",
        }
    }

    /// HTTP status of a rejected request.
    #[inline]
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.as_u8())
    }
}

// ============================================================================
// Abort
// ============================================================================

/// A rejection decided by verification or handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct Abort {
    /// Wire code.
    pub code: ErrorCode,
    /// Extra detail, e.g. `{"name": "TRANSPORT_MISMATCH"}`.
    pub context: Option<Value>,
}

impl Abort {
    /// Creates a rejection without detail.
    #[inline]
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            context: None,
        }
    }

    /// Creates a rejection tagged with a reason name.
    #[must_use]
    pub fn named(code: ErrorCode, name: &str) -> Self {
        Self::new(code).with_context(json!({ "name": name }))
    }

    /// Attaches detail.
    #[inline]
    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Reason name from the detail, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.context.as_ref()?.get("name")?.as_str()
    }

    /// Message sent to the client. A `message` in the detail overrides the
    /// code's default.
    #[must_use]
    pub fn message(&self) -> &str {
        self.context
            .as_ref()
            .and_then(|c| c.get("message"))
            .and_then(Value::as_str)
            .unwrap_or_else(|| self.code.message())
    }
}

impl From<ErrorCode> for Abort {
    fn from(code: ErrorCode) -> Self {
        Self::new(code)
    }
}

// ============================================================================
// ConnectionError
// ============================================================================

/// Published for every rejected connection.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    /// Wire code.
    pub code: ErrorCode,
    /// The code's default message.
    pub message: String,
    /// The rejected request.
    pub ctx: Arc<HttpContext>,
    /// Extra detail.
    pub context: Option<Value>,
}

impl ConnectionError {
    /// Builds the event for `abort` on `ctx`.
    #[must_use]
    pub fn new(ctx: Arc<HttpContext>, abort: &Abort) -> Self {
        Self {
            code: abort.code,
            message: abort.code.message().to_string(),
            ctx,
            context: abort.context.clone(),
        }
    }
}

// ============================================================================
// Writers
// ============================================================================

#[derive(Serialize)]
struct CodeMessage<'a> {
    code: u8,
    message: &'a str,
}

const FALLBACK_BODY: &str = r#"{"code":400,"message":"Bad request"}"#;

/// Answers a plain HTTP request with the JSON error body.
pub fn abort_request(ctx: &HttpContext, abort: &Abort) {
    debug!(code = abort.code.as_u8(), context = ?abort.context, "aborting request");

    let body = serde_json::to_vec(&CodeMessage {
        code: abort.code.as_u8(),
        message: abort.message(),
    })
    .unwrap_or_else(|_| FALLBACK_BODY.as_bytes().to_vec());

    ctx.set_status(abort.code.status());
    ctx.set_response_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Err(e) = ctx.write(body) {
        debug!(error = %e, "abort on completed request");
    }
}

/// Ends an upgrade: a close frame if the socket was promoted, otherwise a
/// `400` with the message as text.
pub fn abort_upgrade(ctx: &HttpContext, abort: &Abort) {
    debug!(code = abort.code.as_u8(), context = ?abort.context, "aborting upgrade");

    if let Some(conn) = ctx.websocket() {
        conn.close_with(CloseCode::Normal, abort.message());
        ctx.finish();
        return;
    }

    ctx.set_status(StatusCode::BAD_REQUEST);
    if let Err(e) = ctx.write(abort.message().to_string()) {
        debug!(error = %e, "abort on completed upgrade");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use bytes::Bytes;
    use futures_util::StreamExt;
    use http::Request;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    use crate::context::websocket::test_support::pair;

    fn ctx() -> HttpContext {
        HttpContext::from_request(
            Request::builder()
                .uri("/engine.io/?sid=nope")
                .body(Bytes::new())
                .unwrap(),
        )
    }

    #[test]
    fn test_code_table() {
        let table = [
            (ErrorCode::UnknownTransport, 0, "Transport unknown", 400),
            (ErrorCode::UnknownSid, 1, "Session ID unknown", 400),
            (ErrorCode::BadHandshakeMethod, 2, "Bad handshake method", 400),
            (ErrorCode::BadRequest, 3, "Bad request", 400),
            (ErrorCode::Forbidden, 4, "Forbidden", 403),
            (ErrorCode::UnsupportedProtocolVersion, 5, "Unsupported protocol version", 400),
        ];
        for (code, number, message, status) in table {
            assert_eq!(code.as_u8(), number);
            assert_eq!(code.message(), message);
            assert_eq!(code.status().as_u16(), status);
        }
    }

    #[test]
    fn test_context_message_overrides_default() {
        let abort = Abort::new(ErrorCode::Forbidden)
            .with_context(json!({ "message": "go away" }));
        assert_eq!(abort.message(), "go away");
        assert_eq!(Abort::named(ErrorCode::BadRequest, "X").message(), "Bad request");
        assert_eq!(Abort::named(ErrorCode::BadRequest, "X").name(), Some("X"));
    }

    #[test]
    fn test_abort_request_writes_json() {
        let request = ctx();
        abort_request(&request, &Abort::new(ErrorCode::UnknownSid));

        let response = request.to_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, json!({ "code": 1, "message": "Session ID unknown" }));
    }

    #[test]
    fn test_forbidden_is_403() {
        let request = ctx();
        abort_request(
            &request,
            &Abort::new(ErrorCode::Forbidden).with_context(json!({ "message": "denied" })),
        );
        let response = request.to_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body, json!({ "code": 4, "message": "denied" }));
    }

    #[test]
    fn test_abort_upgrade_without_socket() {
        let request = ctx();
        abort_upgrade(&request, &Abort::new(ErrorCode::UnknownTransport));
        assert_eq!(request.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            request.response_body(),
            Some(Bytes::from_static(b"Transport unknown"))
        );
    }

    #[tokio::test]
    async fn test_abort_upgrade_sends_close_frame() {
        let (conn, mut client) = pair().await;
        let request = ctx();
        assert!(request.set_websocket(conn));

        abort_upgrade(&request, &Abort::new(ErrorCode::UnsupportedProtocolVersion));

        let frame = timeout(Duration::from_secs(1), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let Message::Close(Some(close)) = frame else {
            panic!("expected close frame, got {frame:?}");
        };
        assert_eq!(close.code, CloseCode::Normal);
        assert_eq!(close.reason.as_str(), "Unsupported protocol version");
        assert!(request.is_done());
    }
}
