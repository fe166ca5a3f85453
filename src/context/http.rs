//! Per-request HTTP context.
//!
//! Wraps one inbound request (method, URI, headers, parsed query, collected
//! body) and its single outbound response. The response body can be
//! written at most once; writing fires the completion signal that the
//! request handler and any watcher are waiting on.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http::header::IntoHeaderName;
use http::request::Parts;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{Error, Result};

use super::signal::DoneSignal;
use super::websocket::WebSocketConn;

// ============================================================================
// ResponseSlot
// ============================================================================

#[derive(Debug)]
struct ResponseSlot {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Default for ResponseSlot {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

// ============================================================================
// HttpContext
// ============================================================================

/// One HTTP request and its deferred, single-write response.
///
/// # Thread Safety
///
/// `HttpContext` is `Send + Sync` and is shared as `Arc<HttpContext>`
/// between the request task, the transport that answers it, and the
/// task watching for premature close.
#[derive(Debug)]
pub struct HttpContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    query: FxHashMap<String, String>,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    secure: bool,
    response: Mutex<ResponseSlot>,
    done: DoneSignal,
    aborted: AtomicBool,
    websocket: OnceLock<WebSocketConn>,
}

// ============================================================================
// HttpContext - Constructors
// ============================================================================

impl HttpContext {
    /// Creates a context from request parts and the collected body.
    #[must_use]
    pub fn new(parts: Parts, body: Bytes) -> Self {
        let query = parse_query(parts.uri.query());

        Self {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            query,
            body,
            remote_addr: None,
            secure: false,
            response: Mutex::new(ResponseSlot::default()),
            done: DoneSignal::new(),
            aborted: AtomicBool::new(false),
            websocket: OnceLock::new(),
        }
    }

    /// Creates a context from a request whose body is already collected.
    #[must_use]
    pub fn from_request(request: Request<Bytes>) -> Self {
        let (parts, body) = request.into_parts();
        Self::new(parts, body)
    }

    /// Records the peer address.
    #[inline]
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Marks the request as received over TLS.
    #[inline]
    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

// ============================================================================
// HttpContext - Request
// ============================================================================

impl HttpContext {
    /// Request method.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI.
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Request headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A request header as text, if present and valid ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// A decoded query parameter. The first occurrence wins.
    #[must_use]
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// The collected request body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Peer address, when known.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether the request arrived over TLS.
    #[inline]
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// The `User-Agent` header.
    #[inline]
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.header("user-agent")
    }

    /// The WebSocket this request was promoted to, if any.
    #[inline]
    #[must_use]
    pub fn websocket(&self) -> Option<&WebSocketConn> {
        self.websocket.get()
    }

    /// Attaches the promoted WebSocket. Returns `false` if one was already set.
    pub fn set_websocket(&self, conn: WebSocketConn) -> bool {
        self.websocket.set(conn).is_ok()
    }
}

// ============================================================================
// HttpContext - Response
// ============================================================================

impl HttpContext {
    /// Sets the response status. Ignored once the response is complete.
    pub fn set_status(&self, status: StatusCode) {
        let mut slot = self.response.lock();
        if !self.done.is_done() {
            slot.status = status;
        }
    }

    /// Current response status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.response.lock().status
    }

    /// Sets a response header. Ignored once the response is complete.
    pub fn set_response_header<K: IntoHeaderName>(&self, key: K, value: HeaderValue) {
        let mut slot = self.response.lock();
        if !self.done.is_done() {
            slot.headers.insert(key, value);
        }
    }

    /// A response header as text.
    #[must_use]
    pub fn response_header(&self, name: &str) -> Option<String> {
        self.response
            .lock()
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    /// Writes the response body and completes the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RepeatedWrite`] if the response was already written
    /// or the request was finished; the first body is left untouched.
    pub fn write(&self, body: impl Into<Bytes>) -> Result<()> {
        let mut slot = self.response.lock();
        if self.done.is_done() {
            return Err(Error::RepeatedWrite);
        }
        slot.body = body.into();
        trace!(status = %slot.status, len = slot.body.len(), "response written");
        self.done.fire();
        Ok(())
    }

    /// Completes the request without a body. Idempotent.
    pub fn finish(&self) {
        let _slot = self.response.lock();
        self.done.fire();
    }

    /// Completes the request because the peer went away. Idempotent.
    ///
    /// Has no effect on a request that already completed normally.
    pub fn abort(&self) {
        let _slot = self.response.lock();
        if !self.done.is_done() {
            self.aborted.store(true, Ordering::SeqCst);
            self.done.fire();
        }
    }

    /// Returns `true` if the request ended through [`abort`](Self::abort).
    #[inline]
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Returns `true` once the request is complete.
    #[inline]
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.is_done()
    }

    /// Waits for the request to complete.
    pub async fn done(&self) {
        self.done.wait().await;
    }

    /// The written body, if the response is complete.
    #[must_use]
    pub fn response_body(&self) -> Option<Bytes> {
        let slot = self.response.lock();
        self.done.is_done().then(|| slot.body.clone())
    }

    /// Snapshot of the response for the HTTP layer to send.
    #[must_use]
    pub fn to_response(&self) -> Response<Bytes> {
        let slot = self.response.lock();
        let mut response = Response::new(slot.body.clone());
        *response.status_mut() = slot.status;
        *response.headers_mut() = slot.headers.clone();
        response
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_query(query: Option<&str>) -> FxHashMap<String, String> {
    let mut params = FxHashMap::default();
    if let Some(query) = query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
    }
    params
}

// ============================================================================
// Tests
// ============================================================================
