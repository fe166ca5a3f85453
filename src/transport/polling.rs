//! HTTP long-polling transport.
//!
//! Half-duplex: at most one pending GET waits for server data, at most one
//! POST delivers client data. A write answers the pending GET with every
//! queued packet in one payload; the client must poll again before the
//! next write.
//!
//! The JSONP flavor is the [`Jsonp`](super::Jsonp) transport, which runs
//! this carrier with a [`JsonpEnvelope`]: responses become script calls and
//! POST bodies are form-encoded.
//!
//! # Close Handling
//!
//! | Situation | Behavior |
//! |-----------|----------|
//! | GET pending | `close` packet written now |
//! | discarded | closed now, nothing written |
//! | otherwise | close buffered until next GET or the close timeout |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::protocol::{
    Packet, PacketType, ProtocolVersion, decode_binary_payload, decode_payload, encode_payload,
};

use super::{
    CloseCallback, ContentEncoding, HttpCompression, JsonpEnvelope, RawData, Transport,
    TransportBase, TransportKind, TransportOptions,
};

// ============================================================================
// Constants
// ============================================================================

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";
const JSONP_CONTENT_TYPE: &str = "text/javascript; charset=UTF-8";
const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

// ============================================================================
// PollState
// ============================================================================

#[derive(Default)]
struct PollState {
    /// Pending GET.
    req: Option<Arc<HttpContext>>,
    /// POST being processed.
    data_req: Option<Arc<HttpContext>>,
    writable: bool,
    /// Buffered orderly close, run once the `close` packet is flushed.
    should_close: Option<CloseCallback>,
    close_timer: Option<JoinHandle<()>>,
}

// ============================================================================
// Polling
// ============================================================================

/// Long-polling transport.
pub struct Polling {
    base: TransportBase,
    this: Weak<Polling>,
    jsonp: Option<JsonpEnvelope>,
    http_compression: Option<HttpCompression>,
    max_http_buffer_size: usize,
    close_timeout: Duration,
    state: Mutex<PollState>,
}

impl fmt::Debug for Polling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Polling")
            .field("base", &self.base)
            .field("jsonp", &self.jsonp)
            .field("writable", &self.writable())
            .finish_non_exhaustive()
    }
}

impl Polling {
    /// Creates an open XHR polling transport.
    #[inline]
    #[must_use]
    pub fn new(options: &TransportOptions) -> Arc<Self> {
        Self::with_envelope(options, None)
    }

    pub(super) fn with_envelope(
        options: &TransportOptions,
        jsonp: Option<JsonpEnvelope>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            base: TransportBase::new(TransportKind::Polling, options.protocol, false),
            this: this.clone(),
            jsonp,
            http_compression: options.http_compression,
            max_http_buffer_size: options.max_http_buffer_size,
            close_timeout: options.close_timeout,
            state: Mutex::new(PollState::default()),
        })
    }
}

// ============================================================================
// Polling - Requests
// ============================================================================

impl Polling {
    fn on_poll_request(&self, ctx: Arc<HttpContext>) {
        let should_close = {
            let mut state = self.state.lock();
            if state.req.is_some() {
                drop(state);
                debug!(transport = %self.base.id(), "poll request overlap");
                self.base.on_error("overlap from client", None);
                reply(&ctx, StatusCode::BAD_REQUEST, Bytes::new());
                return;
            }

            trace!(transport = %self.base.id(), "poll request armed");
            state.req = Some(Arc::clone(&ctx));
            state.writable = true;
            state.should_close.is_some()
        };

        self.watch_request(ctx);
        self.base.on_drain();

        // A close was buffered while no GET was pending; flush it now
        if should_close && self.writable() {
            debug!(transport = %self.base.id(), "flushing buffered close");
            let _ = self.write_packets(vec![Packet::noop()]);
        }
    }

    /// Clears the pending GET once it completes and reports premature close.
    fn watch_request(&self, ctx: Arc<HttpContext>) {
        let this = self.this.clone();
        tokio::spawn(async move {
            ctx.done().await;
            let Some(this) = this.upgrade() else {
                return;
            };

            {
                let mut state = this.state.lock();
                if state.req.as_ref().is_some_and(|req| Arc::ptr_eq(req, &ctx)) {
                    state.req = None;
                    state.writable = false;
                }
            }

            if ctx.is_aborted() {
                this.base
                    .on_error("poll connection closed prematurely", None);
            }
        });
    }

    fn on_data_request(&self, ctx: Arc<HttpContext>) {
        let is_binary = ctx.header(CONTENT_TYPE.as_str()) == Some(BINARY_CONTENT_TYPE);
        if is_binary && self.base.protocol() == ProtocolVersion::V4 {
            self.base.on_error("invalid content", None);
            reply(&ctx, StatusCode::BAD_REQUEST, Bytes::new());
            return;
        }

        {
            let mut state = self.state.lock();
            if state.data_req.is_some() {
                drop(state);
                self.base.on_error("data request overlap from client", None);
                reply(&ctx, StatusCode::BAD_REQUEST, Bytes::new());
                return;
            }
            state.data_req = Some(Arc::clone(&ctx));
        }

        let body = ctx.body().clone();
        if body.len() > self.max_http_buffer_size {
            warn!(
                transport = %self.base.id(),
                len = body.len(),
                max = self.max_http_buffer_size,
                "payload too large"
            );
            self.release_data_request(&ctx);
            reply(&ctx, StatusCode::PAYLOAD_TOO_LARGE, Bytes::new());
            return;
        }

        let data = if is_binary {
            RawData::Binary(body)
        } else {
            RawData::Text(String::from_utf8_lossy(&body).into_owned())
        };
        self.on_data(data);
        self.release_data_request(&ctx);

        ctx.set_response_header(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        apply_headers(&ctx);
        reply(&ctx, StatusCode::OK, Bytes::from_static(b"ok"));
    }

    fn release_data_request(&self, ctx: &Arc<HttpContext>) {
        let mut state = self.state.lock();
        if state.data_req.as_ref().is_some_and(|req| Arc::ptr_eq(req, ctx)) {
            state.data_req = None;
        }
    }

    /// Hands decoded packets to the listener, stopping at a `close` packet.
    fn deliver(&self, decoded: Result<Vec<Packet>>) {
        match decoded {
            Ok(packets) => {
                for packet in packets {
                    if packet.packet_type == PacketType::Close {
                        debug!(transport = %self.base.id(), "got close packet");
                        self.finish_close();
                        return;
                    }
                    self.base.on_packet(packet);
                }
            }
            Err(e) => self.base.on_error("parse error", Some(e.to_string())),
        }
    }
}

// ============================================================================
// Polling - Writing
// ============================================================================

impl Polling {
    /// Answers the pending GET with `packets`, appending a buffered close.
    fn write_packets(&self, mut packets: Vec<Packet>) -> Result<()> {
        let (req, on_flushed) = {
            let mut state = self.state.lock();
            state.writable = false;
            let on_flushed = state.should_close.take();
            if on_flushed.is_some() {
                packets.push(Packet::close());
                if let Some(timer) = state.close_timer.take() {
                    timer.abort();
                }
            }
            (state.req.take(), on_flushed)
        };

        let result = match req {
            Some(req) => {
                let payload = encode_payload(&packets, self.base.protocol());
                trace!(transport = %self.base.id(), count = packets.len(), "writing payload");
                self.write_payload(&req, &payload)
            }
            None => Err(Error::transport("no pending poll request")),
        };

        if let Some(on_flushed) = on_flushed {
            on_flushed();
        }
        result
    }

    fn write_payload(&self, ctx: &HttpContext, payload: &str) -> Result<()> {
        let (body, content_type) = match &self.jsonp {
            Some(envelope) => (Bytes::from(envelope.wrap(payload)?), JSONP_CONTENT_TYPE),
            None => (Bytes::from(payload.to_owned()), TEXT_CONTENT_TYPE),
        };
        let body = self.compress(ctx, body)?;

        ctx.set_response_header(CONTENT_TYPE, HeaderValue::from_static(content_type));
        apply_headers(ctx);
        ctx.set_status(StatusCode::OK);
        ctx.write(body)
    }

    fn compress(&self, ctx: &HttpContext, body: Bytes) -> Result<Bytes> {
        let Some(compression) = self.http_compression else {
            return Ok(body);
        };
        if body.len() < compression.threshold {
            return Ok(body);
        }
        let Some(encoding) = ContentEncoding::negotiate(ctx.header("accept-encoding")) else {
            return Ok(body);
        };

        let compressed = encoding.encode(&body)?;
        ctx.set_response_header(
            CONTENT_ENCODING,
            HeaderValue::from_static(encoding.as_str()),
        );
        Ok(compressed)
    }
}

// ============================================================================
// Polling - Closing
// ============================================================================

impl Polling {
    /// Wraps the caller's callback so the transport reports its own close
    /// once the close has been flushed.
    fn closing_callback(&self, callback: Option<CloseCallback>) -> CloseCallback {
        let this = self.this.clone();
        Box::new(move || {
            if let Some(callback) = callback {
                callback();
            }
            if let Some(this) = this.upgrade() {
                this.finish_close();
            }
        })
    }

    /// Releases a pending GET with a `noop` and reports the close.
    fn finish_close(&self) {
        let (writable, timer) = {
            let mut state = self.state.lock();
            (state.writable, state.close_timer.take())
        };
        if let Some(timer) = timer {
            timer.abort();
        }
        if writable {
            let _ = self.write_packets(vec![Packet::noop()]);
        }
        self.base.on_close();
    }

    fn on_close_timeout(&self) {
        let pending = self.state.lock().should_close.take();
        if let Some(on_closed) = pending {
            debug!(transport = %self.base.id(), "closing after timeout");
            on_closed();
        }
    }
}

// ============================================================================
// Transport Implementation
// ============================================================================

impl Transport for Polling {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    fn handles_upgrades(&self) -> bool {
        false
    }

    fn supports_framing(&self) -> bool {
        false
    }

    fn writable(&self) -> bool {
        self.state.lock().writable
    }

    fn on_request(&self, ctx: Arc<HttpContext>) -> Result<()> {
        match *ctx.method() {
            Method::GET => self.on_poll_request(ctx),
            Method::POST => self.on_data_request(ctx),
            _ => reply(&ctx, StatusCode::INTERNAL_SERVER_ERROR, Bytes::new()),
        }
        Ok(())
    }

    fn send(&self, packets: Vec<Packet>) -> Result<()> {
        if !self.base.is_open() {
            return Err(Error::TransportClosed);
        }
        self.write_packets(packets)
    }

    fn close(&self, callback: Option<CloseCallback>) {
        if !self.base.begin_close() {
            if let Some(callback) = callback {
                callback();
            }
            return;
        }

        debug!(transport = %self.base.id(), "closing polling transport");
        let on_closed = self.closing_callback(callback);

        let mut state = self.state.lock();
        if let Some(data_req) = state.data_req.take() {
            data_req.abort();
        }

        if state.writable {
            drop(state);
            debug!(transport = %self.base.id(), "transport writable, closing right away");
            let _ = self.write_packets(vec![Packet::close()]);
            on_closed();
        } else if self.base.is_discarded() {
            drop(state);
            debug!(transport = %self.base.id(), "transport discarded, closing right away");
            on_closed();
        } else {
            debug!(transport = %self.base.id(), "transport not writable, buffering orderly close");
            state.should_close = Some(on_closed);

            let this = self.this.clone();
            let close_timeout = self.close_timeout;
            state.close_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(close_timeout).await;
                if let Some(this) = this.upgrade() {
                    this.on_close_timeout();
                }
            }));
        }
    }

    fn on_data(&self, data: RawData) {
        let protocol = self.base.protocol();

        let text = match data {
            RawData::Text(text) if self.jsonp.is_some() => {
                match JsonpEnvelope::decode_body(text.as_bytes()) {
                    Ok(Some(decoded)) => decoded,
                    Ok(None) => {
                        debug!(transport = %self.base.id(), "jsonp body without data field");
                        return;
                    }
                    Err(e) => {
                        self.base.on_error("parse error", Some(e.to_string()));
                        return;
                    }
                }
            }
            RawData::Text(text) => text,
            // Only v3 clients get this far with an octet-stream body
            RawData::Binary(bytes) => {
                trace!(transport = %self.base.id(), len = bytes.len(), "received binary payload");
                self.deliver(decode_binary_payload(&bytes));
                return;
            }
        };

        trace!(transport = %self.base.id(), len = text.len(), "received payload");
        self.deliver(decode_payload(&text, protocol));
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn apply_headers(ctx: &HttpContext) {
    ctx.set_response_header(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    // Legacy IE sniffs polling responses as HTML
    if ctx
        .user_agent()
        .is_some_and(|ua| ua.contains(";MSIE") || ua.contains("Trident/"))
    {
        ctx.set_response_header("x-xss-protection", HeaderValue::from_static("0"));
    }
}

fn reply(ctx: &HttpContext, status: StatusCode, body: Bytes) {
    ctx.set_status(status);
    let _ = ctx.write(body);
}

// ============================================================================
// Tests
// ============================================================================
