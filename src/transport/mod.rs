//! Transport layer.
//!
//! A transport is one physical carrier for a session's packet stream. The
//! session owns one active transport and, during an upgrade, one probe.
//! Transports report what happens on the wire through a listener installed
//! by their owner and never call back into the session directly.
//!
//! # Variants
//!
//! | Variant | Name | Upgrades | Framing |
//! |---------|------|----------|---------|
//! | [`Polling`] (XHR) | `polling` | no | no |
//! | [`Jsonp`] (`j` query set) | `polling` | no | no |
//! | [`WebSocketTransport`] | `websocket` | yes | yes |
//!
//! # Lifecycle
//!
//! ```text
//! open ──close()──► closing ──(flushed)──► closed
//!   └──────────────── on_close() ──────────────┘
//! ```
//!
//! The ready state only moves forward. Once a transport is discarded it
//! stops reporting events, but in-flight I/O still completes.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `polling` | Long-polling carrier |
//! | `jsonp` | JSONP flavor of polling and its script envelope |
//! | `websocket` | WebSocket carrier |
//! | `compression` | gzip / deflate for polling responses |

// ============================================================================
// Submodules
// ============================================================================

/// HTTP response compression.
pub mod compression;

/// JSONP polling.
pub mod jsonp;

/// Long-polling transport.
pub mod polling;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::context::HttpContext;
use crate::error::{Error, Result};
use crate::identifiers::{Sid, TransportId};
use crate::protocol::{Packet, ProtocolVersion};

// ============================================================================
// Re-exports
// ============================================================================

pub use compression::{ContentEncoding, HttpCompression};
pub use jsonp::{Jsonp, JsonpEnvelope};
pub use polling::Polling;
pub use websocket::{PerMessageDeflate, WebSocketTransport};

// ============================================================================
// TransportKind
// ============================================================================

/// Transport names known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// HTTP long-polling (XHR or JSONP).
    Polling,
    /// WebSocket.
    WebSocket,
}

impl TransportKind {
    /// Resolves a `transport` query value.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "polling" => Some(Self::Polling),
            "websocket" => Some(Self::WebSocket),
            _ => None,
        }
    }

    /// Wire name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::WebSocket => "websocket",
        }
    }

    /// Whether this transport arrives through an HTTP upgrade.
    #[inline]
    #[must_use]
    pub const fn handles_upgrades(self) -> bool {
        matches!(self, Self::WebSocket)
    }

    /// Transports a session on this carrier may upgrade to.
    #[inline]
    #[must_use]
    pub const fn upgrades_to(self) -> &'static [TransportKind] {
        match self {
            Self::Polling => &[Self::WebSocket],
            Self::WebSocket => &[],
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s).ok_or_else(|| Error::unknown_transport(s))
    }
}

// ============================================================================
// ReadyState
// ============================================================================

/// Transport ready state. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Carrying packets.
    Open = 0,
    /// Close requested, flushing.
    Closing = 1,
    /// Terminal.
    Closed = 2,
}

impl ReadyState {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Lowercase name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Events
// ============================================================================

/// Something a transport observed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A decoded inbound packet.
    Packet(Packet),
    /// A transport-level failure. The transport stays open.
    Error {
        /// Short reason, e.g. `"parse error"`.
        reason: String,
        /// Underlying error text, if any.
        description: Option<String>,
    },
    /// The transport closed. Emitted at most once.
    Close,
    /// The transport can accept another write.
    Drain,
}

/// Receives transport events, tagged with the emitting transport.
pub type EventListener = Arc<dyn Fn(TransportId, TransportEvent) + Send + Sync>;

/// Runs once a transport close has been flushed.
pub type CloseCallback = Box<dyn FnOnce() + Send>;

/// Raw inbound data before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawData {
    /// Text body or frame.
    Text(String),
    /// Binary body or frame.
    Binary(Bytes),
}

// ============================================================================
// TransportOptions
// ============================================================================

/// Per-connection settings handed to a new transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Negotiated protocol revision.
    pub protocol: ProtocolVersion,
    /// Largest accepted POST body in bytes.
    pub max_http_buffer_size: usize,
    /// Polling response compression, if enabled.
    pub http_compression: Option<HttpCompression>,
    /// WebSocket per-message deflate, if enabled.
    pub per_message_deflate: Option<PerMessageDeflate>,
    /// How long a polling transport waits for a GET to flush its close.
    pub close_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::V4,
            max_http_buffer_size: 100_000,
            http_compression: Some(HttpCompression::default()),
            per_message_deflate: None,
            close_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// TransportBase
// ============================================================================

/// State shared by every transport variant.
///
/// Owns the ready state, the discarded flag and the listener, and applies
/// the emission rules: nothing is reported once discarded, packets and
/// errors are dropped once closed, and `Close` fires at most once.
///
/// Events raised before a listener is installed are held and replayed, in
/// order, by [`set_listener`](Self::set_listener). The listener is invoked
/// with the emission lock held and must not call back into the transport.
pub struct TransportBase {
    id: TransportId,
    kind: TransportKind,
    protocol: ProtocolVersion,
    supports_binary: bool,
    sid: RwLock<Option<Sid>>,
    ready_state: AtomicU8,
    discarded: AtomicBool,
    listener: Mutex<ListenerSlot>,
}

#[derive(Default)]
struct ListenerSlot {
    listener: Option<EventListener>,
    backlog: Vec<TransportEvent>,
}

impl fmt::Debug for TransportBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBase")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("protocol", &self.protocol)
            .field("sid", &*self.sid.read())
            .field("ready_state", &self.ready_state())
            .field("discarded", &self.is_discarded())
            .finish_non_exhaustive()
    }
}

impl TransportBase {
    /// Creates an open base with a fresh id.
    #[must_use]
    pub fn new(kind: TransportKind, protocol: ProtocolVersion, supports_binary: bool) -> Self {
        Self {
            id: TransportId::next(),
            kind,
            protocol,
            supports_binary,
            sid: RwLock::new(None),
            ready_state: AtomicU8::new(ReadyState::Open as u8),
            discarded: AtomicBool::new(false),
            listener: Mutex::new(ListenerSlot::default()),
        }
    }

    /// Process-unique transport id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TransportId {
        self.id
    }

    /// Transport kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Negotiated protocol revision.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Whether binary data may travel unencoded.
    #[inline]
    #[must_use]
    pub fn supports_binary(&self) -> bool {
        self.supports_binary
    }

    /// Owning session id, once attached.
    #[must_use]
    pub fn sid(&self) -> Option<Sid> {
        self.sid.read().clone()
    }

    /// Attaches the owning session id.
    pub fn set_sid(&self, sid: Sid) {
        *self.sid.write() = Some(sid);
    }

    /// Current ready state.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }

    /// Returns `true` while open.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Moves the ready state forward. Returns the previous state.
    fn advance(&self, to: ReadyState) -> ReadyState {
        ReadyState::from_u8(self.ready_state.fetch_max(to as u8, Ordering::SeqCst))
    }

    /// Enters `closing`. Returns `false` if a close was already under way.
    pub fn begin_close(&self) -> bool {
        self.advance(ReadyState::Closing) == ReadyState::Open
    }

    /// Stops all further event reporting.
    pub fn discard(&self) {
        self.discarded.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once discarded.
    #[inline]
    #[must_use]
    pub fn is_discarded(&self) -> bool {
        self.discarded.load(Ordering::SeqCst)
    }

    /// Installs the event listener, replacing any previous one, and
    /// replays events raised while none was installed.
    pub fn set_listener(&self, listener: EventListener) {
        let mut slot = self.listener.lock();
        for event in std::mem::take(&mut slot.backlog) {
            listener(self.id, event);
        }
        slot.listener = Some(listener);
    }

    fn emit(&self, event: TransportEvent) {
        if self.is_discarded() {
            trace!(transport = %self.id, ?event, "event suppressed on discarded transport");
            return;
        }
        let mut slot = self.listener.lock();
        match &slot.listener {
            Some(listener) => listener(self.id, event),
            None => slot.backlog.push(event),
        }
    }

    /// Reports a decoded packet.
    pub fn on_packet(&self, packet: Packet) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }
        trace!(transport = %self.id, packet_type = %packet.packet_type, "packet received");
        self.emit(TransportEvent::Packet(packet));
    }

    /// Reports a transport error.
    pub fn on_error(&self, reason: &str, description: Option<String>) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }
        debug!(transport = %self.id, reason, ?description, "transport error");
        self.emit(TransportEvent::Error {
            reason: reason.to_owned(),
            description,
        });
    }

    /// Reports that a write completed.
    pub fn on_drain(&self) {
        if self.is_open() {
            self.emit(TransportEvent::Drain);
        }
    }

    /// Marks the transport closed and reports it. Returns `false` if it
    /// was already closed.
    pub fn on_close(&self) -> bool {
        if self.advance(ReadyState::Closed) == ReadyState::Closed {
            return false;
        }
        debug!(transport = %self.id, kind = %self.kind, "transport closed");
        self.emit(TransportEvent::Close);
        true
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Common contract of every transport variant.
///
/// Implementations are shared as `Arc<dyn Transport>`; all methods take
/// `&self` and synchronize internally. No method blocks.
pub trait Transport: Send + Sync + fmt::Debug {
    /// Shared state.
    fn base(&self) -> &TransportBase;

    /// Whether this transport arrives through an HTTP upgrade.
    fn handles_upgrades(&self) -> bool;

    /// Whether one write carries exactly one packet.
    fn supports_framing(&self) -> bool;

    /// Whether a write can be issued right now.
    fn writable(&self) -> bool;

    /// Binds a follow-up HTTP request (long-polling re-arm or data POST).
    ///
    /// # Errors
    ///
    /// Returns an error if this variant does not take HTTP requests.
    fn on_request(&self, ctx: Arc<HttpContext>) -> Result<()>;

    /// Writes packets, in order, as one wire write for polling or one frame
    /// each for WebSocket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] once closing, or the I/O error.
    fn send(&self, packets: Vec<Packet>) -> Result<()>;

    /// Closes the transport. `callback` runs once the close is flushed.
    fn close(&self, callback: Option<CloseCallback>);

    /// Decodes inbound data and reports the packets in order.
    fn on_data(&self, data: RawData);

    // ========================================================================
    // Provided
    // ========================================================================

    /// Process-unique transport id.
    fn id(&self) -> TransportId {
        self.base().id()
    }

    /// Transport kind.
    fn kind(&self) -> TransportKind {
        self.base().kind()
    }

    /// Wire name.
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Negotiated protocol revision.
    fn protocol(&self) -> ProtocolVersion {
        self.base().protocol()
    }

    /// Owning session id.
    fn sid(&self) -> Option<Sid> {
        self.base().sid()
    }

    /// Attaches the owning session id.
    fn set_sid(&self, sid: Sid) {
        self.base().set_sid(sid);
    }

    /// Current ready state.
    fn ready_state(&self) -> ReadyState {
        self.base().ready_state()
    }

    /// Stops event reporting; used when superseded by an upgrade.
    fn discard(&self) {
        self.base().discard();
    }

    /// Returns `true` once discarded.
    fn is_discarded(&self) -> bool {
        self.base().is_discarded()
    }

    /// Installs the event listener.
    fn set_listener(&self, listener: EventListener) {
        self.base().set_listener(listener);
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Builds the transport named by `kind` for the given request.
///
/// Polling becomes [`Jsonp`] when the `j` query parameter is present.
/// WebSocket requires `ctx` to carry a promoted socket.
///
/// # Errors
///
/// Returns [`Error::Transport`] if a WebSocket is requested without a
/// promoted socket.
pub fn create_transport(
    kind: TransportKind,
    ctx: &Arc<HttpContext>,
    options: &TransportOptions,
) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match kind {
        TransportKind::Polling => match ctx.query("j") {
            Some(index) => Jsonp::new(options, index),
            None => Polling::new(options),
        },
        TransportKind::WebSocket => {
            let conn = ctx
                .websocket()
                .cloned()
                .ok_or_else(|| Error::transport("websocket transport needs an upgraded socket"))?;
            let supports_binary = ctx.query("b64").is_none();
            WebSocketTransport::new(conn, options, supports_binary)?
        }
    };

    debug!(transport = %transport.id(), kind = %kind, protocol = %options.protocol, "transport created");
    Ok(transport)
}

// ============================================================================
// Tests
// ============================================================================
