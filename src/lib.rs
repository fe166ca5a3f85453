//! Engine.IO server - realtime sessions over long-polling and WebSocket.
//!
//! This library implements the server side of the Engine.IO protocol
//! (revisions 3 and 4): the packet codec, the polling (XHR and JSONP) and
//! WebSocket transports, sessions with heartbeat and transport upgrade, and
//! the engine that admits requests and routes them to sessions.
//!
//! # Architecture
//!
//! ```text
//! HttpServer ─► Server ─► SessionRegistry ─► Session ─► Transport (+ probe)
//!    (hyper)    verify,      sid → session     heartbeat,   polling / websocket
//!               handshake                     upgrade
//! ```
//!
//! Key design principles:
//!
//! - Each [`Session`] runs as one task fed by a mailbox; transport events,
//!   timers and application calls are handled strictly in order
//! - Transports report through a listener and never call the session back
//! - Rejections before a session exists are wire outcomes ([`Abort`]), not
//!   crate errors
//!
//! # Quick Start
//!
//! ```no_run
//! use engine_io_server::{HttpServer, Result, Server, ServerEvent, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = Server::builder().build()?;
//!     let mut events = engine.subscribe();
//!
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             let ServerEvent::Connection(session) = event else { continue };
//!             let Some(mut messages) = session.events() else { continue };
//!             tokio::spawn(async move {
//!                 while let Some(event) = messages.recv().await {
//!                     if let SessionEvent::Message(data) = event {
//!                         session.send(data);
//!                     }
//!                 }
//!             });
//!         }
//!     });
//!
//!     let listener = HttpServer::bind("127.0.0.1:3000").await?;
//!     HttpServer::new(engine)
//!         .serve(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | Packet and payload codec, handshake data |
//! | [`context`] | HTTP request and WebSocket handles |
//! | [`transport`] | Polling, JSONP and WebSocket transports |
//! | [`server`] | Engine server, sessions, options |
//! | [`serve`] | Hyper front-end |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Session and transport ids |

// ============================================================================
// Modules
// ============================================================================

/// Request and socket contexts.
pub mod context;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Session and transport identifiers.
pub mod identifiers;

/// Engine.IO wire protocol.
pub mod protocol;

/// Hyper front-end.
pub mod serve;

/// Engine server and sessions.
pub mod server;

/// Transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Context types
pub use context::{HttpContext, WebSocketConn};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{Sid, TransportId};

// Protocol types
pub use protocol::{HandshakeData, Packet, PacketData, PacketType, ProtocolVersion};

// Front-end
pub use serve::HttpServer;

// Server types
pub use server::{
    Abort, AllowRequest, AttachOptions, CloseReason, ConnectionError, CookieOptions, ErrorCode,
    HttpCompression, Middleware, PerMessageDeflate, SameSite, Server, ServerBuilder, ServerEvent,
    ServerOptions, Session, SessionEvent, SessionReadyState, SessionRegistry,
};

// Transport types
pub use transport::{Transport, TransportKind};
