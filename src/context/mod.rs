//! Request and socket contexts.
//!
//! Transports never see the HTTP server directly; they read requests and
//! write responses through these handles.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `http` | One HTTP request with a single-write response |
//! | `websocket` | One promoted WebSocket as a frame channel |
//! | `signal` | One-shot completion signal shared by both |

// ============================================================================
// Submodules
// ============================================================================

/// HTTP request context.
pub mod http;

/// WebSocket context.
pub mod websocket;

/// Completion signal.
pub mod signal;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::http::HttpContext;
pub use signal::DoneSignal;
pub use websocket::{IncomingFrames, WebSocketConn, WsFrame};
