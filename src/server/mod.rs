//! Engine server and sessions.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `engine` | [`Server`]: admission, handshake and routing |
//! | `builder` | [`ServerBuilder`] |
//! | `session` | [`Session`] state machine and heartbeat |
//! | `registry` | Live sessions by id |
//! | `options` | Server and mount settings |
//! | `abort` | Rejection codes and writers |
//! | `middleware` | Request hooks |

// ============================================================================
// Submodules
// ============================================================================

/// Rejection codes and writers.
pub mod abort;

/// Server builder.
pub mod builder;

/// The engine server.
pub mod engine;

/// Request hooks.
pub mod middleware;

/// Server and mount settings.
pub mod options;

/// Session registry.
pub mod registry;

/// Sessions.
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use abort::{Abort, ConnectionError, ErrorCode, abort_request, abort_upgrade};
pub use builder::ServerBuilder;
pub use engine::{Server, ServerEvent};
pub use middleware::{AllowRequest, Middleware};
pub use options::{
    AttachOptions, CookieOptions, HttpCompression, PerMessageDeflate, SameSite, ServerOptions,
};
pub use registry::SessionRegistry;
pub use session::{CloseReason, MAX_PENDING_EVENTS, Session, SessionEvent, SessionReadyState};
