//! Builder pattern for server configuration.
//!
//! Provides a fluent API for configuring and creating [`Server`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use engine_io_server::{AttachOptions, Server, ServerOptions};
//!
//! # fn example() -> engine_io_server::Result<()> {
//! let server = Server::builder()
//!     .options(ServerOptions::new().with_ping_interval(Duration::from_secs(10)))
//!     .attach(AttachOptions::new().with_path("/realtime"))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

use super::engine::Server;
use super::middleware::{AllowRequest, Middleware};
use super::options::{AttachOptions, ServerOptions};

// ============================================================================
// ServerBuilder
// ============================================================================

/// Builder for configuring a [`Server`] instance.
///
/// Use [`Server::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ServerBuilder {
    /// Engine settings.
    options: ServerOptions,
    /// Mount settings.
    attach: AttachOptions,
    /// Handshake gate.
    allow_request: Option<Arc<dyn AllowRequest>>,
    /// Per-request hooks, in registration order.
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("options", &self.options)
            .field("attach", &self.attach)
            .field("allow_request", &self.allow_request.is_some())
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

// ============================================================================
// ServerBuilder Implementation
// ============================================================================

impl ServerBuilder {
    /// Creates a new builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the engine options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets where the engine is mounted.
    #[inline]
    #[must_use]
    pub fn attach(mut self, attach: AttachOptions) -> Self {
        self.attach = attach;
        self
    }

    /// Installs the handshake gate. Replaces any previous one.
    ///
    /// # Arguments
    ///
    /// * `allow` - Returns `Err(message)` to refuse a handshake with `403`
    #[inline]
    #[must_use]
    pub fn allow_request(mut self, allow: impl AllowRequest + 'static) -> Self {
        self.allow_request = Some(Arc::new(allow));
        self
    }

    /// Appends a middleware. Middlewares run in registration order.
    #[inline]
    #[must_use]
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Builds the server with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a timing or size option is zero
    /// - [`Error::Config`] if no transport is enabled
    /// - [`Error::Config`] if the mount path is not absolute
    pub fn build(self) -> Result<Arc<Server>> {
        self.validate_options()?;
        self.validate_attach()?;

        Ok(Arc::new(Server::new(
            self.options,
            self.attach,
            self.allow_request,
            self.middlewares,
        )))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ServerBuilder {
    fn validate_options(&self) -> Result<()> {
        self.options.validate().map_err(Error::config)
    }

    fn validate_attach(&self) -> Result<()> {
        self.attach.validate().map_err(Error::config)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::context::HttpContext;
    use crate::transport::TransportKind;

    #[test]
    fn test_new_uses_defaults() {
        let builder = ServerBuilder::new();
        assert_eq!(builder.options.ping_interval, Duration::from_millis(25_000));
        assert_eq!(builder.attach.path, "/engine.io");
        assert!(builder.allow_request.is_none());
        assert!(builder.middlewares.is_empty());
    }

    #[test]
    fn test_middlewares_accumulate() {
        let builder = ServerBuilder::new()
            .middleware(|_: &HttpContext| -> Result<()> { Ok(()) })
            .middleware(|_: &HttpContext| -> Result<()> { Ok(()) });
        assert_eq!(builder.middlewares.len(), 2);
    }

    #[tokio::test]
    async fn test_build_keeps_options() {
        let server = ServerBuilder::new()
            .options(ServerOptions::new().with_allow_eio3(true))
            .attach(AttachOptions::new().with_path("/rt"))
            .build()
            .unwrap();
        assert!(server.options().allow_eio3);
        assert_eq!(server.attach_options().path, "/rt");
        assert_eq!(server.clients_count(), 0);
    }

    #[test]
    fn test_build_fails_without_transports() {
        let result = ServerBuilder::new()
            .options(ServerOptions::new().with_transports(Vec::<TransportKind>::new()))
            .build();

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("transport"));
    }

    #[test]
    fn test_build_fails_with_zero_ping_interval() {
        let result = ServerBuilder::new()
            .options(ServerOptions::new().with_ping_interval(Duration::ZERO))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_fails_with_relative_path() {
        let result = ServerBuilder::new()
            .attach(AttachOptions::new().with_path("engine.io"))
            .build();

        let err = result.unwrap_err();
        assert!(err.to_string().contains("Path"));
    }
}
