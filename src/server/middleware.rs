//! Request hooks run before a request reaches a session.
//!
//! | Hook | Runs | On failure |
//! |------|------|------------|
//! | [`AllowRequest`] | handshakes only | `Forbidden` (403) with the returned message |
//! | [`Middleware`] | every request, before verification | `Bad request` with `MIDDLEWARE_FAILURE` |
//!
//! Both are implemented for plain closures.

use std::result::Result as StdResult;

use async_trait::async_trait;

use crate::context::HttpContext;
use crate::error::Result;

// ============================================================================
// AllowRequest
// ============================================================================

/// Decides whether a handshake may proceed.
#[async_trait]
pub trait AllowRequest: Send + Sync {
    /// Returns `Err(message)` to reject the handshake.
    async fn allow(&self, ctx: &HttpContext) -> StdResult<(), String>;
}

#[async_trait]
impl<F> AllowRequest for F
where
    F: Fn(&HttpContext) -> StdResult<(), String> + Send + Sync,
{
    async fn allow(&self, ctx: &HttpContext) -> StdResult<(), String> {
        self(ctx)
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Runs against every request ahead of verification, e.g. to add CORS headers.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Inspects or decorates the request. An error aborts it.
    ///
    /// # Errors
    ///
    /// Any error rejects the request.
    async fn handle(&self, ctx: &HttpContext) -> Result<()>;
}

#[async_trait]
impl<F> Middleware for F
where
    F: Fn(&HttpContext) -> Result<()> + Send + Sync,
{
    async fn handle(&self, ctx: &HttpContext) -> Result<()> {
        self(ctx)
    }
}
