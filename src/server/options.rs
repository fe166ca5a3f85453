//! Server and attach configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use engine_io_server::{AttachOptions, ServerOptions};
//!
//! let options = ServerOptions::new()
//!     .with_ping_interval(Duration::from_secs(10))
//!     .with_allow_eio3(true);
//!
//! let attach = AttachOptions::new().with_path("/realtime");
//! assert_eq!(attach.compute_path(), "/realtime/");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use crate::identifiers::Sid;
use crate::protocol::{PacketData, ProtocolVersion};
use crate::transport::{TransportKind, TransportOptions};

pub use crate::transport::{HttpCompression, PerMessageDeflate};

// ============================================================================
// Defaults
// ============================================================================

const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(25_000);
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(20_000);
const DEFAULT_UPGRADE_TIMEOUT: Duration = Duration::from_millis(10_000);
const DEFAULT_MAX_HTTP_BUFFER_SIZE: usize = 100_000;
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PATH: &str = "/engine.io";
const DEFAULT_DESTROY_UPGRADE_TIMEOUT: Duration = Duration::from_millis(1000);

// ============================================================================
// CookieOptions
// ============================================================================

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    /// `SameSite=Strict`.
    Strict,
    /// `SameSite=Lax`.
    Lax,
    /// `SameSite=None`.
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "Strict",
            Self::Lax => "Lax",
            Self::None => "None",
        })
    }
}

/// Session id cookie set on the handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    /// Cookie name.
    pub name: String,
    /// `Path` attribute.
    pub path: Option<String>,
    /// Adds `HttpOnly`.
    pub http_only: bool,
    /// `SameSite` attribute.
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            name: "io".to_string(),
            path: Some("/".to_string()),
            http_only: true,
            same_site: Some(SameSite::Lax),
        }
    }
}

impl CookieOptions {
    /// Formats the `Set-Cookie` value for `sid`.
    #[must_use]
    pub fn header_value(&self, sid: &Sid) -> String {
        let mut value = format!("{}={}", self.name, urlencoding::encode(sid.as_str()));
        if let Some(path) = &self.path {
            value.push_str("; Path=");
            value.push_str(path);
        }
        if self.http_only {
            value.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.same_site {
            value.push_str(&format!("; SameSite={same_site}"));
        }
        value
    }
}

// ============================================================================
// ServerOptions
// ============================================================================

/// Engine behavior settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Delay between two server pings (v4) or expected client pings (v3).
    pub ping_interval: Duration,

    /// How long to wait for a heartbeat reply before closing.
    pub ping_timeout: Duration,

    /// How long a probe transport may stay unconfirmed.
    pub upgrade_timeout: Duration,

    /// Largest accepted message, in bytes.
    pub max_http_buffer_size: usize,

    /// Enabled transports.
    pub transports: Vec<TransportKind>,

    /// Whether sessions may upgrade transports.
    pub allow_upgrades: bool,

    /// WebSocket per-message deflate.
    pub per_message_deflate: Option<PerMessageDeflate>,

    /// Polling response compression.
    pub http_compression: Option<HttpCompression>,

    /// Message sent right after the `open` packet.
    pub initial_packet: Option<PacketData>,

    /// Session id cookie.
    pub cookie: Option<CookieOptions>,

    /// Accept protocol v3 clients.
    pub allow_eio3: bool,

    /// How long a polling transport waits for a GET to flush its close.
    pub close_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ServerOptions - Constructors
// ============================================================================

impl ServerOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
            max_http_buffer_size: DEFAULT_MAX_HTTP_BUFFER_SIZE,
            transports: vec![TransportKind::Polling, TransportKind::WebSocket],
            allow_upgrades: true,
            per_message_deflate: None,
            http_compression: Some(HttpCompression::default()),
            initial_packet: None,
            cookie: None,
            allow_eio3: false,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

// ============================================================================
// ServerOptions - Builder Methods
// ============================================================================

impl ServerOptions {
    /// Sets the ping interval.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the ping timeout.
    #[inline]
    #[must_use]
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Sets the upgrade timeout.
    #[inline]
    #[must_use]
    pub fn with_upgrade_timeout(mut self, timeout: Duration) -> Self {
        self.upgrade_timeout = timeout;
        self
    }

    /// Sets the largest accepted message size.
    #[inline]
    #[must_use]
    pub fn with_max_http_buffer_size(mut self, size: usize) -> Self {
        self.max_http_buffer_size = size;
        self
    }

    /// Sets the enabled transports.
    #[inline]
    #[must_use]
    pub fn with_transports(mut self, transports: impl IntoIterator<Item = TransportKind>) -> Self {
        self.transports = transports.into_iter().collect();
        self
    }

    /// Enables or disables transport upgrades.
    #[inline]
    #[must_use]
    pub fn with_allow_upgrades(mut self, allow: bool) -> Self {
        self.allow_upgrades = allow;
        self
    }

    /// Enables WebSocket per-message deflate.
    #[inline]
    #[must_use]
    pub fn with_per_message_deflate(mut self, deflate: PerMessageDeflate) -> Self {
        self.per_message_deflate = Some(deflate);
        self
    }

    /// Sets polling response compression; `None` disables it.
    #[inline]
    #[must_use]
    pub fn with_http_compression(mut self, compression: Option<HttpCompression>) -> Self {
        self.http_compression = compression;
        self
    }

    /// Sets the message sent right after `open`.
    #[inline]
    #[must_use]
    pub fn with_initial_packet(mut self, data: impl Into<PacketData>) -> Self {
        self.initial_packet = Some(data.into());
        self
    }

    /// Sets the session id cookie.
    #[inline]
    #[must_use]
    pub fn with_cookie(mut self, cookie: CookieOptions) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Accepts protocol v3 clients.
    #[inline]
    #[must_use]
    pub fn with_allow_eio3(mut self, allow: bool) -> Self {
        self.allow_eio3 = allow;
        self
    }

    /// Sets the polling close timeout.
    #[inline]
    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

// ============================================================================
// ServerOptions - Queries
// ============================================================================

impl ServerOptions {
    /// Returns `true` if `kind` is enabled.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self, kind: TransportKind) -> bool {
        self.transports.contains(&kind)
    }

    /// Upgrade targets announced to a session on `kind`.
    #[must_use]
    pub fn upgrades_for(&self, kind: TransportKind) -> Vec<String> {
        if !self.allow_upgrades {
            return Vec::new();
        }
        kind.upgrades_to()
            .iter()
            .filter(|target| self.is_enabled(**target))
            .map(|target| target.as_str().to_string())
            .collect()
    }

    /// Settings handed to a new transport.
    #[must_use]
    pub fn transport_options(&self, protocol: ProtocolVersion) -> TransportOptions {
        TransportOptions {
            protocol,
            max_http_buffer_size: self.max_http_buffer_size,
            http_compression: self.http_compression,
            per_message_deflate: self.per_message_deflate,
            close_timeout: self.close_timeout,
        }
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.ping_interval.is_zero() {
            return Err("Ping interval must be greater than zero".to_string());
        }
        if self.ping_timeout.is_zero() {
            return Err("Ping timeout must be greater than zero".to_string());
        }
        if self.upgrade_timeout.is_zero() {
            return Err("Upgrade timeout must be greater than zero".to_string());
        }
        if self.max_http_buffer_size == 0 {
            return Err("Max HTTP buffer size must be greater than zero".to_string());
        }
        if self.transports.is_empty() {
            return Err("At least one transport must be enabled".to_string());
        }
        if let Some(cookie) = &self.cookie
            && cookie.name.is_empty()
        {
            return Err("Cookie name must not be empty".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// AttachOptions
// ============================================================================

/// Where the engine is mounted on an HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachOptions {
    /// Path to capture.
    pub path: String,

    /// End upgrade requests nobody handles.
    pub destroy_upgrade: bool,

    /// Delay before an unhandled upgrade request is ended.
    pub destroy_upgrade_timeout: Duration,

    /// Append a trailing slash to the path.
    pub add_trailing_slash: bool,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachOptions {
    /// Creates attach options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            destroy_upgrade: true,
            destroy_upgrade_timeout: DEFAULT_DESTROY_UPGRADE_TIMEOUT,
            add_trailing_slash: true,
        }
    }

    /// Sets the path to capture.
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Enables or disables ending unhandled upgrades.
    #[inline]
    #[must_use]
    pub fn with_destroy_upgrade(mut self, destroy: bool) -> Self {
        self.destroy_upgrade = destroy;
        self
    }

    /// Sets the delay before ending unhandled upgrades.
    #[inline]
    #[must_use]
    pub fn with_destroy_upgrade_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_upgrade_timeout = timeout;
        self
    }

    /// Enables or disables the trailing slash.
    #[inline]
    #[must_use]
    pub fn with_add_trailing_slash(mut self, add: bool) -> Self {
        self.add_trailing_slash = add;
        self
    }

    /// The mount path with at most one trailing slash.
    #[must_use]
    pub fn compute_path(&self) -> String {
        let trimmed = self.path.strip_suffix('/').unwrap_or(&self.path);
        if self.add_trailing_slash {
            format!("{trimmed}/")
        } else {
            trimmed.to_string()
        }
    }

    /// Returns `true` if `path` falls under the mount path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.compute_path())
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if !self.path.starts_with('/') {
            return Err(format!("Path must start with '/': {}", self.path));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
