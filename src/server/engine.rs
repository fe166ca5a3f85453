//! The engine server.
//!
//! Owns the session registry, admits or rejects requests, runs handshakes
//! and routes follow-up requests and promoted sockets to their sessions.
//!
//! # Request Flow
//!
//! ```text
//! request ─► middlewares ─► verify ─┬─ sid known ──► session transport
//!                                   └─ no sid ────► handshake ─► new session
//! ```
//!
//! # Verification Order
//!
//! | Check | Rejection |
//! |-------|-----------|
//! | transport missing, unknown or disabled | 0 |
//! | `Origin` not visible ASCII | 3, `INVALID_ORIGIN` |
//! | `sid` unknown | 1 |
//! | `sid` known, transport differs from the active one, no upgrade | 3, `TRANSPORT_MISMATCH` |
//! | no `sid`, method not `GET` | 2 |
//! | no `sid`, websocket without upgrade | 2, `TRANSPORT_HANDSHAKE_ERROR` |
//! | no `sid`, allow-request hook refuses | 4 |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::header::{ORIGIN, SET_COOKIE};
use http::{HeaderValue, Method};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::context::{HttpContext, WebSocketConn};
use crate::error::{Error, Result};
use crate::identifiers::Sid;
use crate::protocol::ProtocolVersion;
use crate::transport::{TransportKind, create_transport};

use super::abort::{Abort, ConnectionError, ErrorCode, abort_request, abort_upgrade};
use super::builder::ServerBuilder;
use super::middleware::{AllowRequest, Middleware};
use super::options::{AttachOptions, ServerOptions};
use super::registry::SessionRegistry;
use super::session::{CloseReason, Session};

// ============================================================================
// Constants
// ============================================================================

/// Server event channel capacity.
const EVENT_CAPACITY: usize = 256;

// ============================================================================
// ServerEvent
// ============================================================================

/// Process-wide events, delivered through [`Server::subscribe`].
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A handshake succeeded.
    Connection(Arc<Session>),
    /// A request or upgrade was rejected.
    ConnectionError(ConnectionError),
    /// The server closed every session.
    Close,
}

// ============================================================================
// Server
// ============================================================================

/// Engine server.
///
/// # Example
///
/// ```ignore
/// let server = Server::builder()
///     .options(ServerOptions::new().with_allow_eio3(true))
///     .build()?;
///
/// let mut events = server.subscribe();
/// while let Ok(event) = events.recv().await {
///     if let ServerEvent::Connection(session) = event {
///         session.send("welcome");
///     }
/// }
/// ```
pub struct Server {
    options: Arc<ServerOptions>,
    attach: AttachOptions,
    registry: Arc<SessionRegistry>,
    allow_request: Option<Arc<dyn AllowRequest>>,
    middlewares: Vec<Arc<dyn Middleware>>,
    events: broadcast::Sender<ServerEvent>,
    closed: AtomicBool,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("options", &self.options)
            .field("attach", &self.attach)
            .field("clients", &self.registry.len())
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Creates a server builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn new(
        options: ServerOptions,
        attach: AttachOptions,
        allow_request: Option<Arc<dyn AllowRequest>>,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            options: Arc::new(options),
            attach,
            registry: Arc::new(SessionRegistry::new()),
            allow_request,
            middlewares,
            events,
            closed: AtomicBool::new(false),
        }
    }
}

// ============================================================================
// Server - Accessors
// ============================================================================

impl Server {
    /// Engine settings.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Mount settings.
    #[inline]
    #[must_use]
    pub fn attach_options(&self) -> &AttachOptions {
        &self.attach
    }

    /// Live sessions.
    #[inline]
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Number of live sessions.
    #[inline]
    #[must_use]
    pub fn clients_count(&self) -> usize {
        self.registry.len()
    }

    /// Looks up a live session.
    #[must_use]
    pub fn session(&self, sid: &str) -> Option<Arc<Session>> {
        self.registry.get(sid)
    }

    /// Subscribes to server events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    fn lookup(&self, sid: &str) -> Result<Arc<Session>> {
        self.registry
            .get(sid)
            .ok_or_else(|| Error::session_not_found(Sid::from(sid)))
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.events.send(event);
    }

    fn requested_transport(&self, ctx: &HttpContext) -> Option<TransportKind> {
        ctx.query("transport")
            .and_then(TransportKind::from_name)
            .filter(|kind| self.options.is_enabled(*kind))
    }
}

// ============================================================================
// Server - Admission
// ============================================================================

impl Server {
    /// Runs the verification checks.
    ///
    /// `upgrade` is `true` for WebSocket upgrade requests.
    ///
    /// # Errors
    ///
    /// Returns the [`Abort`] to send to the client.
    pub async fn verify(&self, ctx: &HttpContext, upgrade: bool) -> StdResult<(), Abort> {
        let Some(kind) = self.requested_transport(ctx) else {
            return Err(Abort::new(ErrorCode::UnknownTransport)
                .with_context(json!({ "transport": ctx.query("transport") })));
        };

        if ctx
            .headers()
            .get(ORIGIN)
            .is_some_and(|origin| origin.to_str().is_err())
        {
            return Err(Abort::named(ErrorCode::BadRequest, "INVALID_ORIGIN"));
        }

        if let Some(sid) = ctx.query("sid") {
            let Some(session) = self.registry.get(sid) else {
                return Err(Abort::new(ErrorCode::UnknownSid).with_context(json!({ "sid": sid })));
            };
            let previous = session.transport_kind();
            if !upgrade && previous != kind {
                return Err(Abort::new(ErrorCode::BadRequest).with_context(json!({
                    "name": "TRANSPORT_MISMATCH",
                    "transport": kind.as_str(),
                    "previousTransport": previous.as_str(),
                })));
            }
            return Ok(());
        }

        if *ctx.method() != Method::GET {
            return Err(Abort::new(ErrorCode::BadHandshakeMethod)
                .with_context(json!({ "method": ctx.method().as_str() })));
        }

        if kind == TransportKind::WebSocket && !upgrade {
            return Err(Abort::named(
                ErrorCode::BadHandshakeMethod,
                "TRANSPORT_HANDSHAKE_ERROR",
            ));
        }

        if let Some(allow) = &self.allow_request
            && let Err(message) = allow.allow(ctx).await
        {
            return Err(Abort::new(ErrorCode::Forbidden).with_context(json!({ "message": message })));
        }

        Ok(())
    }

    async fn apply_middlewares(&self, ctx: &HttpContext) -> StdResult<(), Abort> {
        for middleware in &self.middlewares {
            if let Err(e) = middleware.handle(ctx).await {
                debug!(error = %e, "middleware failed");
                return Err(Abort::named(ErrorCode::BadRequest, "MIDDLEWARE_FAILURE"));
            }
        }
        Ok(())
    }

    async fn admit(&self, ctx: &HttpContext, upgrade: bool) -> StdResult<(), Abort> {
        self.apply_middlewares(ctx).await?;
        self.verify(ctx, upgrade).await
    }

    fn reject_request(&self, ctx: &Arc<HttpContext>, abort: &Abort) {
        warn!(code = abort.code.as_u8(), context = ?abort.context, "request rejected");
        self.emit(ServerEvent::ConnectionError(ConnectionError::new(
            Arc::clone(ctx),
            abort,
        )));
        abort_request(ctx, abort);
    }

    fn reject_upgrade(&self, ctx: &Arc<HttpContext>, abort: &Abort) {
        warn!(code = abort.code.as_u8(), context = ?abort.context, "upgrade rejected");
        self.emit(ServerEvent::ConnectionError(ConnectionError::new(
            Arc::clone(ctx),
            abort,
        )));
        abort_upgrade(ctx, abort);
    }
}

// ============================================================================
// Server - Handshake
// ============================================================================

impl Server {
    /// Creates a session on `kind` for `ctx`.
    ///
    /// For polling, `ctx` becomes the session's first poll and is answered
    /// with the `open` packet.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorCode::UnsupportedProtocolVersion`] for a v3 client
    /// while v3 is disabled, and [`ErrorCode::BadRequest`] once the server
    /// is closed or if the transport cannot be created.
    pub async fn handshake(
        &self,
        kind: TransportKind,
        ctx: &Arc<HttpContext>,
    ) -> StdResult<Arc<Session>, Abort> {
        if self.is_closed() {
            debug!("handshake after close");
            return Err(Abort::named(ErrorCode::BadRequest, "SERVER_CLOSED"));
        }

        let protocol = ProtocolVersion::from_query(ctx.query("EIO"));
        if protocol == ProtocolVersion::V3 && !self.options.allow_eio3 {
            return Err(Abort::new(ErrorCode::UnsupportedProtocolVersion)
                .with_context(json!({ "protocol": protocol.as_u8() })));
        }

        let sid = Sid::generate();
        let transport = create_transport(kind, ctx, &self.options.transport_options(protocol))
            .map_err(|e| {
                debug!(error = %e, "transport creation failed");
                Abort::new(ErrorCode::BadRequest).with_context(json!({
                    "name": "TRANSPORT_HANDSHAKE_ERROR",
                    "error": e.to_string(),
                }))
            })?;

        let session = Session::new(
            sid.clone(),
            protocol,
            Arc::clone(&transport),
            Arc::clone(&self.options),
        );

        if !self.registry.insert(Arc::clone(&session)) {
            session.close(true);
            return Err(Abort::named(ErrorCode::BadRequest, "TRANSPORT_HANDSHAKE_ERROR"));
        }
        // `close` may have drained the registry since the first check
        if self.is_closed() {
            self.registry.remove(sid.as_str());
            session.close(true);
            return Err(Abort::named(ErrorCode::BadRequest, "SERVER_CLOSED"));
        }
        self.reap_on_close(&session);

        if kind == TransportKind::Polling
            && let Some(cookie) = &self.options.cookie
        {
            match HeaderValue::from_str(&cookie.header_value(&sid)) {
                Ok(value) => ctx.set_response_header(SET_COOKIE, value),
                Err(e) => warn!(error = %e, "invalid cookie header"),
            }
        }

        session.open();

        if kind == TransportKind::Polling
            && let Err(e) = transport.on_request(Arc::clone(ctx))
        {
            warn!(sid = %sid, error = %e, "first poll rejected");
        }

        info!(sid = %sid, transport = %kind, protocol = %protocol, "handshake complete");
        self.emit(ServerEvent::Connection(Arc::clone(&session)));
        Ok(session)
    }

    fn reap_on_close(&self, session: &Arc<Session>) {
        let registry = Arc::clone(&self.registry);
        let session = Arc::clone(session);
        tokio::spawn(async move {
            session.closed().await;
            registry.remove(session.sid().as_str());
        });
    }
}

// ============================================================================
// Server - Entry Points
// ============================================================================

impl Server {
    /// Handles a plain HTTP request and waits until it is answered.
    pub async fn handle_request(&self, ctx: Arc<HttpContext>) {
        debug!(method = %ctx.method(), uri = %ctx.uri(), "handling request");

        if let Err(abort) = self.admit(&ctx, false).await {
            self.reject_request(&ctx, &abort);
        } else if let Some(sid) = ctx.query("sid") {
            match self.lookup(sid) {
                Ok(session) => {
                    debug!(sid, "request for existing session");
                    if let Err(e) = session.transport().on_request(Arc::clone(&ctx)) {
                        debug!(sid, error = %e, "transport refused request");
                        self.reject_request(&ctx, &Abort::new(ErrorCode::BadRequest));
                    }
                }
                Err(e) => {
                    debug!(error = %e, "session closed before dispatch");
                    self.reject_request(
                        &ctx,
                        &Abort::new(ErrorCode::UnknownSid).with_context(json!({ "sid": sid })),
                    );
                }
            }
        } else {
            match self.requested_transport(&ctx) {
                Some(kind) => {
                    if let Err(abort) = self.handshake(kind, &ctx).await {
                        self.reject_request(&ctx, &abort);
                    }
                }
                None => self.reject_request(&ctx, &Abort::new(ErrorCode::UnknownTransport)),
            }
        }

        ctx.done().await;
    }

    /// Admits a WebSocket upgrade request before the socket is promoted.
    ///
    /// Returns `false` after answering `ctx` with the rejection.
    pub async fn handle_upgrade(&self, ctx: &Arc<HttpContext>) -> bool {
        debug!(uri = %ctx.uri(), "handling upgrade");
        match self.admit(ctx, true).await {
            Ok(()) => true,
            Err(abort) => {
                self.reject_request(ctx, &abort);
                false
            }
        }
    }

    /// Routes a promoted socket: a new handshake without `sid`, otherwise
    /// an upgrade probe for the named session.
    pub async fn on_websocket(&self, ctx: Arc<HttpContext>, conn: WebSocketConn) {
        ctx.set_websocket(conn.clone());

        let Some(kind) = self.requested_transport(&ctx) else {
            self.reject_upgrade(&ctx, &Abort::new(ErrorCode::UnknownTransport));
            return;
        };
        if !kind.handles_upgrades() {
            debug!(transport = %kind, "transport does not handle upgraded requests");
            conn.close();
            return;
        }

        let Some(sid) = ctx.query("sid") else {
            if let Err(abort) = self.handshake(kind, &ctx).await {
                self.reject_upgrade(&ctx, &abort);
            }
            return;
        };

        let Some(session) = self.registry.get(sid) else {
            debug!(sid, "upgrade attempt for closed client");
            conn.close();
            return;
        };

        let options = self.options.transport_options(session.protocol());
        match create_transport(kind, &ctx, &options) {
            Ok(transport) => {
                if let Err(e) = session.maybe_upgrade(transport) {
                    debug!(sid, error = %e, "upgrade refused");
                }
            }
            Err(e) => {
                debug!(sid, error = %e, "upgrade transport creation failed");
                conn.close();
            }
        }
    }

    /// Closes every session and empties the registry.
    ///
    /// Later handshakes are rejected with [`ErrorCode::BadRequest`].
    pub fn close(&self) {
        // Flag first so a concurrent handshake either sees it or gets drained
        let first = !self.closed.swap(true, Ordering::SeqCst);
        let sessions = self.registry.drain();
        info!(count = sessions.len(), "closing all open clients");
        for session in sessions {
            session.close_for(true, CloseReason::ServerShuttingDown);
        }
        if first {
            self.emit(ServerEvent::Close);
        }
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
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
    use futures_util::SinkExt;
    use http::{Request, StatusCode};
    use serde_json::Value;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::Message;

    use crate::context::websocket::test_support::{next_text, pair};
    use crate::protocol::{HandshakeData, PacketData};
    use crate::server::session::SessionEvent;

    const WAIT: Duration = Duration::from_secs(2);

    fn server() -> Arc<Server> {
        Server::builder().build().unwrap()
    }

    fn request(method: Method, uri: &str, body: &str) -> Arc<HttpContext> {
        Arc::new(HttpContext::from_request(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "text/plain;charset=UTF-8")
                .body(Bytes::from(body.to_owned()))
                .unwrap(),
        ))
    }

    async fn send(server: &Server, ctx: &Arc<HttpContext>) -> (StatusCode, String) {
        timeout(WAIT, server.handle_request(Arc::clone(ctx)))
            .await
            .expect("request answered");
        let response = ctx.to_response();
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        (response.status(), body)
    }

    fn error_body(body: &str) -> Value {
        serde_json::from_str(body).unwrap()
    }

    async fn handshake(server: &Server) -> HandshakeData {
        let ctx = request(Method::GET, "/engine.io/?EIO=4&transport=polling", "");
        let (status, body) = send(server, &ctx).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with('0'), "unexpected body {body}");
        serde_json::from_str(&body[1..]).unwrap()
    }

    async fn wait_until(pred: impl Fn() -> bool) {
        timeout(WAIT, async {
            while !pred() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition reached");
    }

    #[tokio::test]
    async fn test_handshake_creates_session() {
        let server = server();
        let mut events = server.subscribe();

        let handshake = handshake(&server).await;
        assert_eq!(handshake.upgrades, vec!["websocket"]);
        assert_eq!(handshake.ping_interval, 25_000);
        assert_eq!(handshake.ping_timeout, 20_000);
        assert_eq!(server.clients_count(), 1);

        let event = events.recv().await.unwrap();
        let ServerEvent::Connection(session) = event else {
            panic!("expected connection event");
        };
        assert_eq!(session.sid(), &handshake.sid);
    }

    #[tokio::test]
    async fn test_follow_up_request_reaches_same_session() {
        let server = server();
        let handshake = handshake(&server).await;
        let session = server.session(handshake.sid.as_str()).unwrap();
        let mut session_events = session.events().unwrap();

        let uri = format!("/engine.io/?EIO=4&transport=polling&sid={}", handshake.sid);
        let (status, body) = send(&server, &request(Method::POST, &uri, "4hello")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert_eq!(server.clients_count(), 1);

        let message = timeout(WAIT, async {
            loop {
                if let Some(SessionEvent::Message(data)) = session_events.recv().await {
                    return data;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(message, PacketData::from("hello"));

        session.send("back");
        let (_, body) = send(&server, &request(Method::GET, &uri, "")).await;
        assert_eq!(body, "4back");
    }

    #[tokio::test]
    async fn test_unknown_sid_is_code_1() {
        let server = server();
        let mut events = server.subscribe();

        let ctx = request(Method::GET, "/engine.io/?EIO=4&transport=polling&sid=nope", "");
        let (status, body) = send(&server, &ctx).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            error_body(&body),
            json!({ "code": 1, "message": "Session ID unknown" })
        );

        let ServerEvent::ConnectionError(error) = events.recv().await.unwrap() else {
            panic!("expected connection error");
        };
        assert_eq!(error.code, ErrorCode::UnknownSid);
        assert_eq!(error.context, Some(json!({ "sid": "nope" })));
        assert!(Arc::ptr_eq(&error.ctx, &ctx));
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_transport_is_code_0() {
        let server = server();
        let (status, body) = send(
            &server,
            &request(Method::GET, "/engine.io/?EIO=4&transport=flashsocket", ""),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_body(&body)["code"], 0);

        let polling_only = Server::builder()
            .options(ServerOptions::new().with_transports([TransportKind::Polling]))
            .build()
            .unwrap();
        let ctx = request(Method::GET, "/engine.io/?EIO=4&transport=websocket", "");
        assert_eq!(
            polling_only.verify(&ctx, true).await.unwrap_err().code,
            ErrorCode::UnknownTransport
        );
    }

    #[tokio::test]
    async fn test_handshake_must_be_get() {
        let server = server();
        let (status, body) = send(
            &server,
            &request(Method::POST, "/engine.io/?EIO=4&transport=polling", "4x"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            error_body(&body),
            json!({ "code": 2, "message": "Bad handshake method" })
        );
        assert_eq!(server.clients_count(), 0);
    }

    #[tokio::test]
    async fn test_websocket_handshake_over_plain_http() {
        let server = server();
        let ctx = request(Method::GET, "/engine.io/?EIO=4&transport=websocket", "");
        let abort = server.verify(&ctx, false).await.unwrap_err();
        assert_eq!(abort.code, ErrorCode::BadHandshakeMethod);
        assert_eq!(abort.name(), Some("TRANSPORT_HANDSHAKE_ERROR"));
        assert!(server.verify(&ctx, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_v3_requires_opt_in() {
        let server = server();
        let (status, body) =
            send(&server, &request(Method::GET, "/engine.io/?EIO=3&transport=polling", "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            error_body(&body),
            json!({ "code": 5, "message": "Unsupported protocol version" })
        );

        let legacy = Server::builder()
            .options(ServerOptions::new().with_allow_eio3(true))
            .build()
            .unwrap();
        let (status, body) =
            send(&legacy, &request(Method::GET, "/engine.io/?EIO=3&transport=polling", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(":0{"), "unexpected body {body}");
        assert_eq!(legacy.clients_count(), 1);
    }

    #[tokio::test]
    async fn test_allow_request_rejection_is_403() {
        let server = Server::builder()
            .allow_request(|ctx: &HttpContext| match ctx.header("authorization") {
                Some(_) => Ok(()),
                None => Err("missing credentials".to_string()),
            })
            .build()
            .unwrap();

        let (status, body) = send(
            &server,
            &request(Method::GET, "/engine.io/?EIO=4&transport=polling", ""),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            error_body(&body),
            json!({ "code": 4, "message": "missing credentials" })
        );
    }

    #[tokio::test]
    async fn test_middleware_failure_is_bad_request() {
        let server = Server::builder()
            .middleware(|_: &HttpContext| -> Result<()> {
                Err(Error::middleware("rate limited"))
            })
            .build()
            .unwrap();
        let mut events = server.subscribe();

        let (status, body) = send(
            &server,
            &request(Method::GET, "/engine.io/?EIO=4&transport=polling", ""),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_body(&body)["code"], 3);

        let ServerEvent::ConnectionError(error) = events.recv().await.unwrap() else {
            panic!("expected connection error");
        };
        assert_eq!(error.context, Some(json!({ "name": "MIDDLEWARE_FAILURE" })));
    }

    #[tokio::test]
    async fn test_invalid_origin() {
        let server = server();
        let ctx = Arc::new(HttpContext::from_request(
            Request::builder()
                .uri("/engine.io/?EIO=4&transport=polling")
                .header("origin", HeaderValue::from_bytes(b"http://\xffexample").unwrap())
                .body(Bytes::new())
                .unwrap(),
        ));
        let abort = server.verify(&ctx, false).await.unwrap_err();
        assert_eq!(abort.code, ErrorCode::BadRequest);
        assert_eq!(abort.name(), Some("INVALID_ORIGIN"));
    }

    #[tokio::test]
    async fn test_transport_mismatch() {
        let server = server();
        let handshake = handshake(&server).await;

        let uri = format!("/engine.io/?EIO=4&transport=websocket&sid={}", handshake.sid);
        let ctx = request(Method::GET, &uri, "");
        let abort = server.verify(&ctx, false).await.unwrap_err();
        assert_eq!(abort.code, ErrorCode::BadRequest);
        assert_eq!(abort.name(), Some("TRANSPORT_MISMATCH"));
        assert!(server.verify(&ctx, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_cookie_set_on_handshake() {
        let server = Server::builder()
            .options(ServerOptions::new().with_cookie(Default::default()))
            .build()
            .unwrap();
        let ctx = request(Method::GET, "/engine.io/?EIO=4&transport=polling", "");
        let (_, body) = send(&server, &ctx).await;
        let handshake: HandshakeData = serde_json::from_str(&body[1..]).unwrap();

        assert_eq!(
            ctx.response_header("set-cookie"),
            Some(format!("io={}; Path=/; HttpOnly; SameSite=Lax", handshake.sid))
        );
    }

    #[tokio::test]
    async fn test_websocket_handshake() {
        let server = server();
        let (conn, mut client) = pair().await;
        let ctx = request(Method::GET, "/engine.io/?EIO=4&transport=websocket", "");

        assert!(server.handle_upgrade(&ctx).await);
        server.on_websocket(Arc::clone(&ctx), conn).await;

        let open = next_text(&mut client).await.unwrap();
        let handshake: HandshakeData = serde_json::from_str(&open[1..]).unwrap();
        assert!(handshake.upgrades.is_empty());
        let session = server.session(handshake.sid.as_str()).unwrap();
        assert_eq!(session.transport_kind(), TransportKind::WebSocket);
    }

    #[tokio::test]
    async fn test_websocket_upgrade_of_polling_session() {
        let server = server();
        let handshake = handshake(&server).await;
        let session = server.session(handshake.sid.as_str()).unwrap();

        let (conn, mut client) = pair().await;
        let uri = format!("/engine.io/?EIO=4&transport=websocket&sid={}", handshake.sid);
        let ctx = request(Method::GET, &uri, "");
        assert!(server.handle_upgrade(&ctx).await);
        server.on_websocket(ctx, conn).await;
        assert!(session.is_upgrading());

        client.send(Message::Text("2probe".into())).await.unwrap();
        assert_eq!(next_text(&mut client).await.as_deref(), Some("3probe"));
        client.send(Message::Text("5".into())).await.unwrap();

        wait_until(|| session.is_upgraded()).await;
        assert_eq!(session.transport_kind(), TransportKind::WebSocket);
        assert_eq!(server.clients_count(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_for_unknown_session_closes_socket() {
        let server = server();
        let (conn, mut client) = pair().await;
        let ctx = request(Method::GET, "/engine.io/?EIO=4&transport=websocket&sid=gone", "");

        server.on_websocket(ctx, conn).await;
        assert_eq!(next_text(&mut client).await, None);
    }

    #[tokio::test]
    async fn test_unsupported_protocol_over_websocket_sends_close_frame() {
        let server = server();
        let (conn, mut client) = pair().await;
        let ctx = request(Method::GET, "/engine.io/?EIO=3&transport=websocket", "");

        server.on_websocket(ctx, conn).await;
        assert_eq!(next_text(&mut client).await, None);
        assert_eq!(server.clients_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_session_is_reaped() {
        let server = server();
        let handshake = handshake(&server).await;
        let session = server.session(handshake.sid.as_str()).unwrap();

        session.close(true);
        wait_until(|| server.clients_count() == 0).await;
    }

    #[tokio::test]
    async fn test_close_empties_registry() {
        let server = server();
        let mut events = server.subscribe();
        let first = handshake(&server).await;
        let second = handshake(&server).await;
        let sessions = [
            server.session(first.sid.as_str()).unwrap(),
            server.session(second.sid.as_str()).unwrap(),
        ];

        server.close();
        assert_eq!(server.clients_count(), 0);
        assert!(server.is_closed());
        for session in &sessions {
            timeout(WAIT, session.closed()).await.expect("session closed");
            assert!(session.is_closed());
        }

        let mut saw_close = false;
        while let Ok(event) = events.try_recv() {
            saw_close |= matches!(event, ServerEvent::Close);
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn test_handshake_after_close_is_rejected() {
        let server = server();
        server.close();
        let mut events = server.subscribe();

        let ctx = request(Method::GET, "/engine.io/?EIO=4&transport=polling", "");
        let (status, body) = send(&server, &ctx).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            error_body(&body),
            json!({ "code": 3, "message": "Bad request" })
        );
        assert_eq!(server.clients_count(), 0);

        let ServerEvent::ConnectionError(error) = events.recv().await.unwrap() else {
            panic!("expected connection error");
        };
        assert_eq!(error.code, ErrorCode::BadRequest);
    }

    #[tokio::test]
    async fn test_websocket_handshake_after_close_is_rejected() {
        let server = server();
        server.close();

        let (conn, mut client) = pair().await;
        let ctx = request(Method::GET, "/engine.io/?EIO=4&transport=websocket", "");
        server.on_websocket(ctx, conn).await;

        assert_eq!(next_text(&mut client).await, None);
        assert_eq!(server.clients_count(), 0);
    }
}
