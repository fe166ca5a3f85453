//! Hyper front-end for the engine.
//!
//! Binds the engine to a TCP listener and dispatches by path:
//!
//! | Request | Outcome |
//! |---------|---------|
//! | outside the mount path | `404 not found` |
//! | outside the mount path, socket upgrade | dropped after `destroy_upgrade_timeout` |
//! | `Upgrade: websocket`, websocket disabled | `501 Not Implemented` |
//! | `Upgrade: websocket` | verified, then `101` and [`Server::on_websocket`] |
//! | body over `max_http_buffer_size` | `413 Payload Too Large` |
//! | anything else | [`Server::handle_request`] |
//!
//! When the shutdown future resolves, the accept loop stops and the engine
//! closes every session.

// ============================================================================
// Imports
// ============================================================================

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Role, WebSocketConfig};
use tracing::{debug, info, warn};

use crate::context::{HttpContext, WebSocketConn};
use crate::error::Result;
use crate::server::Server;
use crate::transport::TransportKind;

// ============================================================================
// HttpServer
// ============================================================================

/// Serves one engine over HTTP/1.1.
#[derive(Debug, Clone)]
pub struct HttpServer {
    engine: Arc<Server>,
}

impl HttpServer {
    /// Wraps `engine`.
    #[inline]
    #[must_use]
    pub fn new(engine: Arc<Server>) -> Self {
        Self { engine }
    }

    /// The served engine.
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &Arc<Server> {
        &self.engine
    }

    /// Binds a listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<TcpListener> {
        Ok(TcpListener::bind(addr).await?)
    }

    /// Accepts connections until `shutdown` resolves, then closes the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the listener address
    /// cannot be read.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        info!(addr = %listener.local_addr()?, path = %self.engine.attach_options().path, "engine listening");

        let this = Arc::new(self);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (tcp, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    this.spawn_connection(tcp, remote);
                }
                () = &mut shutdown => break,
            }
        }

        info!("engine shutting down");
        this.engine.close();
        Ok(())
    }

    fn spawn_connection(self: &Arc<Self>, tcp: tokio::net::TcpStream, remote: SocketAddr) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let io = TokioIo::new(tcp);
            let service = service_fn(move |req: Request<Incoming>| {
                let this = Arc::clone(&this);
                async move { Ok::<_, Infallible>(this.handle(req, remote).await) }
            });

            let conn = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades();
            if let Err(e) = conn.await {
                debug!(remote = %remote, error = %e, "connection ended with error");
            }
        });
    }

    /// Handles one HTTP request.
    pub async fn handle(
        &self,
        mut req: Request<Incoming>,
        remote: SocketAddr,
    ) -> Response<Full<Bytes>> {
        let attach = self.engine.attach_options();
        let websocket_upgrade = is_websocket_upgrade(req.headers());

        if !attach.matches(req.uri().path()) {
            if websocket_upgrade && attach.destroy_upgrade {
                tokio::time::sleep(attach.destroy_upgrade_timeout).await;
                debug!(uri = %req.uri(), "destroying unhandled upgrade");
                return close_connection(text(StatusCode::BAD_REQUEST, "Bad Request"));
            }
            return text(StatusCode::NOT_FOUND, "not found");
        }

        if websocket_upgrade {
            let on_upgrade = hyper::upgrade::on(&mut req);
            let (parts, _body) = req.into_parts();
            let ctx = Arc::new(HttpContext::new(parts, Bytes::new()).with_remote_addr(remote));
            return self.upgrade(ctx, on_upgrade).await;
        }

        let max = self.engine.options().max_http_buffer_size;
        let (parts, body) = req.into_parts();
        if body.size_hint().lower() > max as u64 {
            debug!(uri = %parts.uri, max, "declared body too large");
            return close_connection(text(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"));
        }

        let body = match Limited::new(body, max).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                debug!(uri = %parts.uri, max, "body too large");
                return close_connection(text(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large"));
            }
            Err(e) => {
                debug!(error = %e, "failed to read request body");
                return text(StatusCode::BAD_REQUEST, "Bad Request");
            }
        };

        let ctx = Arc::new(HttpContext::new(parts, body).with_remote_addr(remote));
        let guard = AbortOnDrop(Arc::clone(&ctx));
        self.engine.handle_request(Arc::clone(&ctx)).await;
        drop(guard);

        ctx.to_response().map(Full::new)
    }

    async fn upgrade(&self, ctx: Arc<HttpContext>, on_upgrade: OnUpgrade) -> Response<Full<Bytes>> {
        if !self.engine.options().is_enabled(TransportKind::WebSocket) {
            return text(StatusCode::NOT_IMPLEMENTED, "Not Implemented");
        }

        let Some(key) = ctx.headers().get(SEC_WEBSOCKET_KEY).cloned() else {
            return text(StatusCode::BAD_REQUEST, "Bad Request");
        };

        if !self.engine.handle_upgrade(&ctx).await {
            return ctx.to_response().map(Full::new);
        }

        let engine = Arc::clone(&self.engine);
        let config =
            WebSocketConfig::default().max_message_size(Some(engine.options().max_http_buffer_size));
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let stream = WebSocketStream::from_raw_socket(
                        TokioIo::new(upgraded),
                        Role::Server,
                        Some(config),
                    )
                    .await;
                    engine.on_websocket(ctx, WebSocketConn::new(stream)).await;
                }
                Err(e) => {
                    debug!(error = %e, "websocket upgrade failed");
                    ctx.abort();
                }
            }
        });

        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
        let headers = response.headers_mut();
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        match HeaderValue::from_str(&derive_accept_key(key.as_bytes())) {
            Ok(accept) => {
                headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
            }
            Err(e) => warn!(error = %e, "invalid accept key"),
        }
        response
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Aborts a request whose response future was dropped before completion.
struct AbortOnDrop(Arc<HttpContext>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.0.is_done() {
            self.0.abort();
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn close_connection(mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use anyhow::Context;
    use futures_util::SinkExt;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;
    use tracing_subscriber::EnvFilter;

    use crate::context::websocket::test_support::next_text;
    use crate::protocol::HandshakeData;
    use crate::server::{AttachOptions, ServerEvent, ServerOptions};

    const WAIT: Duration = Duration::from_secs(5);

    struct Running {
        addr: SocketAddr,
        engine: Arc<Server>,
        stop: Option<oneshot::Sender<()>>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn start(options: ServerOptions) -> Running {
        start_with(options, AttachOptions::default()).await
    }

    async fn start_with(options: ServerOptions, attach: AttachOptions) -> Running {
        init_tracing();
        let engine = Server::builder()
            .options(options)
            .attach(attach)
            .build()
            .unwrap();
        let listener = HttpServer::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let server = HttpServer::new(Arc::clone(&engine));
        let task = tokio::spawn(server.serve(listener, async move {
            let _ = stopped.await;
        }));
        Running {
            addr,
            engine,
            stop: Some(stop),
            task,
        }
    }

    async fn raw_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        timeout(WAIT, stream.read_to_string(&mut response))
            .await
            .unwrap()
            .unwrap();
        response
    }

    /// Writes `request` verbatim and reads one response.
    async fn raw_exchange(addr: SocketAddr, request: &[u8]) -> (TcpStream, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request).await.unwrap();
        let response = timeout(WAIT, read_response(&mut stream)).await.unwrap();
        (stream, response)
    }

    /// Reads until the head and `Content-Length` bytes of body arrived, or EOF.
    async fn read_response(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let text = String::from_utf8_lossy(&buf).into_owned();
            if let Some((head, body)) = text.split_once("\r\n\r\n") {
                let length = head.lines().find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                });
                if length.is_some_and(|length| body.len() >= length) {
                    return text;
                }
            }
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => return text,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    fn upgrade_request(path: &str) -> Vec<u8> {
        format!(
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        )
        .into_bytes()
    }

    fn has_header(response: &str, name: &str, value: &str) -> bool {
        let head = response.split_once("\r\n\r\n").map_or(response, |(head, _)| head);
        head.lines().skip(1).any(|line| {
            line.split_once(':').is_some_and(|(n, v)| {
                n.trim().eq_ignore_ascii_case(name) && v.trim().eq_ignore_ascii_case(value)
            })
        })
    }

    fn body_of(response: &str) -> &str {
        response.split_once("\r\n\r\n").map_or("", |(_, body)| body)
    }

    #[tokio::test]
    async fn test_polling_handshake_over_tcp() -> anyhow::Result<()> {
        let running = start(ServerOptions::new()).await;

        let response = raw_get(running.addr, "/engine.io/?EIO=4&transport=polling").await;
        assert!(response.starts_with("HTTP/1.1 200"), "unexpected {response}");
        let body = body_of(&response);
        let json = body.strip_prefix('0').context("open packet")?;
        let handshake: HandshakeData = serde_json::from_str(json)?;
        assert!(running.engine.session(handshake.sid.as_str()).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_outside_path_is_404() {
        let running = start(ServerOptions::new()).await;
        let response = raw_get(running.addr, "/other").await;
        assert!(response.starts_with("HTTP/1.1 404"), "unexpected {response}");
        assert_eq!(body_of(&response), "not found");
    }

    #[tokio::test]
    async fn test_unhandled_upgrade_is_destroyed() {
        let attach = AttachOptions::default()
            .with_destroy_upgrade_timeout(Duration::from_millis(50));
        let running = start_with(ServerOptions::new(), attach).await;

        let (mut stream, response) =
            raw_exchange(running.addr, &upgrade_request("/other")).await;
        assert!(response.starts_with("HTTP/1.1 400"), "unexpected {response}");
        assert!(has_header(&response, "connection", "close"), "unexpected {response}");

        let mut rest = Vec::new();
        let read = timeout(WAIT, stream.read_to_end(&mut rest)).await.unwrap();
        assert!(read.is_err() || rest.is_empty(), "connection left open");
        assert_eq!(running.engine.clients_count(), 0);
    }

    #[tokio::test]
    async fn test_unhandled_upgrade_kept_when_not_destroying() {
        let attach = AttachOptions::default().with_destroy_upgrade(false);
        let running = start_with(ServerOptions::new(), attach).await;

        let (_, response) = raw_exchange(running.addr, &upgrade_request("/other")).await;
        assert!(response.starts_with("HTTP/1.1 404"), "unexpected {response}");
        assert_eq!(body_of(&response), "not found");
    }

    #[tokio::test]
    async fn test_declared_oversized_body_is_413() {
        let running = start(ServerOptions::new().with_max_http_buffer_size(16)).await;

        let mut request = b"POST /engine.io/?EIO=4&transport=polling&sid=x HTTP/1.1\r\n\
            Host: localhost\r\nContent-Type: text/plain\r\nContent-Length: 50000000\r\n\r\n"
            .to_vec();
        request.extend([b'4'; 32]);
        let (_, response) = raw_exchange(running.addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 413"), "unexpected {response}");
        assert!(has_header(&response, "connection", "close"), "unexpected {response}");
    }

    #[tokio::test]
    async fn test_chunked_oversized_body_is_413() {
        let running = start(ServerOptions::new().with_max_http_buffer_size(16)).await;

        let mut request = b"POST /engine.io/?EIO=4&transport=polling&sid=x HTTP/1.1\r\n\
            Host: localhost\r\nContent-Type: text/plain\r\nTransfer-Encoding: chunked\r\n\r\n\
            20\r\n"
            .to_vec();
        request.extend([b'4'; 32]);
        request.extend(b"\r\n0\r\n\r\n");
        let (_, response) = raw_exchange(running.addr, &request).await;
        assert!(response.starts_with("HTTP/1.1 413"), "unexpected {response}");
    }

    #[tokio::test]
    async fn test_rejection_over_tcp() {
        let running = start(ServerOptions::new()).await;
        let response = raw_get(running.addr, "/engine.io/?EIO=4&transport=polling&sid=x").await;
        assert!(response.starts_with("HTTP/1.1 400"), "unexpected {response}");
        let body: Value = serde_json::from_str(body_of(&response)).unwrap();
        assert_eq!(body["code"], 1);
    }

    #[tokio::test]
    async fn test_websocket_session_over_tcp() {
        let running = start(ServerOptions::new()).await;
        let mut events = running.engine.subscribe();

        let url = format!("ws://{}/engine.io/?EIO=4&transport=websocket", running.addr);
        let (mut client, _) = timeout(WAIT, connect_async(url)).await.unwrap().unwrap();

        let open = timeout(WAIT, next_text(&mut client)).await.unwrap().unwrap();
        let handshake: HandshakeData = serde_json::from_str(&open[1..]).unwrap();

        let ServerEvent::Connection(session) = events.recv().await.unwrap() else {
            panic!("expected connection event");
        };
        assert_eq!(session.sid(), &handshake.sid);

        session.send("hi");
        assert_eq!(
            timeout(WAIT, next_text(&mut client)).await.unwrap().as_deref(),
            Some("4hi")
        );
        client.send(Message::Text("1".into())).await.unwrap();
        timeout(WAIT, session.closed()).await.unwrap();
    }

    #[tokio::test]
    async fn test_websocket_disabled_is_501() {
        let running = start(ServerOptions::new().with_transports([TransportKind::Polling])).await;
        let url = format!("ws://{}/engine.io/?EIO=4&transport=websocket", running.addr);
        let err = timeout(WAIT, connect_async(url)).await.unwrap().unwrap_err();
        assert!(err.to_string().contains("501"), "unexpected {err}");
    }

    #[tokio::test]
    async fn test_shutdown_closes_engine() {
        let mut running = start(ServerOptions::new()).await;
        raw_get(running.addr, "/engine.io/?EIO=4&transport=polling").await;
        assert_eq!(running.engine.clients_count(), 1);

        running.stop.take().unwrap().send(()).unwrap();
        timeout(WAIT, &mut running.task).await.unwrap().unwrap().unwrap();
        assert!(running.engine.is_closed());
        assert_eq!(running.engine.clients_count(), 0);
    }
}
