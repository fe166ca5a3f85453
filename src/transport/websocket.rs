//! WebSocket transport.
//!
//! Full-duplex: every packet is one frame, written as soon as it is sent.
//! A read task decodes one packet per inbound frame and reports the
//! transport closed once the socket ends.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use crate::context::{HttpContext, IncomingFrames, WebSocketConn, WsFrame};
use crate::error::{Error, Result};
use crate::protocol::{
    EncodedPacket, Packet, PacketType, decode_binary_packet, decode_text_packet, encode_packet,
};

use super::{CloseCallback, RawData, Transport, TransportBase, TransportKind, TransportOptions};

// ============================================================================
// PerMessageDeflate
// ============================================================================

/// Per-message deflate settings, negotiated when the socket is promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerMessageDeflate {
    /// Smallest frame worth compressing.
    pub threshold: usize,
}

impl Default for PerMessageDeflate {
    fn default() -> Self {
        Self { threshold: 1024 }
    }
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// WebSocket carrier.
pub struct WebSocketTransport {
    base: TransportBase,
    conn: WebSocketConn,
    writable: AtomicBool,
    per_message_deflate: Option<PerMessageDeflate>,
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("base", &self.base)
            .field("writable", &self.writable())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Binds a transport to a promoted socket and starts reading frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if another transport already reads
    /// from this socket.
    pub fn new(
        conn: WebSocketConn,
        options: &TransportOptions,
        supports_binary: bool,
    ) -> Result<Arc<Self>> {
        let incoming = conn
            .take_incoming()
            .ok_or_else(|| Error::transport("websocket already bound to a transport"))?;

        let transport = Arc::new(Self {
            base: TransportBase::new(TransportKind::WebSocket, options.protocol, supports_binary),
            conn,
            writable: AtomicBool::new(true),
            per_message_deflate: options.per_message_deflate,
        });

        tokio::spawn(Self::read_loop(Arc::downgrade(&transport), incoming));
        Ok(transport)
    }

    /// The underlying socket.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &WebSocketConn {
        &self.conn
    }

    /// Negotiated per-message deflate settings.
    #[inline]
    #[must_use]
    pub fn per_message_deflate(&self) -> Option<PerMessageDeflate> {
        self.per_message_deflate
    }

    async fn read_loop(this: Weak<Self>, mut incoming: IncomingFrames) {
        while let Some(frame) = incoming.recv().await {
            let Some(transport) = this.upgrade() else {
                return;
            };
            match frame {
                Ok(WsFrame::Text(text)) => transport.on_data(RawData::Text(text)),
                Ok(WsFrame::Binary(data)) => transport.on_data(RawData::Binary(data)),
                Err(e) => transport
                    .base
                    .on_error("websocket error", Some(e.to_string())),
            }
        }

        if let Some(transport) = this.upgrade() {
            transport.base.on_close();
        }
    }

    fn write_packet(&self, packet: &Packet) -> Result<()> {
        let encoded = encode_packet(packet, self.base.supports_binary(), self.base.protocol());
        trace!(transport = %self.base.id(), packet_type = %packet.packet_type, "writing frame");
        match encoded {
            EncodedPacket::Text(text) => self.conn.send_text(text),
            EncodedPacket::Binary(data) => self.conn.send_binary(data),
        }
    }
}

// ============================================================================
// Transport Implementation
// ============================================================================

impl Transport for WebSocketTransport {
    fn base(&self) -> &TransportBase {
        &self.base
    }

    fn handles_upgrades(&self) -> bool {
        true
    }

    fn supports_framing(&self) -> bool {
        true
    }

    fn writable(&self) -> bool {
        self.base.is_open() && self.writable.load(Ordering::SeqCst)
    }

    fn on_request(&self, _ctx: Arc<HttpContext>) -> Result<()> {
        Err(Error::transport("websocket transport does not take HTTP requests"))
    }

    fn send(&self, packets: Vec<Packet>) -> Result<()> {
        if !self.base.is_open() {
            return Err(Error::TransportClosed);
        }

        self.writable.store(false, Ordering::SeqCst);
        for packet in &packets {
            if let Err(e) = self.write_packet(packet) {
                self.base.on_error("write error", Some(e.to_string()));
                return Err(e);
            }
        }
        self.writable.store(true, Ordering::SeqCst);
        self.base.on_drain();
        Ok(())
    }

    fn close(&self, callback: Option<CloseCallback>) {
        if self.base.begin_close() {
            debug!(transport = %self.base.id(), "closing websocket transport");
            self.conn.close();
        }
        if let Some(callback) = callback {
            callback();
        }
    }

    fn on_data(&self, data: RawData) {
        let protocol = self.base.protocol();
        let decoded = match data {
            RawData::Text(text) => decode_text_packet(&text, protocol),
            RawData::Binary(bytes) => decode_binary_packet(bytes, protocol),
        };

        match decoded {
            Ok(packet) if packet.packet_type == PacketType::Close => {
                debug!(transport = %self.base.id(), "got close packet");
                self.base.begin_close();
                self.conn.close();
                self.base.on_close();
            }
            Ok(packet) => self.base.on_packet(packet),
            Err(e) => self.base.on_error("parse error", Some(e.to_string())),
        }
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
    use futures_util::{SinkExt, StreamExt};
    use parking_lot::Mutex;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::Message;

    use crate::context::websocket::test_support::{ClientSocket, next_text, pair};
    use crate::transport::{ReadyState, TransportEvent};

    type Events = Arc<Mutex<Vec<TransportEvent>>>;

    async fn transport(supports_binary: bool) -> (Arc<WebSocketTransport>, ClientSocket, Events) {
        let (conn, client) = pair().await;
        let transport =
            WebSocketTransport::new(conn, &TransportOptions::default(), supports_binary).unwrap();
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        transport.set_listener(Arc::new(move |_, event| sink.lock().push(event)));
        (transport, client, events)
    }

    async fn wait_for(events: &Events, expected: &TransportEvent) {
        timeout(Duration::from_secs(1), async {
            while !events.lock().contains(expected) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("event observed");
    }

    #[tokio::test]
    async fn test_each_packet_is_one_frame() {
        let (transport, mut client, events) = transport(true).await;
        assert!(transport.writable());

        transport
            .send(vec![Packet::message("a"), Packet::message(vec![1u8, 2])])
            .unwrap();

        assert_eq!(next_text(&mut client).await.as_deref(), Some("4a"));
        let frame = client.next().await.unwrap().unwrap();
        assert_eq!(frame, Message::Binary(Bytes::from_static(&[1, 2])));
        assert!(events.lock().contains(&TransportEvent::Drain));
        assert!(transport.writable());
    }

    #[tokio::test]
    async fn test_base64_binary_when_not_supported() {
        let (transport, mut client, _) = transport(false).await;
        transport.send(vec![Packet::message(vec![1u8, 2, 3, 4])]).unwrap();
        assert_eq!(next_text(&mut client).await.as_deref(), Some("bAQIDBA=="));
    }

    #[tokio::test]
    async fn test_inbound_frames_become_packets() {
        let (_transport, mut client, events) = transport(true).await;
        client.send(Message::Text("2probe".into())).await.unwrap();

        let expected = TransportEvent::Packet(Packet::new(
            PacketType::Ping,
            Some("probe".into()),
        ));
        wait_for(&events, &expected).await;
    }

    #[tokio::test]
    async fn test_bad_frame_is_parse_error() {
        let (_transport, mut client, events) = transport(true).await;
        client.send(Message::Text("x".into())).await.unwrap();

        timeout(Duration::from_secs(1), async {
            loop {
                if events.lock().iter().any(|e| {
                    matches!(e, TransportEvent::Error { reason, .. } if reason == "parse error")
                }) {
                    return;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("parse error reported");
    }

    #[tokio::test]
    async fn test_remote_close_reports_close() {
        let (transport, mut client, events) = transport(true).await;
        client.close(None).await.unwrap();

        wait_for(&events, &TransportEvent::Close).await;
        assert_eq!(transport.ready_state(), ReadyState::Closed);
        assert!(transport.send(vec![Packet::noop()]).is_err());
    }

    #[tokio::test]
    async fn test_close_runs_callback_and_closes_socket() {
        let (transport, mut client, events) = transport(true).await;
        let (tx, rx) = tokio::sync::oneshot::channel();
        transport.close(Some(Box::new(move || {
            let _ = tx.send(());
        })));

        timeout(Duration::from_millis(100), rx).await.unwrap().unwrap();
        let frame = timeout(Duration::from_secs(1), client.next()).await.unwrap();
        assert!(matches!(frame, Some(Ok(Message::Close(_)))));
        wait_for(&events, &TransportEvent::Close).await;
    }

    #[tokio::test]
    async fn test_socket_binds_once() {
        let (conn, _client) = pair().await;
        let options = TransportOptions::default();
        let _first = WebSocketTransport::new(conn.clone(), &options, true).unwrap();
        assert!(WebSocketTransport::new(conn, &options, true).is_err());
    }

    #[tokio::test]
    async fn test_rejects_http_requests() {
        let (transport, _client, _) = transport(true).await;
        let ctx = Arc::new(HttpContext::from_request(
            http::Request::builder().uri("/").body(Bytes::new()).unwrap(),
        ));
        assert!(transport.on_request(ctx).is_err());
        assert!(transport.handles_upgrades());
        assert!(transport.supports_framing());
        assert_eq!(transport.name(), "websocket");
    }
}
