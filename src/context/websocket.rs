//! Per-socket WebSocket context.
//!
//! Wraps one promoted socket as a full-duplex frame channel plus a one-shot
//! close signal. A pump task owns the socket; handles talk to it through
//! channels, so `WebSocketConn` is cheap to clone and never blocks.
//!
//! # Pump Loop
//!
//! - Incoming text/binary frames are forwarded to the single consumer
//!   that took the incoming receiver (the transport).
//! - Outgoing frames and close requests are written in call order.
//! - When either side closes, the pump exits and fires the close signal.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

use super::signal::DoneSignal;

// ============================================================================
// Types
// ============================================================================

/// A data frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

/// Receiver side of the incoming frame stream.
pub type IncomingFrames = mpsc::UnboundedReceiver<Result<WsFrame>>;

/// Internal commands for the pump.
#[derive(Debug)]
enum WsCommand {
    /// Write a frame.
    Frame(Message),
    /// Send a close frame and shut the socket.
    Close(Option<CloseFrame>),
}

#[derive(Debug)]
struct WsShared {
    outgoing: mpsc::UnboundedSender<WsCommand>,
    incoming: Mutex<Option<IncomingFrames>>,
    closed: DoneSignal,
}

// ============================================================================
// WebSocketConn
// ============================================================================

/// Handle to a promoted WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConn {
    shared: Arc<WsShared>,
}

impl WebSocketConn {
    /// Wraps a WebSocket stream and spawns its pump task.
    pub fn new<S>(stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let closed = DoneSignal::new();

        tokio::spawn(Self::run_pump(stream, out_rx, in_tx, closed.clone()));

        Self {
            shared: Arc::new(WsShared {
                outgoing: out_tx,
                incoming: Mutex::new(Some(in_rx)),
                closed,
            }),
        }
    }

    /// Takes the incoming frame receiver. Only the first call gets it.
    pub fn take_incoming(&self) -> Option<IncomingFrames> {
        self.shared.incoming.lock().take()
    }

    /// Queues a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] if the socket is gone.
    pub fn send(&self, message: Message) -> Result<()> {
        self.shared
            .outgoing
            .send(WsCommand::Frame(message))
            .map_err(|_| Error::TransportClosed)
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] if the socket is gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into().into()))
    }

    /// Queues a binary frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] if the socket is gone.
    pub fn send_binary(&self, data: Bytes) -> Result<()> {
        self.send(Message::Binary(data))
    }

    /// Closes the socket without a close reason. Idempotent.
    pub fn close(&self) {
        let _ = self.shared.outgoing.send(WsCommand::Close(None));
    }

    /// Sends a close frame with `code` and `reason`, then closes.
    pub fn close_with(&self, code: CloseCode, reason: impl Into<String>) {
        let frame = CloseFrame {
            code,
            reason: reason.into().into(),
        };
        let _ = self.shared.outgoing.send(WsCommand::Close(Some(frame)));
    }

    /// Returns `true` once the socket is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_done()
    }

    /// Waits until the socket is closed.
    pub async fn done(&self) {
        self.shared.closed.wait().await;
    }

    /// Pump task owning the socket.
    async fn run_pump<S>(
        stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<WsCommand>,
        frame_tx: mpsc::UnboundedSender<Result<WsFrame>>,
        closed: DoneSignal,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(len = text.len(), "text frame received");
                            let _ = frame_tx.send(Ok(WsFrame::Text(text.as_str().to_owned())));
                        }

                        Some(Ok(Message::Binary(data))) => {
                            trace!(len = data.len(), "binary frame received");
                            let _ = frame_tx.send(Ok(WsFrame::Binary(data)));
                        }

                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "WebSocket closed by remote");
                            let _ = ws_write.close().await;
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket read failed");
                            let _ = frame_tx.send(Err(Error::WebSocket(e)));
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        // Ping/Pong are answered by tungstenite
                        Some(Ok(_)) => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(WsCommand::Frame(message)) => {
                            if let Err(e) = ws_write.send(message).await {
                                warn!(error = %e, "WebSocket write failed");
                                let _ = frame_tx.send(Err(Error::WebSocket(e)));
                                break;
                            }
                        }

                        Some(WsCommand::Close(frame)) => {
                            debug!(?frame, "Closing WebSocket");
                            let _ = ws_write.send(Message::Close(frame)).await;
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("All WebSocket handles dropped");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        closed.fire();
        debug!("WebSocket pump terminated");
    }
}

// ============================================================================
// Test Support
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
