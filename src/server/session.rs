//! Session: one logical client over one active transport.
//!
//! Every transport event, timer expiry and close callback for a session is
//! funneled through its mailbox task and handled one at a time, in arrival
//! order. Public methods only touch the state under its lock and never wait
//! on the mailbox.
//!
//! # Lifecycle
//!
//! ```text
//! opening ──open()──► open ──close()──► closing ──(flushed)──► closed
//!                       └────── transport close / error / timeout ─┘
//! ```
//!
//! # Upgrade
//!
//! | Step | Trigger | Effect |
//! |------|---------|--------|
//! | attach | [`Session::maybe_upgrade`] | probe stored, upgrade timeout armed |
//! | probe | `ping "probe"` on the probe | `pong "probe"` reply, [`SessionEvent::Upgrading`], noop check every 100ms |
//! | commit | `upgrade` on the probe | probe becomes active, old transport discarded, [`SessionEvent::Upgrade`] |
//! | abandon | anything else, probe error or close, upgrade timeout | probe discarded and closed |
//!
//! `upgraded` only ever goes from `false` to `true`, and is never set while
//! a probe is attached.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep};
use tracing::{debug, info, trace, warn};

use crate::context::DoneSignal;
use crate::error::{Error, Result};
use crate::identifiers::{Sid, TransportId};
use crate::protocol::{HandshakeData, Packet, PacketData, PacketType, ProtocolVersion};
use crate::transport::{EventListener, Transport, TransportEvent, TransportKind};

use super::options::ServerOptions;

// ============================================================================
// Constants
// ============================================================================

/// Period of the noop sent to a writable polling transport during a probe.
const UPGRADE_CHECK_PERIOD: Duration = Duration::from_millis(100);

/// Events kept for a receiver nobody has taken yet. Later ones are dropped,
/// except `Close`.
pub const MAX_PENDING_EVENTS: usize = 1024;

// ============================================================================
// SessionReadyState
// ============================================================================

/// Session ready state. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SessionReadyState {
    /// Created, `open` packet not sent yet.
    Opening = 0,
    /// Carrying packets.
    Open = 1,
    /// Close requested, flushing.
    Closing = 2,
    /// Terminal.
    Closed = 3,
}

impl SessionReadyState {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Opening,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Why a session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The active transport closed.
    TransportClose,
    /// The active transport failed.
    TransportError,
    /// The client sent something undecodable.
    ParseError,
    /// No heartbeat within the timeout.
    PingTimeout,
    /// Closed by the application.
    ForcedClose,
    /// Closed because the server is closing.
    ServerShuttingDown,
}

impl CloseReason {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransportClose => "transport close",
            Self::TransportError => "transport error",
            Self::ParseError => "parse error",
            Self::PingTimeout => "ping timeout",
            Self::ForcedClose => "forced close",
            Self::ServerShuttingDown => "server shutting down",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivered to the application through [`Session::events`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Any packet received on the active transport.
    Packet(Packet),
    /// Payload of a `message` packet.
    Message(PacketData),
    /// A heartbeat completed.
    Heartbeat,
    /// A probe answered the probe ping.
    Upgrading(TransportKind),
    /// The probe became the active transport.
    Upgrade(TransportKind),
    /// The write buffer was handed to the transport.
    Drain,
    /// Terminal.
    Close {
        /// Why the session closed.
        reason: CloseReason,
        /// Underlying detail, if any.
        description: Option<String>,
    },
}

// ============================================================================
// Mailbox
// ============================================================================

#[derive(Debug)]
enum Command {
    Transport(TransportId, TransportEvent),
    TransportClosed(CloseReason),
    PingTick(u64),
    PingTimeout(u64),
    UpgradeCheck(u64),
    UpgradeTimeout(u64),
}

type Mailbox = mpsc::UnboundedSender<Command>;

/// Cancelable timer that reports to the mailbox. Stale expiries carry an
/// old generation and are ignored.
#[derive(Debug, Default)]
struct Timer {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    fn arm(&mut self, delay: Duration, mailbox: &Mailbox, command: fn(u64) -> Command) {
        self.cancel();
        let generation = self.generation;
        let mailbox = mailbox.clone();
        self.handle = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = mailbox.send(command(generation));
        }));
    }

    fn repeat(&mut self, period: Duration, mailbox: &Mailbox, command: fn(u64) -> Command) {
        self.cancel();
        let generation = self.generation;
        let mailbox = mailbox.clone();
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if mailbox.send(command(generation)).is_err() {
                    return;
                }
            }
        }));
    }

    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }
}

// ============================================================================
// SessionState
// ============================================================================

struct SessionState {
    transport: Arc<dyn Transport>,
    probe: Option<Arc<dyn Transport>>,
    upgraded: bool,
    write_buffer: Vec<Packet>,
    /// Close requested while packets were buffered; holds `discard`.
    close_on_drain: Option<(bool, CloseReason)>,
    ping_interval: Timer,
    ping_timeout: Timer,
    upgrade_check: Timer,
    upgrade_timeout: Timer,
}

impl SessionState {
    fn cancel_timers(&mut self) {
        self.ping_interval.cancel();
        self.ping_timeout.cancel();
        self.upgrade_check.cancel();
        self.upgrade_timeout.cancel();
    }

    /// Detaches the probe and stops its timers.
    fn take_probe(&mut self) -> Option<Arc<dyn Transport>> {
        self.upgrade_check.cancel();
        self.upgrade_timeout.cancel();
        self.probe.take()
    }
}

#[derive(Debug, Clone, Copy)]
enum Role {
    Active,
    Probe,
    Stale,
}

// ============================================================================
// Session
// ============================================================================

/// One client connection, independent of the carrier.
///
/// # Example
///
/// ```ignore
/// let mut events = session.events().expect("first call");
/// while let Some(event) = events.recv().await {
///     if let SessionEvent::Message(data) = event {
///         session.send(data);
///     }
/// }
/// ```
pub struct Session {
    sid: Sid,
    protocol: ProtocolVersion,
    options: Arc<ServerOptions>,
    ready_state: AtomicU8,
    state: Mutex<SessionState>,
    mailbox: Mailbox,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    closed: DoneSignal,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("protocol", &self.protocol)
            .field("ready_state", &self.ready_state())
            .field("transport", &self.transport_kind())
            .field("upgrading", &self.is_upgrading())
            .field("upgraded", &self.is_upgraded())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Constructor
// ============================================================================

impl Session {
    /// Creates a session in `opening` on `transport` and starts its mailbox.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(
        sid: Sid,
        protocol: ProtocolVersion,
        transport: Arc<dyn Transport>,
        options: Arc<ServerOptions>,
    ) -> Arc<Self> {
        let (mailbox, inbox) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        transport.set_sid(sid.clone());
        transport.set_listener(listener(&mailbox));

        let session = Arc::new(Self {
            sid,
            protocol,
            options,
            ready_state: AtomicU8::new(SessionReadyState::Opening as u8),
            state: Mutex::new(SessionState {
                transport,
                probe: None,
                upgraded: false,
                write_buffer: Vec::new(),
                close_on_drain: None,
                ping_interval: Timer::default(),
                ping_timeout: Timer::default(),
                upgrade_check: Timer::default(),
                upgrade_timeout: Timer::default(),
            }),
            mailbox,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            closed: DoneSignal::new(),
        });

        tokio::spawn(Arc::clone(&session).run(inbox));
        session
    }

    async fn run(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = inbox.recv().await {
            self.dispatch(command);
            if self.ready_state() == SessionReadyState::Closed {
                break;
            }
        }
        trace!(sid = %self.sid, "session mailbox stopped");
    }
}

fn listener(mailbox: &Mailbox) -> EventListener {
    let mailbox = mailbox.clone();
    Arc::new(move |id, event| {
        let _ = mailbox.send(Command::Transport(id, event));
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Session - Accessors
// ============================================================================

impl Session {
    /// Session id.
    #[inline]
    #[must_use]
    pub fn sid(&self) -> &Sid {
        &self.sid
    }

    /// Negotiated protocol revision.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Current ready state.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> SessionReadyState {
        SessionReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }

    /// The active transport.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.state.lock().transport)
    }

    /// Kind of the active transport.
    #[must_use]
    pub fn transport_kind(&self) -> TransportKind {
        self.state.lock().transport.kind()
    }

    /// Returns `true` while a probe transport is attached.
    #[must_use]
    pub fn is_upgrading(&self) -> bool {
        self.state.lock().probe.is_some()
    }

    /// Returns `true` once an upgrade committed.
    #[must_use]
    pub fn is_upgraded(&self) -> bool {
        self.state.lock().upgraded
    }

    /// Takes the event receiver. Only the first call gets it.
    ///
    /// Until taken, at most [`MAX_PENDING_EVENTS`] events are buffered and
    /// later ones are dropped, except the final `Close`. Once taken the
    /// receiver is unbounded, so a slow consumer never loses events.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.lock().take()
    }

    /// Returns `true` once closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_done()
    }

    /// Waits until the session is closed.
    pub async fn closed(&self) {
        self.closed.wait().await;
    }

    fn emit(&self, event: SessionEvent) {
        let pending = self.events_rx.lock();
        if let Some(rx) = pending.as_ref()
            && rx.len() >= MAX_PENDING_EVENTS
            && !matches!(event, SessionEvent::Close { .. })
        {
            trace!(sid = %self.sid, "events not taken, dropping event");
            return;
        }
        let _ = self.events_tx.send(event);
    }

    fn transition(&self, from: SessionReadyState, to: SessionReadyState) -> bool {
        self.ready_state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

// ============================================================================
// Session - Outbound
// ============================================================================

impl Session {
    /// Sends the `open` packet and the optional initial message, and starts
    /// the heartbeat. No effect unless `opening`.
    pub fn open(&self) {
        if !self.transition(SessionReadyState::Opening, SessionReadyState::Open) {
            return;
        }

        let kind = self.transport_kind();
        let handshake = HandshakeData {
            sid: self.sid.clone(),
            upgrades: self.options.upgrades_for(kind),
            ping_interval: millis(self.options.ping_interval),
            ping_timeout: millis(self.options.ping_timeout),
            max_payload: u64::try_from(self.options.max_http_buffer_size).ok(),
        };
        match serde_json::to_string(&handshake) {
            Ok(json) => self.send_packet(Packet::open(json)),
            Err(e) => warn!(sid = %self.sid, error = %e, "handshake encoding failed"),
        }
        if let Some(data) = &self.options.initial_packet {
            self.send_packet(Packet::message(data.clone()));
        }

        info!(sid = %self.sid, transport = %kind, protocol = %self.protocol, "session opened");

        let mut state = self.state.lock();
        match self.protocol {
            ProtocolVersion::V3 => state.ping_timeout.arm(
                self.options.ping_interval + self.options.ping_timeout,
                &self.mailbox,
                Command::PingTimeout,
            ),
            ProtocolVersion::V4 => {
                state
                    .ping_interval
                    .arm(self.options.ping_interval, &self.mailbox, Command::PingTick);
            }
        }
    }

    /// Queues a `message` packet and flushes if the transport is writable.
    pub fn send(&self, data: impl Into<PacketData>) {
        self.send_packet(Packet::message(data));
    }

    /// Queues a packet. Dropped once the session is closing.
    pub fn send_packet(&self, packet: Packet) {
        if self.ready_state() >= SessionReadyState::Closing {
            debug!(sid = %self.sid, packet_type = %packet.packet_type, "dropping packet on closing session");
            return;
        }
        let mut state = self.state.lock();
        trace!(sid = %self.sid, packet_type = %packet.packet_type, "packet queued");
        state.write_buffer.push(packet);
        self.flush(&mut state);
    }

    fn flush(&self, state: &mut SessionState) {
        if self.ready_state() == SessionReadyState::Closed
            || state.write_buffer.is_empty()
            || !state.transport.writable()
        {
            return;
        }

        let packets = std::mem::take(&mut state.write_buffer);
        trace!(sid = %self.sid, count = packets.len(), "flushing write buffer");
        if let Err(e) = state.transport.send(packets) {
            debug!(sid = %self.sid, error = %e, "flush failed");
        }
        self.emit(SessionEvent::Drain);

        if let Some((discard, reason)) = state.close_on_drain.take() {
            self.close_transport(state, discard, reason);
        }
    }
}

// ============================================================================
// Session - Upgrade
// ============================================================================

impl Session {
    /// Attaches `transport` as the upgrade probe.
    ///
    /// The check and the attach happen under one lock, so of two concurrent
    /// attempts exactly one succeeds. A rejected transport is closed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpgradeRejected`] if a probe is already attached,
    /// the session already upgraded, or the session is not open.
    pub fn maybe_upgrade(&self, transport: Arc<dyn Transport>) -> Result<()> {
        let mut state = self.state.lock();

        let rejection = if state.upgraded {
            Some("transport already upgraded")
        } else if state.probe.is_some() {
            Some("transport already trying to upgrade")
        } else if self.ready_state() != SessionReadyState::Open {
            Some("session is not open")
        } else {
            None
        };

        if let Some(reason) = rejection {
            drop(state);
            debug!(sid = %self.sid, reason, "upgrade rejected");
            transport.close(None);
            return Err(Error::upgrade_rejected(reason));
        }

        debug!(
            sid = %self.sid,
            from = %state.transport.kind(),
            to = %transport.kind(),
            "probing upgrade"
        );
        transport.set_sid(self.sid.clone());
        transport.set_listener(listener(&self.mailbox));
        state
            .upgrade_timeout
            .arm(self.options.upgrade_timeout, &self.mailbox, Command::UpgradeTimeout);
        state.probe = Some(transport);
        Ok(())
    }

    fn on_probe_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Packet(packet) if packet.is_probe_ping() => {
                let mut state = self.state.lock();
                let Some(probe) = state.probe.clone() else {
                    return;
                };
                debug!(sid = %self.sid, "got probe ping, sending pong");
                if let Err(e) = probe.send(vec![Packet::pong_probe()]) {
                    debug!(sid = %self.sid, error = %e, "probe pong failed");
                }
                state
                    .upgrade_check
                    .repeat(UPGRADE_CHECK_PERIOD, &self.mailbox, Command::UpgradeCheck);
                drop(state);
                self.emit(SessionEvent::Upgrading(probe.kind()));
            }

            TransportEvent::Packet(packet)
                if packet.packet_type == PacketType::Upgrade
                    && self.ready_state() != SessionReadyState::Closed =>
            {
                self.commit_upgrade();
            }

            TransportEvent::Drain => {}

            other => {
                debug!(sid = %self.sid, event = ?other, "abandoning probe");
                self.abandon_probe();
            }
        }
    }

    fn commit_upgrade(&self) {
        let (old, new) = {
            let mut state = self.state.lock();
            let Some(probe) = state.take_probe() else {
                return;
            };
            let old = std::mem::replace(&mut state.transport, Arc::clone(&probe));
            state.upgraded = true;
            old.discard();
            (old, probe)
        };

        old.close(None);
        info!(sid = %self.sid, from = %old.kind(), to = %new.kind(), "upgrade committed");
        self.emit(SessionEvent::Upgrade(new.kind()));

        let mut state = self.state.lock();
        let close_pending = state.close_on_drain.is_some();
        self.flush(&mut state);
        if self.ready_state() == SessionReadyState::Closing && !close_pending {
            self.close_transport(&mut state, false, CloseReason::ForcedClose);
        }
    }

    fn abandon_probe(&self) {
        let probe = self.state.lock().take_probe();
        if let Some(probe) = probe {
            probe.discard();
            probe.close(None);
        }
    }
}

// ============================================================================
// Session - Closing
// ============================================================================

impl Session {
    /// Closes the session.
    ///
    /// With `discard`, the active transport is discarded and closed right
    /// away. Otherwise buffered packets are flushed first.
    pub fn close(&self, discard: bool) {
        self.close_for(discard, CloseReason::ForcedClose);
    }

    pub(crate) fn close_for(&self, discard: bool, reason: CloseReason) {
        let mut state = self.state.lock();

        if discard && self.ready_state() != SessionReadyState::Closed {
            self.ready_state
                .fetch_max(SessionReadyState::Closing as u8, Ordering::SeqCst);
            self.close_transport(&mut state, true, reason);
            return;
        }

        if !self.transition(SessionReadyState::Open, SessionReadyState::Closing) {
            return;
        }
        debug!(sid = %self.sid, %reason, "closing session");

        if !state.write_buffer.is_empty() {
            state.close_on_drain = Some((discard, reason));
            return;
        }
        self.close_transport(&mut state, discard, reason);
    }

    fn close_transport(&self, state: &mut SessionState, discard: bool, reason: CloseReason) {
        if discard {
            state.transport.discard();
        }
        let mailbox = self.mailbox.clone();
        state.transport.close(Some(Box::new(move || {
            let _ = mailbox.send(Command::TransportClosed(reason));
        })));
    }

    fn on_close(&self, reason: CloseReason, description: Option<String>) {
        let previous = self
            .ready_state
            .swap(SessionReadyState::Closed as u8, Ordering::SeqCst);
        if SessionReadyState::from_u8(previous) == SessionReadyState::Closed {
            return;
        }

        let (transport, probe) = {
            let mut state = self.state.lock();
            state.cancel_timers();
            state.write_buffer.clear();
            state.close_on_drain = None;
            (Arc::clone(&state.transport), state.probe.take())
        };

        if let Some(probe) = probe {
            probe.discard();
            probe.close(None);
        }
        transport.discard();
        transport.close(None);

        info!(sid = %self.sid, %reason, ?description, "session closed");
        self.emit(SessionEvent::Close {
            reason,
            description,
        });
        self.closed.fire();
    }
}

// ============================================================================
// Session - Inbound
// ============================================================================

impl Session {
    fn dispatch(&self, command: Command) {
        match command {
            Command::Transport(id, event) => match self.role_of(id) {
                Role::Active => self.on_transport_event(event),
                Role::Probe => self.on_probe_event(event),
                Role::Stale => trace!(sid = %self.sid, transport = %id, "event from stale transport"),
            },
            Command::TransportClosed(reason) => self.on_close(reason, None),
            Command::PingTick(generation) => self.on_ping_tick(generation),
            Command::PingTimeout(generation) => {
                if self.state.lock().ping_timeout.is_current(generation) {
                    self.on_close(CloseReason::PingTimeout, None);
                }
            }
            Command::UpgradeCheck(generation) => self.on_upgrade_check(generation),
            Command::UpgradeTimeout(generation) => {
                if self.state.lock().upgrade_timeout.is_current(generation) {
                    debug!(sid = %self.sid, "upgrade timed out");
                    self.abandon_probe();
                }
            }
        }
    }

    fn role_of(&self, id: TransportId) -> Role {
        let state = self.state.lock();
        if state.transport.id() == id {
            Role::Active
        } else if state.probe.as_ref().is_some_and(|p| p.id() == id) {
            Role::Probe
        } else {
            Role::Stale
        }
    }

    fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Packet(packet) => self.on_packet(packet),
            TransportEvent::Error {
                reason,
                description,
            } => {
                let close_reason = if reason == "parse error" {
                    CloseReason::ParseError
                } else {
                    CloseReason::TransportError
                };
                let description = match description {
                    Some(detail) => format!("{reason}: {detail}"),
                    None => reason,
                };
                self.on_close(close_reason, Some(description));
            }
            TransportEvent::Close => self.on_close(CloseReason::TransportClose, None),
            TransportEvent::Drain => {
                let mut state = self.state.lock();
                self.flush(&mut state);
            }
        }
    }

    fn on_packet(&self, packet: Packet) {
        if self.ready_state() != SessionReadyState::Open {
            debug!(sid = %self.sid, "packet received on non-open session");
            return;
        }

        self.emit(SessionEvent::Packet(packet.clone()));

        match (packet.packet_type, self.protocol) {
            (PacketType::Ping, ProtocolVersion::V3) => {
                trace!(sid = %self.sid, "client ping");
                self.state.lock().ping_timeout.arm(
                    self.options.ping_interval + self.options.ping_timeout,
                    &self.mailbox,
                    Command::PingTimeout,
                );
                self.send_packet(Packet::pong());
                self.emit(SessionEvent::Heartbeat);
            }
            (PacketType::Pong, ProtocolVersion::V4) => {
                trace!(sid = %self.sid, "client pong");
                let mut state = self.state.lock();
                state.ping_timeout.cancel();
                state
                    .ping_interval
                    .arm(self.options.ping_interval, &self.mailbox, Command::PingTick);
                drop(state);
                self.emit(SessionEvent::Heartbeat);
            }
            (PacketType::Ping | PacketType::Pong, _) => {
                self.on_close(
                    CloseReason::TransportError,
                    Some("invalid heartbeat direction".to_string()),
                );
            }
            (PacketType::Message, _) => {
                let data = packet
                    .data
                    .unwrap_or_else(|| PacketData::Text(String::new()));
                self.emit(SessionEvent::Message(data));
            }
            _ => {}
        }
    }

    fn on_ping_tick(&self, generation: u64) {
        if !self.state.lock().ping_interval.is_current(generation) {
            return;
        }
        trace!(sid = %self.sid, "server ping");
        self.send_packet(Packet::ping());
        self.state
            .lock()
            .ping_timeout
            .arm(self.options.ping_timeout, &self.mailbox, Command::PingTimeout);
    }

    fn on_upgrade_check(&self, generation: u64) {
        let state = self.state.lock();
        if !state.upgrade_check.is_current(generation) {
            return;
        }
        if state.transport.kind() == TransportKind::Polling && state.transport.writable() {
            debug!(sid = %self.sid, "writing noop to polling for fast upgrade");
            if let Err(e) = state.transport.send(vec![Packet::noop()]) {
                debug!(sid = %self.sid, error = %e, "upgrade noop failed");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
