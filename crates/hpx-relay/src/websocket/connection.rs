//! Connection driver: one background task per client.
//!
//! The driver serializes everything that touches the socket:
//!
//! - connection lifecycle (connect, detect close, reconnect with backoff)
//! - keep-alive envelopes while open
//! - inbound triage (pending request first, then broadcast handlers)
//! - outbound commands from [`WsClient`](super::WsClient)
//!
//! State machine:
//!
//! ```text
//!            connect ok                 reader ends / errors
//! Connecting ──────────▶ Open ─────────────────────────────▶ Closed ──┐
//!     ▲                   │ close()                            │      │ attempts left:
//!     │                   ▼                                    │      │ sleep(backoff)
//!     │                Closing ──▶ Closed (terminal)           │      │
//!     └────────────────────────────────────────────────────────┴──────┘
//! ```
//!
//! Every transition to `Closed` rejects all pending requests. The handler
//! registry is never touched by lifecycle events.

use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior, interval_at, sleep, timeout},
};
use tracing::{debug, error, info, warn};

use super::{
    config::WsConfig,
    pending::PendingRequestStore,
    protocol::{Connector, WsMessage, WsSocket, WsWriter},
    subscription::HandlerRegistry,
    types::{ConnectionState, RequestId},
};
use crate::{
    envelope::Envelope,
    error::{TransportError, TransportResult},
    reconnect::calculate_backoff,
};

/// Lifecycle commands from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlCommand {
    /// Open a connection if none is open or in progress.
    Connect,
    /// Close gracefully and stay closed until the next `Connect`.
    Close,
}

/// Traffic commands from the client.
#[derive(Debug)]
pub(crate) enum DataCommand {
    /// Fire-and-forget envelope.
    Send { envelope: Envelope },
    /// Envelope whose pending entry is already registered under `request_id`.
    Request {
        envelope: Envelope,
        request_id: RequestId,
    },
}

/// Why a session (one open socket) ended.
#[derive(Debug)]
enum SessionEnd {
    /// Socket closed or failed; eligible for reconnect.
    Lost(String),
    /// Caller asked to close.
    Closed,
    /// Every client handle was dropped.
    Shutdown,
}

/// What woke the driver while it had no socket.
#[derive(Debug)]
enum Wake {
    /// Backoff elapsed, or a caller asked to connect after a terminal close.
    Connect,
    /// Caller asked to close while a reconnect was scheduled.
    Close,
    /// Every client handle was dropped.
    Shutdown,
}

pub(crate) struct ConnectionDriver<C> {
    config: Arc<WsConfig>,
    connector: C,
    ctrl_rx: mpsc::Receiver<ControlCommand>,
    cmd_rx: mpsc::Receiver<DataCommand>,
    state_tx: watch::Sender<ConnectionState>,
    pending: Arc<PendingRequestStore>,
    registry: Arc<HandlerRegistry>,
}

impl<C: Connector> ConnectionDriver<C> {
    pub(crate) fn new(
        config: Arc<WsConfig>,
        connector: C,
        ctrl_rx: mpsc::Receiver<ControlCommand>,
        cmd_rx: mpsc::Receiver<DataCommand>,
        state_tx: watch::Sender<ConnectionState>,
        pending: Arc<PendingRequestStore>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            config,
            connector,
            ctrl_rx,
            cmd_rx,
            state_tx,
            pending,
            registry,
        }
    }

    /// Main entry point - run until every client handle is dropped.
    pub(crate) async fn run(mut self) {
        info!(url = %self.config.url, "Starting relay connection driver");
        let mut attempt: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);

            let end = match self.open_socket().await {
                Ok(socket) => {
                    attempt = 0;
                    self.set_state(ConnectionState::Open);
                    info!(url = %self.config.url, "WebSocket connected");
                    self.run_session(socket).await
                }
                Err(err) => {
                    warn!(error = %err, attempt, "Connection attempt failed");
                    SessionEnd::Lost(err.to_string())
                }
            };

            let reason = match end {
                SessionEnd::Lost(reason) => reason,
                SessionEnd::Closed => {
                    self.enter_closed("Connection closed by client");
                    info!("WebSocket closed by client");
                    match self.idle().await {
                        Wake::Connect => {
                            attempt = 0;
                            continue;
                        }
                        Wake::Close | Wake::Shutdown => break,
                    }
                }
                SessionEnd::Shutdown => {
                    self.enter_closed("Client dropped");
                    break;
                }
            };

            self.enter_closed(&reason);

            if let Some(max) = self.config.reconnect_max_attempts
                && attempt >= max
            {
                error!(attempts = attempt, "Max reconnection attempts exceeded");
                self.discard_queued_control();
                match self.idle().await {
                    Wake::Connect => {
                        attempt = 0;
                        continue;
                    }
                    Wake::Close | Wake::Shutdown => break,
                }
            }

            let delay = calculate_backoff(self.config.backoff(), attempt);
            attempt = attempt.saturating_add(1);
            debug!(
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                attempt, "Waiting before reconnect"
            );

            match self.wait_before_reconnect(delay).await {
                Wake::Connect => {}
                Wake::Close => {
                    info!("Reconnect cancelled by client");
                    match self.idle().await {
                        Wake::Connect => attempt = 0,
                        Wake::Close | Wake::Shutdown => break,
                    }
                }
                Wake::Shutdown => break,
            }
        }

        self.set_state(ConnectionState::Closed);
        info!("Relay connection driver stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn enter_closed(&self, reason: &str) {
        self.set_state(ConnectionState::Closed);
        self.pending.clear_with_error(reason);
    }

    /// Attempt to open a socket within the connect timeout.
    async fn open_socket(&mut self) -> TransportResult<WsSocket> {
        debug!(url = %self.config.url, "Connecting to WebSocket");
        let connect_timeout = self.config.connect_timeout;
        timeout(connect_timeout, self.connector.connect(&self.config.url))
            .await
            .map_err(|_| TransportError::timeout(connect_timeout))?
    }

    /// Drive one open socket until it closes.
    async fn run_session(&mut self, socket: WsSocket) -> SessionEnd {
        let WsSocket {
            mut reader,
            mut writer,
        } = socket;

        let keepalive_period = self.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + keepalive_period, keepalive_period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cleanup_period = self.config.pending_cleanup_interval;
        let mut cleanup = interval_at(Instant::now() + cleanup_period, cleanup_period);

        let end = loop {
            tokio::select! {
                biased;
                ctrl = self.ctrl_rx.recv() => {
                    match ctrl {
                        Some(ControlCommand::Connect) => {}
                        Some(ControlCommand::Close) => {
                            self.set_state(ConnectionState::Closing);
                            break SessionEnd::Closed;
                        }
                        None => break SessionEnd::Shutdown,
                    }
                }
                frame = reader.next() => {
                    match frame {
                        Some(Ok(message)) => self.handle_inbound(message),
                        Some(Err(err)) => {
                            warn!(error = %err, "WebSocket read error");
                            break SessionEnd::Lost(err.to_string());
                        }
                        None => break SessionEnd::Lost("Connection closed by peer".to_string()),
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if let Err(err) = self.handle_command(cmd, writer.as_mut()).await {
                                warn!(error = %err, "WebSocket write error");
                                break SessionEnd::Lost(err.to_string());
                            }
                        }
                        None => break SessionEnd::Shutdown,
                    }
                }
                _ = keepalive.tick() => {
                    self.send_keepalive(writer.as_mut()).await;
                }
                _ = cleanup.tick() => {
                    self.pending.cleanup_stale_with_notify();
                }
            }
        };

        if !matches!(end, SessionEnd::Lost(_))
            && let Err(err) = writer.close().await
        {
            debug!(error = %err, "Error closing WebSocket");
        }
        end
    }

    /// Parse, correlate, then dispatch one inbound frame.
    fn handle_inbound(&self, message: WsMessage) {
        let size = message.len();
        if self.config.max_message_size > 0 && size > self.config.max_message_size {
            warn!(
                size,
                max = self.config.max_message_size,
                "Dropping oversized WebSocket message"
            );
            return;
        }

        let envelope = match message.into_text().and_then(|text| Envelope::parse(&text)) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "Dropping malformed message");
                return;
            }
        };

        if let Err(envelope) = self.pending.settle(envelope) {
            if let Some(request_id) = envelope.request_id() {
                debug!(request_id, "No pending request for response");
            }
            self.registry.dispatch(&envelope);
        }
    }

    /// Write one outbound command.
    ///
    /// Returns the write error, if any, so the session can be torn down.
    async fn handle_command(
        &mut self,
        cmd: DataCommand,
        writer: &mut dyn WsWriter,
    ) -> TransportResult<()> {
        match cmd {
            DataCommand::Send { envelope } => {
                writer.send_ws(WsMessage::text(envelope.to_text())).await
            }
            DataCommand::Request {
                envelope,
                request_id,
            } => {
                if !self.pending.contains(&request_id) {
                    debug!(request_id = %request_id, "Request settled before send; skipping");
                    return Ok(());
                }
                if let Err(err) = writer.send_ws(WsMessage::text(envelope.to_text())).await {
                    self.pending.resolve(
                        &request_id,
                        Err(TransportError::websocket(format!(
                            "Failed to send request: {err}"
                        ))),
                    );
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    async fn send_keepalive(&mut self, writer: &mut dyn WsWriter) {
        let ping = Envelope::new(self.config.keepalive_event_type.as_str());
        if let Err(err) = writer.send_ws(WsMessage::text(ping.to_text())).await {
            warn!(error = %err, "Failed to send keep-alive");
        }
    }

    /// Commands that arrive while there is no socket.
    fn reject_command(&self, cmd: DataCommand) {
        match cmd {
            DataCommand::Send { envelope } => {
                debug!(
                    event_type = envelope.event_type().unwrap_or_default(),
                    "Not connected; dropping message"
                );
            }
            DataCommand::Request { request_id, .. } => {
                self.pending
                    .resolve(&request_id, Err(TransportError::NotConnected));
            }
        }
    }

    /// Sleep out a backoff delay while staying responsive to commands.
    ///
    /// A scheduled reconnect already counts as connecting, so `Connect` does
    /// not cut the delay short.
    async fn wait_before_reconnect(&mut self, delay: Duration) -> Wake {
        let deadline = sleep(delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                ctrl = self.ctrl_rx.recv() => {
                    match ctrl {
                        Some(ControlCommand::Connect) => {}
                        Some(ControlCommand::Close) => return Wake::Close,
                        None => return Wake::Shutdown,
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.reject_command(cmd),
                        None => return Wake::Shutdown,
                    }
                }
                _ = &mut deadline => return Wake::Connect,
            }
        }
    }

    /// Drop control commands queued before the driver gave up.
    ///
    /// An `open()` issued while a backoff was about to fire belongs to the
    /// cycle that just ended and must not restart it.
    fn discard_queued_control(&mut self) {
        while let Ok(cmd) = self.ctrl_rx.try_recv() {
            debug!(?cmd, "Discarding control command from exhausted reconnect cycle");
        }
    }

    /// Stay closed until a caller asks to connect.
    async fn idle(&mut self) -> Wake {
        loop {
            tokio::select! {
                biased;
                ctrl = self.ctrl_rx.recv() => {
                    match ctrl {
                        Some(ControlCommand::Connect) => return Wake::Connect,
                        Some(ControlCommand::Close) => {}
                        None => return Wake::Shutdown,
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.reject_command(cmd),
                        None => return Wake::Shutdown,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::websocket::subscription::Handler;

    #[derive(Clone, Default)]
    struct RefusingConnector {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, _url: &str) -> TransportResult<WsSocket> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::websocket("connection refused"))
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        sent: Vec<WsMessage>,
        fail: bool,
    }

    #[async_trait]
    impl WsWriter for RecordingWriter {
        async fn send_ws(&mut self, message: WsMessage) -> TransportResult<()> {
            if self.fail {
                return Err(TransportError::websocket("broken pipe"));
            }
            self.sent.push(message);
            Ok(())
        }
    }

    struct Harness {
        driver: ConnectionDriver<RefusingConnector>,
        ctrl_tx: mpsc::Sender<ControlCommand>,
        cmd_tx: mpsc::Sender<DataCommand>,
        state_rx: watch::Receiver<ConnectionState>,
    }

    fn harness(config: WsConfig) -> Harness {
        let config = Arc::new(config);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(4);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let driver = ConnectionDriver::new(
            Arc::clone(&config),
            RefusingConnector::default(),
            ctrl_rx,
            cmd_rx,
            state_tx,
            Arc::new(PendingRequestStore::new(Arc::clone(&config))),
            Arc::new(HandlerRegistry::new()),
        );
        Harness {
            driver,
            ctrl_tx,
            cmd_tx,
            state_rx,
        }
    }

    fn record_into(log: &Arc<Mutex<Vec<Envelope>>>) -> Handler {
        let log = Arc::clone(log);
        Arc::new(move |envelope: &Envelope| log.lock().unwrap().push(envelope.clone()))
    }

    #[test]
    fn inbound_response_goes_to_correlator_only() {
        let h = harness(WsConfig::new("ws://test"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = h.driver.registry.subscribe("SignInAck", record_into(&seen));
        let mut rx = h
            .driver
            .pending
            .add(RequestId::from("r1"), "SignInAck", None)
            .expect("add");

        h.driver.handle_inbound(WsMessage::text(
            r#"{"eventType":"SignInAck","requestId":"r1"}"#,
        ));

        assert!(rx.try_recv().expect("settled").is_ok());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn inbound_uncorrelated_goes_to_dispatcher() {
        let h = harness(WsConfig::new("ws://test"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = h.driver.registry.subscribe("SignInAck", record_into(&seen));

        h.driver.handle_inbound(WsMessage::text(
            r#"{"eventType":"SignInAck","requestId":"expired"}"#,
        ));

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn inbound_malformed_and_oversized_are_dropped() {
        let h = harness(WsConfig::new("ws://test").max_message_size(64));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = h.driver.registry.subscribe("Big", record_into(&seen));

        h.driver.handle_inbound(WsMessage::text("invalid json"));
        h.driver.handle_inbound(WsMessage::binary(vec![0xff, 0xfe]));
        let padding = "x".repeat(128);
        h.driver.handle_inbound(WsMessage::text(format!(
            r#"{{"eventType":"Big","pad":"{padding}"}}"#
        )));

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn binary_frames_are_decoded() {
        let h = harness(WsConfig::new("ws://test"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = h.driver.registry.subscribe("Broadcast", record_into(&seen));

        h.driver
            .handle_inbound(WsMessage::binary(br#"{"eventType":"broadcast"}"#.to_vec()));

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn request_send_failure_settles_pending() {
        let mut h = harness(WsConfig::new("ws://test"));
        let mut rx = h
            .driver
            .pending
            .add(RequestId::from("r1"), "Ack", None)
            .expect("add");
        let mut writer = RecordingWriter {
            fail: true,
            ..Default::default()
        };

        let result = h
            .driver
            .handle_command(
                DataCommand::Request {
                    envelope: Envelope::new("Req").with_request_id("r1"),
                    request_id: RequestId::from("r1"),
                },
                &mut writer,
            )
            .await;

        assert!(result.is_err());
        assert!(h.driver.pending.is_empty());
        assert!(matches!(
            rx.try_recv().expect("settled"),
            Err(TransportError::WebSocket { .. })
        ));
    }

    #[tokio::test]
    async fn request_already_settled_is_not_sent() {
        let mut h = harness(WsConfig::new("ws://test"));
        let mut writer = RecordingWriter::default();

        h.driver
            .handle_command(
                DataCommand::Request {
                    envelope: Envelope::new("Req").with_request_id("gone"),
                    request_id: RequestId::from("gone"),
                },
                &mut writer,
            )
            .await
            .expect("skipped");

        assert!(writer.sent.is_empty());
    }

    #[tokio::test]
    async fn keepalive_uses_configured_event_type() {
        let mut h = harness(WsConfig::new("ws://test").keepalive_event_type("heartbeat"));
        let mut writer = RecordingWriter::default();

        h.driver.send_keepalive(&mut writer).await;

        assert_eq!(
            writer.sent,
            vec![WsMessage::text(r#"{"eventType":"heartbeat"}"#)]
        );
    }

    #[test]
    fn commands_while_disconnected_are_rejected() {
        let h = harness(WsConfig::new("ws://test"));
        let mut rx = h
            .driver
            .pending
            .add(RequestId::from("r1"), "Ack", None)
            .expect("add");

        h.driver.reject_command(DataCommand::Request {
            envelope: Envelope::new("Req"),
            request_id: RequestId::from("r1"),
        });

        assert!(rx.try_recv().expect("settled").unwrap_err().is_not_connected());
        assert!(h.driver.pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_queued_before_giving_up_does_not_restart() {
        let h = harness(WsConfig::new("ws://test").reconnect_max_attempts(Some(0)));
        let attempts = Arc::clone(&h.driver.connector.attempts);
        let mut state_rx = h.state_rx;

        // Queued while the only attempt is still in flight.
        h.ctrl_tx.send(ControlCommand::Connect).await.expect("queued");
        let driver = tokio::spawn(h.driver.run());

        state_rx
            .wait_for(|state| *state == ConnectionState::Closed)
            .await
            .expect("closed");
        sleep(Duration::from_secs(60)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(*state_rx.borrow(), ConnectionState::Closed);

        // A fresh request after giving up still restarts the cycle.
        h.ctrl_tx.send(ControlCommand::Connect).await.expect("queued");
        sleep(Duration::from_secs(1)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        drop(h.ctrl_tx);
        drop(h.cmd_tx);
        driver.await.expect("driver exits");
    }
}
