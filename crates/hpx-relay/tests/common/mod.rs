//! In-memory sockets for driving a `WsClient` from tests.
#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use hpx_relay::{
    ConnectionState, Connector, Envelope, TransportError, TransportResult, WsClient, WsConfig,
    WsMessage, WsSocket, WsWriter,
};
use serde_json::Value;
use tokio::{sync::mpsc, time::Instant};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Shared {
    refusals: Mutex<VecDeque<bool>>,
    attempts: Mutex<Vec<Instant>>,
}

/// Connector whose sockets are served by a [`MockListener`].
pub struct MockConnector {
    shared: Arc<Shared>,
    accepted: mpsc::UnboundedSender<MockServer>,
}

/// Test-side handle: scripts refusals and accepts the server end of each socket.
pub struct MockListener {
    shared: Arc<Shared>,
    accepted: mpsc::UnboundedReceiver<MockServer>,
}

pub fn mock() -> (MockConnector, MockListener) {
    let shared = Arc::new(Shared::default());
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockConnector {
            shared: Arc::clone(&shared),
            accepted: tx,
        },
        MockListener {
            shared,
            accepted: rx,
        },
    )
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str) -> TransportResult<WsSocket> {
        self.shared.attempts.lock().unwrap().push(Instant::now());
        if self.shared.refusals.lock().unwrap().pop_front() == Some(true) {
            return Err(TransportError::websocket("connection refused"));
        }

        let (to_client, inbound) = mpsc::unbounded_channel::<TransportResult<WsMessage>>();
        let (outbound, from_client) = mpsc::unbounded_channel::<WsMessage>();
        let closed = Arc::new(AtomicBool::new(false));

        let reader = stream::unfold(inbound, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let writer = MockWriter {
            outbound,
            closed: Arc::clone(&closed),
        };

        let server = MockServer {
            to_client,
            from_client,
            closed,
        };
        self.accepted
            .send(server)
            .map_err(|_| TransportError::websocket("listener gone"))?;
        Ok(WsSocket::new(reader, writer))
    }
}

impl MockListener {
    /// Refuse the next `count` connection attempts.
    pub fn refuse(&self, count: usize) {
        let mut refusals = self.shared.refusals.lock().unwrap();
        refusals.extend(std::iter::repeat_n(true, count));
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.lock().unwrap().len()
    }

    /// When each connection attempt was made.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.shared.attempts.lock().unwrap().clone()
    }

    /// Wait for the next accepted socket.
    pub async fn accept(&mut self) -> MockServer {
        tokio::time::timeout(Duration::from_secs(120), self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Wait until at least `count` connection attempts have been made.
    pub async fn wait_for_attempts(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(120), async {
            while self.attempts() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("timed out waiting for connection attempts");
    }
}

struct MockWriter {
    outbound: mpsc::UnboundedSender<WsMessage>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl WsWriter for MockWriter {
    async fn send_ws(&mut self, message: WsMessage) -> TransportResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| TransportError::websocket("broken pipe"))
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Server end of one mock socket.
pub struct MockServer {
    to_client: mpsc::UnboundedSender<TransportResult<WsMessage>>,
    from_client: mpsc::UnboundedReceiver<WsMessage>,
    closed: Arc<AtomicBool>,
}

impl MockServer {
    /// Push a JSON value to the client as a text frame.
    pub fn send(&self, value: Value) {
        self.send_text(value.to_string());
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Ok(WsMessage::text(text)));
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        let _ = self.to_client.send(Ok(WsMessage::binary(data)));
    }

    /// Next envelope written by the client, keep-alives included.
    pub async fn recv(&mut self) -> Envelope {
        let message = tokio::time::timeout(Duration::from_secs(120), self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client socket closed");
        let text = message.into_text().expect("utf8 frame");
        Envelope::parse(&text).expect("client sent an envelope")
    }

    /// Next envelope written by the client that is not a keep-alive.
    pub async fn recv_request(&mut self) -> Envelope {
        loop {
            let envelope = self.recv().await;
            if envelope.event_type() != Some("ping") {
                return envelope;
            }
        }
    }

    /// Whether the client wrote anything that has not been read yet.
    pub fn has_unread(&mut self) -> bool {
        !self.from_client.is_empty()
    }

    /// Make every later client write fail, leaving the read side open.
    pub fn break_writes(&mut self) {
        self.from_client.close();
    }

    /// Whether the client closed its end gracefully.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fail the socket with a read error.
    pub fn fail(self, reason: &str) {
        let _ = self.to_client.send(Err(TransportError::websocket(reason)));
    }

    /// Drop the connection from the server side.
    pub fn disconnect(self) {
        drop(self);
    }
}

/// Connect a client to a mock server and wait until it is open.
pub async fn open_client(config: WsConfig) -> (WsClient, MockListener, MockServer) {
    let (connector, mut listener) = mock();
    let client = WsClient::connect_with(config, connector)
        .await
        .expect("valid config");
    let server = listener.accept().await;
    client
        .wait_for_state(ConnectionState::Open, WAIT)
        .await
        .expect("client opened");
    (client, listener, server)
}

pub fn config() -> WsConfig {
    WsConfig::new("ws://relay.test/ws")
}
