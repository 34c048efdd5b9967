//! User-facing relay client API.
//!
//! The [`WsClient`] provides request/response correlation and event-type
//! broadcast over one auto-reconnecting WebSocket connection.

use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use super::{
    config::WsConfig,
    connection::{ConnectionDriver, ControlCommand, DataCommand},
    pending::PendingRequestStore,
    protocol::Connector,
    subscription::{Handler, HandlerRegistry, Subscription},
    types::{ConnectionState, EventKey, RequestId},
};
use crate::{
    envelope::Envelope,
    error::{TransportError, TransportResult},
};

/// Lifecycle commands are rare; a small buffer is plenty.
const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// Relay client over a single WebSocket connection.
///
/// Supports both:
/// - **Request-Response**: envelopes correlated by `requestId`, checked against
///   an expected response type, with a per-request timeout
/// - **Broadcast**: handlers keyed by normalized `eventType`
///
/// The client is cheap to clone and can be shared across tasks. All clones
/// share one connection, one pending table and one handler registry. Dropping
/// the last clone shuts the connection down.
///
/// # Example
///
/// ```rust,ignore
/// let client = WsClient::connect(WsConfig::new("ws://localhost:8080/relay")).await?;
/// client
///     .wait_for_state(ConnectionState::Open, Duration::from_secs(5))
///     .await?;
///
/// client
///     .subscribe("Broadcast", |envelope| println!("{:?}", envelope.get("text")))
///     .detach();
///
/// let ack = client
///     .send_request(Envelope::new("SignIn").with("user", "bob"), "SignInAck", None)
///     .await?;
/// ```
#[derive(Clone)]
pub struct WsClient {
    /// Lifecycle commands to the driver.
    ctrl_tx: mpsc::Sender<ControlCommand>,
    /// Outbound traffic to the driver.
    cmd_tx: mpsc::Sender<DataCommand>,
    /// Connection state published by the driver.
    state_rx: watch::Receiver<ConnectionState>,
    /// Shared pending request store.
    pending_requests: Arc<PendingRequestStore>,
    /// Shared broadcast handler registry.
    handlers: Arc<HandlerRegistry>,
    /// Configuration (for reading settings).
    config: Arc<WsConfig>,
}

impl WsClient {
    /// Connect using the built-in tokio-tungstenite connector.
    ///
    /// Returns as soon as the background driver is running; use
    /// [`WsClient::wait_for_state`] to wait for the socket to open.
    #[cfg(feature = "tungstenite")]
    pub async fn connect(config: WsConfig) -> TransportResult<Self> {
        Self::connect_with(config, super::tungstenite::TungsteniteConnector::new()).await
    }

    /// Connect using a custom [`Connector`].
    ///
    /// Spawns a background driver to manage the connection lifecycle.
    pub async fn connect_with<C: Connector>(config: WsConfig, connector: C) -> TransportResult<Self> {
        config.validate().map_err(TransportError::config)?;

        let config = Arc::new(config);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let pending_requests = Arc::new(PendingRequestStore::new(Arc::clone(&config)));
        let handlers = Arc::new(HandlerRegistry::new());

        let driver = ConnectionDriver::new(
            Arc::clone(&config),
            connector,
            ctrl_rx,
            cmd_rx,
            state_tx,
            Arc::clone(&pending_requests),
            Arc::clone(&handlers),
        );

        tokio::spawn(driver.run());

        info!(url = %config.url, "Relay client created");

        Ok(Self {
            ctrl_tx,
            cmd_tx,
            state_rx,
            pending_requests,
            handlers,
            config,
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Check if the connection is open for traffic.
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(
        &self,
        state: ConnectionState,
        timeout: Duration,
    ) -> TransportResult<()> {
        let mut rx = self.state_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|current| *current == state))
            .await
            .map_err(|_| TransportError::timeout(timeout))?
            .map_err(|_| TransportError::internal("Connection driver shut down"))?;
        Ok(())
    }

    /// Start connecting again after a terminal close.
    ///
    /// No-op while the connection is open, connecting, or waiting out a
    /// reconnect delay.
    pub async fn open(&self) -> TransportResult<()> {
        if matches!(
            self.state(),
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            return Ok(());
        }
        self.ctrl_tx
            .send(ControlCommand::Connect)
            .await
            .map_err(|_| TransportError::internal("Connection driver shut down"))
    }

    /// Close the connection gracefully.
    ///
    /// Pending requests are rejected with [`TransportError::ConnectionLost`]
    /// and no reconnect is scheduled. Handlers stay registered.
    pub async fn close(&self) -> TransportResult<()> {
        let _ = self.ctrl_tx.send(ControlCommand::Close).await;
        Ok(())
    }

    // ========================================================================
    // Request-Response API
    // ========================================================================

    /// Send an envelope and await the response correlated by `requestId`.
    ///
    /// A `requestId` is assigned unless the envelope already carries a
    /// non-empty one. The response must normalize to `expected_response_type`
    /// and carry no `error`. `timeout` defaults to the configured request
    /// timeout.
    ///
    /// Fails immediately with [`TransportError::NotConnected`] unless the
    /// connection is open. Dropping the returned future abandons the request.
    pub async fn send_request(
        &self,
        mut envelope: Envelope,
        expected_response_type: &str,
        timeout: Option<Duration>,
    ) -> TransportResult<Envelope> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let request_id = match envelope.request_id() {
            Some(id) => RequestId::from(id),
            None => {
                let id = RequestId::new();
                envelope.set_request_id(id.as_str());
                id
            }
        };

        let effective_timeout = timeout.unwrap_or(self.config.request_timeout);
        let mut rx = self.pending_requests.add(
            request_id.clone(),
            expected_response_type,
            Some(effective_timeout),
        )?;
        let mut guard = PendingGuard {
            store: &self.pending_requests,
            id: &request_id,
            armed: true,
        };

        self.cmd_tx
            .send(DataCommand::Request {
                envelope,
                request_id: request_id.clone(),
            })
            .await
            .map_err(|_| TransportError::internal("Connection driver shut down"))?;

        let result = match tokio::time::timeout(effective_timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::internal("Response channel dropped")),
            Err(_) if self.pending_requests.remove(&request_id) => Err(
                TransportError::request_timeout(effective_timeout, request_id.to_string()),
            ),
            // Settled in the same instant the deadline fired.
            Err(_) => rx.try_recv().unwrap_or_else(|_| {
                Err(TransportError::request_timeout(
                    effective_timeout,
                    request_id.to_string(),
                ))
            }),
        };

        guard.armed = false;
        result
    }

    /// Send a typed request and await a typed response.
    ///
    /// `request` must serialize to a JSON object; it is sent as the envelope
    /// body. Uses the default timeout from configuration.
    pub async fn request<R, T>(&self, request: &R, expected_response_type: &str) -> TransportResult<T>
    where
        R: Serialize,
        T: DeserializeOwned,
    {
        self.request_with_timeout(request, expected_response_type, None)
            .await
    }

    /// Send a typed request with a custom timeout.
    pub async fn request_with_timeout<R, T>(
        &self,
        request: &R,
        expected_response_type: &str,
        timeout: Option<Duration>,
    ) -> TransportResult<T>
    where
        R: Serialize,
        T: DeserializeOwned,
    {
        let envelope = Envelope::from_serialize(request)?;
        let response = self
            .send_request(envelope, expected_response_type, timeout)
            .await?;
        response.to_typed()
    }

    // ========================================================================
    // Broadcast API
    // ========================================================================

    /// Register a handler for every envelope whose `eventType` normalizes to
    /// the same key as `event_type`.
    ///
    /// Handlers run on the connection task and should return quickly.
    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe_handler(event_type, Arc::new(handler))
    }

    /// Register a shared handler.
    ///
    /// Registering the same `Arc` twice under one key is a no-op; any of the
    /// returned [`Subscription`]s removes it.
    pub fn subscribe_handler(&self, event_type: &str, handler: Handler) -> Subscription {
        self.handlers.subscribe(event_type, handler)
    }

    /// Register a handler that receives each envelope deserialized as `T`.
    ///
    /// Envelopes that fail to decode are logged and skipped.
    pub fn subscribe_typed<T, F>(&self, event_type: &str, handler: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event_type.to_string();
        self.subscribe(event_type, move |envelope: &Envelope| {
            match envelope.to_typed::<T>() {
                Ok(value) => handler(value),
                Err(err) => {
                    warn!(event_type = %name, error = %err, "Failed to decode broadcast message");
                }
            }
        })
    }

    // ========================================================================
    // Low-Level API
    // ========================================================================

    /// Send an envelope without expecting a response.
    ///
    /// While the connection is not open the envelope is dropped with a
    /// warning and `Ok(())` is returned.
    pub async fn send(&self, envelope: Envelope) -> TransportResult<()> {
        if !self.is_connected() {
            warn!(
                event_type = envelope.event_type().unwrap_or_default(),
                state = %self.state(),
                "Not connected; dropping message"
            );
            return Ok(());
        }
        self.cmd_tx
            .send(DataCommand::Send { envelope })
            .await
            .map_err(|_| TransportError::internal("Connection driver shut down"))
    }

    /// Serialize `payload` into an envelope and send it.
    pub async fn send_json<T: Serialize>(&self, payload: &T) -> TransportResult<()> {
        self.send(Envelope::from_serialize(payload)?).await
    }

    /// Get the number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Get the number of event types with at least one handler.
    pub fn subscription_count(&self) -> usize {
        self.handlers.len()
    }

    /// Get all subscribed event keys.
    pub fn subscribed_event_types(&self) -> Vec<EventKey> {
        self.handlers.keys()
    }
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.config.url)
            .field("state", &self.state())
            .field("pending", &self.pending_requests.len())
            .finish()
    }
}

/// Removes a pending entry if its request future is dropped before settling.
struct PendingGuard<'a> {
    store: &'a PendingRequestStore,
    id: &'a RequestId,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.remove(self.id);
        }
    }
}
