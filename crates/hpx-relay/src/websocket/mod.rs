//! Relay client over a single WebSocket connection.
//!
//! This module provides:
//!
//! - **Request-Response Pattern**: Send an envelope and await the response
//!   carrying the same `requestId`, checked against an expected event type
//! - **Broadcast Pattern**: Register handlers per event type; every envelope
//!   not claimed by a pending request is dispatched to them
//! - **Auto-Reconnection**: Exponential backoff with an attempt limit
//! - **Keep-Alive**: Periodic `{"eventType":"ping"}` envelopes while open
//! - **Lock-Free Concurrency**: Stores backed by `scc::HashMap`
//! - **Transport Abstraction**: Any socket via the [`Connector`] trait
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌──────────────┐
//! │  WsClient   │────▶│ ConnectionDriver │────▶│    Relay     │
//! │  (Clone)    │     │   (Background)   │     │    Server    │
//! └─────────────┘     └───────┬──────────┘     └──────────────┘
//!                             │
//!          ┌──────────────────┴────────────────────┐
//!          ▼                                       ▼
//! ┌─────────────────────┐             ┌────────────────────────┐
//! │ PendingRequestStore │             │    HandlerRegistry     │
//! │   (scc::HashMap)    │             │    (scc::HashMap)      │
//! └─────────────────────┘             └────────────────────────┘
//! ```
//!
//! Inbound envelopes are triaged in order: an envelope whose `requestId`
//! matches a pending request settles that request and nothing else; every
//! other envelope goes to the [`HandlerRegistry`].
//!
//! # Event type matching
//!
//! Event types are compared through [`normalize`], so `UserJoinedDto`,
//! `userjoined` and `USER_JOINED` all name the same kind of message.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//!
//! use hpx_relay::{ConnectionState, Envelope, WsClient, WsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = WsClient::connect(WsConfig::new("ws://localhost:8080/relay")).await?;
//!     client
//!         .wait_for_state(ConnectionState::Open, Duration::from_secs(5))
//!         .await?;
//!
//!     let _broadcasts = client.subscribe("Broadcast", |envelope| {
//!         println!("broadcast: {:?}", envelope.get("text"));
//!     });
//!
//!     let ack = client
//!         .send_request(Envelope::new("SignIn").with("user", "bob"), "SignInAck", None)
//!         .await?;
//!     println!("signed in: {ack:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Use [`WsConfig`] to customize connection behavior:
//!
//! | Setting | Default | Description |
//! |---------|---------|-------------|
//! | `reconnect_initial_delay` | 1s | Delay before the first reconnect |
//! | `reconnect_backoff_factor` | 2.0 | Multiplier per failed attempt |
//! | `reconnect_max_delay` | 30s | Maximum reconnection delay |
//! | `reconnect_max_attempts` | 5 | Attempts before giving up |
//! | `keepalive_interval` | 30s | Interval between keep-alive envelopes |
//! | `request_timeout` | 5s | Default request-response timeout |
//! | `max_pending_requests` | 1000 | Maximum concurrent pending requests |
//!
//! # Error Handling
//!
//! Request failures surface only to the caller that issued the request:
//!
//! - [`TransportError::NotConnected`](crate::error::TransportError::NotConnected) - Sent while not open
//! - [`TransportError::RequestTimeout`](crate::error::TransportError::RequestTimeout) - Request timed out
//! - [`TransportError::ResponseMismatch`](crate::error::TransportError::ResponseMismatch) - Wrong response type
//! - [`TransportError::RemoteError`](crate::error::TransportError::RemoteError) - Peer reported an error
//! - [`TransportError::ConnectionLost`](crate::error::TransportError::ConnectionLost) - Connection closed while pending

mod config;
mod connection;
mod pending;
mod protocol;
mod subscription;
#[cfg(feature = "tungstenite")]
mod tungstenite;
mod types;
mod ws_client;

pub use config::WsConfig;
pub use pending::{PendingRequestStore, ResponseReceiver};
pub use protocol::{Connector, WsMessage, WsSocket, WsWriter};
pub use subscription::{Handler, HandlerRegistry, Subscription};
#[cfg(feature = "tungstenite")]
pub use tungstenite::TungsteniteConnector;
pub use types::{ConnectionState, EventKey, RequestId, TYPE_SUFFIX, keys_equal, normalize};
pub use ws_client::WsClient;
