//! # hpx-relay
//!
//! Client-side relay over a single WebSocket connection.
//!
//! Every message is a flat JSON object (an [`Envelope`]) tagged with an
//! `eventType`. On top of one auto-reconnecting socket the crate offers two
//! ways to talk to the server:
//!
//! - **Request/response**: [`WsClient::send_request`] stamps a `requestId`,
//!   waits for the envelope carrying the same id and checks its type.
//! - **Broadcast**: [`WsClient::subscribe`] registers a handler for every
//!   envelope of a given event type.
//!
//! ## Quick Start
//!
//! ```rust,no_run
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
//!     let ack = client
//!         .send_request(Envelope::new("SignIn").with("user", "bob"), "SignInAck", None)
//!         .await?;
//!     println!("{}", ack.to_text());
//!     Ok(())
//! }
//! ```

pub mod envelope;
pub mod error;
mod reconnect;
pub mod websocket;

// Re-export commonly used types
pub use envelope::Envelope;
pub use error::{TransportError, TransportResult};
#[cfg(feature = "tungstenite")]
pub use websocket::TungsteniteConnector;
pub use websocket::{
    ConnectionState, Connector, EventKey, Handler, RequestId, Subscription, WsClient, WsConfig,
    WsMessage, WsSocket, WsWriter, normalize,
};
