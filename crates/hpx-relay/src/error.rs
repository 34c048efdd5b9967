//! Error handling for the relay transport.

use std::{string::FromUtf8Error, time::Duration};

use thiserror::Error;

use crate::envelope::Envelope;

/// The main result type used throughout the transport layer.
pub type TransportResult<T> = Result<T, TransportError>;

/// Error type for all relay operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Operation attempted while the connection is not open.
    #[error("WebSocket is not connected")]
    NotConnected,

    /// No matching response arrived within the deadline.
    #[error("Request {request_id} timed out after {duration:?}")]
    RequestTimeout {
        duration: Duration,
        request_id: String,
    },

    /// A response carried the right `requestId` but an unexpected `eventType`.
    ///
    /// The raw envelope is kept so the caller can inspect what the peer sent.
    #[error("Expected response of type {expected:?}, received {:?}", .envelope.event_type())]
    ResponseMismatch {
        expected: String,
        envelope: Box<Envelope>,
    },

    /// The correlated response carried a non-empty `error` field.
    #[error("Remote error: {message}")]
    RemoteError {
        message: String,
        envelope: Box<Envelope>,
    },

    /// The connection dropped while the request was pending.
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// Inbound payload could not be parsed into an envelope.
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// A caller-supplied request id is already in flight.
    #[error("Request id {request_id} is already pending")]
    DuplicateRequestId { request_id: String },

    /// Too many requests in flight.
    #[error("Capacity exceeded: {message}")]
    CapacityExceeded { message: String },

    /// WebSocket errors
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<FromUtf8Error> for TransportError {
    fn from(e: FromUtf8Error) -> Self {
        Self::MalformedMessage {
            reason: e.to_string(),
        }
    }
}

impl TransportError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a request timeout error.
    pub fn request_timeout(duration: Duration, request_id: impl Into<String>) -> Self {
        Self::RequestTimeout {
            duration,
            request_id: request_id.into(),
        }
    }

    /// Create a connection-lost error.
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// Create a malformed-message error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Create a capacity error.
    pub fn capacity_exceeded(message: impl Into<String>) -> Self {
        Self::CapacityExceeded {
            message: message.into(),
        }
    }

    /// Returns true for [`TransportError::NotConnected`].
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected)
    }

    /// Returns true for [`TransportError::RequestTimeout`].
    pub fn is_request_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }

    /// Returns true for [`TransportError::ConnectionLost`].
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }

    /// The raw envelope behind a correlated failure, if any.
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::ResponseMismatch { envelope, .. } | Self::RemoteError { envelope, .. } => {
                Some(envelope.as_ref())
            }
            _ => None,
        }
    }
}
