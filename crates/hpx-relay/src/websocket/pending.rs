//! Lock-free pending request management using `scc::HashMap`.
//!
//! Each in-flight request owns exactly one entry, keyed by its request id.
//! Every way out of the table (response, timeout, send failure, teardown)
//! goes through `remove_sync`, so the entry is settled at most once no matter
//! which path wins.

use std::{sync::Arc, time::Duration};

use tokio::{sync::oneshot, time::Instant};
use tracing::debug;

use super::{
    config::WsConfig,
    types::{EventKey, RequestId},
};
use crate::{
    envelope::Envelope,
    error::{TransportError, TransportResult},
};

/// Receiver half handed back to the caller of [`PendingRequestStore::add`].
pub type ResponseReceiver = oneshot::Receiver<TransportResult<Envelope>>;

/// A pending request awaiting a response.
pub struct PendingRequest {
    /// Channel to send the response.
    pub response_tx: oneshot::Sender<TransportResult<Envelope>>,
    /// Normalized response type the caller expects.
    pub expected: EventKey,
    /// Expected response type as the caller spelled it, for error messages.
    pub expected_raw: String,
    /// When this request was created.
    pub created_at: Instant,
    /// Timeout for this specific request.
    pub timeout: Duration,
}

impl PendingRequest {
    /// Decide how a correlated envelope settles this request.
    fn outcome(&self, envelope: Envelope) -> TransportResult<Envelope> {
        let event_type = envelope.event_type().unwrap_or_default();
        if !self.expected.matches(event_type) {
            return Err(TransportError::ResponseMismatch {
                expected: self.expected_raw.clone(),
                envelope: Box::new(envelope),
            });
        }
        if let Some(message) = envelope.error() {
            return Err(TransportError::RemoteError {
                message: message.to_string(),
                envelope: Box::new(envelope),
            });
        }
        Ok(envelope)
    }
}

/// Lock-free store for pending requests.
pub struct PendingRequestStore {
    requests: scc::HashMap<RequestId, PendingRequest>,
    config: Arc<WsConfig>,
}

impl PendingRequestStore {
    /// Create a new pending request store.
    pub fn new(config: Arc<WsConfig>) -> Self {
        Self {
            requests: scc::HashMap::new(),
            config,
        }
    }

    /// Add a new pending request expecting a response of `expected_type`.
    ///
    /// Returns the receiver that will carry the settlement. Fails if the store
    /// is at capacity or `id` is already pending.
    pub fn add(
        &self,
        id: RequestId,
        expected_type: &str,
        timeout: Option<Duration>,
    ) -> TransportResult<ResponseReceiver> {
        if self.requests.len() >= self.config.max_pending_requests {
            return Err(TransportError::capacity_exceeded(
                "Too many pending requests",
            ));
        }

        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest {
            response_tx: tx,
            expected: EventKey::new(expected_type),
            expected_raw: expected_type.to_string(),
            created_at: Instant::now(),
            timeout: timeout.unwrap_or(self.config.request_timeout),
        };

        // Insert returns Err if key already exists
        if let Err((id, _)) = self.requests.insert_sync(id, pending) {
            return Err(TransportError::DuplicateRequestId {
                request_id: id.to_string(),
            });
        }

        Ok(rx)
    }

    /// Route an inbound envelope to its pending request.
    ///
    /// Returns `Ok(())` if the envelope carried the id of a pending request and
    /// settled it. Otherwise the envelope is handed back untouched so the
    /// caller can dispatch it to subscribers.
    pub fn settle(&self, envelope: Envelope) -> Result<(), Envelope> {
        let Some(id) = envelope.request_id().map(RequestId::from) else {
            return Err(envelope);
        };
        let Some((_, pending)) = self.requests.remove_sync(&id) else {
            return Err(envelope);
        };

        let outcome = pending.outcome(envelope);
        debug!(request_id = %id, ok = outcome.is_ok(), "Settled pending request");
        // Receiver may have dropped; the entry is gone either way.
        let _ = pending.response_tx.send(outcome);
        Ok(())
    }

    /// Settle a pending request with an explicit result.
    ///
    /// Returns `true` if the request was found and settled, `false` otherwise.
    pub fn resolve(&self, id: &RequestId, response: TransportResult<Envelope>) -> bool {
        if let Some((_, pending)) = self.requests.remove_sync(id) {
            let _ = pending.response_tx.send(response);
            return true;
        }
        false
    }

    /// Remove a pending request without notifying the receiver.
    ///
    /// Returns `true` if the request was present, `false` otherwise.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.requests.remove_sync(id).is_some()
    }

    /// Whether `id` is still waiting for a response.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.requests.update_sync(id, |_, _| ()).is_some()
    }

    /// Expire requests past their deadline, notifying each with a timeout.
    ///
    /// Callers normally enforce their own deadline; this sweep catches
    /// entries whose caller stopped polling without dropping its future.
    pub fn cleanup_stale_with_notify(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();

        self.requests.retain_sync(|id, pending| {
            if now.duration_since(pending.created_at) >= pending.timeout {
                expired.push((id.clone(), pending.timeout));
            }
            true
        });

        for (id, timeout) in expired {
            if let Some((_, pending)) = self.requests.remove_sync(&id) {
                let _ = pending
                    .response_tx
                    .send(Err(TransportError::request_timeout(
                        timeout,
                        id.to_string(),
                    )));
            }
        }
    }

    /// Check if there's capacity for more requests.
    pub fn has_capacity(&self) -> bool {
        self.requests.len() < self.config.max_pending_requests
    }

    /// Get the current number of pending requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Reject every pending request with [`TransportError::ConnectionLost`].
    ///
    /// Called on every transition to closed.
    pub fn clear_with_error(&self, reason: &str) {
        let mut ids = Vec::new();
        self.requests.retain_sync(|id, _| {
            ids.push(id.clone());
            true
        });

        if !ids.is_empty() {
            debug!(count = ids.len(), reason, "Rejecting pending requests");
        }

        for id in ids {
            if let Some((_, pending)) = self.requests.remove_sync(&id) {
                let _ = pending
                    .response_tx
                    .send(Err(TransportError::connection_lost(reason)));
            }
        }
    }
}
