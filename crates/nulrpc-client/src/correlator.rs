use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use nulrpc_frame::{DecodedMessage, Request};
use nulrpc_transport::{ConnectionManager, TransportError};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

struct PendingRequest {
    token: u64,
    endpoint: String,
    created_at: Instant,
    slot: oneshot::Sender<DecodedMessage>,
}

/// Matches inbound messages to outstanding requests by id.
///
/// Each request races its response against its own timer. Whichever side
/// removes the pending entry first wins; the other finds nothing, so
/// exactly one outcome reaches the caller.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingRequest>>,
    next_token: AtomicU64,
}

// Unregisters on drop, so a cancelled `send_request` leaves nothing behind.
struct Registration<'a> {
    correlator: &'a Correlator,
    id: &'a str,
    token: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.correlator.unregister(self.id, self.token);
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `request` and wait up to `timeout` for the message with its id.
    ///
    /// A matching message resolves the call whatever its `status`.
    pub async fn send_request(
        &self,
        connection: &ConnectionManager,
        request: &Request,
        timeout: Duration,
    ) -> Result<DecodedMessage> {
        if !connection.is_connected() {
            return Err(ClientError::Disconnected);
        }
        if request.id.is_empty() {
            return Err(ClientError::MissingId);
        }
        let frame = request.encode()?;

        let started = Instant::now();
        let (token, mut slot) = self.register(request);
        let registration = Registration {
            correlator: self,
            id: &request.id,
            token,
        };

        if let Err(err) = connection.write(&frame).await {
            drop(registration);
            return Err(match err {
                TransportError::NotConnected => ClientError::Disconnected,
                other => ClientError::Write(other),
            });
        }
        debug!(id = %request.id, endpoint = %request.endpoint, "request sent");

        let deadline = tokio::time::sleep_until(started + timeout);
        tokio::pin!(deadline);

        let displaced = tokio::select! {
            delivered = &mut slot => match delivered {
                Ok(message) => return Ok(message),
                // A newer request with the same id took the entry.
                Err(_) => true,
            },
            _ = &mut deadline => false,
        };
        if displaced {
            deadline.as_mut().await;
        }

        if !self.unregister(&request.id, token) {
            // The dispatcher claimed the entry first and already filled the slot.
            if let Ok(message) = slot.try_recv() {
                return Ok(message);
            }
        }
        drop(registration);

        let elapsed = started.elapsed();
        warn!(
            id = %request.id,
            endpoint = %request.endpoint,
            elapsed_ms = elapsed.as_millis() as u64,
            "request timed out"
        );
        Err(ClientError::RequestTimeout {
            id: request.id.clone(),
            elapsed,
        })
    }

    /// Hand `message` to the request waiting on its id.
    ///
    /// Returns false when nothing was waiting.
    pub fn dispatch(&self, message: &DecodedMessage) -> bool {
        let mut pending = self.pending();
        let Some(waiter) = pending.remove(&message.id) else {
            drop(pending);
            if !message.is_event() {
                debug!(id = %message.id, "no pending request for response; ignoring");
            }
            return false;
        };
        // Filled under the lock so a racing timer sees the value in the slot.
        let delivered = waiter.slot.send(message.clone()).is_ok();
        drop(pending);

        debug!(
            id = %message.id,
            endpoint = %waiter.endpoint,
            elapsed_ms = waiter.created_at.elapsed().as_millis() as u64,
            "response matched"
        );
        delivered
    }

    /// Number of requests still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    fn register(&self, request: &Request) -> (u64, oneshot::Receiver<DecodedMessage>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (slot, receiver) = oneshot::channel();
        let waiter = PendingRequest {
            token,
            endpoint: request.endpoint.clone(),
            created_at: Instant::now(),
            slot,
        };
        if let Some(previous) = self.pending().insert(request.id.clone(), waiter) {
            warn!(
                id = %request.id,
                endpoint = %request.endpoint,
                displaced_endpoint = %previous.endpoint,
                "duplicate request id; earlier request will time out"
            );
        }
        (token, receiver)
    }

    fn unregister(&self, id: &str, token: u64) -> bool {
        let mut pending = self.pending();
        match pending.get(id) {
            Some(waiter) if waiter.token == token => {
                pending.remove(id);
                true
            }
            _ => false,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .finish()
    }
}
