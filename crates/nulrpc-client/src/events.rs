use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures_core::Stream;
use nulrpc_frame::DecodedMessage;
use tokio::sync::mpsc;
use tracing::warn;

/// Event subscriber. Identity is the `Arc` allocation: clone the handle to
/// unsubscribe later.
pub type EventCallback = Arc<dyn Fn(&DecodedMessage) + Send + Sync>;

/// Wrap a closure as an [`EventCallback`].
pub fn callback<F>(f: F) -> EventCallback
where
    F: Fn(&DecodedMessage) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered set of event subscribers.
#[derive(Default)]
pub struct EventRegistry {
    subscribers: Mutex<Vec<EventCallback>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscriber. Subscribing the same callback twice delivers
    /// each event to it twice.
    pub fn subscribe(&self, callback: EventCallback) {
        self.subscribers().push(callback);
    }

    /// Remove every registration of `callback`. Returns false if it was not
    /// subscribed.
    pub fn unsubscribe(&self, callback: &EventCallback) -> bool {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|existing| !same_callback(existing, callback));
        subscribers.len() != before
    }

    /// Invoke every subscriber in registration order.
    ///
    /// Works on a snapshot, so callbacks may subscribe or unsubscribe while
    /// running. A panicking callback is logged and skipped.
    pub fn dispatch(&self, message: &DecodedMessage) -> usize {
        let snapshot = self.subscribers().clone();
        for (index, callback) in snapshot.iter().enumerate() {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                warn!(id = %message.id, subscriber = index, "event subscriber panicked");
            }
        }
        snapshot.len()
    }

    pub fn len(&self) -> usize {
        self.subscribers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<EventCallback>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

fn same_callback(a: &EventCallback, b: &EventCallback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Stream of pushed events.
///
/// Holds its own subscription, removed when the stream is dropped.
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<DecodedMessage>,
    registry: Arc<EventRegistry>,
    callback: EventCallback,
}

impl EventStream {
    pub(crate) fn new(registry: Arc<EventRegistry>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let callback = callback(move |message: &DecodedMessage| {
            // The receiver only goes away together with the subscription.
            let _ = sender.send(message.clone());
        });
        registry.subscribe(callback.clone());
        Self {
            receiver,
            registry,
            callback,
        }
    }

    /// Next event, or `None` once the stream can no longer receive.
    pub async fn recv(&mut self) -> Option<DecodedMessage> {
        self.receiver.recv().await
    }
}

impl Stream for EventStream {
    type Item = DecodedMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.callback);
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}
