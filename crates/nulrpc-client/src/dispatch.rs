use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use nulrpc_frame::{FrameDecoder, Inbound};
use nulrpc_transport::{ConnectionEvent, ConnectionHandler, ConnectionManager};
use tracing::warn;

use crate::client::ConnectionCallback;
use crate::correlator::Correlator;
use crate::events::EventRegistry;
use crate::heartbeat::HeartbeatMonitor;

/// Routes inbound chunks and lifecycle events for one client.
pub(crate) struct Dispatcher {
    decoder: Mutex<FrameDecoder>,
    pub(crate) correlator: Arc<Correlator>,
    pub(crate) events: Arc<EventRegistry>,
    pub(crate) heartbeat: Arc<HeartbeatMonitor>,
    listeners: Mutex<Vec<ConnectionCallback>>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            decoder: Mutex::new(FrameDecoder::new()),
            correlator: Arc::new(Correlator::new()),
            events: Arc::new(EventRegistry::new()),
            heartbeat: Arc::new(HeartbeatMonitor::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add_listener(&self, listener: ConnectionCallback) {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    fn reset_decoder(&self) {
        self.decoder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .reset();
    }
}

impl ConnectionHandler for Dispatcher {
    fn on_data(&self, connection: &ConnectionManager, chunk: &[u8]) {
        let frames = self
            .decoder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .feed(chunk);

        for frame in frames {
            match frame {
                Inbound::Heartbeat(bytes) => self.heartbeat.on_heartbeat(connection, bytes),
                Inbound::Message(message) => {
                    self.correlator.dispatch(&message);
                    if message.is_event() {
                        self.events.dispatch(&message);
                    }
                }
            }
        }
    }

    fn on_event(&self, _connection: &ConnectionManager, event: &ConnectionEvent) {
        if let ConnectionEvent::Connected { .. } = event {
            // Bytes left over from the previous socket are not a frame prefix.
            self.reset_decoder();
            self.heartbeat.restart_window();
        }

        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(?event, "connection listener panicked");
            }
        }
    }
}
