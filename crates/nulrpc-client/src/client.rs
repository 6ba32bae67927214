use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use nulrpc_frame::{DecodedMessage, Request};
use nulrpc_transport::{
    ConnectionEvent, ConnectionManager, ConnectionState, Endpoint, ReconnectState,
};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::dispatch::Dispatcher;
use crate::error::{ClientError, Result};
use crate::events::{EventCallback, EventStream};
use crate::heartbeat;
use crate::options::ClientOptions;

/// Observer of connection lifecycle notifications.
pub type ConnectionCallback = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

struct Inner {
    connection: ConnectionManager,
    dispatcher: Arc<Dispatcher>,
    options: Mutex<ClientOptions>,
    heartbeat_check: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat_check.get_mut().ok().and_then(Option::take) {
            task.abort();
        }
        self.connection.close();
    }
}

/// Request/response and event client over one TCP connection.
///
/// Cloning is cheap; clones share the connection. The connection closes
/// when the last clone is dropped or [`close`](Self::close) is called.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    pub fn new() -> Self {
        let dispatcher = Arc::new(Dispatcher::new());
        let connection = ConnectionManager::new(dispatcher.clone());
        Self {
            inner: Arc::new(Inner {
                connection,
                dispatcher,
                options: Mutex::new(ClientOptions::default()),
                heartbeat_check: Mutex::new(None),
            }),
        }
    }

    /// Connect to `host:port`.
    ///
    /// Fails with [`ClientError::Connect`] if the attempt fails or times
    /// out; the initial connect is never retried.
    pub async fn start(
        &self,
        host: impl Into<String>,
        port: u16,
        options: ClientOptions,
    ) -> Result<()> {
        let endpoint = Endpoint::new(host, port);
        self.inner
            .dispatcher
            .heartbeat
            .configure(options.heartbeat_check_interval, options.no_heartbeat_logs);

        self.inner
            .connection
            .connect(endpoint.clone(), options.connect_config())
            .await
            .map_err(ClientError::Connect)?;
        *self.options_mut() = options.clone();

        // A check left over from an earlier start runs with stale settings.
        self.replace_heartbeat_check(
            options
                .heartbeat_check
                .then_some(options.heartbeat_check_interval),
        );
        info!(addr = %endpoint, "client started");
        Ok(())
    }

    /// Send `request` and wait for the message carrying its id.
    ///
    /// `timeout` defaults to the configured request timeout.
    pub async fn send_request(
        &self,
        request: &Request,
        timeout: Option<Duration>,
    ) -> Result<DecodedMessage> {
        let timeout = timeout.unwrap_or_else(|| self.options_mut().request_timeout);
        self.inner
            .dispatcher
            .correlator
            .send_request(&self.inner.connection, request, timeout)
            .await
    }

    /// Deliver every pushed event to `callback`.
    pub fn subscribe(&self, callback: EventCallback) {
        self.inner.dispatcher.events.subscribe(callback);
    }

    /// Remove every registration of `callback`.
    pub fn unsubscribe(&self, callback: &EventCallback) -> bool {
        self.inner.dispatcher.events.unsubscribe(callback)
    }

    /// Pushed events as a stream.
    pub fn event_stream(&self) -> EventStream {
        EventStream::new(self.inner.dispatcher.events.clone())
    }

    /// Observe connection lifecycle notifications.
    pub fn on_connection_event(&self, callback: ConnectionCallback) {
        self.inner.dispatcher.add_listener(callback);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn reconnect_state(&self) -> ReconnectState {
        self.inner.connection.reconnect_state()
    }

    /// When the last heartbeat arrived, if any.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.inner.dispatcher.heartbeat.last_seen_at()
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.dispatcher.correlator.pending_count()
    }

    /// Options of the last successful start.
    pub fn options(&self) -> ClientOptions {
        self.options_mut().clone()
    }

    fn options_mut(&self) -> MutexGuard<'_, ClientOptions> {
        self.inner
            .options
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Close the connection and stop reconnecting. Outstanding requests run
    /// out their timers.
    pub fn close(&self) {
        if let Some(task) = self.heartbeat_task().take() {
            task.abort();
        }
        self.inner.connection.close();
        debug!("client closed");
    }

    fn replace_heartbeat_check(&self, interval: Option<Duration>) {
        let mut task = self.heartbeat_task();
        if let Some(previous) = task.take() {
            previous.abort();
        }
        *task = interval.map(|interval| {
            tokio::spawn(heartbeat::run_check(
                self.inner.dispatcher.heartbeat.clone(),
                self.inner.connection.clone(),
                interval,
            ))
        });
    }

    /// True while the active heartbeat check task is running.
    pub fn heartbeat_check_running(&self) -> bool {
        self.heartbeat_task()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn heartbeat_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .heartbeat_check
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.inner.connection)
            .field("pending", &self.pending_requests())
            .finish()
    }
}
