use std::fmt;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::state::{ConnectionState, ReconnectConfig, ReconnectState};
use crate::traits::{ConnectionEvent, ConnectionHandler};

/// Default time allowed for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(8000);

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Remote host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Connect and reconnect behavior for one [`ConnectionManager::connect`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    /// Time allowed for each connect attempt, initial or reconnect.
    pub connect_timeout: Duration,
    /// Reconnection policy after an unsolicited close.
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }
}

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

struct Shared {
    state: ConnectionState,
    reconnect: ReconnectState,
    endpoint: Option<Endpoint>,
    config: ConnectConfig,
    ever_connected: bool,
    observer_armed: bool,
    shutdown: bool,
    // Bumped for every installed or torn down socket; closes reported by an
    // older read task are ignored.
    generation: u64,
    // Bumped by every connect, reconnect loop and close; an attempt whose
    // epoch is no longer current must not touch the connection.
    epoch: u64,
    writer: Option<SharedWriter>,
    reader: Option<JoinHandle<()>>,
}

impl Shared {
    fn superseded(&self, epoch: u64) -> bool {
        self.shutdown || self.epoch != epoch
    }
}

struct Inner {
    shared: Mutex<Shared>,
    handler: Arc<dyn ConnectionHandler>,
}

enum ReconnectOutcome {
    Reconnected,
    Exhausted(u32),
    Aborted,
}

/// Leaves no attempt marked as running once its future ends, including
/// when the future is dropped mid-await.
struct AttemptGuard<'a> {
    manager: &'a ConnectionManager,
    epoch: u64,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        let mut shared = self.manager.shared();
        if shared.epoch != self.epoch {
            return;
        }
        shared.reconnect.in_progress = false;
        if matches!(
            shared.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        ) {
            shared.state = ConnectionState::Disconnected;
        }
    }
}

/// Owns the TCP socket and keeps it connected.
///
/// Cloning is cheap; all clones manage the same connection. Inbound bytes
/// and lifecycle events go to the [`ConnectionHandler`] given at construction.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a disconnected manager delivering to `handler`.
    pub fn new(handler: Arc<dyn ConnectionHandler>) -> Self {
        let config = ConnectConfig::default();
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    reconnect: ReconnectState::new(&config.reconnect),
                    endpoint: None,
                    config,
                    ever_connected: false,
                    observer_armed: false,
                    shutdown: false,
                    generation: 0,
                    epoch: 0,
                    writer: None,
                    reader: None,
                }),
                handler,
            }),
        }
    }

    /// Connect to `endpoint`, racing the attempt against `config.connect_timeout`.
    ///
    /// A failed attempt leaves the manager `Failed` and is never retried here;
    /// reconnection only follows the loss of an established connection.
    ///
    /// Starts a fresh session: reconnect counters are reset and a reconnect
    /// loop still running from the previous session is abandoned.
    pub async fn connect(&self, endpoint: Endpoint, config: ConnectConfig) -> Result<()> {
        let epoch = {
            let mut shared = self.shared();
            match shared.state {
                ConnectionState::Connected => return Err(TransportError::AlreadyConnected),
                ConnectionState::Connecting => return Err(TransportError::ConnectInProgress),
                _ => {}
            }
            shared.epoch += 1;
            shared.state = ConnectionState::Connecting;
            shared.reconnect = ReconnectState::new(&config.reconnect);
            shared.endpoint = Some(endpoint.clone());
            shared.config = config.clone();
            shared.observer_armed = false;
            shared.shutdown = false;
            shared.epoch
        };
        let _guard = AttemptGuard {
            manager: self,
            epoch,
        };

        debug!(addr = %endpoint, timeout_ms = config.connect_timeout.as_millis() as u64, "connecting");
        match open_stream(&endpoint, config.connect_timeout).await {
            Ok(stream) => {
                if !self.install(stream, &endpoint, epoch) {
                    debug!(addr = %endpoint, "connect abandoned by close");
                    return Err(TransportError::NotConnected);
                }
                info!(addr = %endpoint, reconnect = config.reconnect.enabled, "connected");
                Ok(())
            }
            Err(err) => {
                {
                    let mut shared = self.shared();
                    if shared.epoch == epoch {
                        shared.state = ConnectionState::Failed;
                    }
                }
                warn!(addr = %endpoint, error = %err, "connect failed");
                Err(err)
            }
        }
    }

    /// Re-establish a lost connection using the last endpoint and config.
    ///
    /// Used when the connection is known to be dead without a close event
    /// (half-open detection). Call [`teardown`](Self::teardown) first.
    pub async fn force_reconnect(&self) -> Result<()> {
        {
            let shared = self.shared();
            if !shared.ever_connected {
                return Err(TransportError::NeverConnected);
            }
            match shared.state {
                ConnectionState::Connected => return Err(TransportError::AlreadyConnected),
                ConnectionState::Connecting => return Err(TransportError::ConnectInProgress),
                _ => {}
            }
            if shared.reconnect.in_progress {
                return Err(TransportError::ReconnectInProgress);
            }
        }

        match self.reconnect_loop().await {
            ReconnectOutcome::Reconnected => Ok(()),
            ReconnectOutcome::Exhausted(attempts) => {
                Err(TransportError::ReconnectExhausted { attempts })
            }
            ReconnectOutcome::Aborted if self.is_connected() => Ok(()),
            ReconnectOutcome::Aborted => Err(TransportError::NotConnected),
        }
    }

    /// Write all bytes to the socket. Concurrent writers are serialized.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let writer = {
            let shared = self.shared();
            if shared.state != ConnectionState::Connected {
                return Err(TransportError::NotConnected);
            }
            shared.writer.clone().ok_or(TransportError::NotConnected)?
        };

        let mut half = writer.lock().await;
        half.write_all(bytes).await?;
        half.flush().await?;
        Ok(())
    }

    /// Drop the current socket without notifying the close observer.
    pub fn teardown(&self) {
        let mut shared = self.shared();
        shared.generation += 1;
        shared.writer = None;
        if let Some(reader) = shared.reader.take() {
            reader.abort();
        }
        if shared.state == ConnectionState::Connected {
            shared.state = ConnectionState::Disconnected;
        }
    }

    /// Close the connection and stop any automatic reconnection.
    pub fn close(&self) {
        {
            let mut shared = self.shared();
            shared.epoch += 1;
            shared.shutdown = true;
            shared.observer_armed = false;
            shared.reconnect.in_progress = false;
        }
        self.teardown();
        self.shared().state = ConnectionState::Disconnected;
        debug!("connection closed by caller");
    }

    pub fn is_connected(&self) -> bool {
        self.shared().state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.shared().state
    }

    /// Snapshot of the reconnect counters.
    pub fn reconnect_state(&self) -> ReconnectState {
        self.shared().reconnect.clone()
    }

    /// Endpoint of the last connect call.
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.shared().endpoint.clone()
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: &ConnectionEvent) {
        self.inner.handler.on_event(self, event);
    }

    /// Adopt `stream` as the live socket unless the attempt for `epoch` was
    /// superseded, in which case the stream is dropped.
    fn install(&self, stream: TcpStream, endpoint: &Endpoint, epoch: u64) -> bool {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "failed to disable nagle");
        }
        let (read_half, write_half) = stream.into_split();

        let (generation, previous) = {
            let mut shared = self.shared();
            if shared.superseded(epoch) {
                return false;
            }
            shared.generation += 1;
            shared.writer = Some(Arc::new(tokio::sync::Mutex::new(write_half)));
            shared.state = ConnectionState::Connected;
            shared.ever_connected = true;
            shared.observer_armed = shared.config.reconnect.enabled;
            shared.reconnect.attempt_count = 0;
            shared.reconnect.in_progress = false;
            (shared.generation, shared.reader.take())
        };
        if let Some(previous) = previous {
            previous.abort();
        }

        // Handlers reset per-connection state here, before any byte is read.
        self.emit(&ConnectionEvent::Connected {
            addr: endpoint.to_string(),
        });

        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.read_loop(read_half, generation).await });

        let mut shared = self.shared();
        if shared.generation == generation {
            shared.reader = Some(handle);
        } else {
            handle.abort();
        }
        true
    }

    async fn read_loop(self, mut reader: OwnedReadHalf, generation: u64) {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!("peer closed connection");
                    break;
                }
                Ok(n) => self.inner.handler.on_data(&self, &chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "read failed");
                    break;
                }
            }
        }
        self.handle_close(generation);
    }

    fn handle_close(&self, generation: u64) {
        let (addr, rearm) = {
            let mut shared = self.shared();
            if shared.generation != generation {
                debug!("ignoring close of superseded connection");
                return;
            }
            shared.writer = None;
            shared.reader = None;
            shared.state = ConnectionState::Disconnected;
            let addr = shared
                .endpoint
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            (addr, shared.observer_armed && !shared.shutdown)
        };

        info!(addr = %addr, reconnect = rearm, "connection closed");
        self.emit(&ConnectionEvent::Closed { addr });

        if rearm {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.reconnect_loop().await;
            });
        }
    }

    fn stop_requested(&self, epoch: u64) -> bool {
        let shared = self.shared();
        shared.superseded(epoch) || shared.state == ConnectionState::Connected
    }

    async fn reconnect_loop(&self) -> ReconnectOutcome {
        let (endpoint, config, epoch) = {
            let mut shared = self.shared();
            if shared.reconnect.in_progress
                || shared.shutdown
                || shared.state == ConnectionState::Connected
            {
                debug!("reconnect already running or not wanted");
                return ReconnectOutcome::Aborted;
            }
            let Some(endpoint) = shared.endpoint.clone() else {
                return ReconnectOutcome::Aborted;
            };
            shared.epoch += 1;
            shared.reconnect.in_progress = true;
            shared.state = ConnectionState::Reconnecting;
            (endpoint, shared.config.clone(), shared.epoch)
        };
        let _guard = AttemptGuard {
            manager: self,
            epoch,
        };
        let max = config.reconnect.max_retries;

        loop {
            let attempt = {
                let mut shared = self.shared();
                if shared.superseded(epoch) || shared.state == ConnectionState::Connected {
                    return ReconnectOutcome::Aborted;
                }
                if !shared.reconnect.has_attempts_left() {
                    break;
                }
                shared.reconnect.attempt_count += 1;
                shared.reconnect.attempt_count
            };

            info!(addr = %endpoint, attempt, max = ?max, "reconnecting");
            self.emit(&ConnectionEvent::Reconnecting { attempt, max });
            tokio::time::sleep(config.reconnect.delay).await;
            if self.stop_requested(epoch) {
                return ReconnectOutcome::Aborted;
            }

            match open_stream(&endpoint, config.connect_timeout).await {
                Ok(stream) => {
                    if !self.install(stream, &endpoint, epoch) {
                        return ReconnectOutcome::Aborted;
                    }
                    info!(addr = %endpoint, attempt, "reconnected");
                    self.emit(&ConnectionEvent::Reconnected {
                        addr: endpoint.to_string(),
                    });
                    return ReconnectOutcome::Reconnected;
                }
                Err(err) => {
                    warn!(addr = %endpoint, attempt, max = ?max, error = %err, "reconnect attempt failed");
                    self.emit(&ConnectionEvent::ReconnectAttemptFailed {
                        attempt,
                        max,
                        reason: err.to_string(),
                    });
                }
            }
        }

        let attempts = {
            let mut shared = self.shared();
            if shared.superseded(epoch) {
                return ReconnectOutcome::Aborted;
            }
            shared.reconnect.in_progress = false;
            shared.state = ConnectionState::Failed;
            shared.reconnect.attempt_count
        };
        warn!(addr = %endpoint, attempts, "max reconnect retries reached");
        self.emit(&ConnectionEvent::ReconnectExhausted { attempts });
        ReconnectOutcome::Exhausted(attempts)
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared();
        f.debug_struct("ConnectionManager")
            .field("state", &shared.state)
            .field("endpoint", &shared.endpoint)
            .field("reconnect", &shared.reconnect)
            .finish()
    }
}

async fn open_stream(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(TransportError::Connect {
            addr: endpoint.to_string(),
            source,
        }),
        Err(_) => Err(TransportError::ConnectTimeout {
            addr: endpoint.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpSocket};

    use super::*;
    use crate::state::DEFAULT_RECONNECT_MAX_RETRIES;

    #[derive(Default)]
    struct Recorder {
        data: Mutex<Vec<u8>>,
        events: Mutex<Vec<ConnectionEvent>>,
    }

    impl Recorder {
        fn data(&self) -> Vec<u8> {
            self.data.lock().unwrap().clone()
        }

        fn events(&self) -> Vec<ConnectionEvent> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, pred: impl Fn(&ConnectionEvent) -> bool) -> usize {
            self.events().iter().filter(|e| pred(e)).count()
        }
    }

    impl ConnectionHandler for Recorder {
        fn on_data(&self, _connection: &ConnectionManager, chunk: &[u8]) {
            self.data.lock().unwrap().extend_from_slice(chunk);
        }

        fn on_event(&self, _connection: &ConnectionManager, event: &ConnectionEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn manager() -> (ConnectionManager, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (ConnectionManager::new(recorder.clone()), recorder)
    }

    fn fast_config(reconnect: bool, max_retries: Option<u32>) -> ConnectConfig {
        ConnectConfig {
            connect_timeout: Duration::from_millis(500),
            reconnect: ReconnectConfig {
                enabled: reconnect,
                max_retries,
                delay: Duration::from_millis(20),
            },
        }
    }

    async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    async fn listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Endpoint::new("127.0.0.1", port))
    }

    async fn refused_endpoint() -> Endpoint {
        let (listener, endpoint) = listener().await;
        drop(listener);
        endpoint
    }

    /// A listener whose accept queue is full, so further connects hang.
    async fn saturated_listener() -> (TcpListener, Endpoint, Vec<TcpStream>) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut held = Vec::new();
        for _ in 0..64 {
            let attempt = TcpStream::connect(("127.0.0.1", port));
            match tokio::time::timeout(Duration::from_millis(200), attempt).await {
                Ok(Ok(stream)) => held.push(stream),
                _ => break,
            }
        }
        (listener, Endpoint::new("127.0.0.1", port), held)
    }

    #[tokio::test]
    async fn connect_write_and_receive() {
        let (listener, endpoint) = listener().await;
        let (conn, recorder) = manager();

        conn.connect(endpoint, fast_config(false, Some(3)))
            .await
            .expect("connect should succeed");
        assert!(conn.is_connected());

        let (mut peer, _) = listener.accept().await.unwrap();
        conn.write(b"hello").await.expect("write should succeed");
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        peer.write_all(b"one").await.unwrap();
        peer.write_all(b"two").await.unwrap();
        assert!(wait_until(Duration::from_secs(2), || recorder.data() == b"onetwo").await);
        assert!(matches!(
            recorder.events().first(),
            Some(ConnectionEvent::Connected { .. })
        ));
    }

    #[tokio::test]
    async fn second_connect_fails_when_connected() {
        let (_listener, endpoint) = listener().await;
        let (conn, _) = manager();
        conn.connect(endpoint.clone(), fast_config(false, Some(3)))
            .await
            .unwrap();

        let err = conn
            .connect(endpoint, fast_config(false, Some(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AlreadyConnected));
    }

    #[tokio::test]
    async fn refused_connect_fails_without_retry() {
        let endpoint = refused_endpoint().await;
        let (conn, recorder) = manager();

        let err = conn
            .connect(endpoint, fast_config(true, Some(3)))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(!err.is_timeout());
        assert_eq!(conn.state(), ConnectionState::Failed);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::Reconnecting { .. })),
            0
        );
    }

    #[tokio::test]
    async fn write_while_disconnected_is_rejected() {
        let (conn, _) = manager();
        let err = conn.write(b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn reconnects_after_peer_close() {
        let (listener, endpoint) = listener().await;
        let (conn, recorder) = manager();
        conn.connect(endpoint, fast_config(true, Some(3)))
            .await
            .unwrap();

        let (first, _) = listener.accept().await.unwrap();
        drop(first);

        let (_second, _) = listener.accept().await.unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                recorder.count(|e| matches!(e, ConnectionEvent::Reconnected { .. })) == 1
            })
            .await
        );
        assert!(conn.is_connected());
        assert_eq!(conn.reconnect_state().attempt_count, 0);
        assert!(!conn.reconnect_state().in_progress);
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::Closed { .. })),
            1
        );
    }

    #[tokio::test]
    async fn bounded_retries_end_in_failed_state() {
        let (listener, endpoint) = listener().await;
        let (conn, recorder) = manager();
        conn.connect(endpoint, fast_config(true, Some(3)))
            .await
            .unwrap();

        let (accepted, _) = listener.accept().await.unwrap();
        drop(listener);
        drop(accepted);

        assert!(
            wait_until(Duration::from_secs(3), || {
                recorder.count(|e| matches!(e, ConnectionEvent::ReconnectExhausted { .. })) == 1
            })
            .await
        );
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::ReconnectAttemptFailed { .. })),
            3
        );

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::Reconnecting { .. })),
            3
        );
        assert!(recorder.events().contains(&ConnectionEvent::Reconnecting {
            attempt: 3,
            max: Some(3)
        }));
    }

    #[tokio::test]
    async fn close_disarms_reconnection() {
        let (listener, endpoint) = listener().await;
        let (conn, recorder) = manager();
        conn.connect(endpoint, fast_config(true, Some(3)))
            .await
            .unwrap();
        let (_peer, _) = listener.accept().await.unwrap();

        conn.close();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::Reconnecting { .. })),
            0
        );
    }

    #[tokio::test]
    async fn force_reconnect_requires_previous_connection() {
        let (conn, _) = manager();
        let err = conn.force_reconnect().await.unwrap_err();
        assert!(matches!(err, TransportError::NeverConnected));
    }

    #[tokio::test]
    async fn force_reconnect_rejected_while_connected() {
        let (_listener, endpoint) = listener().await;
        let (conn, _) = manager();
        conn.connect(endpoint, fast_config(false, Some(3)))
            .await
            .unwrap();

        let err = conn.force_reconnect().await.unwrap_err();
        assert!(matches!(err, TransportError::AlreadyConnected));
    }

    #[tokio::test]
    async fn teardown_then_force_reconnect() {
        let (listener, endpoint) = listener().await;
        let (conn, recorder) = manager();
        conn.connect(endpoint, fast_config(false, Some(2)))
            .await
            .unwrap();
        let (_first, _) = listener.accept().await.unwrap();

        conn.teardown();
        assert!(!conn.is_connected());

        let accept = tokio::spawn(async move { listener.accept().await.map(|(s, _)| s) });
        conn.force_reconnect()
            .await
            .expect("forced reconnect should succeed");
        assert!(conn.is_connected());
        let _second = accept.await.unwrap().unwrap();

        // The torn down socket never reports a close.
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::Closed { .. })),
            0
        );
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::Reconnected { .. })),
            1
        );
    }

    #[tokio::test]
    async fn connect_timeout_is_reported_as_timeout() {
        let (_listener, endpoint, _held) = saturated_listener().await;
        let (conn, _) = manager();
        let mut config = fast_config(false, Some(3));
        config.connect_timeout = Duration::from_millis(200);

        let err = conn.connect(endpoint, config).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectTimeout { .. }), "{err:?}");
        assert!(err.is_timeout());
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn overlapping_connect_is_rejected() {
        let (_listener, endpoint, _held) = saturated_listener().await;
        let (conn, _) = manager();
        let mut config = fast_config(false, Some(3));
        config.connect_timeout = Duration::from_secs(5);

        let pending = {
            let conn = conn.clone();
            let endpoint = endpoint.clone();
            let config = config.clone();
            tokio::spawn(async move { conn.connect(endpoint, config).await })
        };
        assert!(
            wait_until(Duration::from_secs(1), || conn.state() == ConnectionState::Connecting)
                .await
        );

        let err = conn.connect(endpoint, config).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectInProgress));

        // A cancelled connect does not leave the manager stuck in Connecting.
        pending.abort();
        let _ = pending.await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn unbounded_retries_continue_past_default_bound() {
        let (listener, endpoint) = listener().await;
        let (conn, recorder) = manager();
        conn.connect(endpoint, fast_config(true, None))
            .await
            .unwrap();

        let (accepted, _) = listener.accept().await.unwrap();
        drop(listener);
        drop(accepted);

        let past_bound = ConnectionEvent::Reconnecting {
            attempt: DEFAULT_RECONNECT_MAX_RETRIES + 3,
            max: None,
        };
        assert!(
            wait_until(Duration::from_secs(3), || recorder.events().contains(&past_bound)).await
        );
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::ReconnectExhausted { .. })),
            0
        );

        conn.close();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let attempts = recorder.count(|e| matches!(e, ConnectionEvent::Reconnecting { .. }));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::Reconnecting { .. })),
            attempts
        );
        assert!(!conn.reconnect_state().in_progress);
    }

    #[tokio::test]
    async fn connect_after_exhaustion_starts_fresh_session() {
        let (gone, endpoint) = listener().await;
        let (conn, recorder) = manager();
        conn.connect(endpoint, fast_config(true, Some(2)))
            .await
            .unwrap();

        let (accepted, _) = gone.accept().await.unwrap();
        drop(gone);
        drop(accepted);
        assert!(
            wait_until(Duration::from_secs(3), || {
                recorder.count(|e| matches!(e, ConnectionEvent::ReconnectExhausted { .. })) == 1
            })
            .await
        );
        assert_eq!(conn.reconnect_state().attempt_count, 2);

        let (listener, endpoint) = listener().await;
        conn.connect(endpoint, fast_config(true, Some(2)))
            .await
            .expect("a new connect should resume service");
        let state = conn.reconnect_state();
        assert_eq!(state.attempt_count, 0);
        assert!(!state.in_progress);

        // The close observer is armed again for the new session.
        let (accepted, _) = listener.accept().await.unwrap();
        drop(accepted);
        let (_again, _) = listener.accept().await.unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                recorder.count(|e| matches!(e, ConnectionEvent::Reconnected { .. })) == 1
            })
            .await
        );
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn dropped_force_reconnect_releases_the_loop() {
        let (listener, endpoint) = listener().await;
        let (conn, recorder) = manager();
        let mut slow = fast_config(true, Some(3));
        slow.reconnect.delay = Duration::from_secs(5);
        conn.connect(endpoint.clone(), slow).await.unwrap();
        let (_first, _) = listener.accept().await.unwrap();

        conn.teardown();
        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), conn.force_reconnect()).await;
        assert!(cancelled.is_err());
        assert!(!conn.reconnect_state().in_progress);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect(endpoint, fast_config(true, Some(3)))
            .await
            .unwrap();
        assert_eq!(conn.reconnect_state().delay, Duration::from_millis(20));

        let (second, _) = listener.accept().await.unwrap();
        drop(second);
        let (_third, _) = listener.accept().await.unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                recorder.count(|e| matches!(e, ConnectionEvent::Reconnected { .. })) == 1
            })
            .await
        );
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn connect_during_reconnect_delay_takes_over() {
        let (listener, endpoint) = listener().await;
        let (conn, recorder) = manager();
        let mut slow = fast_config(true, Some(3));
        slow.reconnect.delay = Duration::from_millis(300);
        conn.connect(endpoint.clone(), slow).await.unwrap();

        let (first, _) = listener.accept().await.unwrap();
        drop(first);
        assert!(
            wait_until(Duration::from_secs(1), || conn.state()
                == ConnectionState::Reconnecting)
            .await
        );

        conn.close();
        assert!(!conn.reconnect_state().in_progress);
        conn.connect(endpoint, fast_config(true, Some(3)))
            .await
            .unwrap();
        let (second, _) = listener.accept().await.unwrap();

        // The abandoned loop wakes up and must leave the new socket alone.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(conn.is_connected());
        assert_eq!(
            recorder.count(|e| matches!(e, ConnectionEvent::Reconnected { .. })),
            0
        );

        drop(second);
        let (_third, _) = listener.accept().await.unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                recorder.count(|e| matches!(e, ConnectionEvent::Reconnected { .. })) == 1
            })
            .await
        );
    }

    #[test]
    fn endpoint_display_brackets_ipv6() {
        assert_eq!(Endpoint::new("127.0.0.1", 5201).to_string(), "127.0.0.1:5201");
        assert_eq!(Endpoint::new("::1", 5201).to_string(), "[::1]:5201");
    }
}
