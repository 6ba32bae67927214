use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use nulrpc_frame::encode_frame;
use nulrpc_transport::ConnectionManager;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Snapshot of heartbeat bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatState {
    /// When the last heartbeat arrived.
    pub last_seen_at: Option<Instant>,
    /// Active check interval.
    pub interval: Duration,
    /// A heartbeat arrived since the last active check.
    pub seen_since_check: bool,
    /// Start of the current check window; moved on every new connection.
    pub window_started_at: Instant,
}

/// Answers heartbeat probes and tracks when they arrive.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    state: Mutex<HeartbeatState>,
    quiet: AtomicBool,
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(8000), false)
    }
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, quiet: bool) -> Self {
        Self {
            state: Mutex::new(HeartbeatState {
                last_seen_at: None,
                interval,
                seen_since_check: false,
                window_started_at: Instant::now(),
            }),
            quiet: AtomicBool::new(quiet),
        }
    }

    /// Apply new settings and start a fresh check window.
    pub fn configure(&self, interval: Duration, quiet: bool) {
        self.quiet.store(quiet, Ordering::Relaxed);
        let mut state = self.state();
        state.interval = interval;
        state.seen_since_check = false;
        state.window_started_at = Instant::now();
    }

    /// Record a heartbeat and echo the identical frame back.
    ///
    /// The echo is written from a spawned task so the read loop never waits
    /// on the socket. Must be called within a Tokio runtime.
    pub fn on_heartbeat(&self, connection: &ConnectionManager, frame: Bytes) {
        {
            let mut state = self.state();
            state.last_seen_at = Some(Instant::now());
            state.seen_since_check = true;
        }
        if !self.quiet.load(Ordering::Relaxed) {
            trace!(frame = %String::from_utf8_lossy(&frame), "heartbeat received");
        }

        let mut echo = BytesMut::with_capacity(frame.len() + 2);
        if let Err(err) = encode_frame(&frame, &mut echo) {
            warn!(error = %err, "cannot echo heartbeat");
            return;
        }
        let connection = connection.clone();
        tokio::spawn(async move {
            if let Err(err) = connection.write(&echo).await {
                debug!(error = %err, "heartbeat echo failed");
            }
        });
    }

    /// Restart the check window, e.g. after a new connection came up.
    pub fn restart_window(&self) {
        let mut state = self.state();
        state.seen_since_check = false;
        state.window_started_at = Instant::now();
    }

    /// Judge the window ending now and start the next one.
    ///
    /// A window younger than the interval passes: the connection has not
    /// been up long enough to have missed a heartbeat.
    pub fn check(&self) -> bool {
        let mut state = self.state();
        let alive =
            state.seen_since_check || state.window_started_at.elapsed() < state.interval;
        state.seen_since_check = false;
        alive
    }

    pub fn last_seen_at(&self) -> Option<Instant> {
        self.state().last_seen_at
    }

    pub fn snapshot(&self) -> HeartbeatState {
        *self.state()
    }

    fn state(&self) -> MutexGuard<'_, HeartbeatState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Active half-open detection.
///
/// Every `interval`, verify a heartbeat arrived since the last check. If
/// none did while the connection claims to be up, drop the socket and
/// reconnect. The check pauses while that reconnect runs.
pub(crate) async fn run_check(
    monitor: Arc<HeartbeatMonitor>,
    connection: ConnectionManager,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(interval_ms = interval.as_millis() as u64, "heartbeat check started");

    loop {
        ticker.tick().await;
        if monitor.check() || !connection.is_connected() {
            continue;
        }

        warn!(
            interval_ms = interval.as_millis() as u64,
            "no heartbeat within check interval; connection presumed half-open"
        );
        connection.teardown();
        match connection.force_reconnect().await {
            Ok(()) => info!("connection re-established after missed heartbeat"),
            Err(err) => warn!(error = %err, "reconnect after missed heartbeat failed"),
        }
        monitor.restart_window();
        ticker.reset();
    }
}
