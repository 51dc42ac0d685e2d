//! Session controller: verified construction, background tasks, shutdown.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──probe ok──> Active ──close() / connection lost──> Closing ──> Closed
//!      │
//!      └──probe failed──> (no session, error returned to caller)
//! ```
//!
//! A [`Session`] only exists once the initial heartbeat has succeeded, so a
//! caller never holds a half-started session. The health monitor and log
//! consumer share one [`CancellationToken`]. When either of them detects a
//! lost connection it reports through the disconnection latch, which cancels
//! the token; a supervisor task then drains both tasks and releases the
//! transport. [`Session::close`] drives the same supervisor, so teardown has
//! exactly one code path no matter who starts it.

use std::sync::Arc;

use edlink_proto::{CommandResponse, InterfaceSet};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::endpoint::Endpoint;
use crate::error::{ClientError, Result};
use crate::events::{now_ms, Disconnect, HeartbeatSample, LogRecord};
use crate::invoker::{Invoker, Probe, RequestMetadata};
use crate::latch::DisconnectLatch;
use crate::log_stream::LogStreamConsumer;
use crate::monitor::{HealthConfig, HealthMonitor};
use crate::transport::{Transport, TransportConfig};

/// Default per-subscriber log buffer.
pub const DEFAULT_LOG_CHANNEL_CAPACITY: usize = 1024;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport being established and verified.
    Connecting,
    /// Background tasks running; requests accepted.
    Active,
    /// Teardown in progress; requests rejected.
    Closing,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Returns a short status label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Connecting => "Connecting...",
            Self::Active => "Connected",
            Self::Closing => "Closing...",
            Self::Closed => "Closed",
        }
    }
}

/// Everything needed to create a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Channel setup.
    pub transport: TransportConfig,
    /// Heartbeat loop tunables.
    pub health: HealthConfig,
    /// Headers attached to every request, including the log subscription.
    pub metadata: RequestMetadata,
    /// Records buffered per log subscriber before it starts lagging.
    pub log_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            health: HealthConfig::default(),
            metadata: RequestMetadata::none(),
            log_channel_capacity: DEFAULT_LOG_CHANNEL_CAPACITY,
        }
    }
}

/// State shared between the session handle and its supervisor.
struct Shared {
    endpoint: Endpoint,
    /// Released on teardown so the connection can close.
    invoker: Mutex<Option<Invoker>>,
    /// Dropped on teardown so log subscribers see the feed end.
    records: Mutex<Option<broadcast::Sender<LogRecord>>>,
    samples: watch::Sender<Option<HeartbeatSample>>,
    state: watch::Sender<SessionState>,
    latch: DisconnectLatch,
}

/// One established, monitored connection to the server.
///
/// Not `Clone`: wrap it in an `Arc` to share it, e.g. with a task that reacts
/// to the disconnection notification. Dropping the last handle without
/// calling [`close`](Self::close) still stops the background tasks.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create a session with default settings.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self> {
        Self::connect_with_config(endpoint, SessionConfig::default()).await
    }

    /// Verified construction.
    ///
    /// Opens the transport and issues one heartbeat before returning. If
    /// either fails, the error is returned and nothing is left running.
    pub async fn connect_with_config(endpoint: &Endpoint, config: SessionConfig) -> Result<Self> {
        tracing::info!(endpoint = %endpoint, "Connecting");

        let transport = Transport::connect(endpoint, &config.transport).await?;
        let invoker = Invoker::new(&transport, config.metadata.clone());

        let sent_at_ms = now_ms();
        let probe = tokio::time::timeout(config.health.timeout, invoker.probe()).await;
        let server_timestamp_ms = match probe {
            Ok(Ok(timestamp)) => timestamp,
            Ok(Err(status)) => {
                tracing::warn!(endpoint = %endpoint, error = %status, "Initial heartbeat failed");
                drop(invoker);
                transport.teardown();
                return Err(ClientError::ConstructionFailed(status));
            }
            Err(_) => {
                tracing::warn!(endpoint = %endpoint, "Initial heartbeat timed out");
                drop(invoker);
                transport.teardown();
                return Err(ClientError::ConstructionFailed(tonic::Status::deadline_exceeded(
                    "initial heartbeat timed out",
                )));
            }
        };
        let first_sample = HeartbeatSample::new(sent_at_ms, server_timestamp_ms);

        let latch = DisconnectLatch::new(CancellationToken::new());
        let (records_tx, _) = broadcast::channel(config.log_channel_capacity.max(1));
        let (samples_tx, _) = watch::channel(Some(first_sample));
        let (state_tx, _) = watch::channel(SessionState::Connecting);

        let shared = Arc::new(Shared {
            endpoint: endpoint.clone(),
            invoker: Mutex::new(Some(invoker.clone())),
            records: Mutex::new(Some(records_tx.clone())),
            samples: samples_tx.clone(),
            state: state_tx,
            latch: latch.clone(),
        });

        let monitor = HealthMonitor::new(
            invoker.clone(),
            config.health.clone(),
            samples_tx,
            latch.clone(),
        );
        let monitor_task = tokio::spawn(
            monitor
                .run()
                .instrument(tracing::info_span!("health_monitor", endpoint = %endpoint)),
        );

        let consumer = LogStreamConsumer::new(records_tx, latch);
        let consumer_task = tokio::spawn(
            consumer
                .run(invoker)
                .instrument(tracing::info_span!("log_stream", endpoint = %endpoint)),
        );

        shared.state.send_replace(SessionState::Active);
        tokio::spawn(supervise(
            Arc::clone(&shared),
            transport,
            monitor_task,
            consumer_task,
        ));

        tracing::info!(
            endpoint = %endpoint,
            latency_ms = first_sample.latency_ms,
            "Session active"
        );
        Ok(Self { shared })
    }

    /// The endpoint this session is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// True while requests are accepted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Observe lifecycle transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Subscribe to server log records.
    ///
    /// Each subscriber has its own bounded buffer; a subscriber that falls
    /// behind sees `RecvError::Lagged` instead of slowing the stream down.
    /// The receiver reports `RecvError::Closed` once the session is closed.
    #[must_use]
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogRecord> {
        match self.shared.records.lock().as_ref() {
            Some(records) => records.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Observe the single disconnection notification.
    ///
    /// Holds `None` until the connection is lost. A caller-initiated close
    /// never publishes a value.
    #[must_use]
    pub fn watch_disconnect(&self) -> watch::Receiver<Option<Disconnect>> {
        self.shared.latch.subscribe()
    }

    /// The disconnection notification, if one has been published.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<Disconnect> {
        self.shared.latch.current()
    }

    /// Wait until the connection is lost. Returns `None` if the session is
    /// closed by the caller instead.
    pub async fn disconnected(&self) -> Option<Disconnect> {
        let mut state = self.watch_state();
        // Closed is only reached after any disconnection has been published.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
        self.disconnect_reason()
    }

    /// Observe heartbeat round-trip samples.
    #[must_use]
    pub fn watch_heartbeat(&self) -> watch::Receiver<Option<HeartbeatSample>> {
        self.shared.samples.subscribe()
    }

    fn invoker(&self) -> Result<Invoker> {
        if !self.is_active() || self.shared.latch.token().is_cancelled() {
            return Err(ClientError::Closed);
        }
        self.shared
            .invoker
            .lock()
            .as_ref()
            .cloned()
            .ok_or(ClientError::Closed)
    }

    /// Execute one command on the server.
    pub async fn execute_command(&self, command: &str) -> Result<CommandResponse> {
        self.invoker()?.execute_command(command).await
    }

    /// Send one heartbeat outside the monitor's schedule.
    pub async fn heartbeat(&self) -> Result<HeartbeatSample> {
        let invoker = self.invoker()?;
        let sent_at_ms = now_ms();
        let server_timestamp_ms = invoker.heartbeat().await?;
        Ok(HeartbeatSample::new(sent_at_ms, server_timestamp_ms))
    }

    /// Fetch the server's interface set.
    pub async fn fetch_interface_set(&self) -> Result<InterfaceSet> {
        self.invoker()?.fetch_interface_set().await
    }

    /// Replace the server's interface set.
    pub async fn apply_interface_set(&self, set: InterfaceSet) -> Result<CommandResponse> {
        self.invoker()?.apply_interface_set(set).await
    }

    /// Close the session.
    ///
    /// Cancels both background tasks, waits for them to finish and releases
    /// the transport. Idempotent, never fails, and safe to call from a task
    /// that is reacting to the disconnection notification.
    pub async fn close(&self) {
        begin_close(&self.shared);
        let mut state = self.watch_state();
        // Err only if the supervisor is gone, which means teardown already ran.
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        begin_close(&self.shared);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

fn begin_close(shared: &Shared) {
    shared.latch.suppress();
    shared.latch.token().cancel();
    mark_closing(shared);
}

fn mark_closing(shared: &Shared) {
    shared.state.send_if_modified(|state| {
        if *state == SessionState::Active {
            *state = SessionState::Closing;
            true
        } else {
            false
        }
    });
}

/// Waits for cancellation, then drains the background tasks and releases
/// the transport. The only place teardown happens.
async fn supervise<M, C>(
    shared: Arc<Shared>,
    transport: Transport,
    monitor_task: JoinHandle<M>,
    consumer_task: JoinHandle<C>,
) where
    M: std::fmt::Debug,
    C: std::fmt::Debug,
{
    shared.latch.token().cancelled().await;
    mark_closing(&shared);

    match monitor_task.await {
        Ok(exit) => tracing::debug!(?exit, "Health monitor stopped"),
        Err(err) if err.is_cancelled() => {}
        Err(err) => tracing::warn!(error = %err, "Health monitor task failed"),
    }
    match consumer_task.await {
        Ok(exit) => tracing::debug!(?exit, "Log stream stopped"),
        Err(err) if err.is_cancelled() => {}
        Err(err) => tracing::warn!(error = %err, "Log stream task failed"),
    }

    shared.invoker.lock().take();
    shared.records.lock().take();
    transport.teardown();

    shared.state.send_replace(SessionState::Closed);
    match shared.latch.current() {
        Some(disconnect) => {
            tracing::info!(endpoint = %shared.endpoint, reason = %disconnect, "Session closed")
        }
        None => tracing::info!(endpoint = %shared.endpoint, "Session closed"),
    }
}
