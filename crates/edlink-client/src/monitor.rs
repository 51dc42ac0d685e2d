//! Periodic heartbeat with a consecutive-failure threshold.
//!
//! # Loop
//!
//! ```text
//!            ┌──────── success: reset failures, wait `interval` ───────┐
//!            ▼                                                        │
//!   Running ──heartbeat()──> outcome ─────────────────────────────────┘
//!            ▲                  │
//!            │            failure (not cancellation)
//!            │                  ▼
//!            └─ wait `retry_delay` ── failures < threshold
//!                                   failures >= threshold ──> report, Stopped
//! ```
//!
//! Cancellation at any suspension point moves straight to `Stopped`
//! without reporting anything.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::error::describe_status;
use crate::events::{now_ms, Disconnect, DisconnectSource, HeartbeatSample};
use crate::invoker::Probe;
use crate::latch::DisconnectLatch;

/// Configuration for the heartbeat loop.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Pause after a successful heartbeat.
    pub interval: Duration,
    /// Pause after a failed heartbeat that is still below the threshold.
    pub retry_delay: Duration,
    /// How long a single heartbeat may take before it counts as failed.
    pub timeout: Duration,
    /// Number of consecutive failures that means the connection is lost.
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            retry_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(5),
            failure_threshold: 2,
        }
    }
}

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorExit {
    /// The session token was cancelled.
    Cancelled,
    /// The failure threshold was reached.
    Disconnected,
}

/// Background heartbeat task.
///
/// The failure counter lives on this task's stack and nowhere else.
pub(crate) struct HealthMonitor<P> {
    probe: P,
    config: HealthConfig,
    samples: watch::Sender<Option<HeartbeatSample>>,
    latch: DisconnectLatch,
}

impl<P: Probe> HealthMonitor<P> {
    pub(crate) fn new(
        probe: P,
        config: HealthConfig,
        samples: watch::Sender<Option<HeartbeatSample>>,
        latch: DisconnectLatch,
    ) -> Self {
        Self {
            probe,
            config,
            samples,
            latch,
        }
    }

    pub(crate) async fn run(self) -> MonitorExit {
        let token = self.latch.token().clone();
        let threshold = self.config.failure_threshold.max(1);
        let mut failures: u32 = 0;

        loop {
            let sent_at_ms = now_ms();
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => return MonitorExit::Cancelled,
                outcome = probe_with_timeout(&self.probe, self.config.timeout) => outcome,
            };

            match outcome {
                Ok(server_timestamp_ms) => {
                    let sample = HeartbeatSample::new(sent_at_ms, server_timestamp_ms);
                    if failures > 0 {
                        tracing::info!(previous_failures = failures, "Heartbeat recovered");
                    }
                    failures = 0;
                    tracing::trace!(latency_ms = sample.latency_ms, "Heartbeat ok");
                    self.samples.send_replace(Some(sample));

                    if !pause(&token, self.config.interval).await {
                        return MonitorExit::Cancelled;
                    }
                }
                Err(status) => {
                    if token.is_cancelled() {
                        return MonitorExit::Cancelled;
                    }

                    failures += 1;
                    tracing::warn!(
                        failures,
                        threshold,
                        code = ?status.code(),
                        error = %status.message(),
                        "Heartbeat failed"
                    );

                    if failures >= threshold {
                        self.latch.report(Disconnect {
                            source: DisconnectSource::Heartbeat,
                            reason: format!(
                                "Connection lost: heartbeat failed {failures} times in a row ({})",
                                describe_status(&status)
                            ),
                        });
                        return MonitorExit::Disconnected;
                    }

                    if !pause(&token, self.config.retry_delay).await {
                        return MonitorExit::Cancelled;
                    }
                }
            }
        }
    }
}

async fn probe_with_timeout<P: Probe>(probe: &P, timeout: Duration) -> Result<i64, Status> {
    match tokio::time::timeout(timeout, probe.probe()).await {
        Ok(result) => result,
        Err(_) => Err(Status::deadline_exceeded(format!(
            "heartbeat timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Sleep for `duration`. Returns `false` if cancelled first.
async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        () = token.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
