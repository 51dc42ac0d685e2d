//! Notifications a session publishes to its collaborators.
//!
//! - [`LogRecord`]: one server-pushed log entry, forwarded as received
//! - [`HeartbeatSample`]: latest heartbeat round-trip measurement
//! - [`Disconnect`]: the one-time notice that the session is unusable

use std::fmt;

use edlink_proto as proto;

/// Log importance as sent by the server.
///
/// Ordinals 1..=4 map to the named levels. Anything else is kept as
/// [`Severity::Unknown`] rather than dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
    Unknown(i32),
}

impl Severity {
    /// Map a wire ordinal to a severity.
    #[must_use]
    pub fn from_ordinal(ordinal: i32) -> Self {
        match ordinal {
            1 => Self::Info,
            2 => Self::Warning,
            3 => Self::Error,
            4 => Self::Critical,
            other => Self::Unknown(other),
        }
    }

    /// The wire ordinal for this severity.
    #[must_use]
    pub fn ordinal(self) -> i32 {
        match self {
            Self::Info => 1,
            Self::Warning => 2,
            Self::Error => 3,
            Self::Critical => 4,
            Self::Unknown(other) => other,
        }
    }

    /// Short uppercase label, e.g. for log prefixes.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// One log record pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Message text as sent.
    pub message: String,
    /// Importance as sent by the server.
    pub level: Severity,
    /// Milliseconds since the UNIX epoch, server clock.
    pub timestamp_ms: i64,
}

impl From<proto::LogEntry> for LogRecord {
    fn from(entry: proto::LogEntry) -> Self {
        Self {
            message: entry.message,
            level: Severity::from_ordinal(entry.level),
            timestamp_ms: entry.timestamp_ms,
        }
    }
}

/// Heartbeat round-trip measurement. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSample {
    /// Local clock when the probe was sent (ms since epoch).
    pub sent_at_ms: i64,
    /// Server clock from the reply (ms since epoch).
    pub server_timestamp_ms: i64,
    /// `server_timestamp_ms - sent_at_ms`. Includes clock skew.
    pub latency_ms: i64,
}

impl HeartbeatSample {
    pub(crate) fn new(sent_at_ms: i64, server_timestamp_ms: i64) -> Self {
        Self {
            sent_at_ms,
            server_timestamp_ms,
            latency_ms: server_timestamp_ms - sent_at_ms,
        }
    }
}

/// Which background task detected the connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectSource {
    /// The health monitor hit its failure threshold.
    Heartbeat,
    /// The log subscription failed.
    LogStream,
}

/// The single disconnection notification of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Task that detected the loss.
    pub source: DisconnectSource,
    /// Human-readable reason embedding the triggering error.
    pub reason: String,
}

impl fmt::Display for Disconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Milliseconds since the UNIX epoch on the local clock.
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
