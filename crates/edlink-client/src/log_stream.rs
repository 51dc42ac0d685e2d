//! Consumer of the server-pushed log feed.

use edlink_proto::LogEntry;
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tonic::Status;

use crate::error::describe_status;
use crate::events::{Disconnect, DisconnectSource, LogRecord};
use crate::invoker::Invoker;
use crate::latch::DisconnectLatch;

/// Why the consumer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamExit {
    /// The session token was cancelled.
    Cancelled,
    /// The server closed the stream cleanly.
    Ended,
    /// The stream failed while the session was active.
    Disconnected,
}

/// Background task holding the one open `SubscribeLogs` call.
///
/// Records are forwarded as they arrive. The consumer reads no faster than
/// it forwards, so the transport's flow control is the only back-pressure.
pub(crate) struct LogStreamConsumer {
    records: broadcast::Sender<LogRecord>,
    latch: DisconnectLatch,
}

impl LogStreamConsumer {
    pub(crate) fn new(records: broadcast::Sender<LogRecord>, latch: DisconnectLatch) -> Self {
        Self { records, latch }
    }

    /// Open the subscription on `invoker` and consume it.
    pub(crate) async fn run(self, invoker: Invoker) -> StreamExit {
        let token = self.latch.token().clone();
        let opened = tokio::select! {
            biased;
            () = token.cancelled() => return StreamExit::Cancelled,
            opened = invoker.subscribe_logs() => opened,
        };

        match opened {
            Ok(stream) => self.consume(stream).await,
            Err(err) => {
                let status = match err {
                    crate::ClientError::Rpc(status) => status,
                    other => Status::unknown(other.to_string()),
                };
                self.fail(&status)
            }
        }
    }

    /// Forward every record from `stream` until it ends, fails or the
    /// session is cancelled.
    pub(crate) async fn consume<S>(self, mut stream: S) -> StreamExit
    where
        S: Stream<Item = Result<LogEntry, Status>> + Unpin + Send,
    {
        let token = self.latch.token().clone();
        tracing::debug!("Log stream open");

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => return StreamExit::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(entry)) => {
                    // Err only means nobody is subscribed right now.
                    let _ = self.records.send(LogRecord::from(entry));
                }
                Some(Err(status)) => return self.fail(&status),
                None => {
                    if token.is_cancelled() {
                        return StreamExit::Cancelled;
                    }
                    tracing::info!("Log stream closed by server");
                    return StreamExit::Ended;
                }
            }
        }
    }

    fn fail(&self, status: &Status) -> StreamExit {
        // A cancelled status that coincides with our own cancellation is the
        // expected end of a close, not a failure.
        if self.latch.token().is_cancelled() {
            return StreamExit::Cancelled;
        }

        tracing::warn!(code = ?status.code(), error = %status.message(), "Log stream failed");
        self.latch.report(Disconnect {
            source: DisconnectSource::LogStream,
            reason: format!("Connection lost: log stream failed ({})", describe_status(status)),
        });
        StreamExit::Disconnected
    }
}
