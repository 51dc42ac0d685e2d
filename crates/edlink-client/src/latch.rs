//! First-wins disconnection latch shared by the background tasks.
//!
//! Either background task may detect a lost connection, in any order. The
//! latch makes sure exactly one of them publishes its [`Disconnect`], and
//! turns that into a teardown request by cancelling the session token. The
//! task itself never tears the session down; the supervisor does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::events::Disconnect;

/// Shared one-shot disconnection reporter.
#[derive(Clone, Debug)]
pub(crate) struct DisconnectLatch {
    inner: Arc<LatchInner>,
}

#[derive(Debug)]
struct LatchInner {
    /// Set by the first reporter, or by a caller-initiated close.
    tripped: AtomicBool,
    token: CancellationToken,
    tx: watch::Sender<Option<Disconnect>>,
}

impl DisconnectLatch {
    pub(crate) fn new(token: CancellationToken) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            inner: Arc::new(LatchInner {
                tripped: AtomicBool::new(false),
                token,
                tx,
            }),
        }
    }

    /// Publish `disconnect` and request teardown.
    ///
    /// Returns `true` only for the first report of the session. Later reports,
    /// and reports after a close has begun, are dropped.
    pub(crate) fn report(&self, disconnect: Disconnect) -> bool {
        if self
            .inner
            .tripped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(reason = %disconnect, "Disconnection already reported, dropping");
            return false;
        }

        tracing::warn!(source = ?disconnect.source, reason = %disconnect, "Connection lost");
        self.inner.tx.send_replace(Some(disconnect));
        self.inner.token.cancel();
        true
    }

    /// Trip the latch without publishing anything. Used by `close()` so that
    /// failures observed while shutting down are never reported.
    pub(crate) fn suppress(&self) {
        self.inner.tripped.store(true, Ordering::Release);
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Disconnect>> {
        self.inner.tx.subscribe()
    }

    pub(crate) fn current(&self) -> Option<Disconnect> {
        self.inner.tx.borrow().clone()
    }
}
