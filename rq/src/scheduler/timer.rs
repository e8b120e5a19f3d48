//! One-shot reset alarm

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

/// Fires a callback once, after a delay
///
/// A fired timer is inert; arm a new one instead of reusing it. Dropping a
/// timer that has not fired cancels it.
pub struct ResetTimer {
    fire_at: DateTime<Utc>,
    fired: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ResetTimer {
    /// Spawn the timer on the current tokio runtime
    pub fn start<F>(fire_at: DateTime<Utc>, delay: Duration, callback: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(%fire_at, ?delay, "ResetTimer::start: called");
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(true, Ordering::SeqCst);
            debug!("ResetTimer: fired");
            callback.await;
        });

        Self { fire_at, fired, handle }
    }

    pub fn fire_at(&self) -> DateTime<Utc> {
        self.fire_at
    }

    /// Check if the timer is still waiting to fire
    pub fn is_pending(&self) -> bool {
        !self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for ResetTimer {
    fn drop(&mut self) {
        // the callback of a fired timer may be what replaces it
        if self.is_pending() {
            self.handle.abort();
        }
    }
}

impl std::fmt::Debug for ResetTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetTimer")
            .field("fire_at", &self.fire_at)
            .field("pending", &self.is_pending())
            .finish()
    }
}
