//! Scheduled request state machine

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

use super::core::{CallError, SchedulerShared};
use crate::error::ScheduleError;
use crate::executor::{ApiResponse, RequestDefinition};

/// What a scheduled request settles with
pub type Outcome = Result<ApiResponse, ScheduleError>;

/// Per-call scheduling options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Wait in the queue instead of failing when the budget is exhausted
    pub use_queue: bool,
}

impl RequestOptions {
    pub fn queued() -> Self {
        Self { use_queue: true }
    }
}

/// Lifecycle of a scheduled request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Idle,
    Executing,
    Settled,
}

struct RequestInner {
    status: RequestStatus,
    settlement: Option<oneshot::Sender<Outcome>>,
    expiry: Option<AbortHandle>,
}

/// One caller intent, executed at most once successfully and settled exactly once
pub struct ScheduledRequest {
    id: Uuid,
    request: RequestDefinition,
    options: RequestOptions,
    scheduler: Weak<SchedulerShared>,
    inner: Mutex<RequestInner>,
}

impl ScheduledRequest {
    pub(crate) fn new(
        request: RequestDefinition,
        options: RequestOptions,
        scheduler: Weak<SchedulerShared>,
    ) -> (Arc<Self>, Settlement) {
        let id = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        let item = Arc::new(Self {
            id,
            request,
            options,
            scheduler,
            inner: Mutex::new(RequestInner {
                status: RequestStatus::Idle,
                settlement: Some(tx),
                expiry: None,
            }),
        });
        (item, Settlement { id, rx })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn options(&self) -> RequestOptions {
        self.options
    }

    pub fn status(&self) -> RequestStatus {
        self.lock().status
    }

    fn lock(&self) -> MutexGuard<'_, RequestInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Idle -> Executing; false if already executing or settled
    pub(crate) fn begin(&self) -> bool {
        let mut inner = self.lock();
        if inner.status != RequestStatus::Idle {
            return false;
        }
        inner.status = RequestStatus::Executing;
        true
    }

    /// Executing -> Idle; false if the request settled meanwhile
    pub(crate) fn release(&self) -> bool {
        let mut inner = self.lock();
        match inner.status {
            RequestStatus::Settled => false,
            _ => {
                inner.status = RequestStatus::Idle;
                true
            }
        }
    }

    /// Resolve the caller's future; later settlements are ignored
    pub(crate) fn settle(&self, outcome: Outcome) -> bool {
        let mut inner = self.lock();
        if inner.status == RequestStatus::Settled {
            debug!(id = %self.id, "ScheduledRequest::settle: already settled, ignoring");
            return false;
        }
        inner.status = RequestStatus::Settled;
        if let Some(expiry) = inner.expiry.take() {
            expiry.abort();
        }
        if let Some(tx) = inner.settlement.take() {
            // the caller may have stopped waiting
            let _ = tx.send(outcome);
        }
        true
    }

    pub(crate) fn has_expiry(&self) -> bool {
        self.lock().expiry.is_some()
    }

    /// Attach the expiry timer; aborts it right away if already settled
    pub(crate) fn set_expiry(&self, handle: AbortHandle) {
        let mut inner = self.lock();
        if inner.status == RequestStatus::Settled {
            handle.abort();
            return;
        }
        inner.expiry = Some(handle);
    }

    /// Run one attempt: admission, call, then settle or requeue
    ///
    /// Calling this while an attempt is in flight, or after settlement, does nothing.
    pub async fn execute(self: Arc<Self>) {
        if !self.begin() {
            debug!(id = %self.id, status = ?self.status(), "ScheduledRequest::execute: not idle, skipping");
            return;
        }
        let Some(scheduler) = self.scheduler.upgrade() else {
            debug!(id = %self.id, "ScheduledRequest::execute: scheduler gone");
            self.settle(Err(ScheduleError::Abandoned));
            return;
        };

        match scheduler.consume_rate_limit(&self).await {
            Ok(true) => {
                debug!(id = %self.id, "ScheduledRequest::execute: admitted");
            }
            Ok(false) => {
                debug!(id = %self.id, "ScheduledRequest::execute: queued");
                return;
            }
            Err(err) => {
                debug!(id = %self.id, error = %err, "ScheduledRequest::execute: denied");
                scheduler.finish(&self, Err(err)).await;
                return;
            }
        }

        match scheduler.call(&self.request).await {
            Ok(response) => {
                debug!(id = %self.id, status = response.status, "ScheduledRequest::execute: success");
                scheduler.finish(&self, Ok(response)).await;
            }
            Err(CallError::RateLimited(err)) => {
                debug!(id = %self.id, error = %err, "ScheduledRequest::execute: remote rate limit, requeueing");
                scheduler.requeue(&self).await;
            }
            Err(CallError::Failed(err)) => {
                debug!(id = %self.id, error = %err, "ScheduledRequest::execute: failed");
                scheduler.finish(&self, Err(err)).await;
            }
        }
    }
}

impl std::fmt::Debug for ScheduledRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledRequest")
            .field("id", &self.id)
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("options", &self.options)
            .field("status", &self.status())
            .finish()
    }
}

/// Future resolving to the outcome of a scheduled request
#[derive(Debug)]
pub struct Settlement {
    id: Uuid,
    rx: oneshot::Receiver<Outcome>,
}

impl Settlement {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Future for Settlement {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ScheduleError::Abandoned)))
    }
}
