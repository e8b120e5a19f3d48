//! Scheduler implementation

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::config::SchedulerConfig;
use super::queue::RequestQueue;
use super::request::{Outcome, RequestOptions, ScheduledRequest, Settlement};
use super::timer::ResetTimer;
use super::tracker::{RateLimitState, RateLimitTracker};
use crate::clock::{Clock, SystemClock};
use crate::error::{ExecuteError, ScheduleError};
use crate::executor::{ApiResponse, RequestDefinition, RequestExecutor};

/// Advisory check consulted before every admission decision
///
/// Receives the tracked state (`None` until the first response). Returning
/// `false` denies requests that do not use the queue; queued requests fall
/// through to the tracker-based check.
#[async_trait]
pub trait RateLimitValidator: Send + Sync {
    async fn validate(&self, state: Option<RateLimitState>) -> bool;
}

#[async_trait]
impl<F, Fut> RateLimitValidator for F
where
    F: Fn(Option<RateLimitState>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    async fn validate(&self, state: Option<RateLimitState>) -> bool {
        (self)(state).await
    }
}

/// Statistics for the scheduler
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_admitted: u64,
    pub total_queued: u64,
    pub total_rate_limited: u64,
    pub total_soft_retries: u64,
    pub total_timed_out: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_replays: u64,
    pub peak_queue_depth: usize,
}

/// Outcome of a single executor call, before settlement
pub(crate) enum CallError {
    /// The service reported its budget exhausted
    RateLimited(ExecuteError),
    Failed(ScheduleError),
}

/// Internal state protected by mutex
struct SchedulerInner {
    tracker: RateLimitTracker,
    queue: RequestQueue<ScheduledRequest>,
    reset_timer: Option<ResetTimer>,
    stats: SchedulerStats,
}

pub(crate) struct SchedulerShared {
    config: SchedulerConfig,
    executor: Arc<dyn RequestExecutor>,
    clock: Arc<dyn Clock>,
    validator: RwLock<Option<Arc<dyn RateLimitValidator>>>,
    inner: Mutex<SchedulerInner>,
}

/// Schedules requests against a shared, server-enforced rate limit
///
/// Cheap to clone; clones share the same budget and queue.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<SchedulerShared>,
}

impl Scheduler {
    /// Create a new scheduler with the given configuration
    pub fn new(config: SchedulerConfig, executor: Arc<dyn RequestExecutor>) -> Self {
        Self::with_clock(config, executor, Arc::new(SystemClock))
    }

    /// Create a scheduler reading wall-clock time from `clock`
    pub fn with_clock(config: SchedulerConfig, executor: Arc<dyn RequestExecutor>, clock: Arc<dyn Clock>) -> Self {
        debug!(?config, "Scheduler::new: called");
        let tracker = RateLimitTracker::new(config.default_limit, config.default_window());
        Self {
            shared: Arc::new(SchedulerShared {
                config,
                executor,
                clock,
                validator: RwLock::new(None),
                inner: Mutex::new(SchedulerInner {
                    tracker,
                    queue: RequestQueue::new(),
                    reset_timer: None,
                    stats: SchedulerStats::default(),
                }),
            }),
        }
    }

    /// Install or clear the predictive validator
    pub async fn set_validator(&self, validator: Option<Arc<dyn RateLimitValidator>>) {
        debug!(installed = validator.is_some(), "Scheduler::set_validator: called");
        *self.shared.validator.write().await = validator;
    }

    /// Schedule a request and start its first attempt
    ///
    /// Must be called from within a tokio runtime. The returned future
    /// resolves once the request settles.
    pub fn schedule(&self, request: RequestDefinition, options: RequestOptions) -> Settlement {
        let (item, settlement) = ScheduledRequest::new(request, options, Arc::downgrade(&self.shared));
        debug!(id = %item.id(), ?options, "Scheduler::schedule: called");
        tokio::spawn(item.execute());
        settlement
    }

    /// Current tracked rate-limit state, `None` until the first response
    pub async fn rate_limit(&self) -> Option<RateLimitState> {
        self.shared.inner.lock().await.tracker.state()
    }

    /// Number of requests waiting in the queue
    pub async fn queue_len(&self) -> usize {
        self.shared.inner.lock().await.queue.len()
    }

    /// Get the scheduler statistics
    pub async fn stats(&self) -> SchedulerStats {
        self.shared.inner.lock().await.stats.clone()
    }
}

impl SchedulerShared {
    /// Decide whether `item` may proceed now
    ///
    /// `Ok(true)` grants one unit of capacity, `Ok(false)` means the item was
    /// queued (and released back to idle), `Err` denies it outright.
    pub(crate) async fn consume_rate_limit(self: &Arc<Self>, item: &Arc<ScheduledRequest>) -> Result<bool, ScheduleError> {
        let use_queue = item.options().use_queue;
        let validator = self.validator.read().await.clone();
        if let Some(validator) = validator {
            let state = self.inner.lock().await.tracker.state();
            if !validator.validate(state).await {
                if !use_queue {
                    debug!(id = %item.id(), "Scheduler::consume_rate_limit: validator denied, no queue");
                    self.inner.lock().await.stats.total_rate_limited += 1;
                    return Err(ScheduleError::RateLimit);
                }
                debug!(id = %item.id(), "Scheduler::consume_rate_limit: validator denied, falling through to tracker");
            }
        }

        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        if inner.tracker.try_consume(now) {
            inner.stats.total_admitted += 1;
            return Ok(true);
        }

        if !use_queue {
            debug!(id = %item.id(), "Scheduler::consume_rate_limit: exhausted, no queue");
            inner.stats.total_rate_limited += 1;
            return Err(ScheduleError::RateLimit);
        }

        debug!(id = %item.id(), "Scheduler::consume_rate_limit: exhausted, queueing");
        self.enqueue(&mut inner, item);
        item.release();
        Ok(false)
    }

    /// Run the executor and record rate-limit truth from whatever came back
    pub(crate) async fn call(&self, request: &RequestDefinition) -> Result<ApiResponse, CallError> {
        match self.executor.execute(request).await {
            Ok(response) => {
                self.record(&response.headers).await.map_err(CallError::Failed)?;
                Ok(response)
            }
            Err(err) => {
                if let Some(headers) = err.headers() {
                    self.record(headers).await.map_err(CallError::Failed)?;
                }
                if err.is_rate_limit() {
                    Err(CallError::RateLimited(err))
                } else {
                    Err(CallError::Failed(err.into()))
                }
            }
        }
    }

    async fn record(&self, headers: &HeaderMap) -> Result<(), ScheduleError> {
        let mut inner = self.inner.lock().await;
        match inner.tracker.record_from_response(headers) {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, "Scheduler::record: response violated rate limit header contract");
                Err(err.into())
            }
        }
    }

    /// Remove from the queue and settle
    pub(crate) async fn finish(&self, item: &Arc<ScheduledRequest>, outcome: Outcome) {
        let mut inner = self.inner.lock().await;
        inner.queue.remove(item);
        let succeeded = outcome.is_ok();
        if item.settle(outcome) {
            if succeeded {
                inner.stats.total_succeeded += 1;
            } else {
                inner.stats.total_failed += 1;
            }
        }
    }

    /// Put an item rejected by the service back in line
    ///
    /// Its expiry deadline keeps running from when it first entered the queue.
    pub(crate) async fn requeue(self: &Arc<Self>, item: &Arc<ScheduledRequest>) {
        let mut inner = self.inner.lock().await;
        if !item.release() {
            debug!(id = %item.id(), "Scheduler::requeue: settled meanwhile, dropping");
            return;
        }
        inner.stats.total_soft_retries += 1;
        self.enqueue(&mut inner, item);
    }

    fn enqueue(self: &Arc<Self>, inner: &mut SchedulerInner, item: &Arc<ScheduledRequest>) {
        if inner.queue.insert(item) {
            inner.stats.total_queued += 1;
            inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.queue.len());
            debug!(id = %item.id(), depth = inner.queue.len(), "Scheduler::enqueue: added");
        }
        self.arm_expiry(item);
        self.guarantee_reset_timer(inner);
    }

    fn arm_expiry(self: &Arc<Self>, item: &Arc<ScheduledRequest>) {
        if item.has_expiry() {
            return;
        }
        let timeout = self.config.queue_item_timeout();
        let shared = Arc::downgrade(self);
        let target = Arc::clone(item);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            match shared.upgrade() {
                Some(shared) => shared.expire(&target).await,
                None => {
                    target.settle(Err(ScheduleError::Abandoned));
                }
            }
        });
        item.set_expiry(handle.abort_handle());
    }

    async fn expire(&self, item: &Arc<ScheduledRequest>) {
        let mut inner = self.inner.lock().await;
        inner.queue.remove(item);
        let timeout = self.config.queue_item_timeout();
        if item.settle(Err(ScheduleError::QueueTimeout(timeout))) {
            warn!(id = %item.id(), ?timeout, "Scheduler::expire: request timed out in queue");
            inner.stats.total_timed_out += 1;
        }
    }

    /// Arm a reset timer unless one is pending or nothing is queued
    fn guarantee_reset_timer(self: &Arc<Self>, inner: &mut SchedulerInner) {
        if inner.queue.is_empty() {
            return;
        }
        if let Some(timer) = inner.reset_timer.as_ref().filter(|timer| timer.is_pending()) {
            debug!(fire_at = %timer.fire_at(), "Scheduler::guarantee_reset_timer: already pending");
            return;
        }
        let Some(state) = inner.tracker.state() else {
            debug!("Scheduler::guarantee_reset_timer: no rate limit state yet");
            return;
        };

        let delay = state.until_reset(self.clock.now());
        debug!(reset_at = %state.reset_at, ?delay, "Scheduler::guarantee_reset_timer: arming");
        let shared = Arc::downgrade(self);
        inner.reset_timer = Some(ResetTimer::start(state.reset_at, delay, async move {
            if let Some(shared) = shared.upgrade() {
                shared.process_queue().await;
            }
        }));
    }

    /// Replay up to `limit` queued requests, oldest first
    async fn process_queue(self: Arc<Self>) {
        let mut inner = self.inner.lock().await;
        let now = self.clock.now();
        inner.tracker.roll_if_expired(now);
        let Some(state) = inner.tracker.state() else {
            return;
        };

        let batch = inner.queue.front(state.limit as usize);
        inner.stats.total_replays += 1;
        info!(
            dispatched = batch.len(),
            queued = inner.queue.len(),
            limit = state.limit,
            "Scheduler::process_queue: replaying queue"
        );
        self.guarantee_reset_timer(&mut inner);
        drop(inner);

        for item in batch {
            tokio::spawn(item.execute());
        }
    }
}

impl Drop for SchedulerShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        let abandoned = inner.queue.drain();
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Scheduler::drop: abandoning queued requests");
        }
        for item in abandoned {
            item.settle(Err(ScheduleError::Abandoned));
        }
    }
}
