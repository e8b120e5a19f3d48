//! Integration tests for ratequeue
//!
//! These tests drive the scheduler end to end against an in-process fake of
//! the remote service, which enforces fixed windows and reports its budget
//! through the rate-limit headers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue};

use ratequeue::clock::{Clock, TokioClock};
use ratequeue::error::{ApiError, ApiErrorKind, ExecuteError, ScheduleError};
use ratequeue::executor::{ApiResponse, RequestDefinition, RequestExecutor};
use ratequeue::scheduler::{
    HEADER_DATE, HEADER_INTERVAL_MS, HEADER_LIMIT, HEADER_REMAINING, RateLimitState, RequestOptions, Scheduler,
    SchedulerConfig,
};

// =============================================================================
// Fake service
// =============================================================================

#[derive(Debug, Clone)]
struct Call {
    path: String,
    window: i64,
    accepted: bool,
}

#[derive(Default)]
struct ServerState {
    window: i64,
    used: u32,
    calls: Vec<Call>,
    omit_header: Option<&'static str>,
    starved: bool,
}

/// Fixed-window service: `limit` calls per `window_ms`, windows aligned to `origin`
struct FakeServer {
    clock: TokioClock,
    origin: DateTime<Utc>,
    limit: u32,
    window_ms: i64,
    state: Mutex<ServerState>,
}

impl FakeServer {
    fn new(clock: TokioClock, limit: u32, window_ms: i64) -> Self {
        Self {
            clock,
            origin: origin(),
            limit,
            window_ms,
            state: Mutex::new(ServerState::default()),
        }
    }

    fn current_window(&self, state: &mut ServerState) -> i64 {
        let window = (self.clock.now() - self.origin).num_milliseconds() / self.window_ms;
        if window != state.window {
            state.window = window;
            state.used = 0;
        }
        window
    }

    /// Spend budget on behalf of some other client of the same token
    fn consume_externally(&self, n: u32) {
        let mut state = self.state.lock().unwrap();
        self.current_window(&mut state);
        state.used += n;
    }

    /// Let other clients take every call of every window from now on
    fn starve(&self) {
        self.state.lock().unwrap().starved = true;
    }

    fn omit_header(&self, name: &'static str) {
        self.state.lock().unwrap().omit_header = Some(name);
    }

    fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn accepted_paths(&self) -> Vec<String> {
        self.calls().into_iter().filter(|c| c.accepted).map(|c| c.path).collect()
    }

    fn headers(&self, remaining: u32, now: DateTime<Utc>, omit: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_LIMIT, HeaderValue::from(self.limit));
        headers.insert(HEADER_REMAINING, HeaderValue::from(remaining));
        headers.insert(HEADER_INTERVAL_MS, HeaderValue::from(self.window_ms));
        let date = now.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        headers.insert(HEADER_DATE, HeaderValue::from_str(&date).unwrap());
        if let Some(name) = omit {
            headers.remove(name);
        }
        headers
    }
}

#[async_trait]
impl RequestExecutor for FakeServer {
    async fn execute(&self, request: &RequestDefinition) -> Result<ApiResponse, ExecuteError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap();
        let window = self.current_window(&mut state);
        let accepted = !state.starved && state.used < self.limit;
        if accepted {
            state.used += 1;
        }
        state.calls.push(Call {
            path: request.path.clone(),
            window,
            accepted,
        });
        let remaining = if state.starved { 0 } else { self.limit.saturating_sub(state.used) };
        let headers = self.headers(remaining, now, state.omit_header);

        if accepted {
            Ok(ApiResponse {
                status: 200,
                headers,
                json: serde_json::json!({"path": request.path}),
            })
        } else {
            Err(ApiError::new(429, ApiErrorKind::TokenLimitExceeded, "Rate limit exceeded")
                .with_headers(headers)
                .into())
        }
    }
}

fn origin() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
}

fn setup(limit: u32, window_ms: i64, config: SchedulerConfig) -> (Scheduler, Arc<FakeServer>) {
    let clock = TokioClock::new(origin());
    let server = Arc::new(FakeServer::new(clock, limit, window_ms));
    let scheduler = Scheduler::with_clock(config, server.clone(), Arc::new(clock));
    (scheduler, server)
}

/// Let spawned tasks run without crossing any timer deadline of interest
async fn settle_tasks() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// =============================================================================
// Queue replay
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_reset_replays_first_limit_items_in_order() {
    let (scheduler, server) = setup(2, 1000, SchedulerConfig::default());

    // Exhaust the first window
    for path in ["/warm-1", "/warm-2"] {
        let outcome = scheduler.schedule(RequestDefinition::get(path), RequestOptions::default()).await;
        assert!(outcome.is_ok());
    }
    let state = scheduler.rate_limit().await.unwrap();
    assert_eq!(state.remaining, 0);
    assert_eq!(state.reset_at, origin() + chrono::Duration::milliseconds(1000));

    // Three queued calls arrive while exhausted
    let first = scheduler.schedule(RequestDefinition::get("/1"), RequestOptions::queued());
    let second = scheduler.schedule(RequestDefinition::get("/2"), RequestOptions::queued());
    let third = scheduler.schedule(RequestDefinition::get("/3"), RequestOptions::queued());
    settle_tasks().await;
    assert_eq!(scheduler.queue_len().await, 3);
    assert_eq!(server.calls().len(), 2);

    // Reset: the first two run, the third waits for the following window
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(server.accepted_paths(), vec!["/warm-1", "/warm-2", "/1", "/2"]);
    assert_eq!(scheduler.queue_len().await, 1);
    assert!(first.await.is_ok());
    assert!(second.await.is_ok());

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(third.await.is_ok());
    assert_eq!(scheduler.queue_len().await, 0);

    let calls = server.calls();
    assert!(calls.iter().all(|c| c.accepted));
    assert_eq!(calls.last().unwrap().path, "/3");
    assert_eq!(calls.last().unwrap().window, 2);
}

#[tokio::test(start_paused = true)]
async fn test_every_request_settles_once_under_contention() {
    let (scheduler, server) = setup(3, 1000, SchedulerConfig::default());

    let settlements: Vec<_> = (0..10)
        .map(|i| scheduler.schedule(RequestDefinition::get(format!("/{}", i)), RequestOptions::queued()))
        .collect();

    let outcomes = futures::future::join_all(settlements).await;
    assert!(outcomes.iter().all(|o| o.is_ok()));

    let accepted = server.accepted_paths();
    assert_eq!(accepted.len(), 10);
    let mut unique = accepted.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 10, "a request ran successfully more than once");

    assert_eq!(scheduler.queue_len().await, 0);
    let stats = scheduler.stats().await;
    assert_eq!(stats.total_succeeded, 10);
    assert_eq!(stats.total_failed, 0);
}

// =============================================================================
// Soft retry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_remote_rejection_is_retried_transparently() {
    let (scheduler, server) = setup(5, 1000, SchedulerConfig::default());

    assert!(scheduler.schedule(RequestDefinition::get("/first"), RequestOptions::default()).await.is_ok());
    assert_eq!(scheduler.rate_limit().await.unwrap().remaining, 4);

    // Another client spends the rest of the shared budget
    server.consume_externally(4);

    let outcome = scheduler.schedule(RequestDefinition::get("/second"), RequestOptions::queued()).await;
    assert!(outcome.is_ok());

    let calls = server.calls();
    assert_eq!(calls.len(), 3);
    assert!(!calls[1].accepted);
    assert!(calls[2].accepted);
    assert_eq!(calls[2].window, 1);
    assert_eq!(scheduler.stats().await.total_soft_retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_starved_request_times_out_across_soft_retries() {
    let config = SchedulerConfig {
        queue_item_timeout_ms: 2500,
        ..Default::default()
    };
    let (scheduler, server) = setup(1, 1000, config);

    assert!(scheduler.schedule(RequestDefinition::get("/first"), RequestOptions::default()).await.is_ok());
    server.starve();

    let started = tokio::time::Instant::now();
    let outcome = scheduler.schedule(RequestDefinition::get("/starved"), RequestOptions::queued()).await;
    let waited = started.elapsed();

    // the deadline runs from first entering the queue, not from the last retry
    assert!(outcome.unwrap_err().is_queue_timeout());
    assert!(waited >= Duration::from_millis(2500) && waited < Duration::from_millis(2600));
    assert_eq!(scheduler.queue_len().await, 0);

    let rejected = server.calls().iter().filter(|c| !c.accepted).count();
    assert_eq!(rejected, 2);
    assert_eq!(scheduler.stats().await.total_soft_retries, 2);
}

// =============================================================================
// Denial, timeout and header contract
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_exhausted_without_queue_is_denied_immediately() {
    let (scheduler, server) = setup(1, 60_000, SchedulerConfig::default());
    assert!(scheduler.schedule(RequestDefinition::get("/a"), RequestOptions::default()).await.is_ok());

    let started = tokio::time::Instant::now();
    let outcome = scheduler.schedule(RequestDefinition::get("/b"), RequestOptions::default()).await;

    assert!(matches!(outcome, Err(ScheduleError::RateLimit)));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(scheduler.queue_len().await, 0);
    assert_eq!(server.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_queued_item_times_out() {
    let config = SchedulerConfig {
        queue_item_timeout_ms: 50,
        ..Default::default()
    };
    let (scheduler, server) = setup(1, 60_000, config);
    assert!(scheduler.schedule(RequestDefinition::get("/a"), RequestOptions::default()).await.is_ok());

    let started = tokio::time::Instant::now();
    let outcome = scheduler.schedule(RequestDefinition::get("/b"), RequestOptions::queued()).await;
    let waited = started.elapsed();

    assert!(outcome.unwrap_err().is_queue_timeout());
    assert!(waited >= Duration::from_millis(50) && waited < Duration::from_millis(60));
    assert_eq!(scheduler.queue_len().await, 0);
    assert_eq!(server.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_header_fails_request() {
    for name in [HEADER_LIMIT, HEADER_REMAINING, HEADER_INTERVAL_MS, HEADER_DATE] {
        let (scheduler, server) = setup(5, 1000, SchedulerConfig::default());
        server.omit_header(name);

        let outcome = scheduler.schedule(RequestDefinition::get("/a"), RequestOptions::default()).await;
        let err = outcome.unwrap_err();
        assert!(err.is_headers_missing(), "{name}: expected missing header, got {err:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_validator_sees_tracked_state() {
    let (scheduler, _server) = setup(5, 1000, SchedulerConfig::default());
    let seen: Arc<Mutex<Vec<Option<RateLimitState>>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    scheduler
        .set_validator(Some(Arc::new(move |state: Option<RateLimitState>| {
            recorder.lock().unwrap().push(state);
            let allow = state.is_none_or(|s| s.remaining > 3);
            async move { allow }
        })))
        .await;

    assert!(scheduler.schedule(RequestDefinition::get("/1"), RequestOptions::default()).await.is_ok());
    // server now reports 4 remaining: the validator still allows
    assert!(scheduler.schedule(RequestDefinition::get("/2"), RequestOptions::default()).await.is_ok());
    // 3 remaining: the validator denies a request that cannot queue
    let denied = scheduler.schedule(RequestDefinition::get("/3"), RequestOptions::default()).await;
    assert!(matches!(denied, Err(ScheduleError::RateLimit)));
    // but only advises for one that can: the tracker still has capacity
    assert!(scheduler.schedule(RequestDefinition::get("/4"), RequestOptions::queued()).await.is_ok());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert!(seen[0].is_none());
    assert_eq!(seen[1].unwrap().remaining, 4);
    assert_eq!(seen[2].unwrap().remaining, 3);
}
