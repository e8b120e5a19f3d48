//! Scheduler for rate-limited API calls
//!
//! Admits requests against the budget the service reports, queues what cannot
//! run yet, and replays the queue in arrival order when the window resets.

mod config;
mod core;
mod queue;
mod request;
mod timer;
mod tracker;

pub use config::SchedulerConfig;
pub use self::core::{RateLimitValidator, Scheduler, SchedulerStats};
pub use queue::RequestQueue;
pub use request::{Outcome, RequestOptions, RequestStatus, ScheduledRequest, Settlement};
pub use timer::ResetTimer;
pub use tracker::{
    HEADER_DATE, HEADER_INTERVAL_MS, HEADER_LIMIT, HEADER_REMAINING, RateLimitState, RateLimitTracker,
};
