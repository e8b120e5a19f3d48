//! Ratequeue - rate-limit aware request scheduling
//!
//! Schedules outbound API calls against a remote service that enforces a
//! shared rate limit and reports it through response headers.
//!
//! # Core Concepts
//!
//! - **Admission**: every request asks the [`scheduler::Scheduler`] for one
//!   unit of the tracked budget before it runs
//! - **Server truth**: the budget is overwritten from the rate-limit headers
//!   of every response, successful or not
//! - **Queue replay**: requests that opt into the queue wait until the window
//!   resets, then run oldest first, up to the window's limit
//! - **Exactly-once settlement**: each request's future resolves once, with a
//!   result or an error
//!
//! # Modules
//!
//! - [`scheduler`] - Admission control, queue and reset timer
//! - [`executor`] - Request executor trait and HTTP implementation
//! - [`resources`] - Typed endpoint helpers
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod resources;
pub mod scheduler;

// Re-export commonly used types
pub use clock::{Clock, SystemClock, TokioClock};
pub use config::{Config, HttpConfig};
pub use error::{ApiError, ApiErrorKind, ExecuteError, HeaderError, ScheduleError};
pub use executor::{ApiResponse, HttpExecutor, RequestDefinition, RequestExecutor};
pub use scheduler::{
    RateLimitState, RateLimitValidator, RequestOptions, RequestStatus, Scheduler, SchedulerConfig, SchedulerStats,
    Settlement,
};
