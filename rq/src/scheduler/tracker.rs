//! Local rate-limit bookkeeping
//!
//! Holds the last known budget reported by the service and predicts whether a
//! call may proceed without a network round trip.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;
use tracing::debug;

use crate::error::HeaderError;

pub const HEADER_LIMIT: &str = "x-rate-limit-api-token-max";
pub const HEADER_REMAINING: &str = "x-rate-limit-api-token-remaining";
pub const HEADER_INTERVAL_MS: &str = "x-rate-limit-api-token-interval-ms";
pub const HEADER_DATE: &str = "date";

/// Snapshot of the shared call budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitState {
    /// Calls allowed per window
    pub limit: u32,
    /// Calls left in the current window; local decrements may overshoot
    pub remaining: i64,
    /// Instant after which a fresh window begins
    pub reset_at: DateTime<Utc>,
    /// Window length, used to predict the next reset on rollover
    #[serde(with = "duration_ms")]
    pub window: Duration,
}

impl RateLimitState {
    pub fn is_window_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }

    pub fn has_capacity(&self) -> bool {
        self.remaining > 0
    }

    /// Time left until the window resets, zero if already past
    pub fn until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Tracks the budget between responses; unset until the first response
#[derive(Debug, Clone)]
pub struct RateLimitTracker {
    state: Option<RateLimitState>,
    default_limit: u32,
    default_window: Duration,
}

impl RateLimitTracker {
    pub fn new(default_limit: u32, default_window: Duration) -> Self {
        Self {
            state: None,
            default_limit,
            default_window,
        }
    }

    pub fn state(&self) -> Option<RateLimitState> {
        self.state
    }

    /// Overwrite the tracked budget from response headers
    ///
    /// Server truth always replaces local prediction, including a locally
    /// rolled `reset_at`.
    pub fn record_from_response(&mut self, headers: &HeaderMap) -> Result<RateLimitState, HeaderError> {
        let limit: u32 = parse_number(headers, HEADER_LIMIT)?;
        let remaining: i64 = parse_number(headers, HEADER_REMAINING)?;
        let interval_ms: u64 = parse_number(headers, HEADER_INTERVAL_MS)?;
        let date = parse_date(headers)?;

        let window = Duration::from_millis(interval_ms);
        let reset_at = advance(date, window).ok_or_else(|| HeaderError::Invalid {
            name: HEADER_INTERVAL_MS,
            value: interval_ms.to_string(),
        })?;
        let state = RateLimitState {
            limit,
            remaining,
            reset_at,
            window,
        };
        debug!(?state, "RateLimitTracker::record_from_response: recorded");
        self.state = Some(state);
        Ok(state)
    }

    /// Start a fresh window if the current one has expired
    pub fn roll_if_expired(&mut self, now: DateTime<Utc>) -> bool {
        match self.state.as_mut() {
            Some(state) if state.is_window_expired(now) => {
                state.remaining = i64::from(state.limit);
                state.reset_at = advance(now, state.window).unwrap_or(DateTime::<Utc>::MAX_UTC);
                debug!(?state, "RateLimitTracker::roll_if_expired: window rolled forward");
                true
            }
            _ => false,
        }
    }

    /// Take one unit of capacity if any is available
    ///
    /// Unknown state is treated optimistically: a default budget is assumed
    /// and one unit consumed from it.
    pub fn try_consume(&mut self, now: DateTime<Utc>) -> bool {
        let admissible = match &self.state {
            None => true,
            Some(state) => state.has_capacity() || state.is_window_expired(now),
        };
        if !admissible {
            debug!("RateLimitTracker::try_consume: exhausted");
            return false;
        }

        self.roll_if_expired(now);
        let default_limit = self.default_limit;
        let default_window = self.default_window;
        let state = self.state.get_or_insert_with(|| RateLimitState {
            limit: default_limit,
            remaining: i64::from(default_limit),
            reset_at: advance(now, default_window).unwrap_or(DateTime::<Utc>::MAX_UTC),
            window: default_window,
        });
        state.remaining -= 1;
        debug!(remaining = state.remaining, "RateLimitTracker::try_consume: consumed");
        true
    }
}

/// `at + window`, or `None` if the result does not fit a `DateTime`
fn advance(at: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    let delta = chrono::Duration::from_std(window).ok()?;
    at.checked_add_signed(delta)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, HeaderError> {
    let value = headers.get(name).ok_or(HeaderError::Missing(name))?;
    value.to_str().map_err(|_| HeaderError::Invalid {
        name,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    })
}

fn parse_number<T: std::str::FromStr>(headers: &HeaderMap, name: &'static str) -> Result<T, HeaderError> {
    let raw = header_str(headers, name)?;
    raw.trim().parse().map_err(|_| HeaderError::Invalid {
        name,
        value: raw.to_string(),
    })
}

fn parse_date(headers: &HeaderMap) -> Result<DateTime<Utc>, HeaderError> {
    let raw = header_str(headers, HEADER_DATE)?;
    DateTime::parse_from_rfc2822(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| HeaderError::Invalid {
            name: HEADER_DATE,
            value: raw.to_string(),
        })
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
