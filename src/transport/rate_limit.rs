use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::envelope::DataCategory;

pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Longest delay accepted from a collector header.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Resume instants per data category. `None` is the "all categories" key.
#[derive(Debug, Default)]
pub struct RateLimiter {
    limits: Mutex<HashMap<Option<DataCategory>, Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new() -> Self {
        RateLimiter::default()
    }

    /// Applies the rate limit headers of a collector response.
    pub fn update_from_response(
        &self,
        status: u16,
        rate_limits: Option<&str>,
        retry_after: Option<&str>,
    ) {
        let now = Instant::now();
        if let Some(header) = rate_limits {
            for (category, delay) in parse_rate_limits(header) {
                self.insert(category, deadline(now, delay));
            }
        } else if status == 429 {
            let delay = retry_after.map_or(DEFAULT_RETRY_AFTER, |value| {
                parse_retry_after(value, Utc::now())
            });
            self.insert(None, deadline(now, delay));
        }
    }

    fn insert(&self, category: Option<DataCategory>, until: Instant) {
        let mut limits = self.limits.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = limits.entry(category).or_insert(until);
        if *entry < until {
            *entry = until;
        }
        debug!(
            "TRANSPORT | Rate limited {} for {:?}",
            category.map_or("all categories", DataCategory::as_str),
            until.saturating_duration_since(Instant::now())
        );
    }

    #[must_use]
    pub fn is_rate_limited(&self, category: DataCategory) -> bool {
        let now = Instant::now();
        let limits = self.limits.lock().unwrap_or_else(PoisonError::into_inner);
        [Some(category), None]
            .iter()
            .filter_map(|key| limits.get(key))
            .any(|until| *until > now)
    }

    #[must_use]
    pub fn any_rate_limited(&self) -> bool {
        let now = Instant::now();
        let limits = self.limits.lock().unwrap_or_else(PoisonError::into_inner);
        limits.values().any(|until| *until > now)
    }

    /// Time left until `category` may be sent again.
    #[must_use]
    pub fn retry_after(&self, category: DataCategory) -> Option<Duration> {
        let now = Instant::now();
        let limits = self.limits.lock().unwrap_or_else(PoisonError::into_inner);
        [Some(category), None]
            .iter()
            .filter_map(|key| limits.get(key))
            .filter(|until| **until > now)
            .max()
            .map(|until| until.saturating_duration_since(now))
    }

    pub fn clear(&self) {
        self.limits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_RETRY_AFTER))
        .or_else(|| now.checked_add(MAX_RETRY_AFTER))
        .unwrap_or(now)
}

/// Seconds from a header, capped at [`MAX_RETRY_AFTER`]. Negative, NaN and
/// unparsable values yield `None`.
fn delay_from_secs(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs < 0.0 {
        return None;
    }
    Some(
        Duration::try_from_secs_f64(secs)
            .map_or(MAX_RETRY_AFTER, |delay| delay.min(MAX_RETRY_AFTER)),
    )
}

/// Parses `X-Sentry-Rate-Limits`: `retry_after:cat1;cat2:scope:reason, ...`.
/// An empty category list applies to every category; unknown categories are
/// ignored.
#[must_use]
pub fn parse_rate_limits(header: &str) -> Vec<(Option<DataCategory>, Duration)> {
    let mut result = Vec::new();
    for limit in header.split(',') {
        let limit = limit.trim();
        if limit.is_empty() {
            continue;
        }
        let mut parts = limit.split(':');
        let delay = parts
            .next()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .and_then(delay_from_secs)
            .unwrap_or(DEFAULT_RETRY_AFTER);
        let categories = parts.next().unwrap_or("").trim();
        if categories.is_empty() {
            result.push((None, delay));
            continue;
        }
        for category in categories.split(';') {
            match category.trim().parse::<DataCategory>() {
                Ok(category) => result.push((Some(category), delay)),
                Err(()) => debug!("TRANSPORT | Ignoring unknown rate limit category {category}"),
            }
        }
    }
    result
}

/// `Retry-After` as delay seconds or an HTTP date; defaults to 60 s.
#[must_use]
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Duration {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return delay_from_secs(secs).unwrap_or(DEFAULT_RETRY_AFTER);
    }
    match DateTime::parse_from_rfc2822(value) {
        Ok(date) => (date.with_timezone(&Utc) - now)
            .to_std()
            .map_or(Duration::ZERO, |delay| delay.min(MAX_RETRY_AFTER)),
        Err(_) => DEFAULT_RETRY_AFTER,
    }
}
