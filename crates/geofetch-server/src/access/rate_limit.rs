//! Sliding-window rate limiter keyed by client identity.
//!
//! Each client key owns a queue of request timestamps; entries older than
//! the window are dropped on every check. The map sits behind a mutex so
//! concurrent requests from the same client are counted exactly once each.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Time source for the limiter.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Outcome of [`RateLimiter::check_and_record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request recorded; `remaining` more fit in the current window.
    Allowed { remaining: u32 },
    /// Over the cap until the oldest recorded request ages out.
    Limited { retry_after: Duration },
}

/// A rate limiter with a per-key cap and window duration.
#[derive(Debug)]
pub struct RateLimiter {
    /// Maximum requests allowed within the window.
    max_requests: u32,
    /// Duration of the sliding window.
    window: Duration,
    clock: Arc<dyn Clock>,
    /// Per-key tracking: key → request timestamps, oldest first.
    entries: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter on the system clock.
    ///
    /// * `max_requests` - Maximum allowed requests within the window.
    /// * `window` - Window duration.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self::with_clock(max_requests, window, Arc::new(SystemClock))
    }

    pub fn with_clock(max_requests: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_requests,
            window,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Check if a request is allowed for the given key, and record it if so.
    pub fn check_and_record(&self, key: &str) -> RateDecision {
        let now = self.clock.now();
        let window = self.window;
        let mut entries = self.lock();
        let attempts = entries.entry(key.to_string()).or_default();

        // Remove expired entries
        while attempts
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            attempts.pop_front();
        }

        if attempts.len() as u32 >= self.max_requests {
            let retry_after = attempts
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(window);
            return RateDecision::Limited { retry_after };
        }

        attempts.push_back(now);
        RateDecision::Allowed {
            remaining: self.max_requests - attempts.len() as u32,
        }
    }

    /// Garbage-collect expired entries to prevent memory growth.
    pub fn gc(&self) {
        let now = self.clock.now();
        let window = self.window;
        self.lock().retain(|_, attempts| {
            attempts.retain(|t| now.saturating_duration_since(*t) < window);
            !attempts.is_empty()
        });
    }

    /// Number of client keys currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<Instant>>> {
        // The map holds plain timestamps, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Manually advanced clock for tests.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}
