//! Sliding-window admission control keyed by client identity.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Per-client sliding-window log.
///
/// Idle keys are never evicted; the map grows with the number of distinct
/// clients seen during the process lifetime.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_requests: usize,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// `max_requests` below 1 is raised to 1.
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self {
            window,
            max_requests: max_requests.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Record a request for `client` if it fits in the window.
    pub fn check_and_record(&self, client: &str) -> bool {
        self.check_and_record_at(client, Instant::now())
    }

    /// Same as [`check_and_record`](Self::check_and_record) with an explicit clock.
    pub fn check_and_record_at(&self, client: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let history = windows.entry(client.to_string()).or_default();

        while let Some(oldest) = history.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                history.pop_front();
            } else {
                break;
            }
        }

        if history.len() >= self.max_requests {
            debug!(client, count = history.len(), "Rate limit exceeded");
            return false;
        }

        history.push_back(now);
        true
    }

    /// Number of distinct clients tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
