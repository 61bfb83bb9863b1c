//! Retry orchestration for fallible external calls.
//!
//! One place owns the escalation policy: the attempt function receives its
//! attempt index so callers can vary the request shape between tries, the
//! classifier decides whether a failure is worth another attempt, and the
//! policy decides how long to wait in between.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Whether a failure could go away on a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Backoff and attempt budget.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt (before jitter).
    pub base_delay: Duration,
    /// Multiplier applied per additional attempt. Values below 1 are treated as 1.
    pub growth: f64,
    /// Upper bound of the un-jittered delay.
    pub max_delay: Duration,
    /// Width of the uniform random jitter added on top of every delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            growth: 2.0,
            max_delay: Duration::from_secs(6),
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Default policy with a custom attempt budget.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Un-jittered wait before `attempt` (0-indexed). Zero for the first attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.growth.max(1.0).powi(exponent);
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Wait before `attempt`, jitter included.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff_for(attempt);
        if attempt == 0 {
            return backoff;
        }
        backoff + sample_jitter(self.jitter)
    }
}

fn sample_jitter(span: Duration) -> Duration {
    let span_ms = u64::try_from(span.as_millis()).unwrap_or(u64::MAX);
    if span_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=span_ms))
}

/// Why [`run_with_retries`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The classifier marked a failure permanent; `error` is passed through untouched.
    #[error("{error}")]
    Permanent { attempts: u32, error: E },

    /// Every attempt failed transiently.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    /// Number of times the attempt function ran.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The last error observed.
    pub fn into_inner(self) -> E {
        match self {
            Self::Permanent { error, .. } => error,
            Self::Exhausted { last, .. } => last,
        }
    }
}

/// Run `attempt_fn` until it succeeds, fails permanently, or the budget runs out.
///
/// `attempt_fn` receives the 0-based attempt index. A policy with
/// `max_attempts == 0` still runs once.
pub async fn run_with_retries<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    mut attempt_fn: F,
    classify: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorClass,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            debug!(
                attempt = attempt + 1,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Backing off before retry"
            );
            tokio::time::sleep(delay).await;
        }

        let error = match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let attempts = attempt + 1;

        match classify(&error) {
            ErrorClass::Permanent => {
                warn!(attempts, error = %error, "Permanent failure, not retrying");
                return Err(RetryError::Permanent { attempts, error });
            }
            ErrorClass::Transient if attempts >= max_attempts => {
                warn!(attempts, error = %error, "Retry budget exhausted");
                return Err(RetryError::Exhausted {
                    attempts,
                    last: error,
                });
            }
            ErrorClass::Transient => {
                warn!(attempt = attempts, max_attempts, error = %error, "Transient failure");
            }
        }

        attempt += 1;
    }
}
