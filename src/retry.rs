//! Bounded retry loop.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - The sleeper is invoked between attempts only, so a policy with `n` attempts sleeps at
//!   most `n - 1` times; exhaustion returns right after the last failure.
//! - `on_failure` observes every failed attempt (for logging/telemetry) before the wait.
//!
//! ```rust
//! use std::time::Duration;
//! use fleetline::{Backoff, RetryPolicy, InstantSleeper};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .backoff(Backoff::constant(Duration::from_secs(5)))
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let result: Result<(), _> = policy
//!     .execute(|_attempt| async { Err::<(), _>("refused") }, |_failure| {})
//!     .await;
//! assert_eq!(result.unwrap_err().attempts, 3);
//! # });
//! ```

use crate::clock::{Sleeper, TokioSleeper};
use crate::Backoff;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Failed attempt as seen by the `on_failure` observer.
#[derive(Debug)]
pub struct AttemptFailure<'a, E> {
    /// 1-based attempt number.
    pub attempt: usize,
    pub max_attempts: usize,
    pub error: &'a E,
    /// Wait before the next attempt; `None` when this was the last one.
    pub next_delay: Option<Duration>,
}

/// Returned once every attempt has failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("gave up after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E: std::fmt::Display> {
    pub attempts: usize,
    pub last_error: E,
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

/// Attempt bound, delay schedule and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Run `operation` until it succeeds or the attempt bound is reached.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, E, Fut, Op, Obs>(
        &self,
        mut operation: Op,
        mut on_failure: Obs,
    ) -> Result<T, RetryExhausted<E>>
    where
        E: std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut(usize) -> Fut,
        Obs: FnMut(AttemptFailure<'_, E>),
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    let last = attempt >= self.max_attempts;
                    let next_delay = (!last).then(|| self.backoff.delay(attempt));
                    on_failure(AttemptFailure {
                        attempt,
                        max_attempts: self.max_attempts,
                        error: &error,
                        next_delay,
                    });
                    match next_delay {
                        None => return Err(RetryExhausted { attempts: attempt, last_error: error }),
                        Some(delay) => self.sleeper.sleep(delay).await,
                    }
                }
            }
            attempt += 1;
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder {
    max_attempts: usize,
    backoff: Backoff,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    /// Defaults: 3 attempts, 1s constant delay, tokio sleeper.
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::constant(Duration::from_secs(1)),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy { max_attempts: self.max_attempts, backoff: self.backoff, sleeper: self.sleeper })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
