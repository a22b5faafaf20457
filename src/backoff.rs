//! Delay schedules shared by the transport bootstrapper and the worker restart policy.
//!
//! Attempt semantics follow one rule everywhere: attempt `0` is the initial call and never
//! waits; the first retry (or first respawn) is attempt `1`.
//!
//! ```rust
//! use std::time::Duration;
//! use fleetline::Backoff;
//!
//! let bootstrap = Backoff::constant(Duration::from_secs(5));
//! assert_eq!(bootstrap.delay(0), Duration::ZERO);
//! assert_eq!(bootstrap.delay(9), Duration::from_secs(5));
//!
//! let respawn = Backoff::exponential(Duration::from_millis(500))
//!     .with_max(Duration::from_secs(4))
//!     .unwrap();
//! assert_eq!(respawn.delay(1), Duration::from_millis(500));
//! assert_eq!(respawn.delay(3), Duration::from_secs(2));
//! assert_eq!(respawn.delay(10), Duration::from_secs(4));
//! ```

use std::fmt;
use std::time::Duration;

/// Upper bound applied when a computed delay would overflow (1 hour).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Errors returned while configuring a backoff.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    /// Caps only make sense for growing schedules.
    #[error("with_max is only valid for exponential backoff")]
    ConstantDoesNotSupportMax,
    /// A zero cap would disable the delay entirely.
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    /// Cap below the base delay.
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase {
        /// Configured base delay.
        base: Duration,
        /// Rejected cap.
        max: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackoffKind {
    Constant { delay: Duration },
    Exponential { base: Duration, max: Option<Duration> },
}

/// Delay schedule: fixed (no growth, no jitter) or exponential with an optional cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// `base * 2^(attempt-1)`, saturating at [`MAX_BACKOFF`].
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential { base, max: None } }
    }

    /// Cap an exponential schedule.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.kind {
            BackoffKind::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay to wait before `attempt` (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match self.kind {
            BackoffKind::Constant { delay } => delay,
            BackoffKind::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                let delay = Duration::from_nanos(nanos as u64);
                max.map(|m| delay.min(m)).unwrap_or(delay).min(MAX_BACKOFF)
            }
        }
    }
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            BackoffKind::Constant { delay } => write!(f, "constant({:?})", delay),
            BackoffKind::Exponential { base, max: Some(max) } => {
                write!(f, "exponential({:?}, max={:?})", base, max)
            }
            BackoffKind::Exponential { base, max: None } => write!(f, "exponential({:?})", base),
        }
    }
}
