//! Per-slot respawn budget.

use crate::clock::Clock;
use crate::Backoff;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// How the primary reacts when a worker exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Respawn immediately, forever.
    Always,
    /// At most `max_restarts` respawns per slot inside a sliding `window`. The n-th
    /// respawn inside the window waits `backoff.delay(n)`; one more exit and the slot is
    /// degraded.
    Bounded { max_restarts: usize, window: Duration, backoff: Backoff },
}

impl Default for RestartPolicy {
    fn default() -> Self {
        let base = Backoff::exponential(Duration::from_millis(500));
        RestartPolicy::Bounded {
            max_restarts: 5,
            window: Duration::from_secs(60),
            backoff: base.with_max(Duration::from_secs(30)).unwrap_or(base),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Spawn a replacement after `delay`. `restarts` counts respawns inside the window
    /// (all respawns for [`RestartPolicy::Always`]).
    Restart { delay: Duration, restarts: usize },
    /// Budget exhausted; leave the slot empty.
    Degrade { restarts: usize },
}

/// Applies a [`RestartPolicy`] to a fixed set of slots.
#[derive(Debug)]
pub struct RestartTracker {
    policy: RestartPolicy,
    clock: Arc<dyn Clock>,
    history: Vec<VecDeque<u64>>,
    totals: Vec<usize>,
}

impl RestartTracker {
    pub fn new(policy: RestartPolicy, slots: usize, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock, history: vec![VecDeque::new(); slots], totals: vec![0; slots] }
    }

    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }

    /// Total respawns granted to `slot` since startup.
    pub fn total_restarts(&self, slot: usize) -> usize {
        self.totals.get(slot).copied().unwrap_or(0)
    }

    /// Record an exit of `slot` and decide what to do about it.
    pub fn on_exit(&mut self, slot: usize) -> RestartDecision {
        if slot >= self.history.len() {
            self.history.resize(slot + 1, VecDeque::new());
            self.totals.resize(slot + 1, 0);
        }
        match self.policy {
            RestartPolicy::Always => {
                self.totals[slot] += 1;
                RestartDecision::Restart { delay: Duration::ZERO, restarts: self.totals[slot] }
            }
            RestartPolicy::Bounded { max_restarts, window, backoff } => {
                let now = self.clock.now_millis();
                let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
                let recent = &mut self.history[slot];
                while recent.front().is_some_and(|&t| now.saturating_sub(t) >= window_ms) {
                    recent.pop_front();
                }
                if recent.len() >= max_restarts {
                    return RestartDecision::Degrade { restarts: recent.len() };
                }
                recent.push_back(now);
                self.totals[slot] += 1;
                let restarts = recent.len();
                RestartDecision::Restart { delay: backoff.delay(restarts), restarts }
            }
        }
    }
}
