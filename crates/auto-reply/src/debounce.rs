//! Per-session debounce timer for `collect` batching.
//!
//! Each arm replaces the previous timer task (sliding window). Every timer
//! carries a generation number; an expiry whose generation no longer matches
//! the armed one is stale and must be ignored by the caller.

use std::time::Duration;

use tokio::{task::JoinHandle, time::Instant};

use crate::policy::EffectivePolicy;

/// Why a debounce window was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The quiet period elapsed with no new arrivals.
    Quiet,
    /// The window hit the `max_wait_ms` age cap.
    Age,
    /// The backlog reached its cap.
    Cap,
}

impl FlushTrigger {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Age => "age",
            Self::Cap => "cap",
        }
    }
}

#[derive(Debug)]
struct Armed {
    generation: u64,
    window_started: Instant,
    deadline: Instant,
    age_capped: bool,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub struct Debouncer {
    next_generation: u64,
    armed: Option<Armed>,
}

impl Debouncer {
    /// Start or slide the window. `spawn` receives the new generation and
    /// deadline and must return the timer task.
    ///
    /// Returns the deadline the timer was armed for.
    pub fn arm<F>(&mut self, now: Instant, policy: &EffectivePolicy, spawn: F) -> Instant
    where
        F: FnOnce(u64, Instant) -> JoinHandle<()>,
    {
        let window_started = match self.armed.take() {
            Some(prev) => {
                prev.handle.abort();
                prev.window_started
            },
            None => now,
        };

        let mut deadline = now + policy.debounce();
        let mut age_capped = false;
        if let Some(max_wait) = policy.max_wait() {
            let limit = window_started + max_wait;
            if limit < deadline {
                deadline = limit.max(now);
                age_capped = true;
            }
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let handle = spawn(generation, deadline);
        self.armed = Some(Armed {
            generation,
            window_started,
            deadline,
            age_capped,
            handle,
        });
        deadline
    }

    /// Disarm and abort the timer task. Returns whether a timer was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.handle.abort();
                true
            },
            None => false,
        }
    }

    /// Claim an expiry. Returns the trigger when `generation` is the armed
    /// one, clearing it; `None` for a stale expiry.
    ///
    /// Called from inside the timer task, so the handle isn't aborted.
    pub fn take_expired(&mut self, generation: u64) -> Option<FlushTrigger> {
        match &self.armed {
            Some(armed) if armed.generation == generation => {
                let trigger = if armed.age_capped {
                    FlushTrigger::Age
                } else {
                    FlushTrigger::Quiet
                };
                self.armed = None;
                Some(trigger)
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Time left until the armed deadline.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.armed
            .as_ref()
            .map(|a| a.deadline.saturating_duration_since(now))
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
