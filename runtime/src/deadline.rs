use crate::Clock;
use std::time::{Duration, Instant};

/// Furthest a [Deadline] may be armed into the future (roughly one century).
const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// A point in time after which some work should be abandoned.
///
/// Every timeout decision reduces to comparing the [Clock] against a [Deadline],
/// which never blocks.
#[derive(Clone, Debug)]
pub struct Deadline<C: Clock> {
    clock: C,
    at: Instant,
}

impl<C: Clock> Deadline<C> {
    /// Create a deadline that expires `duration` from now.
    pub fn new(clock: C, duration: Duration) -> Self {
        let at = expiry(&clock, duration);
        Self { clock, at }
    }

    /// Re-arm the deadline to expire `duration` from now.
    pub fn rearm(&mut self, duration: Duration) {
        self.at = expiry(&self.clock, duration);
    }

    /// Returns `true` once the deadline has passed.
    pub fn is_due(&self) -> bool {
        self.clock.current() >= self.at
    }

    /// Time left until the deadline (zero once due).
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(self.clock.current())
    }

    /// The instant at which the deadline expires.
    pub fn at(&self) -> Instant {
        self.at
    }

    /// The clock the deadline is measured against.
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

/// `duration` from now, saturating to the furthest representable instant.
fn expiry<C: Clock>(clock: &C, duration: Duration) -> Instant {
    let now = clock.current();
    let mut duration = duration.min(MAX_DURATION);
    loop {
        if let Some(at) = now.checked_add(duration) {
            return at;
        }
        duration /= 2;
    }
}
