//! Cooldown window shared by triggers and opportunity categories.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Tracks the last firing and the minimum interval before the next one.
#[derive(Debug, Clone)]
pub struct Cooldown {
    interval: Duration,
    last_fired: Option<DateTime<Utc>>,
}

impl Cooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_fired(&self) -> Option<DateTime<Utc>> {
        self.last_fired
    }

    /// `now - last_fired >= interval`, or never fired.
    /// A clock that moved backwards keeps the window closed.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.last_fired {
            None => true,
            Some(last) => match now.signed_duration_since(last).to_std() {
                Ok(elapsed) => elapsed >= self.interval,
                Err(_) => false,
            },
        }
    }

    pub fn mark(&mut self, now: DateTime<Utc>) {
        self.last_fired = Some(now);
    }

    /// Earliest instant the window reopens. `None` when it is open already
    /// or when the interval is too large to be represented.
    pub fn next_ready(&self) -> Option<DateTime<Utc>> {
        let last = self.last_fired?;
        let interval = chrono::Duration::from_std(self.interval).ok()?;
        last.checked_add_signed(interval)
    }

    /// Time left before the window reopens.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        if self.is_ready(now) {
            return Duration::ZERO;
        }
        match self.last_fired {
            Some(last) => {
                let elapsed = now.signed_duration_since(last).to_std().unwrap_or_default();
                self.interval.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        }
    }
}
