//! Calendar source for the daily-reset rule.
//!
//! "Today" is the UTC calendar date rendered as `YYYY-MM-DD`. The controller
//! takes the clock as `Arc<dyn Clock>` so tests can pin or advance the date.

use std::sync::{Mutex, PoisonError};

use time::OffsetDateTime;

pub trait Clock: Send + Sync {
    /// Current date key, `YYYY-MM-DD`.
    fn today(&self) -> String;
}

/// Wall clock, UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> String {
        OffsetDateTime::now_utc().date().to_string()
    }
}

/// Manually driven clock for tests and demos.
#[derive(Debug)]
pub struct FixedClock {
    today: Mutex<String>,
}

impl FixedClock {
    #[must_use]
    pub fn new(today: impl Into<String>) -> Self {
        Self { today: Mutex::new(today.into()) }
    }

    /// Move the clock to another date.
    pub fn set(&self, today: impl Into<String>) {
        *self.today.lock().unwrap_or_else(PoisonError::into_inner) = today.into();
    }
}

impl Clock for FixedClock {
    fn today(&self) -> String {
        self.today.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_renders_iso_date() {
        let today = SystemClock.today();
        assert_eq!(today.len(), 10);
        assert_eq!(today.as_bytes()[4], b'-');
        assert_eq!(today.as_bytes()[7], b'-');
    }

    #[test]
    fn fixed_clock_can_be_moved() {
        let clock = FixedClock::new("2026-10-18");
        assert_eq!(clock.today(), "2026-10-18");
        clock.set("2026-10-19");
        assert_eq!(clock.today(), "2026-10-19");
    }
}
