//! services/api/src/adapters/clock.rs

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use newsgenie_core::ports::Clock;

/// Wall clock read in the service's goal-day offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// Time left until the next local midnight.
    pub fn until_next_midnight(&self) -> std::time::Duration {
        until_next_midnight(self.now())
    }
}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

pub(crate) fn until_next_midnight(now: DateTime<FixedOffset>) -> std::time::Duration {
    let next_midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| naive.and_local_timezone(*now.offset()).single());
    match next_midnight {
        Some(midnight) => (midnight - now).to_std().unwrap_or_default(),
        None => std::time::Duration::from_secs(24 * 60 * 60),
    }
}
