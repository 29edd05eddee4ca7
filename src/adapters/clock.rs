//! Wall-clock adapters.
//!
//! - [`SystemClock`] reads the local time zone, as the time-window rules
//!   are written in local time.
//! - [`FixedClock`] is set by hand, for tests and replay.

use std::sync::{Mutex, PoisonError};

use chrono::{Local, NaiveDateTime, TimeDelta};

use crate::app::ports::Clock;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// `hh:mm` on an arbitrary fixed day.  Out-of-range values wrap.
    pub fn at_hm(hour: u32, minute: u32) -> Self {
        let midnight = NaiveDateTime::default();
        let offset = TimeDelta::minutes(i64::from(hour % 24) * 60 + i64::from(minute % 60));
        Self::at(midnight + offset)
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
