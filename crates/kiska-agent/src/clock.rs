//! Wall-clock source for the time intercept.

use chrono::{Local, NaiveTime};

pub trait Clock: Send + Sync {
    /// Current local time of day.
    fn time_of_day(&self) -> NaiveTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn time_of_day(&self) -> NaiveTime {
        Local::now().time()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveTime);

impl FixedClock {
    /// `None` when the hour or minute is out of range.
    pub fn at(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }
}

impl Clock for FixedClock {
    fn time_of_day(&self) -> NaiveTime {
        self.0
    }
}
