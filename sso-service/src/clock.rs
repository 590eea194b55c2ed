//! Time sources.
//!
//! Every component that compares instants takes an `Arc<dyn Clock>` so tests
//! can drive time by hand instead of sleeping.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

use crate::services::reaper::Reaper;

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the wall clock on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Wall clock sampled at a fixed resolution.
///
/// Hot paths read a cached instant instead of asking the OS; a background
/// task owned by the returned [`Reaper`] refreshes it.
#[derive(Debug)]
pub struct CoarseClock {
    now: RwLock<DateTime<Utc>>,
}

impl CoarseClock {
    pub fn start(resolution: Duration) -> (Arc<Self>, Reaper) {
        let clock = Arc::new(Self {
            now: RwLock::new(Utc::now()),
        });
        let ticker = Arc::clone(&clock);
        let task = Reaper::spawn("clock-refresh", resolution, move || ticker.refresh());
        (clock, task)
    }

    pub fn refresh(&self) {
        *self.now.write() = Utc::now();
    }
}

impl Clock for CoarseClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Time elapsed from `since` to `now`, clamped at zero.
pub fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
