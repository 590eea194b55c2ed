use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Installed product license.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub seats: u64,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl License {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Whether one more enabled user fits when `used` seats are taken.
    pub fn has_free_seat(&self, used: u64) -> bool {
        used < self.seats
    }
}
