use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

/// Numeric record identifier.
///
/// Serialized as a JSON string (`"42"`) so that large values survive
/// JavaScript clients; equality and ordering are numeric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(i64);

impl Identity {
    /// Identity of a record that has not been persisted yet.
    pub const UNASSIGNED: Identity = Identity(0);

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    pub fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identity {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Identity)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Hands out strictly increasing identities.
#[derive(Debug)]
pub struct IdentitySequence(AtomicI64);

impl IdentitySequence {
    pub fn starting_at(first: i64) -> Self {
        Self(AtomicI64::new(first))
    }

    pub fn next(&self) -> Identity {
        Identity(self.0.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for IdentitySequence {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
