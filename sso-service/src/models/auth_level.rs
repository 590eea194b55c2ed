use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Trust tier of a session's user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthLevel {
    #[default]
    Anonymous = 0,
    PreAuthenticated = 1,
    Authenticated = 2,
}

/// Outcome of a login step, fed into [`AuthLevel::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEvent {
    PasswordOk,
    TotpOk,
    SmsOk,
    SmsPending,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Stay at or move up to the given level.
    Enter(AuthLevel),
    /// The session must be destroyed.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("login event {event:?} is not allowed at level {from:?}")]
pub struct IllegalTransition {
    pub from: AuthLevel,
    pub event: LoginEvent,
}

impl AuthLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AuthLevel::Anonymous),
            1 => Some(AuthLevel::PreAuthenticated),
            2 => Some(AuthLevel::Authenticated),
            _ => None,
        }
    }

    /// The login state machine.
    ///
    /// A second factor is only accepted after the password step, and no event
    /// ever yields a lower level than `self`.
    pub fn transition(self, event: LoginEvent) -> Result<Transition, IllegalTransition> {
        use AuthLevel::*;
        use LoginEvent::*;

        let next = match (self, event) {
            (_, Denied) => return Ok(Transition::Terminate),
            (Anonymous, PasswordOk) => PreAuthenticated,
            (Anonymous, _) => return Err(IllegalTransition { from: self, event }),
            (PreAuthenticated, TotpOk | SmsOk) => Authenticated,
            (Authenticated, TotpOk | SmsOk) => Authenticated,
            (level, PasswordOk | SmsPending) => level,
        };

        debug_assert!(next >= self);
        Ok(Transition::Enter(next))
    }
}

impl Serialize for AuthLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for AuthLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        AuthLevel::from_u8(raw)
            .ok_or_else(|| de::Error::custom(format!("invalid auth level: {}", raw)))
    }
}
