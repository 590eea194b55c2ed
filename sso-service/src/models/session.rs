use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::SecretString;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use super::auth_level::{AuthLevel, IllegalTransition, LoginEvent};
use super::user::UserHandle;
use crate::clock::elapsed;

/// Well-known side-data keys.
pub mod keys {
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const REDIRECT_URI: &str = "redirect_uri";
    /// Last automatic second-factor SMS.
    pub const SMS_SENT: &str = "sms_sent";
    /// Last enrollment SMS.
    pub const LAST_SMS_REQUEST: &str = "last_sms_request";
    /// Phone number waiting for enrollment verification.
    pub const PHONE_NUMBER: &str = "phone_number";
    /// Set while an enrollment commit is being written.
    pub const COMMITTING: &str = "committing";
}

/// Value stored in a session's side-data.
#[derive(Debug, Clone)]
pub enum SessionValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Time(DateTime<Utc>),
    Secret(SecretString),
    Opaque(serde_json::Value),
}

/// Server-side login session.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    last_access: RwLock<DateTime<Utc>>,
    user: RwLock<UserHandle>,
    data: RwLock<HashMap<String, SessionValue>>,
}

impl Session {
    pub(crate) fn new(user: UserHandle, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            last_access: RwLock::new(now),
            user: RwLock::new(user),
            data: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        *self.last_access.read()
    }

    pub(crate) fn touch(&self, now: DateTime<Utc>) {
        let mut last = self.last_access.write();
        if now > *last {
            *last = now;
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>, idle: Duration, total: Duration) -> bool {
        elapsed(self.created_at, now) < total && elapsed(self.last_access(), now) < idle
    }

    pub fn user(&self) -> UserHandle {
        self.user.read().clone()
    }

    pub fn auth_level(&self) -> AuthLevel {
        self.user.read().auth_level()
    }

    /// Replaces the bound user, which is only allowed while the session is
    /// still anonymous.
    pub(crate) fn bind_user(&self, user: UserHandle) -> Result<(), IllegalTransition> {
        let mut bound = self.user.write();
        let from = bound.auth_level();
        if from != AuthLevel::Anonymous {
            return Err(IllegalTransition {
                from,
                event: LoginEvent::PasswordOk,
            });
        }
        *bound = user;
        Ok(())
    }

    fn value<T>(&self, key: &str, pick: impl FnOnce(&SessionValue) -> Option<T>) -> Option<T> {
        self.data.read().get(key).and_then(pick)
    }

    fn set_value(&self, key: &str, value: SessionValue) {
        self.data.write().insert(key.to_string(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn remove_value(&self, key: &str) -> Option<SessionValue> {
        self.data.write().remove(key)
    }

    /// Stamps `now` under `key` unless the previous stamp is younger than
    /// `window`. Returns the replaced stamp, or how long to wait.
    pub(crate) fn stamp_if_elapsed(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Option<DateTime<Utc>>, Duration> {
        let mut data = self.data.write();
        let previous = match data.get(key) {
            Some(SessionValue::Time(t)) => Some(*t),
            _ => None,
        };
        if let Some(previous) = previous {
            let since = elapsed(previous, now);
            if since < window {
                return Err(window - since);
            }
        }
        data.insert(key.to_string(), SessionValue::Time(now));
        Ok(previous)
    }

    /// Puts back a stamp replaced by [`Session::stamp_if_elapsed`].
    pub(crate) fn restore_stamp(&self, key: &str, previous: Option<DateTime<Utc>>) {
        match previous {
            Some(at) => self.set_time(key, at),
            None => {
                self.remove_value(key);
            }
        }
    }

    /// Sets a boolean flag, failing if it is already set.
    pub(crate) fn try_claim(&self, key: &str) -> bool {
        let mut data = self.data.write();
        if matches!(data.get(key), Some(SessionValue::Bool(true))) {
            return false;
        }
        data.insert(key.to_string(), SessionValue::Bool(true));
        true
    }

    pub fn string_value(&self, key: &str) -> Option<String> {
        self.value(key, |v| match v {
            SessionValue::Str(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn string_value_or(&self, key: &str, default: &str) -> String {
        self.string_value(key).unwrap_or_else(|| default.to_string())
    }

    pub fn set_string(&self, key: &str, value: impl Into<String>) {
        self.set_value(key, SessionValue::Str(value.into()));
    }

    pub fn bool_value(&self, key: &str) -> Option<bool> {
        self.value(key, |v| match v {
            SessionValue::Bool(b) => Some(*b),
            _ => None,
        })
    }

    pub fn bool_value_or(&self, key: &str, default: bool) -> bool {
        self.bool_value(key).unwrap_or(default)
    }

    pub fn set_bool(&self, key: &str, value: bool) {
        self.set_value(key, SessionValue::Bool(value));
    }

    pub fn int_value(&self, key: &str) -> Option<i64> {
        self.value(key, |v| match v {
            SessionValue::Int(i) => Some(*i),
            _ => None,
        })
    }

    pub fn int_value_or(&self, key: &str, default: i64) -> i64 {
        self.int_value(key).unwrap_or(default)
    }

    pub fn set_int(&self, key: &str, value: i64) {
        self.set_value(key, SessionValue::Int(value));
    }

    pub fn time_value(&self, key: &str) -> Option<DateTime<Utc>> {
        self.value(key, |v| match v {
            SessionValue::Time(t) => Some(*t),
            _ => None,
        })
    }

    pub fn time_value_or(&self, key: &str, default: DateTime<Utc>) -> DateTime<Utc> {
        self.time_value(key).unwrap_or(default)
    }

    pub fn set_time(&self, key: &str, value: DateTime<Utc>) {
        self.set_value(key, SessionValue::Time(value));
    }

    pub fn secret_value(&self, key: &str) -> Option<SecretString> {
        self.value(key, |v| match v {
            SessionValue::Secret(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn set_secret(&self, key: &str, value: SecretString) {
        self.set_value(key, SessionValue::Secret(value));
    }

    pub fn opaque_value(&self, key: &str) -> Option<serde_json::Value> {
        self.value(key, |v| match v {
            SessionValue::Opaque(o) => Some(o.clone()),
            _ => None,
        })
    }

    pub fn set_opaque(&self, key: &str, value: serde_json::Value) {
        self.set_value(key, SessionValue::Opaque(value));
    }
}
