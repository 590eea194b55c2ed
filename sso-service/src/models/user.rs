//! User model and the shared handle sessions hold on to.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::auth_level::{AuthLevel, IllegalTransition, LoginEvent, Transition};
use super::directory::ShadowAccountPolicy;
use super::identity::Identity;

/// Name carried by the placeholder user of a fresh session.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Where a user's first factor was verified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Origin {
    #[default]
    Unverified,
    Local,
    Directory {
        name: String,
        shadow_policy: ShadowAccountPolicy,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a user cannot supervise themselves")]
pub struct SupervisorCycle;

/// Account as seen by the engine.
///
/// Secrets and directory bookkeeping never leave the process: they are
/// skipped when the user is serialized for a profile response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct User {
    pub id: Identity,
    pub name: String,
    pub system: bool,
    pub enabled: bool,
    pub enrolled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip)]
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    pub totp_enrolled: bool,
    #[serde(skip)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supervisor: Option<Box<User>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_desktop: Option<String>,
    #[serde(skip)]
    pub additional_info: HashMap<String, String>,
    #[serde(skip)]
    pub origin: Origin,
    auth_level: AuthLevel,
}

impl User {
    /// Creates an unsaved user. Names are case-insensitive and stored folded.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: name.as_ref().to_lowercase(),
            ..Default::default()
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER)
    }

    pub fn is_anonymous(&self) -> bool {
        self.name == ANONYMOUS_USER
    }

    pub fn auth_level(&self) -> AuthLevel {
        self.auth_level
    }

    /// Sets the level of a detached snapshot, e.g. one rebuilt from storage.
    /// Levels of users already bound to a session move only through
    /// [`UserHandle::apply`].
    pub fn with_auth_level(mut self, level: AuthLevel) -> Self {
        self.auth_level = level;
        self
    }

    /// TOTP enrolled or reachable by SMS.
    pub fn has_mfa(&self) -> bool {
        self.totp_enrolled || self.phone_number.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Same account: equal assigned ids or equal names, within the same
    /// user class (system or regular).
    pub fn same_identity(&self, other: &User) -> bool {
        let same_id = self.id.is_assigned() && self.id == other.id;
        (same_id || self.name == other.name) && self.system == other.system
    }

    pub fn set_supervisor(&mut self, supervisor: User) -> Result<(), SupervisorCycle> {
        let mut cursor = Some(&supervisor);
        while let Some(candidate) = cursor {
            if candidate.same_identity(self) {
                return Err(SupervisorCycle);
            }
            cursor = candidate.supervisor.as_deref();
        }
        self.supervisor = Some(Box::new(supervisor));
        Ok(())
    }

    /// Phone that receives second-factor challenges: the supervisor's when
    /// one is assigned, otherwise the user's own.
    pub fn approval_phone(&self) -> Option<&str> {
        match &self.supervisor {
            Some(supervisor) => supervisor.phone_number.as_deref(),
            None => self.phone_number.as_deref(),
        }
        .filter(|p| !p.is_empty())
    }
}

/// Shared, lock-protected user.
///
/// A session and any one-time codes issued for it hold clones of the same
/// handle, so an SMS approval arriving without a session cookie still
/// elevates the session that requested it.
#[derive(Debug, Clone)]
pub struct UserHandle(Arc<RwLock<User>>);

impl UserHandle {
    pub fn new(user: User) -> Self {
        Self(Arc::new(RwLock::new(user)))
    }

    pub fn snapshot(&self) -> User {
        self.0.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&User) -> R) -> R {
        f(&self.0.read())
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut User) -> R) -> R {
        f(&mut self.0.write())
    }

    pub fn auth_level(&self) -> AuthLevel {
        self.0.read().auth_level
    }

    pub fn name(&self) -> String {
        self.0.read().name.clone()
    }

    /// Runs `event` through the state machine and stores the new level.
    pub fn apply(&self, event: LoginEvent) -> Result<Transition, IllegalTransition> {
        let mut user = self.0.write();
        let step = user.auth_level.transition(event)?;
        if let Transition::Enter(level) = step {
            user.auth_level = level;
        }
        Ok(step)
    }

    pub fn same_as(&self, other: &UserHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_folded() {
        assert_eq!(User::new("Alice").name, "alice");
        assert!(User::anonymous().is_anonymous());
    }

    #[test]
    fn test_has_mfa() {
        let mut user = User::new("bob");
        assert!(!user.has_mfa());
        user.phone_number = Some(String::new());
        assert!(!user.has_mfa());
        user.phone_number = Some("+15550100".to_string());
        assert!(user.has_mfa());

        let mut totp = User::new("carol");
        totp.totp_enrolled = true;
        assert!(totp.has_mfa());
    }

    #[test]
    fn test_unsaved_users_match_by_name_only() {
        let a = User::new("a");
        let b = User::new("b");
        assert!(!a.same_identity(&b));

        let mut system_a = User::new("a");
        system_a.system = true;
        assert!(!a.same_identity(&system_a));
    }

    #[test]
    fn test_supervisor_cannot_be_self_or_cycle() {
        let mut alice = User::new("alice");
        alice.id = Identity::new(1);
        assert_eq!(alice.set_supervisor(alice.clone()), Err(SupervisorCycle));

        let mut boss = User::new("boss");
        boss.id = Identity::new(2);
        boss.supervisor = Some(Box::new(alice.clone()));
        assert_eq!(alice.set_supervisor(boss), Err(SupervisorCycle));

        let mut manager = User::new("manager");
        manager.id = Identity::new(3);
        manager.phone_number = Some("+15550199".to_string());
        alice.set_supervisor(manager).unwrap();
        assert_eq!(alice.approval_phone(), Some("+15550199"));
    }

    #[test]
    fn test_profile_serialization_hides_secrets() {
        let mut user = User::new("dave");
        user.totp_secret = Some("JBSWY3DPEHPK3PXP".to_string());
        user.password_hash = Some("$argon2id$...".to_string());
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("totp_secret").is_none());
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["auth_level"], 0);
        assert_eq!(json["id"], "0");
    }

    #[test]
    fn test_handles_share_state() {
        let handle = UserHandle::new(User::new("erin"));
        let other = handle.clone();
        handle.apply(LoginEvent::PasswordOk).unwrap();
        assert_eq!(other.auth_level(), AuthLevel::PreAuthenticated);
        assert!(handle.same_as(&other));
        assert!(!handle.same_as(&UserHandle::new(User::new("erin"))));
    }
}
