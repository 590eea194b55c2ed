//! Identity store contract.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::models::{Identity, IdentitySequence, User};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    ById(Identity),
    ByName(String),
    /// Account with the given name that has a local password hash.
    LocalAccount(String),
}

impl UserQuery {
    pub fn matches(&self, user: &User) -> bool {
        match self {
            UserQuery::ById(id) => user.id == *id,
            UserQuery::ByName(name) => user.name == *name,
            UserQuery::LocalAccount(name) => {
                user.name == *name && user.password_hash.as_deref().is_some_and(|h| !h.is_empty())
            }
        }
    }
}

/// Fields written by an enrollment commit.
///
/// `enabled` is `None` when the stored flag must be left as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub enabled: Option<bool>,
    pub enrolled: bool,
    pub phone_number: Option<String>,
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    pub totp_enrolled: bool,
    pub personal_desktop: Option<String>,
    pub additional_info: HashMap<String, String>,
}

impl UserRecord {
    pub fn from_user(user: &User) -> Self {
        Self {
            name: user.name.clone(),
            enabled: Some(user.enabled),
            enrolled: user.enrolled,
            phone_number: user.phone_number.clone(),
            totp_secret: user.totp_secret.clone(),
            totp_enabled: user.totp_enabled,
            totp_enrolled: user.totp_enrolled,
            personal_desktop: user.personal_desktop.clone(),
            additional_info: user.additional_info.clone(),
        }
    }

    pub fn apply_to(&self, user: &mut User) {
        user.name = self.name.clone();
        if let Some(enabled) = self.enabled {
            user.enabled = enabled;
        }
        user.enrolled = self.enrolled;
        user.phone_number = self.phone_number.clone();
        user.totp_secret = self.totp_secret.clone();
        user.totp_enabled = self.totp_enabled;
        user.totp_enrolled = self.totp_enrolled;
        user.personal_desktop = self.personal_desktop.clone();
        user.additional_info = self.additional_info.clone();
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn retrieve_one(&self, query: &UserQuery) -> Result<Option<User>, anyhow::Error>;
    async fn update(&self, query: &UserQuery, record: &UserRecord) -> Result<(), anyhow::Error>;
    async fn create(&self, record: &UserRecord) -> Result<User, anyhow::Error>;
    /// Enabled, non-system users; each one takes a license seat.
    async fn count_enabled_seats(&self) -> Result<u64, anyhow::Error>;
}

/// In-memory repository.
#[derive(Debug, Default)]
pub struct MockUserRepository {
    users: Mutex<Vec<User>>,
    sequence: IdentitySequence,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MockUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `user` under a fresh id and returns the stored copy.
    pub fn insert(&self, mut user: User) -> User {
        user.id = self.sequence.next();
        self.users.lock().push(user.clone());
        user
    }

    pub fn users(&self) -> Vec<User> {
        self.users.lock().clone()
    }

    pub fn find(&self, name: &str) -> Option<User> {
        self.users.lock().iter().find(|u| u.name == name).cloned()
    }

    /// Number of `update` and `create` calls that reached storage.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mock repository unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MockUserRepository {
    async fn retrieve_one(&self, query: &UserQuery) -> Result<Option<User>, anyhow::Error> {
        self.check()?;
        Ok(self.users.lock().iter().find(|u| query.matches(u)).cloned())
    }

    async fn update(&self, query: &UserQuery, record: &UserRecord) -> Result<(), anyhow::Error> {
        self.check()?;
        let mut users = self.users.lock();
        let user = users
            .iter_mut()
            .find(|u| query.matches(u))
            .ok_or_else(|| anyhow::anyhow!("no user matches {:?}", query))?;
        record.apply_to(user);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create(&self, record: &UserRecord) -> Result<User, anyhow::Error> {
        self.check()?;
        let mut users = self.users.lock();
        if users.iter().any(|u| u.name == record.name) {
            return Err(anyhow::anyhow!("user {} already exists", record.name));
        }
        let mut user = User::new(&record.name);
        record.apply_to(&mut user);
        user.id = self.sequence.next();
        users.push(user.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(user)
    }

    async fn count_enabled_seats(&self) -> Result<u64, anyhow::Error> {
        self.check()?;
        let used = self
            .users
            .lock()
            .iter()
            .filter(|u| u.enabled && !u.system)
            .count();
        Ok(used as u64)
    }
}
