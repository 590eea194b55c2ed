//! Directory (LDAP-like) verification contract.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::models::DirectoryDescriptor;
use crate::utils::password::Password;

pub type DirectoryAttributes = HashMap<String, String>;

#[async_trait]
pub trait DirectoryAuthenticator: Send + Sync {
    fn descriptor(&self) -> &DirectoryDescriptor;

    fn configured(&self) -> bool {
        self.descriptor().configured()
    }

    /// `Ok(Some(attributes))` on a successful bind, `Ok(None)` when the
    /// directory rejects the credentials.
    async fn authenticate(
        &self,
        username: &str,
        password: &Password,
    ) -> Result<Option<DirectoryAttributes>, anyhow::Error>;
}

/// Directory backed by a fixed account table.
#[derive(Debug)]
pub struct MockDirectory {
    descriptor: DirectoryDescriptor,
    accounts: HashMap<String, (String, DirectoryAttributes)>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl MockDirectory {
    pub fn new(descriptor: DirectoryDescriptor) -> Self {
        Self {
            descriptor,
            accounts: HashMap::new(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_account(
        mut self,
        username: &str,
        password: &str,
        attributes: DirectoryAttributes,
    ) -> Self {
        self.accounts
            .insert(username.to_string(), (password.to_string(), attributes));
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryAuthenticator for MockDirectory {
    fn descriptor(&self) -> &DirectoryDescriptor {
        &self.descriptor
    }

    async fn authenticate(
        &self,
        username: &str,
        password: &Password,
    ) -> Result<Option<DirectoryAttributes>, anyhow::Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("directory {} unreachable", self.descriptor.name));
        }
        Ok(self
            .accounts
            .get(username)
            .filter(|(expected, _)| expected == password.as_str())
            .map(|(_, attributes)| attributes.clone()))
    }
}
