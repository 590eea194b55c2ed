use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

/// What to do with a user who authenticates against a directory but has no
/// enabled account yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowAccountPolicy {
    /// Refuse to materialize the account.
    Disabled,
    /// Create the account, leave it disabled for an administrator.
    #[default]
    CreateDisabled,
    /// Create the account and enable it.
    CreateEnabled,
}

/// Connection details of an LDAP-like directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryDescriptor {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub bind_dn: String,
    pub base_dn: String,
    pub bind_password: Option<Secret<String>>,
    #[serde(default)]
    pub shadow_policy: ShadowAccountPolicy,
}

impl DirectoryDescriptor {
    /// Only fully described directories are consulted during login.
    pub fn configured(&self) -> bool {
        !self.host.is_empty()
            && self.port > 0
            && !self.bind_dn.is_empty()
            && !self.base_dn.is_empty()
            && self
                .bind_password
                .as_ref()
                .is_some_and(|p| !p.expose_secret().is_empty())
    }
}
