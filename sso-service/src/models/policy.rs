use serde::{Deserialize, Serialize};

use super::auth_level::AuthLevel;
use super::identity::Identity;
use super::mapping::Mapping;
use super::user::{User, ANONYMOUS_USER};

/// Name of the sentinel subject matching every authenticated user.
pub const AUTHENTICATED_SUBJECT: &str = "authenticated";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubjectKind {
    /// Matches everyone, signed in or not.
    Anyone,
    /// Matches any user whose level satisfies the policy.
    AnyAuthenticated,
    User {
        id: Identity,
        name: String,
        system: bool,
    },
}

impl SubjectKind {
    pub fn identifies(&self, user: &User) -> bool {
        match self {
            SubjectKind::User { id, name, system } => {
                let same_id = id.is_assigned() && *id == user.id;
                (same_id || *name == user.name) && *system == user.system
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySubject {
    #[serde(flatten)]
    pub kind: SubjectKind,
    pub enabled: bool,
}

impl PolicySubject {
    pub fn anyone() -> Self {
        Self {
            kind: SubjectKind::Anyone,
            enabled: true,
        }
    }

    pub fn authenticated() -> Self {
        Self {
            kind: SubjectKind::AnyAuthenticated,
            enabled: true,
        }
    }

    /// Subject for a stored user record. The reserved names map onto the
    /// sentinels.
    pub fn from_user(user: &User) -> Self {
        let kind = match user.name.as_str() {
            ANONYMOUS_USER => SubjectKind::Anyone,
            AUTHENTICATED_SUBJECT => SubjectKind::AnyAuthenticated,
            _ => SubjectKind::User {
                id: user.id,
                name: user.name.clone(),
                system: user.system,
            },
        };
        Self {
            kind,
            enabled: user.enabled,
        }
    }
}

/// Access rule: who may reach which mappings at what level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: Identity,
    pub name: String,
    pub enabled: bool,
    pub auth_level: AuthLevel,
    pub subjects: Vec<PolicySubject>,
    pub mappings: Vec<Mapping>,
}
