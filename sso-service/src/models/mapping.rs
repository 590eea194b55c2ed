use serde::{Deserialize, Serialize};

use super::identity::Identity;

/// A protected internal resource published under `external.domain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: Identity,
    pub name: String,
    pub enabled: bool,
    pub external: String,
    pub domain: String,
}

impl Mapping {
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.external, self.domain)
    }
}
