use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditArea {
    Login,
    Enroll,
}

impl AuditArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditArea::Login => "login",
            AuditArea::Enroll => "enroll",
        }
    }
}

impl fmt::Display for AuditArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the security audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub remote_addr: String,
    pub area: AuditArea,
    pub text: String,
}

impl AuditEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        username: impl Into<String>,
        remote_addr: impl Into<String>,
        area: AuditArea,
        text: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            username: username.into(),
            remote_addr: remote_addr.into(),
            area,
            text: text.into(),
        }
    }
}
