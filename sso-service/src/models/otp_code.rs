use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

use super::user::UserHandle;
use crate::clock::elapsed;

pub const NUMERIC_CODE_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// Short code typed by the user.
    Numeric,
    /// High-entropy token embedded in a callback link.
    Token,
}

/// A pending external-MFA code. Only the digest of the code is retained.
#[derive(Debug, Clone)]
pub struct OneTimeCode {
    digest: String,
    kind: CodeKind,
    user: UserHandle,
    created_at: DateTime<Utc>,
}

impl OneTimeCode {
    /// Generates a fresh code. The plaintext is returned once, for delivery.
    pub fn generate(kind: CodeKind, user: UserHandle, now: DateTime<Utc>) -> (String, Self) {
        let code = match kind {
            CodeKind::Numeric => generate_numeric_code(NUMERIC_CODE_LENGTH),
            CodeKind::Token => Uuid::new_v4().to_string(),
        };
        let entry = Self {
            digest: digest_code(&code),
            kind,
            user,
            created_at: now,
        };
        (code, entry)
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    pub fn user(&self) -> &UserHandle {
        &self.user
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[cfg(test)]
    pub(crate) fn reissued_at(mut self, now: DateTime<Utc>) -> Self {
        self.created_at = now;
        self
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        elapsed(self.created_at, now) < lifetime
    }
}

fn generate_numeric_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| rng.gen_range(0..10).to_string())
        .collect()
}

/// Storage key of a code.
pub fn digest_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.trim().as_bytes());
    hex::encode(hasher.finalize())
}
