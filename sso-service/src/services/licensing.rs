use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::repository::UserRepository;
use super::ServiceError;
use crate::models::License;

#[async_trait]
pub trait LicenseSource: Send + Sync {
    async fn retrieve(&self) -> Result<Option<License>, anyhow::Error>;
}

/// License held in memory, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticLicense(RwLock<Option<License>>);

impl StaticLicense {
    pub fn new(license: Option<License>) -> Self {
        Self(RwLock::new(license))
    }

    pub fn replace(&self, license: Option<License>) {
        *self.0.write() = license;
    }
}

#[async_trait]
impl LicenseSource for StaticLicense {
    async fn retrieve(&self) -> Result<Option<License>, anyhow::Error> {
        Ok(self.0.read().clone())
    }
}

/// Fails unless a valid license has room for one more enabled user.
pub async fn ensure_seat_available(
    licenses: &dyn LicenseSource,
    users: &dyn UserRepository,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let license = licenses
        .retrieve()
        .await?
        .ok_or_else(|| ServiceError::PolicyViolation("No license installed".to_string()))?;

    if !license.is_valid_at(now) {
        return Err(ServiceError::PolicyViolation("License is not valid".to_string()));
    }

    let used = users.count_enabled_seats().await?;
    if !license.has_free_seat(used) {
        tracing::warn!(used, seats = license.seats, "License seat limit reached");
        return Err(ServiceError::PolicyViolation(
            "License seat limit reached".to_string(),
        ));
    }

    Ok(())
}
