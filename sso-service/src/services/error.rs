use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

use crate::models::IllegalTransition;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Session, code or user absent. Expired entries read the same.
    #[error("Not found")]
    NotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is disabled")]
    DisabledAccount,

    #[error("Multi-factor authentication is not available")]
    MfaUnavailable,

    #[error("Too many requests, retry in {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Dependency failure: {0}")]
    Dependency(#[from] anyhow::Error),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("User is already enrolled")]
    AlreadyEnrolled,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
}

impl ServiceError {
    /// Whole seconds until a retry may succeed, rounded up.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ServiceError::RateLimited { retry_after } => {
                let extra = u64::from(retry_after.subsec_nanos() > 0);
                Some(retry_after.as_secs() + extra)
            }
            _ => None,
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let retry_after = err.retry_after_secs();
        match err {
            ServiceError::NotFound => AppError::NotFound(anyhow::anyhow!("Not found")),
            ServiceError::InvalidCredentials => {
                AppError::Forbidden(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::DisabledAccount => {
                AppError::Forbidden(anyhow::anyhow!("Account is disabled"))
            }
            ServiceError::MfaUnavailable => AppError::Forbidden(anyhow::anyhow!(
                "Multi-factor authentication is not available"
            )),
            ServiceError::RateLimited { .. } => {
                AppError::TooManyRequests("Too many requests".to_string(), retry_after)
            }
            ServiceError::Dependency(e) => AppError::BadGateway(e.to_string()),
            ServiceError::PolicyViolation(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            ServiceError::AlreadyEnrolled => {
                AppError::Conflict(anyhow::anyhow!("User is already enrolled"))
            }
            ServiceError::BadRequest(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            ServiceError::IllegalTransition(e) => AppError::Forbidden(anyhow::Error::new(e)),
        }
    }
}
