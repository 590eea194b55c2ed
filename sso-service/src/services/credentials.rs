use std::sync::Arc;
use tracing::instrument;

use super::directory::DirectoryAuthenticator;
use super::repository::{UserQuery, UserRepository};
use super::ServiceError;
use crate::models::{Origin, User};
use crate::utils::password::{verify_password, Password, PasswordHashString};
use crate::utils::validation::is_directory_safe_username;

/// First-factor check: local password hashes first, then each configured
/// directory in order.
pub struct CredentialVerifier {
    users: Arc<dyn UserRepository>,
    directories: Vec<Arc<dyn DirectoryAuthenticator>>,
}

impl CredentialVerifier {
    pub fn new(
        users: Arc<dyn UserRepository>,
        directories: Vec<Arc<dyn DirectoryAuthenticator>>,
    ) -> Self {
        Self { users, directories }
    }

    /// Returns the verified user, unsaved when a directory account has no
    /// local record yet. Wrong names and wrong passwords are reported alike.
    #[instrument(skip(self, password))]
    pub async fn verify(&self, username: &str, password: &Password) -> Result<User, ServiceError> {
        if let Some(user) = self.verify_local(username, password).await? {
            return Ok(user);
        }
        self.verify_directories(username, password).await
    }

    async fn verify_local(
        &self,
        username: &str,
        password: &Password,
    ) -> Result<Option<User>, ServiceError> {
        let query = UserQuery::LocalAccount(username.to_string());
        let Some(mut user) = self.users.retrieve_one(&query).await? else {
            return Ok(None);
        };
        let Some(hash) = user.password_hash.clone() else {
            return Ok(None);
        };

        if !verify_password(password, &PasswordHashString::new(hash)) {
            tracing::debug!("Local password mismatch");
            return Ok(None);
        }
        if !user.enabled {
            tracing::info!("Login refused for disabled local account");
            return Err(ServiceError::DisabledAccount);
        }

        user.origin = Origin::Local;
        Ok(Some(user))
    }

    async fn verify_directories(
        &self,
        username: &str,
        password: &Password,
    ) -> Result<User, ServiceError> {
        if !is_directory_safe_username(username) {
            tracing::warn!("Username rejected before directory lookup");
            return Err(ServiceError::InvalidCredentials);
        }

        let mut consulted = 0usize;
        let mut failures = 0usize;
        let mut last_error = None;

        for directory in self.directories.iter().filter(|d| d.configured()) {
            consulted += 1;
            let descriptor = directory.descriptor();
            match directory.authenticate(username, password).await {
                Ok(Some(attributes)) => {
                    let mut user = match self
                        .users
                        .retrieve_one(&UserQuery::ByName(username.to_string()))
                        .await?
                    {
                        Some(user) => user,
                        None => User::new(username),
                    };
                    user.additional_info.extend(attributes);
                    user.origin = Origin::Directory {
                        name: descriptor.name.clone(),
                        shadow_policy: descriptor.shadow_policy,
                    };

                    if user.enrolled && !user.enabled {
                        tracing::info!(directory = %descriptor.name, "Login refused for disabled account");
                        return Err(ServiceError::DisabledAccount);
                    }

                    tracing::debug!(directory = %descriptor.name, "Directory bind succeeded");
                    return Ok(user);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(directory = %descriptor.name, error = %e, "Directory unavailable");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        // Only an outage of every consulted directory is a dependency failure.
        match last_error {
            Some(e) if failures == consulted => Err(ServiceError::Dependency(e)),
            _ => Err(ServiceError::InvalidCredentials),
        }
    }
}
