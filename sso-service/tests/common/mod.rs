//! Shared fixtures for sso-service integration tests.
//!
//! Every test gets its own manual clock and in-memory collaborators, so
//! lifetimes and cool-downs are driven by `advance` instead of sleeping.

#![allow(dead_code)]

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use sso_service::clock::{Clock, ManualClock};
use sso_service::config::LoginSettings;
use sso_service::models::{License, User};
use sso_service::services::{
    DirectoryAuthenticator, LoginCollaborators, LoginFlow, MemoryAuditSink, MockSmsGateway,
    MockUserRepository, OtpStore, RequestContext, SessionStore, StaticLicense,
};
use sso_service::utils::{hash_password, Password};
use std::sync::Arc;
use std::time::Duration;

pub const IDLE: Duration = Duration::from_secs(30 * 60);
pub const TOTAL: Duration = Duration::from_secs(8 * 60 * 60);
pub const CODE_LIFETIME: Duration = Duration::from_secs(300);
pub const SMS_COOLDOWN: Duration = Duration::from_secs(60);
pub const LOGIN_HOST: &str = "login.corp.example.com";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

pub fn ctx() -> RequestContext {
    RequestContext::new("10.0.0.7", LOGIN_HOST)
}

pub fn password(value: &str) -> Password {
    Password::new(value)
}

/// Enrolled, enabled account with a local password.
pub fn local_user(name: &str, secret: &str) -> User {
    let mut user = User::new(name);
    user.enabled = true;
    user.enrolled = true;
    user.password_hash = Some(hash_password(&Password::new(secret)).unwrap().into_string());
    user
}

pub fn license(seats: u64) -> License {
    License {
        seats,
        not_before: t0() - ChronoDuration::days(1),
        not_after: t0() + ChronoDuration::days(365),
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub users: Arc<MockUserRepository>,
    pub gateway: Arc<MockSmsGateway>,
    pub audit: Arc<MemoryAuditSink>,
    pub license: Arc<StaticLicense>,
    pub sessions: Arc<SessionStore>,
    pub otp: Option<Arc<OtpStore>>,
    pub flow: Arc<LoginFlow>,
}

pub struct HarnessBuilder {
    external_mfa: bool,
    directories: Vec<Arc<dyn DirectoryAuthenticator>>,
    license: Option<License>,
}

impl HarnessBuilder {
    pub fn without_mfa(mut self) -> Self {
        self.external_mfa = false;
        self
    }

    pub fn directory(mut self, directory: Arc<dyn DirectoryAuthenticator>) -> Self {
        self.directories.push(directory);
        self
    }

    pub fn license(mut self, license: Option<License>) -> Self {
        self.license = license;
        self
    }

    pub fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::new(t0()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let users = Arc::new(MockUserRepository::new());
        let gateway = Arc::new(MockSmsGateway::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let license = Arc::new(StaticLicense::new(self.license));

        let sessions = Arc::new(SessionStore::new(dyn_clock.clone(), IDLE, TOTAL));
        let otp = self.external_mfa.then(|| {
            Arc::new(OtpStore::new(
                dyn_clock.clone(),
                gateway.clone(),
                CODE_LIFETIME,
            ))
        });

        let flow = Arc::new(LoginFlow::new(
            dyn_clock,
            sessions.clone(),
            otp.clone(),
            LoginCollaborators {
                users: users.clone(),
                directories: self.directories,
                licenses: license.clone(),
                audit: audit.clone(),
            },
            LoginSettings {
                sms_cooldown: SMS_COOLDOWN,
                ..LoginSettings::default()
            },
        ));

        Harness {
            clock,
            users,
            gateway,
            audit,
            license,
            sessions,
            otp,
            flow,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            external_mfa: true,
            directories: Vec::new(),
            license: Some(license(10)),
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Runs the password step and returns the new session id.
    pub async fn login(&self, name: &str, secret: &str) -> String {
        self.flow
            .stage1(None, name, password(secret), &ctx())
            .await
            .unwrap()
            .session
            .id()
            .to_string()
    }

    pub fn audit_texts(&self) -> Vec<String> {
        self.audit.entries().into_iter().map(|e| e.text).collect()
    }
}
