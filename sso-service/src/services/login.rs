//! Multi-stage login: password, then a second factor, then optional
//! self-enrollment.
//!
//! Every change to a user's trust level goes through
//! [`UserHandle::apply`], so the state machine in
//! [`AuthLevel::transition`](crate::models::AuthLevel::transition) is the
//! only place levels move.

use parking_lot::Mutex;
use secrecy::SecretString;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::instrument;
use url::Url;

use super::audit::AuditSink;
use super::credentials::CredentialVerifier;
use super::directory::DirectoryAuthenticator;
use super::licensing::{ensure_seat_available, LicenseSource};
use super::otp::OtpStore;
use super::repository::{UserQuery, UserRecord, UserRepository};
use super::session::SessionStore;
use super::ServiceError;
use crate::clock::Clock;
use crate::config::LoginSettings;
use crate::models::{
    keys, AuditArea, AuditEntry, AuthLevel, CodeKind, IllegalTransition, LoginEvent, Origin, Session,
    ShadowAccountPolicy, Transition, User, UserHandle,
};
use crate::utils::password::Password;
use crate::utils::redirect::build_redirect_uri;
use crate::utils::totp;
use crate::utils::validation::validate_phone_number;

/// Path the SMS approval link points back to.
pub const STAGE2_PATH: &str = "/v1/auth/stage/2";

/// Transport facts about the request being served.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub remote_addr: String,
    /// `Host` header, possibly with a port.
    pub host: String,
    pub path: String,
}

impl RequestContext {
    pub fn new(remote_addr: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            remote_addr: remote_addr.into(),
            host: host.into(),
            path: STAGE2_PATH.to_string(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// External services the login flow talks to.
#[derive(Clone)]
pub struct LoginCollaborators {
    pub users: Arc<dyn UserRepository>,
    pub directories: Vec<Arc<dyn DirectoryAuthenticator>>,
    pub licenses: Arc<dyn LicenseSource>,
    pub audit: Arc<dyn AuditSink>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stage1Outcome {
    #[serde(skip)]
    pub session: Arc<Session>,
    pub user: User,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Default)]
pub struct Stage2Input {
    /// Code from an SMS approval link. Arrives without a session.
    pub code: Option<String>,
    pub totp: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage2Outcome {
    /// A sessionless approval callback elevated `user`.
    Approved { user: String, approver: Option<String> },
    Authenticated { redirect_uri: String },
    /// A challenge is out; poll again.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentKind {
    Sms,
    Totp,
}

impl std::str::FromStr for EnrollmentKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(EnrollmentKind::Sms),
            "totp" => Ok(EnrollmentKind::Totp),
            _ => Err(ServiceError::BadRequest(format!("Unknown enrollment kind: {}", s))),
        }
    }
}

/// Profile fields a user may fill in themselves, once.
#[derive(Debug, Clone, Default)]
pub struct ProfileEdit {
    pub phone_number: Option<String>,
    pub personal_desktop: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub user: User,
    pub redirect_uri: String,
}

pub struct LoginFlow {
    clock: Arc<dyn Clock>,
    sessions: Arc<SessionStore>,
    otp: Option<Arc<OtpStore>>,
    verifier: CredentialVerifier,
    users: Arc<dyn UserRepository>,
    licenses: Arc<dyn LicenseSource>,
    audit: Arc<dyn AuditSink>,
    settings: LoginSettings,
    /// Names with a commit in flight, across all sessions.
    enrolling: Mutex<HashSet<String>>,
}

impl LoginFlow {
    pub fn new(
        clock: Arc<dyn Clock>,
        sessions: Arc<SessionStore>,
        otp: Option<Arc<OtpStore>>,
        collaborators: LoginCollaborators,
        settings: LoginSettings,
    ) -> Self {
        let verifier = CredentialVerifier::new(
            Arc::clone(&collaborators.users),
            collaborators.directories,
        );
        Self {
            clock,
            sessions,
            otp,
            verifier,
            users: collaborators.users,
            licenses: collaborators.licenses,
            audit: collaborators.audit,
            settings,
            enrolling: Mutex::new(HashSet::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn external_mfa_enabled(&self) -> bool {
        self.otp.is_some()
    }

    fn log(&self, username: &str, ctx: &RequestContext, area: AuditArea, text: impl Into<String>) {
        self.audit.record(AuditEntry::new(
            self.clock.now(),
            username,
            ctx.remote_addr.as_str(),
            area,
            text,
        ));
    }

    fn session(&self, session_id: Option<&str>) -> Result<Arc<Session>, ServiceError> {
        session_id
            .and_then(|id| self.sessions.retrieve(id))
            .ok_or(ServiceError::NotFound)
    }

    /// Session whose user got past the password step.
    fn identified_session(
        &self,
        session_id: Option<&str>,
    ) -> Result<(Arc<Session>, UserHandle), ServiceError> {
        let session = self.session(session_id)?;
        let user = session.user();
        if user.auth_level() == AuthLevel::Anonymous {
            return Err(ServiceError::PolicyViolation("Password login required".to_string()));
        }
        Ok((session, user))
    }

    fn redirect_uri(&self, session: &Session, ctx: &RequestContext) -> String {
        build_redirect_uri(&ctx.host, session.string_value(keys::REDIRECT_URI).as_deref())
    }

    /// Password step.
    ///
    /// Nothing is touched unless the credentials check out. An anonymous
    /// session is reused; a session that already carries a user is
    /// replaced by a fresh one so no session's level ever drops.
    #[instrument(skip(self, password, ctx), fields(remote_addr = %ctx.remote_addr))]
    pub async fn stage1(
        &self,
        session_id: Option<&str>,
        username: &str,
        password: Password,
        ctx: &RequestContext,
    ) -> Result<Stage1Outcome, ServiceError> {
        let username = username.trim().to_lowercase();
        if username.is_empty() || password.is_empty() {
            return Err(ServiceError::BadRequest("Missing username or password".to_string()));
        }

        let user = match self.verifier.verify(&username, &password).await {
            Ok(user) => user,
            Err(e) => {
                self.log(&username, ctx, AuditArea::Login, "log in failed with password");
                return Err(e);
            }
        };

        let handle = UserHandle::new(user);
        handle.apply(LoginEvent::PasswordOk)?;

        let existing = session_id.and_then(|id| self.sessions.retrieve(id));
        let stored_redirect = existing
            .as_ref()
            .and_then(|s| s.string_value(keys::REDIRECT_URI));

        let session = match existing {
            Some(session) if session.bind_user(handle.clone()).is_ok() => session,
            Some(previous) => {
                self.sessions.destroy(previous.id());
                self.sessions.create(handle.clone())
            }
            None => self.sessions.create(handle.clone()),
        };

        session.set_string(keys::USERNAME, username.as_str());
        session.set_secret(keys::PASSWORD, SecretString::new(password.as_str().to_string()));
        let redirect_uri = build_redirect_uri(&ctx.host, stored_redirect.as_deref());
        session.set_string(keys::REDIRECT_URI, redirect_uri.as_str());

        self.log(&username, ctx, AuditArea::Login, "log in success with password");
        tracing::info!(session_id = %session.id(), "Password step passed");

        Ok(Stage1Outcome {
            user: handle.snapshot(),
            session,
            redirect_uri,
        })
    }

    /// Second-factor step.
    ///
    /// An approval `code` is handled without a session. Otherwise the
    /// session's user proves a TOTP code or, with an MFA gateway configured,
    /// gets an SMS approval link sent to their (or their supervisor's)
    /// phone. A repeated poll inside the cool-down is rate limited. Without
    /// a gateway, a session that cannot finish is destroyed.
    #[instrument(skip(self, input, ctx), fields(remote_addr = %ctx.remote_addr))]
    pub async fn stage2(
        &self,
        session_id: Option<&str>,
        input: Stage2Input,
        ctx: &RequestContext,
    ) -> Result<Stage2Outcome, ServiceError> {
        if let Some(code) = input.code.as_deref().filter(|c| !c.is_empty()) {
            if self.otp.is_some() {
                return self.sms_callback(code, ctx);
            }
        }

        let session = self.session(session_id)?;
        let user = session.user();
        let level = user.auth_level();

        if level == AuthLevel::Authenticated {
            return Ok(Stage2Outcome::Authenticated {
                redirect_uri: self.redirect_uri(&session, ctx),
            });
        }

        if let Some(code) = input.totp.as_deref().filter(|c| !c.is_empty()) {
            return self.stage2_totp(&session, &user, code, ctx);
        }

        if level == AuthLevel::Anonymous {
            return Err(IllegalTransition {
                from: level,
                event: LoginEvent::SmsPending,
            }
            .into());
        }

        let Some(otp) = self.otp.as_ref() else {
            self.sessions.destroy(session.id());
            self.log(&user.name(), ctx, AuditArea::Login, "log in failed: no second factor available");
            return Err(ServiceError::MfaUnavailable);
        };

        let Some(phone_number) = user.read(|u| u.approval_phone().map(str::to_string)) else {
            return Err(ServiceError::MfaUnavailable);
        };

        let callback = Url::parse(&format!("https://{}{}", ctx.host, ctx.path))
            .map_err(|e| ServiceError::BadRequest(format!("Invalid callback host: {}", e)))?;

        let now = self.clock.now();
        let previous = session
            .stamp_if_elapsed(keys::SMS_SENT, now, self.settings.sms_cooldown)
            .map_err(|retry_after| ServiceError::RateLimited { retry_after })?;

        if let Err(e) = otp.initiate_sms(&user, &phone_number, Some(&callback)).await {
            session.restore_stamp(keys::SMS_SENT, previous);
            self.log(&user.name(), ctx, AuditArea::Login, format!("log in failed with sms: {}", e));
            return Err(e);
        }

        user.apply(LoginEvent::SmsPending)?;
        Ok(Stage2Outcome::Pending)
    }

    fn stage2_totp(
        &self,
        session: &Session,
        user: &UserHandle,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<Stage2Outcome, ServiceError> {
        let (name, supervised, secret) =
            user.read(|u| (u.name.clone(), u.supervisor.is_some(), u.totp_secret.clone()));

        if user.auth_level() == AuthLevel::Anonymous {
            return Err(IllegalTransition {
                from: AuthLevel::Anonymous,
                event: LoginEvent::TotpOk,
            }
            .into());
        }

        if supervised {
            self.end_without_gateway(session);
            self.log(&name, ctx, AuditArea::Login, "log in refused: totp not allowed for supervised user");
            return Err(ServiceError::PolicyViolation(
                "Supervised users must be approved by their supervisor".to_string(),
            ));
        }

        let accepted = secret.as_deref().is_some_and(|secret| {
            totp::verify(secret, code, self.settings.totp_skew_steps, self.clock.now())
        });
        if !accepted {
            self.end_without_gateway(session);
            self.log(&name, ctx, AuditArea::Login, "log in failed with totp");
            return Err(ServiceError::InvalidCredentials);
        }

        user.apply(LoginEvent::TotpOk)?;
        self.log(&name, ctx, AuditArea::Login, "log in success with totp");

        Ok(Stage2Outcome::Authenticated {
            redirect_uri: self.redirect_uri(session, ctx),
        })
    }

    /// Without a gateway there is no pending state to fall back to, so a
    /// failed second factor ends the session.
    fn end_without_gateway(&self, session: &Session) {
        if self.otp.is_none() {
            self.sessions.destroy(session.id());
        }
    }

    /// Approval link callback. The code alone identifies the user whose
    /// session gets elevated.
    #[instrument(skip(self, code, ctx), fields(remote_addr = %ctx.remote_addr))]
    pub fn sms_callback(&self, code: &str, ctx: &RequestContext) -> Result<Stage2Outcome, ServiceError> {
        let otp = self.otp.as_ref().ok_or(ServiceError::MfaUnavailable)?;
        let user = otp
            .authenticate_kind(code, CodeKind::Token)
            .ok_or(ServiceError::NotFound)?;

        user.apply(LoginEvent::SmsOk)?;

        let (name, approver) =
            user.read(|u| (u.name.clone(), u.supervisor.as_ref().map(|s| s.name.clone())));
        match &approver {
            Some(supervisor) => self.log(
                &name,
                ctx,
                AuditArea::Login,
                format!("log in approved by {}", supervisor),
            ),
            None => self.log(&name, ctx, AuditArea::Login, "log in success with sms"),
        }

        Ok(Stage2Outcome::Approved { user: name, approver })
    }

    /// Sends a verification code to a phone number the user wants to enroll.
    #[instrument(skip(self, phone_number, ctx), fields(remote_addr = %ctx.remote_addr))]
    pub async fn initiate_enrollment_sms(
        &self,
        session_id: Option<&str>,
        phone_number: &str,
        ctx: &RequestContext,
    ) -> Result<(), ServiceError> {
        let otp = self.otp.as_ref().ok_or(ServiceError::MfaUnavailable)?;
        let (session, user) = self.identified_session(session_id)?;

        ensure_may_enroll(&user)?;

        validate_phone_number(phone_number)?;

        let previous = session
            .stamp_if_elapsed(keys::LAST_SMS_REQUEST, self.clock.now(), self.settings.sms_cooldown)
            .map_err(|retry_after| ServiceError::RateLimited { retry_after })?;

        if let Err(e) = otp.initiate_sms(&user, phone_number, None).await {
            session.restore_stamp(keys::LAST_SMS_REQUEST, previous);
            return Err(e);
        }

        session.set_string(keys::PHONE_NUMBER, phone_number);
        user.apply(LoginEvent::SmsPending)?;
        self.log(&user.name(), ctx, AuditArea::Enroll, "enrollment sms sent");
        Ok(())
    }

    /// Confirms an enrollment factor and completes the login with it.
    #[instrument(skip(self, code, ctx), fields(remote_addr = %ctx.remote_addr))]
    pub fn verify_enrollment(
        &self,
        session_id: Option<&str>,
        kind: EnrollmentKind,
        code: &str,
        ctx: &RequestContext,
    ) -> Result<(), ServiceError> {
        if code.trim().is_empty() {
            return Err(ServiceError::BadRequest("Kind and code required".to_string()));
        }
        let (session, user) = self.identified_session(session_id)?;
        let name = user.name();

        match kind {
            EnrollmentKind::Sms => {
                ensure_may_enroll(&user)?;
                let otp = self.otp.as_ref().ok_or(ServiceError::MfaUnavailable)?;
                let owner = otp
                    .authenticate_kind(code, CodeKind::Numeric)
                    .ok_or(ServiceError::InvalidCredentials)?;
                if !owner.same_as(&user) {
                    self.log(&name, ctx, AuditArea::Enroll, "enrollment failed: foreign sms code");
                    return Err(ServiceError::InvalidCredentials);
                }
                let phone_number = session
                    .string_value(keys::PHONE_NUMBER)
                    .ok_or_else(|| ServiceError::BadRequest("No phone number pending".to_string()))?;

                user.apply(LoginEvent::SmsOk)?;
                user.update(|u| u.phone_number = Some(phone_number));
                session.remove_value(keys::PHONE_NUMBER);
                self.log(&name, ctx, AuditArea::Enroll, "phone number verified");
            }
            EnrollmentKind::Totp => {
                ensure_may_enroll(&user)?;
                let secret = user.read(|u| u.totp_secret.clone());
                let accepted = secret.as_deref().is_some_and(|secret| {
                    totp::verify(secret, code, self.settings.totp_skew_steps, self.clock.now())
                });
                if !accepted {
                    self.log(&name, ctx, AuditArea::Enroll, "totp verification failed");
                    return Err(ServiceError::InvalidCredentials);
                }

                user.apply(LoginEvent::TotpOk)?;
                user.update(|u| u.totp_enrolled = true);
                self.log(&name, ctx, AuditArea::Enroll, "totp verified");
            }
        }

        Ok(())
    }

    /// Provisions a TOTP secret if needed and returns its `otpauth://` URI.
    pub fn totp_key_uri(&self, session_id: Option<&str>) -> Result<String, ServiceError> {
        let (_, user) = self.identified_session(session_id)?;
        ensure_may_enroll(&user)?;

        let (name, secret) = user.update(|u| {
            if u.totp_enrolled {
                return Err(ServiceError::PolicyViolation(
                    "TOTP is already enrolled".to_string(),
                ));
            }
            let secret = u
                .totp_secret
                .get_or_insert_with(totp::generate_secret)
                .clone();
            u.totp_enabled = true;
            Ok((u.name.clone(), secret))
        })?;

        totp::provisioning_uri(&secret, &self.settings.totp_issuer, &name).ok_or_else(|| {
            ServiceError::Dependency(anyhow::anyhow!("Stored TOTP secret is malformed"))
        })
    }

    /// Persists a self-enrolled user.
    ///
    /// Requires a fully authenticated, not yet enrolled session user. A
    /// license seat is checked whenever the write creates or enables an
    /// account. Nothing is written when any check fails.
    #[instrument(skip(self, ctx), fields(remote_addr = %ctx.remote_addr))]
    pub async fn commit(
        &self,
        session_id: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<CommitOutcome, ServiceError> {
        let session = self.session(session_id)?;
        let user = session.user();
        let snapshot = user.snapshot();

        if snapshot.enrolled {
            return Err(ServiceError::AlreadyEnrolled);
        }
        if snapshot.auth_level() != AuthLevel::Authenticated {
            return Err(ServiceError::PolicyViolation(
                "Second factor required before enrollment".to_string(),
            ));
        }
        if !session.try_claim(keys::COMMITTING) {
            return Err(ServiceError::AlreadyEnrolled);
        }
        if !self.enrolling.lock().insert(snapshot.name.clone()) {
            session.remove_value(keys::COMMITTING);
            return Err(ServiceError::AlreadyEnrolled);
        }

        let result = self.persist_enrollment(&snapshot).await;
        if let Ok(stored) = &result {
            user.update(|u| {
                u.id = stored.id;
                u.enrolled = true;
                u.enabled = stored.enabled;
            });
        }
        self.enrolling.lock().remove(&snapshot.name);
        session.remove_value(keys::COMMITTING);
        result?;

        self.log(&snapshot.name, ctx, AuditArea::Enroll, "user successfully enrolled");

        Ok(CommitOutcome {
            user: user.snapshot(),
            redirect_uri: self.redirect_uri(&session, ctx),
        })
    }

    async fn persist_enrollment(&self, user: &User) -> Result<User, ServiceError> {
        let mut enabled = user.enabled;
        if let Origin::Directory { shadow_policy, .. } = &user.origin {
            if !enabled {
                match shadow_policy {
                    ShadowAccountPolicy::Disabled => {
                        return Err(ServiceError::PolicyViolation(
                            "Administrator has disabled enrollment".to_string(),
                        ));
                    }
                    ShadowAccountPolicy::CreateEnabled => enabled = true,
                    ShadowAccountPolicy::CreateDisabled => {}
                }
            }
        }

        let mut record = UserRecord::from_user(user);
        record.enrolled = true;
        record.totp_enabled = user.totp_enrolled;
        record.enabled = if user.system { None } else { Some(enabled) };

        let query = UserQuery::ByName(user.name.clone());
        let existing = self.users.retrieve_one(&query).await?;
        if existing.as_ref().is_some_and(|stored| stored.enrolled) {
            return Err(ServiceError::AlreadyEnrolled);
        }

        let enabling = record.enabled == Some(true)
            && existing.as_ref().map_or(true, |stored| !stored.enabled);
        if existing.is_none() || enabling {
            ensure_seat_available(self.licenses.as_ref(), self.users.as_ref(), self.clock.now())
                .await?;
        }

        match existing {
            Some(_) => {
                self.users.update(&query, &record).await?;
                self.users
                    .retrieve_one(&query)
                    .await?
                    .ok_or(ServiceError::NotFound)
            }
            None => Ok(self.users.create(&record).await?),
        }
    }

    pub fn me(&self, session_id: Option<&str>) -> Result<User, ServiceError> {
        Ok(self.session(session_id)?.user().snapshot())
    }

    /// Fills in profile fields that are still empty; set values stay.
    pub fn edit_me(&self, session_id: Option<&str>, edit: ProfileEdit) -> Result<User, ServiceError> {
        let user = self.session(session_id)?.user();

        if let Some(phone) = edit.phone_number.as_deref() {
            validate_phone_number(phone)?;
        }

        user.update(|u| {
            if u.personal_desktop.as_deref().map_or(true, str::is_empty) {
                if let Some(desktop) = edit.personal_desktop {
                    u.personal_desktop = Some(desktop);
                }
            }
            if u.phone_number.as_deref().map_or(true, str::is_empty) {
                if let Some(phone) = edit.phone_number {
                    u.phone_number = Some(phone);
                }
            }
        });

        Ok(user.snapshot())
    }

    pub fn logout(&self, session_id: &str) {
        self.sessions.destroy(session_id);
    }

    /// Ends a session on a `Denied` outcome.
    pub fn deny(&self, session_id: &str, ctx: &RequestContext) -> Result<(), ServiceError> {
        let session = self.session(Some(session_id))?;
        let user = session.user();
        if let Transition::Terminate = user.apply(LoginEvent::Denied)? {
            self.sessions.destroy(session.id());
            self.log(&user.name(), ctx, AuditArea::Login, "log in denied");
        }
        Ok(())
    }
}

/// Self-enrollment is open to users without a stored enrollment and
/// without a supervisor; supervised users are always approved externally.
fn ensure_may_enroll(user: &UserHandle) -> Result<(), ServiceError> {
    let (enrolled, supervised) = user.read(|u| (u.enrolled, u.supervisor.is_some()));
    if enrolled {
        return Err(ServiceError::PolicyViolation("User is already enrolled".to_string()));
    }
    if supervised {
        return Err(ServiceError::PolicyViolation(
            "Supervised users cannot enroll a second factor".to_string(),
        ));
    }
    Ok(())
}
