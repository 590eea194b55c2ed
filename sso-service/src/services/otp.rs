use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use url::Url;

use super::messaging::{SmsGateway, SmsMessage};
use super::reaper::Reaper;
use super::ServiceError;
use crate::clock::Clock;
use crate::models::otp_code::digest_code;
use crate::models::{CodeKind, OneTimeCode, UserHandle};
use crate::utils::validation::validate_phone_number;

/// Pending external-MFA codes, keyed by digest.
pub struct OtpStore {
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn SmsGateway>,
    lifetime: Duration,
    codes: RwLock<HashMap<String, OneTimeCode>>,
}

impl OtpStore {
    pub fn new(clock: Arc<dyn Clock>, gateway: Arc<dyn SmsGateway>, lifetime: Duration) -> Self {
        Self {
            clock,
            gateway,
            lifetime,
            codes: RwLock::new(HashMap::new()),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Sends a code for `user` to `phone_number`.
    ///
    /// With a `callback` URL the message carries a link with a token in its
    /// `code` query parameter; otherwise a six-digit code. The code is only
    /// registered once the gateway accepted the message.
    #[instrument(skip(self, user, callback), fields(user = %user.name()))]
    pub async fn initiate_sms(
        &self,
        user: &UserHandle,
        phone_number: &str,
        callback: Option<&Url>,
    ) -> Result<(), ServiceError> {
        validate_phone_number(phone_number)?;

        let kind = if callback.is_some() {
            CodeKind::Token
        } else {
            CodeKind::Numeric
        };
        let (code, entry) = self.unique_code(kind, user);

        let uri = match callback {
            Some(base) => {
                let mut link = base.clone();
                link.query_pairs_mut().append_pair("code", &code);
                link.to_string()
            }
            None => code,
        };

        let name = user.read(|u| u.supervisor.as_ref().map(|_| u.name.clone()));
        let message = SmsMessage {
            phone_number: phone_number.to_string(),
            uri,
            name,
        };

        self.gateway.send(&message).await?;

        self.register(entry)?;
        tracing::info!(kind = ?kind, "One-time code dispatched");
        Ok(())
    }

    /// Stores a dispatched code. A live code drawn concurrently under the
    /// same digest wins; the later one is refused rather than overwriting it.
    fn register(&self, entry: OneTimeCode) -> Result<(), ServiceError> {
        let now = self.clock.now();
        match self.codes.write().entry(entry.digest().to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(mut slot) if !slot.get().is_valid_at(now, self.lifetime) => {
                slot.insert(entry);
            }
            Entry::Occupied(_) => {
                tracing::warn!("One-time code collided with a pending code");
                return Err(ServiceError::Dependency(anyhow::anyhow!(
                    "One-time code collision, request a new code"
                )));
            }
        }
        Ok(())
    }

    fn unique_code(&self, kind: CodeKind, user: &UserHandle) -> (String, OneTimeCode) {
        let codes = self.codes.read();
        loop {
            let (code, entry) = OneTimeCode::generate(kind, user.clone(), self.clock.now());
            if !codes.contains_key(entry.digest()) {
                return (code, entry);
            }
        }
    }

    /// Consumes `code`. A code is removed on every lookup, so it succeeds at
    /// most once, and only inside its lifetime.
    pub fn authenticate(&self, code: &str) -> Option<UserHandle> {
        self.consume(code, None)
    }

    /// Like [`OtpStore::authenticate`], but only a code of `kind` succeeds.
    /// A code of another kind is still consumed.
    pub fn authenticate_kind(&self, code: &str, kind: CodeKind) -> Option<UserHandle> {
        self.consume(code, Some(kind))
    }

    fn consume(&self, code: &str, kind: Option<CodeKind>) -> Option<UserHandle> {
        let now = self.clock.now();
        let entry = self.codes.write().remove(&digest_code(code))?;
        if kind.is_some_and(|kind| entry.kind() != kind) {
            tracing::warn!(kind = ?entry.kind(), "One-time code presented on the wrong channel");
            return None;
        }
        if entry.is_valid_at(now, self.lifetime) {
            Some(entry.user().clone())
        } else {
            tracing::debug!("Expired one-time code presented");
            None
        }
    }

    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let victims: Vec<String> = self
            .codes
            .read()
            .iter()
            .filter(|(_, c)| !c.is_valid_at(now, self.lifetime))
            .map(|(digest, _)| digest.clone())
            .collect();

        if victims.is_empty() {
            return 0;
        }

        let mut codes = self.codes.write();
        victims
            .iter()
            .filter(|digest| codes.remove(*digest).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.codes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.read().is_empty()
    }

    /// Starts the periodic sweep, once per code lifetime.
    pub fn spawn_gc(self: &Arc<Self>) -> Reaper {
        let store = Arc::clone(self);
        Reaper::spawn("otp-gc", self.lifetime, move || {
            let removed = store.sweep();
            if removed > 0 {
                tracing::info!(removed, "Expired one-time codes reclaimed");
            }
        })
    }
}
