//! RFC 6238 time-based codes: SHA-1, six digits, 30 second steps.

use chrono::{DateTime, Utc};
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;

/// New random secret, base32 encoded without padding.
pub fn generate_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

fn totp(secret: &str, skew: u8, issuer: Option<&str>, account: &str) -> Option<TOTP> {
    let bytes = Secret::Encoded(secret.trim_end_matches('=').to_string())
        .to_bytes()
        .ok()?;
    Some(TOTP::new_unchecked(
        Algorithm::SHA1,
        DIGITS,
        skew,
        STEP_SECONDS,
        bytes,
        issuer.map(str::to_string),
        account.to_string(),
    ))
}

/// Accepts `code` if it matches any step within `skew` steps of `now`.
pub fn verify(secret: &str, code: &str, skew: u8, now: DateTime<Utc>) -> bool {
    let Ok(time) = u64::try_from(now.timestamp()) else {
        return false;
    };
    totp(secret, skew, None, "")
        .map(|t| t.check(code.trim(), time))
        .unwrap_or(false)
}

/// `otpauth://totp/...` provisioning URI for authenticator apps.
pub fn provisioning_uri(secret: &str, issuer: &str, account: &str) -> Option<String> {
    totp(secret, 1, Some(issuer), account).map(|t| t.get_url())
}

/// Current code for `secret`, as an authenticator app would show it.
pub fn current_code(secret: &str, now: DateTime<Utc>) -> Option<String> {
    let time = u64::try_from(now.timestamp()).ok()?;
    totp(secret, 0, None, "").map(|t| t.generate(time))
}
