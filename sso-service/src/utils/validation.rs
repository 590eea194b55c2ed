use once_cell::sync::Lazy;
use regex::Regex;

use crate::services::ServiceError;

// Characters allowed in names sent to a directory; keeps filter
// metacharacters out of LDAP queries.
static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w\s.$\-]+$").expect("username pattern compiles"));

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[0-9]{7,15}$").expect("phone pattern compiles"));

pub fn is_directory_safe_username(username: &str) -> bool {
    USERNAME_PATTERN.is_match(username)
}

/// Phone numbers are E.164: a `+` followed by 7 to 15 digits.
pub fn validate_phone_number(phone_number: &str) -> Result<(), ServiceError> {
    if phone_number.is_empty() {
        return Err(ServiceError::BadRequest("Phone number is required".to_string()));
    }
    if !PHONE_PATTERN.is_match(phone_number) {
        return Err(ServiceError::BadRequest(
            "Invalid phone format. Use E.164 format (+1234567890)".to_string(),
        ));
    }
    Ok(())
}
