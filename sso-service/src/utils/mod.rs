pub mod password;
pub mod redirect;
pub mod totp;
pub mod validation;

pub use password::{hash_password, verify_password, Password, PasswordHashString};
