//! service-core: Shared infrastructure for the sso workspace.
pub mod config;
pub mod error;
pub mod observability;
