//! Services layer for sso-service.
//!
//! Stores, collaborator seams, the login flow and the policy evaluator.

pub mod audit;
mod credentials;
pub mod directory;
pub mod error;
pub mod licensing;
pub mod login;
pub mod messaging;
pub mod otp;
mod policy;
pub mod reaper;
pub mod repository;
pub mod session;

pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use credentials::CredentialVerifier;
pub use directory::{DirectoryAttributes, DirectoryAuthenticator, MockDirectory};
pub use error::ServiceError;
pub use licensing::{ensure_seat_available, LicenseSource, StaticLicense};
pub use login::{
    CommitOutcome, EnrollmentKind, LoginCollaborators, LoginFlow, ProfileEdit, RequestContext,
    Stage1Outcome, Stage2Input, Stage2Outcome, STAGE2_PATH,
};
pub use messaging::{HttpSmsGateway, MockSmsGateway, SmsGateway, SmsMessage};
pub use otp::OtpStore;
pub use policy::PolicyService;
pub use reaper::Reaper;
pub use repository::{MockUserRepository, UserQuery, UserRecord, UserRepository};
pub use session::SessionStore;
