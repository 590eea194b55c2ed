pub mod audit_log;
pub mod auth_level;
pub mod directory;
pub mod identity;
pub mod license;
pub mod mapping;
pub mod otp_code;
pub mod policy;
pub mod session;
pub mod user;

pub use audit_log::{AuditArea, AuditEntry};
pub use auth_level::{AuthLevel, IllegalTransition, LoginEvent, Transition};
pub use directory::{DirectoryDescriptor, ShadowAccountPolicy};
pub use identity::{Identity, IdentitySequence};
pub use license::License;
pub use mapping::Mapping;
pub use otp_code::{CodeKind, OneTimeCode};
pub use policy::{Policy, PolicySubject, SubjectKind};
pub use session::{keys, Session, SessionValue};
pub use user::{Origin, SupervisorCycle, User, UserHandle};
