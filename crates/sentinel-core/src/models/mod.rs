pub mod audit_event;
pub mod identity;
pub mod security_event;
pub mod session;

pub use audit_event::{AuditAction, AuditEvent};
pub use identity::{ClientInfo, Identity, IdentityResponse};
pub use security_event::{SecurityAction, SecurityEvent, SuspiciousIdentity};
pub use session::{Session, SessionId};
