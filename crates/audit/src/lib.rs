//! # Connector Audit
//!
//! Audit trail of administrative operations and the log of message
//! processing errors.

mod admin_log;
mod error_log;

pub use admin_log::{AdminAuditLog, AdminEventType, AuditEntry, AuditStats};
pub use error_log::{MessageError, MessageErrorLog, MessageErrorStore};
