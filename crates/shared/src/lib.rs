//! # Connector Shared
//!
//! Domain model, evidence taxonomy, errors and configuration used across all
//! connector crates.

pub mod binding;
pub mod config;
pub mod error;
pub mod evidence;
pub mod ids;
pub mod link;
pub mod message;
pub mod transport;

// Re-exports
pub use binding::bind_properties;
pub use config::*;
pub use error::*;
pub use evidence::{EvidenceType, highest_priority, verify_storage_mapping};
pub use ids::*;
pub use link::*;
pub use message::*;
pub use transport::*;
