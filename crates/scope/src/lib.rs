//! # Connector Scope
//!
//! Isolation of configured singletons per business domain.
//!
//! Every business domain gets its own store of named instances. Instances are
//! created on first access, cached until the domain's configuration changes
//! and then released through their registered callbacks.

mod configuration;
mod current;
mod registry;
mod store;

pub use configuration::DomainConfigurations;
pub use current::{CurrentDomain, CurrentDomainGuard};
pub use registry::{BusinessDomain, DomainConfigurationChanged, DomainRegistry};
pub use store::{DomainScopeStore, ReleaseCallback};
