//! Typed configuration bound per business domain

use crate::current::CurrentDomain;
use crate::registry::DomainRegistry;
use serde::de::DeserializeOwned;
use shared::{bind_properties, BusinessDomainId, ScopeError};
use std::any::Any;
use std::sync::Arc;

/// Binds the flat property map of a domain to typed configuration objects.
///
/// Bound objects live in the domain's scope. They are built once per domain
/// and rebuilt after the domain's configuration changed.
#[derive(Debug, Clone)]
pub struct DomainConfigurations {
    registry: Arc<DomainRegistry>,
}

impl DomainConfigurations {
    pub fn new(registry: Arc<DomainRegistry>) -> Self {
        Self { registry }
    }

    /// Configuration below `prefix` for the current domain
    pub fn bind<T>(&self, prefix: &str) -> Result<Arc<T>, ScopeError>
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        let domain = CurrentDomain::get()?;
        self.bind_for(&domain, prefix)
    }

    /// Configuration below `prefix` for an explicit domain
    pub fn bind_for<T>(&self, domain: &BusinessDomainId, prefix: &str) -> Result<Arc<T>, ScopeError>
    where
        T: DeserializeOwned + Any + Send + Sync,
    {
        let slot = format!("config:{}:{}", prefix, std::any::type_name::<T>());
        self.registry.store().try_get(domain, &slot, || {
            let properties = self.registry.properties(domain)?;
            bind_properties(&properties, prefix).map_err(|reason| ScopeError::Binding {
                prefix: prefix.to_string(),
                reason,
            })
        })
    }
}
