//! DomainRegistry - known business domains and their properties

use crate::store::DomainScopeStore;
use serde::{Deserialize, Serialize};
use shared::{BusinessDomainConfig, BusinessDomainId, ConnectorConfig, ScopeError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// A tenant sharing the connector instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessDomain {
    pub id: BusinessDomainId,
    #[serde(default)]
    pub description: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl BusinessDomain {
    pub fn new(id: BusinessDomainId) -> Self {
        Self {
            id,
            description: None,
            enabled: true,
            properties: HashMap::new(),
        }
    }

    /// Builder: add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

impl From<&BusinessDomainConfig> for BusinessDomain {
    fn from(config: &BusinessDomainConfig) -> Self {
        Self {
            id: config.id.clone(),
            description: config.description.clone(),
            enabled: config.enabled,
            properties: config.properties.clone(),
        }
    }
}

/// Signal that the configuration of one business domain changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainConfigurationChanged {
    pub domain: BusinessDomainId,
}

type Listener = Box<dyn Fn(&DomainConfigurationChanged) + Send + Sync>;

/// Registry of business domains.
///
/// Changing the properties of a domain emits [`DomainConfigurationChanged`]
/// for that domain and tears down its scope, so cached configuration objects
/// are rebuilt from the new properties on next access.
pub struct DomainRegistry {
    domains: RwLock<HashMap<BusinessDomainId, BusinessDomain>>,
    store: Arc<DomainScopeStore>,
    listeners: RwLock<Vec<Listener>>,
}

impl DomainRegistry {
    pub fn new(store: Arc<DomainScopeStore>) -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
            store,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Registry holding every domain of `config`
    pub fn from_config(config: &ConnectorConfig, store: Arc<DomainScopeStore>) -> Result<Self, ScopeError> {
        let registry = Self::new(store);
        for domain in &config.domains {
            registry.add(BusinessDomain::from(domain))?;
        }
        Ok(registry)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<BusinessDomainId, BusinessDomain>> {
        self.domains.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<BusinessDomainId, BusinessDomain>> {
        self.domains.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn store(&self) -> &Arc<DomainScopeStore> {
        &self.store
    }

    /// Subscribe to configuration change signals
    pub fn on_configuration_changed<F>(&self, listener: F)
    where
        F: Fn(&DomainConfigurationChanged) + Send + Sync + 'static,
    {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Box::new(listener));
    }

    pub fn add(&self, domain: BusinessDomain) -> Result<(), ScopeError> {
        let mut domains = self.write();
        if domains.contains_key(&domain.id) {
            return Err(ScopeError::DomainExists(domain.id));
        }
        info!(domain = %domain.id, "Business domain registered");
        domains.insert(domain.id.clone(), domain);
        Ok(())
    }

    pub fn get(&self, id: &BusinessDomainId) -> Option<BusinessDomain> {
        self.read().get(id).cloned()
    }

    pub fn properties(&self, id: &BusinessDomainId) -> Result<HashMap<String, String>, ScopeError> {
        self.read()
            .get(id)
            .map(|d| d.properties.clone())
            .ok_or_else(|| ScopeError::UnknownDomain(id.clone()))
    }

    /// Replace the properties of a domain and signal the change
    pub fn update_properties(
        &self,
        id: &BusinessDomainId,
        properties: HashMap<String, String>,
    ) -> Result<(), ScopeError> {
        {
            let mut domains = self.write();
            let domain = domains
                .get_mut(id)
                .ok_or_else(|| ScopeError::UnknownDomain(id.clone()))?;
            domain.properties = properties;
        }
        self.configuration_changed(id);
        Ok(())
    }

    /// Remove a domain and tear down its scope
    pub fn remove(&self, id: &BusinessDomainId) -> Option<BusinessDomain> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            self.store.destroy_domain(id);
            info!(domain = %id, "Business domain removed");
        }
        removed
    }

    /// Enabled domains, ordered by id
    pub fn active_domains(&self) -> Vec<BusinessDomainId> {
        let mut ids: Vec<_> = self
            .read()
            .values()
            .filter(|d| d.enabled)
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn list(&self) -> Vec<BusinessDomain> {
        let mut domains: Vec<_> = self.read().values().cloned().collect();
        domains.sort_by(|a, b| a.id.cmp(&b.id));
        domains
    }

    fn configuration_changed(&self, id: &BusinessDomainId) {
        info!(domain = %id, "Business domain configuration changed");
        let event = DomainConfigurationChanged { domain: id.clone() };
        self.store.destroy_domain(id);
        let listeners = self.listeners.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener(&event);
        }
    }
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("domains", &self.active_domains())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn registry() -> DomainRegistry {
        DomainRegistry::new(Arc::new(DomainScopeStore::new()))
    }

    #[test]
    fn test_add_and_get() {
        let registry = registry();
        registry
            .add(BusinessDomain::new(BusinessDomainId::new("a")).with_property("k", "v"))
            .unwrap();

        let domain = registry.get(&BusinessDomainId::new("a")).unwrap();
        assert_eq!(domain.properties.get("k").map(String::as_str), Some("v"));
        assert!(registry.get(&BusinessDomainId::new("b")).is_none());
    }

    #[test]
    fn test_add_duplicate_fails() {
        let registry = registry();
        registry.add(BusinessDomain::new(BusinessDomainId::new("a"))).unwrap();
        let err = registry.add(BusinessDomain::new(BusinessDomainId::new("a"))).unwrap_err();
        assert!(matches!(err, ScopeError::DomainExists(_)));
    }

    #[test]
    fn test_update_properties_destroys_only_that_domain() {
        let registry = registry();
        let a = BusinessDomainId::new("a");
        let b = BusinessDomainId::new("b");
        registry.add(BusinessDomain::new(a.clone())).unwrap();
        registry.add(BusinessDomain::new(b.clone())).unwrap();
        registry.store().get(&a, "x", || 1u8).unwrap();
        registry.store().get(&b, "x", || 1u8).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry.on_configuration_changed(move |event| sink.lock().unwrap().push(event.domain.clone()));

        registry.update_properties(&a, HashMap::new()).unwrap();

        assert!(!registry.store().contains(&a, "x"));
        assert!(registry.store().contains(&b, "x"));
        assert_eq!(*seen.lock().unwrap(), vec![a]);
    }

    #[test]
    fn test_update_unknown_domain() {
        let registry = registry();
        let err = registry
            .update_properties(&BusinessDomainId::new("missing"), HashMap::new())
            .unwrap_err();
        assert!(matches!(err, ScopeError::UnknownDomain(_)));
    }

    #[test]
    fn test_active_domains_skip_disabled() {
        let registry = registry();
        let mut disabled = BusinessDomain::new(BusinessDomainId::new("z"));
        disabled.enabled = false;
        registry.add(disabled).unwrap();
        registry.add(BusinessDomain::new(BusinessDomainId::new("a"))).unwrap();

        assert_eq!(registry.active_domains(), vec![BusinessDomainId::new("a")]);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_remove_tears_down_scope() {
        let registry = registry();
        let a = BusinessDomainId::new("a");
        registry.add(BusinessDomain::new(a.clone())).unwrap();
        registry.store().get(&a, "x", || 1u8).unwrap();

        assert!(registry.remove(&a).is_some());
        assert!(!registry.store().contains(&a, "x"));
        assert!(registry.remove(&a).is_none());
    }

    #[test]
    fn test_from_config() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"domains": [{"id": "a"}, {"id": "b", "enabled": false}]}"#).unwrap();
        let registry = DomainRegistry::from_config(&config, Arc::new(DomainScopeStore::new())).unwrap();
        assert_eq!(registry.active_domains(), vec![BusinessDomainId::new("a")]);
    }
}
