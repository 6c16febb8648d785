//! DomainScopeStore - per business domain cache of named instances

use crate::current::CurrentDomain;
use shared::{BusinessDomainId, ConnectorError, ScopeError};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info};

type Instance = Arc<dyn Any + Send + Sync>;

/// Cleanup action run when the owning domain is torn down
pub type ReleaseCallback = Box<dyn FnOnce() -> Result<(), ConnectorError> + Send>;

#[derive(Default)]
struct DomainStore {
    /// Set once the store has been detached by `destroy_domain`
    destroyed: bool,
    instances: HashMap<String, Instance>,
    callbacks: HashMap<String, ReleaseCallback>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking factory must not make the whole domain unusable
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per business domain store of named singleton instances.
///
/// Access takes two locks in order: the domain map, then the store of the
/// domain. `destroy_domain` detaches the store from the map before releasing
/// it, so a `get` racing with teardown either finishes on the old store
/// (its instance is then released with the rest of the domain) or retries
/// on a fresh store. A `get` never returns an instance from a store whose
/// teardown has started.
#[derive(Default)]
pub struct DomainScopeStore {
    stores: Mutex<HashMap<BusinessDomainId, Arc<Mutex<DomainStore>>>>,
}

impl DomainScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn store_for(&self, domain: &BusinessDomainId) -> Arc<Mutex<DomainStore>> {
        let mut stores = lock(&self.stores);
        Arc::clone(stores.entry(domain.clone()).or_default())
    }

    /// Cached instance `name` of `domain`, created through `factory` on first access
    pub fn get<T, F>(&self, domain: &BusinessDomainId, name: &str, factory: F) -> Result<Arc<T>, ScopeError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        self.try_get(domain, name, || Ok(factory()))
    }

    /// Like [`get`](Self::get) with a fallible factory. A failing factory
    /// leaves the slot empty.
    pub fn try_get<T, F>(&self, domain: &BusinessDomainId, name: &str, factory: F) -> Result<Arc<T>, ScopeError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, ScopeError>,
    {
        loop {
            let store = self.store_for(domain);
            let mut store = lock(&store);
            if store.destroyed {
                debug!(domain = %domain, name, "Store destroyed during lookup, retrying");
                continue;
            }

            if let Some(existing) = store.instances.get(name) {
                return Arc::clone(existing)
                    .downcast::<T>()
                    .map_err(|_| ScopeError::TypeMismatch {
                        domain: domain.clone(),
                        name: name.to_string(),
                        expected: type_name::<T>(),
                    });
            }

            let created = Arc::new(factory()?);
            store
                .instances
                .insert(name.to_string(), Arc::clone(&created) as Instance);
            debug!(domain = %domain, name, "Created scoped instance");
            return Ok(created);
        }
    }

    /// Cached instance `name` of the current domain
    pub fn get_current<T, F>(&self, name: &str, factory: F) -> Result<Arc<T>, ScopeError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let domain = CurrentDomain::get()?;
        self.get(&domain, name, factory)
    }

    /// Evict one instance, discarding its release callback
    pub fn remove(&self, domain: &BusinessDomainId, name: &str) -> bool {
        let store = {
            let stores = lock(&self.stores);
            match stores.get(domain) {
                Some(store) => Arc::clone(store),
                None => return false,
            }
        };
        let mut store = lock(&store);
        store.callbacks.remove(name);
        store.instances.remove(name).is_some()
    }

    /// Register the action run for `name` when `domain` is torn down.
    /// A second registration for the same name replaces the first.
    pub fn register_release_callback(&self, domain: &BusinessDomainId, name: &str, callback: ReleaseCallback) {
        loop {
            let store = self.store_for(domain);
            let mut store = lock(&store);
            if store.destroyed {
                continue;
            }
            store.callbacks.insert(name.to_string(), callback);
            return;
        }
    }

    /// Release every instance of `domain` and discard its store.
    ///
    /// Callbacks run outside of any lock. A failing or panicking callback is
    /// logged and the remaining callbacks still run. Returns the number of
    /// callbacks that failed.
    pub fn destroy_domain(&self, domain: &BusinessDomainId) -> usize {
        let Some(store) = lock(&self.stores).remove(domain) else {
            return 0;
        };

        let (instances, callbacks) = {
            let mut store = lock(&store);
            store.destroyed = true;
            (
                std::mem::take(&mut store.instances),
                std::mem::take(&mut store.callbacks),
            )
        };

        let mut failed = 0;
        for (name, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(callback)) {
                Ok(Ok(())) => debug!(domain = %domain, name = %name, "Released scoped instance"),
                Ok(Err(e)) => {
                    failed += 1;
                    error!(domain = %domain, name = %name, error = %e, "Release callback failed");
                }
                Err(_) => {
                    failed += 1;
                    error!(domain = %domain, name = %name, "Release callback panicked");
                }
            }
        }

        info!(
            domain = %domain,
            instances = instances.len(),
            failed,
            "Business domain scope destroyed"
        );
        failed
    }

    /// Whether `domain` currently caches an instance called `name`
    pub fn contains(&self, domain: &BusinessDomainId, name: &str) -> bool {
        let store = {
            let stores = lock(&self.stores);
            match stores.get(domain) {
                Some(store) => Arc::clone(store),
                None => return false,
            }
        };
        let store = lock(&store);
        store.instances.contains_key(name)
    }

    /// Domains that currently own a store
    pub fn domains(&self) -> Vec<BusinessDomainId> {
        let mut domains: Vec<_> = lock(&self.stores).keys().cloned().collect();
        domains.sort();
        domains
    }
}

impl std::fmt::Debug for DomainScopeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainScopeStore")
            .field("domains", &self.domains())
            .finish()
    }
}
