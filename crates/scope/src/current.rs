//! Current business domain of the calling thread

use shared::{BusinessDomainId, ScopeError};
use std::cell::RefCell;
use std::marker::PhantomData;

thread_local! {
    static CURRENT: RefCell<Option<BusinessDomainId>> = const { RefCell::new(None) };
}

/// Ambient business domain, set per thread of execution
pub struct CurrentDomain;

impl CurrentDomain {
    /// Make `domain` current until the returned guard is dropped
    pub fn enter(domain: BusinessDomainId) -> CurrentDomainGuard {
        let previous = CURRENT.with(|c| c.replace(Some(domain)));
        CurrentDomainGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// The current domain, failing when none is set
    pub fn get() -> Result<BusinessDomainId, ScopeError> {
        Self::try_get().ok_or(ScopeError::NoCurrentDomain)
    }

    pub fn try_get() -> Option<BusinessDomainId> {
        CURRENT.with(|c| c.borrow().clone())
    }

    /// Run `f` with `domain` as the current domain
    pub fn scope<R>(domain: BusinessDomainId, f: impl FnOnce() -> R) -> R {
        let _guard = Self::enter(domain);
        f()
    }
}

/// Restores the previously current domain on drop
#[must_use = "the domain is only current while the guard lives"]
pub struct CurrentDomainGuard {
    previous: Option<BusinessDomainId>,
    // The guard restores thread-local state and must stay on its thread
    _not_send: PhantomData<*const ()>,
}

impl Drop for CurrentDomainGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_current_domain_is_error() {
        assert!(matches!(CurrentDomain::get(), Err(ScopeError::NoCurrentDomain)));
    }

    #[test]
    fn test_guard_restores_previous() {
        let outer = CurrentDomain::enter(BusinessDomainId::new("a"));
        {
            let _inner = CurrentDomain::enter(BusinessDomainId::new("b"));
            assert_eq!(CurrentDomain::get().unwrap().as_str(), "b");
        }
        assert_eq!(CurrentDomain::get().unwrap().as_str(), "a");
        drop(outer);
        assert!(CurrentDomain::try_get().is_none());
    }

    #[test]
    fn test_domain_is_per_thread() {
        let _guard = CurrentDomain::enter(BusinessDomainId::new("a"));
        let other = std::thread::spawn(CurrentDomain::try_get).join().unwrap();
        assert!(other.is_none());
    }

    #[test]
    fn test_scope_helper() {
        let seen = CurrentDomain::scope(BusinessDomainId::new("x"), || CurrentDomain::get().unwrap());
        assert_eq!(seen.as_str(), "x");
        assert!(CurrentDomain::try_get().is_none());
    }
}
