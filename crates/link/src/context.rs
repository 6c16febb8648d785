//! LinkContext - isolated execution context of one started link configuration

use crate::plugin::SubmitToConnector;
use serde::de::DeserializeOwned;
use shared::{
    bind_properties, BusinessDomainId, LinkConfigName, LinkConfiguration, LinkPluginError,
};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// Isolated execution context of a started link configuration.
///
/// Holds the configuration, the components the plugin built for it (one
/// instance per type) and the connector entry point. Once closed, every
/// lookup fails with [`LinkPluginError::ContextClosed`].
pub struct LinkContext {
    configuration: LinkConfiguration,
    connector: Arc<dyn SubmitToConnector>,
    components: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    closed: AtomicBool,
}

impl LinkContext {
    pub fn new(configuration: LinkConfiguration, connector: Arc<dyn SubmitToConnector>) -> Self {
        Self {
            configuration,
            connector,
            components: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn configuration(&self) -> &LinkConfiguration {
        &self.configuration
    }

    pub fn config_name(&self) -> &LinkConfigName {
        &self.configuration.config_name
    }

    pub fn domain(&self) -> &BusinessDomainId {
        &self.configuration.domain
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the context and drop its components. Returns false if it was
    /// already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.components
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        true
    }

    pub fn ensure_open(&self) -> Result<(), LinkPluginError> {
        if self.is_closed() {
            Err(LinkPluginError::ContextClosed {
                link: self.config_name().clone(),
            })
        } else {
            Ok(())
        }
    }

    /// Connector entry point for messages received on this link
    pub fn connector(&self) -> Result<Arc<dyn SubmitToConnector>, LinkPluginError> {
        self.ensure_open()?;
        Ok(Arc::clone(&self.connector))
    }

    /// Register the component of type `T`, replacing an earlier one
    pub fn register<T: Any + Send + Sync>(&self, component: Arc<T>) -> Result<(), LinkPluginError> {
        self.ensure_open()?;
        self.components
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(TypeId::of::<T>(), component);
        Ok(())
    }

    /// The registered component of type `T`
    pub fn component<T: Any + Send + Sync>(&self) -> Result<Arc<T>, LinkPluginError> {
        self.ensure_open()?;
        let component = self
            .components
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| {
                LinkPluginError::Lifecycle(format!(
                    "Link '{}' has no component {}",
                    self.config_name(),
                    type_name::<T>()
                ))
            })?;
        component.downcast::<T>().map_err(|_| {
            LinkPluginError::Lifecycle(format!("Component {} has an unexpected type", type_name::<T>()))
        })
    }

    /// Bind the link properties below `prefix` to `T`
    pub fn bind<T: DeserializeOwned>(&self, prefix: &str) -> Result<T, LinkPluginError> {
        bind_properties(&self.configuration.properties, prefix).map_err(|reason| LinkPluginError::Binding {
            target: format!("link configuration '{}'", self.config_name()),
            reason,
        })
    }
}

impl std::fmt::Debug for LinkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkContext")
            .field("config_name", self.config_name())
            .field("domain", self.domain())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared::{ConnectorError, LinkPartnerName, LinkType, Message};
    use std::sync::Mutex;

    /// Connector port recording every received message
    #[derive(Default)]
    pub(crate) struct RecordingConnector {
        pub received: Mutex<Vec<(Message, LinkPartnerName, LinkType)>>,
    }

    impl RecordingConnector {
        pub(crate) fn count(&self) -> usize {
            self.received.lock().unwrap().len()
        }
    }

    impl SubmitToConnector for RecordingConnector {
        fn submit_to_connector(
            &self,
            message: Message,
            domain: &BusinessDomainId,
            partner: &LinkPartnerName,
            link_type: LinkType,
        ) -> Result<(), ConnectorError> {
            self.received
                .lock()
                .unwrap()
                .push((message.in_domain(domain.clone()), partner.clone(), link_type));
            Ok(())
        }
    }

    fn context() -> LinkContext {
        let configuration = LinkConfiguration::new(BusinessDomainId::default(), "wsbackend", "wsbackendplugin")
            .with_property("backend.service-name", "svc");
        LinkContext::new(configuration, Arc::new(RecordingConnector::default()))
    }

    #[derive(Debug, serde::Deserialize)]
    struct ServiceConfig {
        service_name: String,
    }

    #[test]
    fn test_component_registry() {
        let context = context();
        context.register(Arc::new(42u32)).unwrap();
        assert_eq!(*context.component::<u32>().unwrap(), 42);
        assert!(context.component::<String>().is_err());
    }

    #[test]
    fn test_closed_context_fails_fast() {
        let context = context();
        context.register(Arc::new(1u32)).unwrap();
        assert!(context.close());
        assert!(!context.close());

        let err = context.component::<u32>().unwrap_err();
        assert!(matches!(err, LinkPluginError::ContextClosed { .. }));
        assert!(context.connector().is_err());
        assert!(context.register(Arc::new(2u32)).is_err());
    }

    #[test]
    fn test_bind_link_properties() {
        let context = context();
        let config: ServiceConfig = context.bind("backend").unwrap();
        assert_eq!(config.service_name, "svc");

        let err = context.bind::<ServiceConfig>("missing").unwrap_err();
        assert!(matches!(err, LinkPluginError::Binding { .. }));
    }
}
