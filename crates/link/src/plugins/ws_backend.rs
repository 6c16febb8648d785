//! Web-service backend plugin
//!
//! Backends either get their messages pushed to a web-service endpoint, or
//! fetch them from the connector (passive send mode). Backends submit
//! messages to the connector by calling it; the calling backend is
//! identified by the DN of its client certificate.

use crate::active::{ActiveLink, ActiveLinkPartner};
use crate::context::LinkContext;
use crate::plugin::{ConfigClass, ConfigLevel, ConfigProperty, LinkPlugin, SubmitReceipt, SubmitToLinkPartner};
use crate::transport::PushTransport;
use serde::Deserialize;
use shared::{
    bind_properties, LinkMode, LinkPartner, LinkPartnerName, LinkPluginError, LinkType, Message, PluginFeature,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

pub const IMPLEMENTATION_NAME: &str = "wsbackendplugin";

/// Link level configuration, bound below `backend`
#[derive(Debug, Clone, Deserialize)]
pub struct WsBackendLinkConfig {
    /// Reject backend calls whose certificate DN is not registered
    #[serde(default = "default_true")]
    pub require_certificate: bool,
}

fn default_true() -> bool {
    true
}

/// Partner level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsBackendPartnerConfig {
    /// Endpoint messages are pushed to in PUSH send mode
    #[serde(default)]
    pub push_address: Option<String>,

    /// DN of the certificate the backend authenticates with
    #[serde(default)]
    pub certificate_dn: Option<String>,
}

/// Maps client certificate DNs to the partners enabled on a link
#[derive(Debug, Default)]
pub struct PartnerDirectory {
    by_certificate: Mutex<HashMap<String, LinkPartnerName>>,
}

impl PartnerDirectory {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, LinkPartnerName>> {
        self.by_certificate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, dn: &str, partner: &LinkPartnerName) -> Result<(), LinkPluginError> {
        let mut entries = self.lock();
        match entries.get(dn) {
            Some(existing) if existing != partner => Err(LinkPluginError::Lifecycle(format!(
                "Certificate DN '{}' is already used by link partner '{}'",
                dn, existing
            ))),
            _ => {
                entries.insert(dn.to_string(), partner.clone());
                Ok(())
            }
        }
    }

    fn deregister(&self, partner: &LinkPartnerName) {
        self.lock().retain(|_, p| p != partner);
    }

    pub fn lookup(&self, dn: &str) -> Option<LinkPartnerName> {
        self.lock().get(dn).cloned()
    }
}

/// Messages waiting for backends in PASSIVE send mode
#[derive(Debug, Default)]
pub struct PassiveOutbox {
    pending: Mutex<HashMap<LinkPartnerName, VecDeque<Message>>>,
}

impl PassiveOutbox {
    fn lock(&self) -> MutexGuard<'_, HashMap<LinkPartnerName, VecDeque<Message>>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand all pending messages of `partner` to the calling backend
    pub fn fetch(&self, partner: &LinkPartnerName) -> Vec<Message> {
        self.lock()
            .get_mut(partner)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn pending(&self, partner: &LinkPartnerName) -> usize {
        self.lock().get(partner).map(VecDeque::len).unwrap_or(0)
    }
}

struct WsBackendSubmit {
    context: Arc<LinkContext>,
    transport: Arc<dyn PushTransport>,
    send_mode: LinkMode,
    config: WsBackendPartnerConfig,
}

impl SubmitToLinkPartner for WsBackendSubmit {
    fn submit_to_link(&self, message: &Message, partner: &LinkPartnerName) -> Result<SubmitReceipt, LinkPluginError> {
        self.context.ensure_open()?;
        match (self.send_mode, self.config.push_address.as_deref()) {
            (LinkMode::Push, Some(address)) => {
                let remote = self.transport.push(partner, address, message)?;
                Ok(SubmitReceipt {
                    remote_message_id: Some(remote),
                })
            }
            (LinkMode::Push, None) => Err(LinkPluginError::Binding {
                target: format!("link partner '{}'", partner),
                reason: "push-address is required in PUSH send mode".to_string(),
            }),
            _ => {
                let outbox = self.context.component::<PassiveOutbox>()?;
                outbox
                    .lock()
                    .entry(partner.clone())
                    .or_default()
                    .push_back(message.clone());
                debug!(partner = %partner, message_id = %message.connector_message_id, "Message stored for backend fetch");
                Ok(SubmitReceipt::default())
            }
        }
    }
}

/// Backend plugin speaking the connector's web-service protocol
pub struct WsBackendPlugin {
    transport: Arc<dyn PushTransport>,
}

impl WsBackendPlugin {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    /// Accept a message submitted by the backend authenticated as `certificate_dn`
    pub fn receive_from_backend(
        link: &ActiveLink,
        certificate_dn: &str,
        message: Message,
    ) -> Result<LinkPartnerName, LinkPluginError> {
        let directory = link.context().component::<PartnerDirectory>()?;
        let partner = directory.lookup(certificate_dn).ok_or_else(|| {
            LinkPluginError::Lifecycle(format!("No backend registered for certificate '{}'", certificate_dn))
        })?;
        link.context()
            .connector()?
            .submit_to_connector(message, link.domain(), &partner, LinkType::Backend)
            .map_err(|e| LinkPluginError::Lifecycle(e.to_string()))?;
        Ok(partner)
    }

    /// Messages waiting for `partner` when it fetches in passive mode
    pub fn fetch_for_backend(link: &ActiveLink, partner: &LinkPartnerName) -> Result<Vec<Message>, LinkPluginError> {
        Ok(link.context().component::<PassiveOutbox>()?.fetch(partner))
    }
}

impl LinkPlugin for WsBackendPlugin {
    fn name(&self) -> &str {
        IMPLEMENTATION_NAME
    }

    fn start_configuration(&self, context: LinkContext) -> Result<ActiveLink, LinkPluginError> {
        let config: WsBackendLinkConfig = context.bind("backend")?;
        context.register(Arc::new(config))?;
        context.register(Arc::new(PartnerDirectory::default()))?;
        context.register(Arc::new(PassiveOutbox::default()))?;
        info!(link = %context.config_name(), domain = %context.domain(), "Web-service backend link started");
        Ok(ActiveLink::new(IMPLEMENTATION_NAME, context))
    }

    fn enable_link_partner(
        &self,
        partner: LinkPartner,
        link: &Arc<ActiveLink>,
    ) -> Result<ActiveLinkPartner, LinkPluginError> {
        let config: WsBackendPartnerConfig =
            bind_properties(&partner.properties, "").map_err(|reason| LinkPluginError::Binding {
                target: format!("link partner '{}'", partner.link_partner_name),
                reason,
            })?;
        let link_config = link.context().component::<WsBackendLinkConfig>()?;

        if partner.send_link_mode == LinkMode::Push && config.push_address.is_none() {
            return Err(LinkPluginError::Binding {
                target: format!("link partner '{}'", partner.link_partner_name),
                reason: "push-address is required in PUSH send mode".to_string(),
            });
        }
        match config.certificate_dn.as_deref() {
            Some(dn) => link
                .context()
                .component::<PartnerDirectory>()?
                .register(dn, &partner.link_partner_name)?,
            None if link_config.require_certificate => {
                return Err(LinkPluginError::Binding {
                    target: format!("link partner '{}'", partner.link_partner_name),
                    reason: "certificate-dn is required".to_string(),
                })
            }
            None => {}
        }

        let submit = WsBackendSubmit {
            context: Arc::clone(link.context()),
            transport: Arc::clone(&self.transport),
            send_mode: partner.send_link_mode,
            config,
        };
        info!(link = %link.config_name(), partner = %partner.link_partner_name, "Backend partner enabled");
        Ok(ActiveLinkPartner::new(partner, link).with_submit(Arc::new(submit)))
    }

    fn shutdown_active_link_partner(&self, partner: &ActiveLinkPartner) -> Result<(), LinkPluginError> {
        if let Some(link) = partner.parent() {
            if let Ok(directory) = link.context().component::<PartnerDirectory>() {
                directory.deregister(partner.name());
            }
        }
        info!(partner = %partner.name(), "Backend partner shut down");
        Ok(())
    }

    fn features(&self) -> BTreeSet<PluginFeature> {
        BTreeSet::from([
            PluginFeature::RcvPassiveMode,
            PluginFeature::SendPushMode,
            PluginFeature::SendPassiveMode,
            PluginFeature::SupportsLinkPartnerShutdown,
            PluginFeature::BackendPlugin,
            PluginFeature::SupportsMultiplePartners,
        ])
    }

    fn supported_link_types(&self) -> BTreeSet<LinkType> {
        BTreeSet::from([LinkType::Backend])
    }

    fn config_schema(&self) -> Vec<ConfigClass> {
        vec![
            ConfigClass {
                name: "WsBackendLinkConfig",
                level: ConfigLevel::Plugin,
                prefix: "backend",
                properties: vec![ConfigProperty {
                    key: "require-certificate",
                    description: "Reject partners without a certificate DN",
                    required: false,
                }],
            },
            ConfigClass {
                name: "WsBackendPartnerConfig",
                level: ConfigLevel::Partner,
                prefix: "",
                properties: vec![
                    ConfigProperty {
                        key: "push-address",
                        description: "Endpoint messages are pushed to",
                        required: false,
                    },
                    ConfigProperty {
                        key: "certificate-dn",
                        description: "DN of the backend's client certificate",
                        required: false,
                    },
                ],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::RecordingConnector;
    use crate::transport::RecordingTransport;
    use shared::{BusinessDomainId, LinkConfiguration, MessageContent, MessageDetails, MessageDirection, Party};

    fn configuration() -> LinkConfiguration {
        LinkConfiguration::new(BusinessDomainId::default(), "wsbackend", IMPLEMENTATION_NAME)
    }

    fn start(plugin: &WsBackendPlugin, connector: Arc<RecordingConnector>) -> Arc<ActiveLink> {
        Arc::new(plugin.start_configuration(LinkContext::new(configuration(), connector)).unwrap())
    }

    fn partner(name: &str, dn: &str) -> LinkPartner {
        LinkPartner::new(name, LinkType::Backend, configuration())
            .with_property("push-address", format!("http://{}/push", name))
            .with_property("certificate-dn", dn)
    }

    fn message() -> Message {
        Message::business(
            MessageDetails::new(MessageDirection::GatewayToBackend, Party::default(), Party::default()),
            MessageContent::default(),
        )
    }

    #[test]
    fn test_push_partner_submits_through_transport() {
        let transport = Arc::new(RecordingTransport::new());
        let plugin = WsBackendPlugin::new(transport.clone());
        let link = start(&plugin, Arc::new(RecordingConnector::default()));

        let active = plugin.enable_link_partner(partner("partner1", "CN=partner1"), &link).unwrap();
        let submit = plugin.submit_capability(&active).unwrap();
        let receipt = submit.submit_to_link(&message(), active.name()).unwrap();

        assert!(receipt.remote_message_id.is_some());
        assert_eq!(transport.pushed()[0].address, "http://partner1/push");
    }

    #[test]
    fn test_passive_partner_messages_are_fetched() {
        let plugin = WsBackendPlugin::new(Arc::new(RecordingTransport::new()));
        let link = start(&plugin, Arc::new(RecordingConnector::default()));
        let info = LinkPartner::new("passive", LinkType::Backend, configuration())
            .with_send_mode(LinkMode::Passive)
            .with_property("certificate-dn", "CN=passive");

        let active = plugin.enable_link_partner(info, &link).unwrap();
        plugin
            .submit_capability(&active)
            .unwrap()
            .submit_to_link(&message(), active.name())
            .unwrap();

        let fetched = WsBackendPlugin::fetch_for_backend(&link, active.name()).unwrap();
        assert_eq!(fetched.len(), 1);
        assert!(WsBackendPlugin::fetch_for_backend(&link, active.name()).unwrap().is_empty());
    }

    #[test]
    fn test_certificate_registration_lifecycle() {
        let connector = Arc::new(RecordingConnector::default());
        let plugin = WsBackendPlugin::new(Arc::new(RecordingTransport::new()));
        let link = start(&plugin, connector.clone());

        let active = plugin.enable_link_partner(partner("partner1", "CN=partner1"), &link).unwrap();
        let name = WsBackendPlugin::receive_from_backend(&link, "CN=partner1", message()).unwrap();
        assert_eq!(name.as_str(), "partner1");
        assert_eq!(connector.count(), 1);

        plugin.shutdown_active_link_partner(&active).unwrap();
        assert!(WsBackendPlugin::receive_from_backend(&link, "CN=partner1", message()).is_err());
    }

    #[test]
    fn test_certificate_dn_must_be_unique() {
        let plugin = WsBackendPlugin::new(Arc::new(RecordingTransport::new()));
        let link = start(&plugin, Arc::new(RecordingConnector::default()));

        plugin.enable_link_partner(partner("a", "CN=same"), &link).unwrap();
        let err = plugin.enable_link_partner(partner("b", "CN=same"), &link).unwrap_err();
        assert!(err.is_lifecycle_failure());
    }

    #[test]
    fn test_missing_push_address_rejected() {
        let plugin = WsBackendPlugin::new(Arc::new(RecordingTransport::new()));
        let link = start(&plugin, Arc::new(RecordingConnector::default()));
        let info = LinkPartner::new("p", LinkType::Backend, configuration()).with_property("certificate-dn", "CN=p");

        let err = plugin.enable_link_partner(info, &link).unwrap_err();
        assert!(matches!(err, LinkPluginError::Binding { .. }));
    }

    #[test]
    fn test_pull_capability_not_supported() {
        let plugin = WsBackendPlugin::new(Arc::new(RecordingTransport::new()));
        let link = start(&plugin, Arc::new(RecordingConnector::default()));
        let active = plugin.enable_link_partner(partner("p", "CN=p"), &link).unwrap();

        let err = plugin.pull_capability(&active).unwrap_err();
        assert!(matches!(
            err,
            LinkPluginError::FeatureNotSupported(ref e) if e.feature == PluginFeature::RcvPullMode
        ));
    }
}
