//! Loop-back backend for connector tests
//!
//! Every business message delivered to the test backend is answered with a
//! DELIVERY evidence trigger sent back to the connector.

use crate::active::{ActiveLink, ActiveLinkPartner};
use crate::context::LinkContext;
use crate::plugin::{ConfigClass, LinkPlugin, SubmitReceipt, SubmitToLinkPartner};
use shared::{
    is_business_message, switch_message_direction, EvidenceType, LinkPartner, LinkPartnerName, LinkPluginError,
    LinkType, Message, MessageConfirmation, PluginFeature,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::info;

pub const IMPLEMENTATION_NAME: &str = "testbackend";

/// Messages the test backend received, per link
#[derive(Debug, Default)]
pub struct TestBackendInbox {
    received: Mutex<Vec<(LinkPartnerName, Message)>>,
}

impl TestBackendInbox {
    pub fn received(&self) -> Vec<(LinkPartnerName, Message)> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// DELIVERY trigger answering `message`
pub fn delivery_trigger_for(message: &Message, partner: &LinkPartnerName) -> Message {
    let mut details = switch_message_direction(&message.details);
    details.ref_to_message_id = message
        .details
        .ebms_message_id
        .clone()
        .or_else(|| Some(message.connector_message_id.to_string()));
    details.backend_message_id = None;
    details.ebms_message_id = None;
    details.connector_backend = Some(partner.clone());

    Message::evidence(details, MessageConfirmation::trigger(EvidenceType::Delivery)).in_domain(message.domain.clone())
}

struct SubmitToTestBackend {
    context: Arc<LinkContext>,
}

impl SubmitToLinkPartner for SubmitToTestBackend {
    fn submit_to_link(&self, message: &Message, partner: &LinkPartnerName) -> Result<SubmitReceipt, LinkPluginError> {
        self.context.ensure_open()?;
        self.context
            .component::<TestBackendInbox>()?
            .received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((partner.clone(), message.clone()));

        if is_business_message(message) {
            let trigger = delivery_trigger_for(message, partner);
            info!(
                partner = %partner,
                message_id = %message.connector_message_id,
                "Test backend answers with DELIVERY trigger"
            );
            self.context
                .connector()?
                .submit_to_connector(trigger, self.context.domain(), partner, LinkType::Backend)
                .map_err(|e| LinkPluginError::Lifecycle(e.to_string()))?;
        }
        Ok(SubmitReceipt::default())
    }
}

/// Backend that confirms every business message it receives
#[derive(Debug, Default)]
pub struct TestBackendPlugin;

impl TestBackendPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl LinkPlugin for TestBackendPlugin {
    fn name(&self) -> &str {
        IMPLEMENTATION_NAME
    }

    fn start_configuration(&self, context: LinkContext) -> Result<ActiveLink, LinkPluginError> {
        context.register(Arc::new(TestBackendInbox::default()))?;
        let link = ActiveLink::new(IMPLEMENTATION_NAME, context);
        let submit = SubmitToTestBackend {
            context: Arc::clone(link.context()),
        };
        Ok(link.with_submit(Arc::new(submit)))
    }

    fn enable_link_partner(
        &self,
        partner: LinkPartner,
        link: &Arc<ActiveLink>,
    ) -> Result<ActiveLinkPartner, LinkPluginError> {
        Ok(ActiveLinkPartner::new(partner, link))
    }

    fn shutdown_active_link_partner(&self, _partner: &ActiveLinkPartner) -> Result<(), LinkPluginError> {
        Ok(())
    }

    fn features(&self) -> BTreeSet<PluginFeature> {
        BTreeSet::from([
            PluginFeature::SendPushMode,
            PluginFeature::RcvPassiveMode,
            PluginFeature::SupportsLinkPartnerShutdown,
            PluginFeature::SupportsLinkShutdown,
            PluginFeature::SupportsMultiplePartners,
            PluginFeature::SupportsConcurrentSubmit,
            PluginFeature::BackendPlugin,
        ])
    }

    fn supported_link_types(&self) -> BTreeSet<LinkType> {
        BTreeSet::from([LinkType::Backend])
    }

    fn config_schema(&self) -> Vec<ConfigClass> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::RecordingConnector;
    use shared::{
        is_evidence_message, BusinessDomainId, LinkConfiguration, MessageContent, MessageDetails,
        MessageDirection, Party,
    };

    #[test]
    fn test_business_message_is_answered_with_delivery_trigger() {
        let connector = Arc::new(RecordingConnector::default());
        let plugin = TestBackendPlugin::new();
        let configuration = LinkConfiguration::new(BusinessDomainId::new("tenantA"), "test", IMPLEMENTATION_NAME);
        let link = Arc::new(
            plugin
                .start_configuration(LinkContext::new(configuration.clone(), connector.clone()))
                .unwrap(),
        );
        let active = plugin
            .enable_link_partner(LinkPartner::new("testbackend1", LinkType::Backend, configuration), &link)
            .unwrap();

        let mut details = MessageDetails::new(MessageDirection::GatewayToBackend, Party::new("AT", None), Party::new("DE", None));
        details.ebms_message_id = Some("ebms-1".to_string());
        let message = Message::business(details, MessageContent::default()).in_domain(BusinessDomainId::new("tenantA"));

        plugin
            .submit_capability(&active)
            .unwrap()
            .submit_to_link(&message, active.name())
            .unwrap();

        let received = connector.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (trigger, partner, link_type) = &received[0];
        assert!(is_evidence_message(trigger));
        assert_eq!(trigger.transported_confirmations[0].evidence_type, EvidenceType::Delivery);
        assert_eq!(trigger.details.direction, MessageDirection::BackendToGateway);
        assert_eq!(trigger.details.ref_to_message_id.as_deref(), Some("ebms-1"));
        assert_eq!(trigger.domain.as_str(), "tenantA");
        assert_eq!(partner.as_str(), "testbackend1");
        assert_eq!(*link_type, LinkType::Backend);

        let inbox = link.context().component::<TestBackendInbox>().unwrap();
        assert_eq!(inbox.received().len(), 1);
    }

    #[test]
    fn test_evidence_message_is_not_answered() {
        let connector = Arc::new(RecordingConnector::default());
        let plugin = TestBackendPlugin::new();
        let configuration = LinkConfiguration::new(BusinessDomainId::default(), "test", IMPLEMENTATION_NAME);
        let link = Arc::new(
            plugin
                .start_configuration(LinkContext::new(configuration.clone(), connector.clone()))
                .unwrap(),
        );
        let active = plugin
            .enable_link_partner(LinkPartner::new("tb", LinkType::Backend, configuration), &link)
            .unwrap();

        let evidence = Message::evidence(
            MessageDetails::new(MessageDirection::GatewayToBackend, Party::default(), Party::default()),
            MessageConfirmation::new(EvidenceType::RelayRemmdAcceptance, b"<evidence/>".to_vec()),
        );
        plugin
            .submit_capability(&active)
            .unwrap()
            .submit_to_link(&evidence, active.name())
            .unwrap();

        assert_eq!(connector.count(), 0);
    }
}
