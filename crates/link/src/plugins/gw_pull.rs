//! Gateway plugin that pulls incoming messages from the gateway

use crate::active::{ActiveLink, ActiveLinkPartner};
use crate::context::LinkContext;
use crate::plugin::{
    ConfigClass, ConfigLevel, ConfigProperty, LinkPlugin, PullFromLinkPartner, SubmitReceipt, SubmitToLinkPartner,
};
use crate::transport::{PullTransport, PushTransport};
use serde::Deserialize;
use shared::{LinkMode, LinkPartner, LinkPartnerName, LinkPluginError, LinkType, Message, PluginFeature};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const IMPLEMENTATION_NAME: &str = "gwwspullplugin";

/// Link level configuration, bound below `gw`
#[derive(Debug, Clone, Deserialize)]
pub struct GwPullLinkConfig {
    /// Web-service endpoint of the gateway
    pub address: String,
}

struct GatewaySubmit {
    context: Arc<LinkContext>,
    transport: Arc<dyn PushTransport>,
    address: String,
}

impl SubmitToLinkPartner for GatewaySubmit {
    fn submit_to_link(&self, message: &Message, partner: &LinkPartnerName) -> Result<SubmitReceipt, LinkPluginError> {
        self.context.ensure_open()?;
        let remote = self.transport.push(partner, &self.address, message)?;
        Ok(SubmitReceipt {
            remote_message_id: Some(remote),
        })
    }
}

struct GatewayPull {
    context: Arc<LinkContext>,
    transport: Arc<dyn PullTransport>,
    address: String,
}

impl PullFromLinkPartner for GatewayPull {
    fn pull_from_link_partner(&self, partner: &LinkPartnerName) -> Result<Vec<Message>, LinkPluginError> {
        self.context.ensure_open()?;
        let messages = self.transport.pull(partner, &self.address)?;
        debug!(partner = %partner, count = messages.len(), "Pulled messages from gateway");
        Ok(messages)
    }
}

/// Gateway plugin: pushes outgoing messages, pulls incoming ones
pub struct GwPullPlugin {
    push: Arc<dyn PushTransport>,
    pull: Arc<dyn PullTransport>,
}

impl GwPullPlugin {
    pub fn new(push: Arc<dyn PushTransport>, pull: Arc<dyn PullTransport>) -> Self {
        Self { push, pull }
    }
}

impl LinkPlugin for GwPullPlugin {
    fn name(&self) -> &str {
        IMPLEMENTATION_NAME
    }

    fn start_configuration(&self, context: LinkContext) -> Result<ActiveLink, LinkPluginError> {
        let config: GwPullLinkConfig = context.bind("gw")?;
        let context_address = config.address.clone();
        context.register(Arc::new(config))?;
        info!(link = %context.config_name(), address = %context_address, "Gateway pull link started");

        let link = ActiveLink::new(IMPLEMENTATION_NAME, context);
        let submit = GatewaySubmit {
            context: Arc::clone(link.context()),
            transport: Arc::clone(&self.push),
            address: context_address,
        };
        Ok(link.with_submit(Arc::new(submit)))
    }

    fn enable_link_partner(
        &self,
        partner: LinkPartner,
        link: &Arc<ActiveLink>,
    ) -> Result<ActiveLinkPartner, LinkPluginError> {
        let config = link.context().component::<GwPullLinkConfig>()?;
        let pull_mode = partner.rcv_link_mode == LinkMode::Pull;
        info!(link = %link.config_name(), partner = %partner.link_partner_name, pull = pull_mode, "Gateway partner enabled");

        let active = ActiveLinkPartner::new(partner, link);
        if pull_mode {
            let pull = GatewayPull {
                context: Arc::clone(link.context()),
                transport: Arc::clone(&self.pull),
                address: config.address.clone(),
            };
            Ok(active.with_pull(Arc::new(pull)))
        } else {
            Ok(active)
        }
    }

    fn shutdown_active_link_partner(&self, partner: &ActiveLinkPartner) -> Result<(), LinkPluginError> {
        info!(partner = %partner.name(), "Gateway partner shut down");
        Ok(())
    }

    fn features(&self) -> BTreeSet<PluginFeature> {
        BTreeSet::from([
            PluginFeature::RcvPullMode,
            PluginFeature::SendPushMode,
            PluginFeature::GatewayPlugin,
            PluginFeature::SupportsLinkPartnerShutdown,
            PluginFeature::SupportsLinkShutdown,
        ])
    }

    fn supported_link_types(&self) -> BTreeSet<LinkType> {
        BTreeSet::from([LinkType::Gateway])
    }

    fn config_schema(&self) -> Vec<ConfigClass> {
        vec![ConfigClass {
            name: "GwPullLinkConfig",
            level: ConfigLevel::Plugin,
            prefix: "gw",
            properties: vec![ConfigProperty {
                key: "address",
                description: "Web-service endpoint of the gateway",
                required: true,
            }],
        }]
    }
}
