//! Link plugin SPI

use crate::active::{ActiveLink, ActiveLinkPartner};
use crate::context::LinkContext;
use serde::Serialize;
use shared::{
    BusinessDomainId, ConnectorError, FeatureNotSupportedError, LinkPartner, LinkPartnerName, LinkPluginError,
    LinkType, Message, PluginFeature,
};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of handing a message to a link partner
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReceipt {
    /// Id the partner assigned to the message, if it reports one
    pub remote_message_id: Option<String>,
}

/// Capability to hand a message to a link partner
pub trait SubmitToLinkPartner: Send + Sync {
    fn submit_to_link(&self, message: &Message, partner: &LinkPartnerName) -> Result<SubmitReceipt, LinkPluginError>;
}

/// Capability to fetch pending messages from a link partner
pub trait PullFromLinkPartner: Send + Sync {
    fn pull_from_link_partner(&self, partner: &LinkPartnerName) -> Result<Vec<Message>, LinkPluginError>;
}

/// Entry point of the connector for messages received from a link partner
pub trait SubmitToConnector: Send + Sync {
    fn submit_to_connector(
        &self,
        message: Message,
        domain: &BusinessDomainId,
        partner: &LinkPartnerName,
        link_type: LinkType,
    ) -> Result<(), ConnectorError>;
}

/// Level a configuration class applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigLevel {
    Plugin,
    Partner,
}

/// One property of a configuration class
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigProperty {
    pub key: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// Description of the properties a plugin reads at one level
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigClass {
    pub name: &'static str,
    pub level: ConfigLevel,
    /// Prefix the properties are bound below, empty for the whole map
    pub prefix: &'static str,
    pub properties: Vec<ConfigProperty>,
}

/// A transport implementation hosted by the connector.
///
/// Plugins are stateless; everything a started configuration needs lives in
/// its [`LinkContext`]. Only the [`LinkManager`](crate::LinkManager) drives a
/// plugin through its lifecycle.
pub trait LinkPlugin: Send + Sync {
    /// Implementation name link configurations refer to
    fn name(&self) -> &str;

    /// Whether this plugin implements `implementation`
    fn can_handle(&self, implementation: &str) -> bool {
        self.name() == implementation
    }

    /// Build the runtime state of a configuration inside `context`
    fn start_configuration(&self, context: LinkContext) -> Result<ActiveLink, LinkPluginError>;

    /// Release the runtime state of a configuration
    fn shutdown_configuration(&self, link: &ActiveLink) -> Result<(), LinkPluginError> {
        link.context().close();
        Ok(())
    }

    /// Make `partner` reachable through `link`
    fn enable_link_partner(
        &self,
        partner: LinkPartner,
        link: &Arc<ActiveLink>,
    ) -> Result<ActiveLinkPartner, LinkPluginError>;

    /// Release the runtime state of a partner
    fn shutdown_active_link_partner(&self, partner: &ActiveLinkPartner) -> Result<(), LinkPluginError>;

    /// Submit capability for `partner`: the partner's own, else the link's
    fn submit_capability(
        &self,
        partner: &ActiveLinkPartner,
    ) -> Result<Arc<dyn SubmitToLinkPartner>, LinkPluginError> {
        if let Some(submit) = partner.submit() {
            return Ok(submit);
        }
        partner
            .parent()
            .and_then(|link| link.submit())
            .ok_or_else(|| self.unsupported(PluginFeature::SendPushMode).into())
    }

    /// Pull capability for `partner`
    fn pull_capability(
        &self,
        partner: &ActiveLinkPartner,
    ) -> Result<Option<Arc<dyn PullFromLinkPartner>>, LinkPluginError> {
        self.require(PluginFeature::RcvPullMode)?;
        Ok(partner.pull())
    }

    fn features(&self) -> BTreeSet<PluginFeature>;

    fn supported_link_types(&self) -> BTreeSet<LinkType> {
        LinkType::all()
    }

    fn config_schema(&self) -> Vec<ConfigClass>;

    fn supports(&self, feature: PluginFeature) -> bool {
        self.features().contains(&feature)
    }

    fn unsupported(&self, feature: PluginFeature) -> FeatureNotSupportedError {
        FeatureNotSupportedError {
            plugin: self.name().to_string(),
            feature,
        }
    }

    /// Fail with [`FeatureNotSupportedError`] unless `feature` is declared
    fn require(&self, feature: PluginFeature) -> Result<(), FeatureNotSupportedError> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(self.unsupported(feature))
        }
    }
}

impl std::fmt::Debug for dyn SubmitToLinkPartner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SubmitToLinkPartner")
    }
}

impl std::fmt::Debug for dyn PullFromLinkPartner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PullFromLinkPartner")
    }
}

impl std::fmt::Debug for dyn LinkPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkPlugin")
            .field("name", &self.name())
            .field("features", &self.features())
            .finish()
    }
}
