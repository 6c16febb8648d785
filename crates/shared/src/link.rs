//! Link configuration types

use crate::ids::{BusinessDomainId, LinkConfigName, LinkPartnerName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Side of the connector a link connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    Gateway,
    Backend,
}

impl LinkType {
    pub const ALL: [LinkType; 2] = [LinkType::Gateway, LinkType::Backend];

    pub fn all() -> BTreeSet<LinkType> {
        Self::ALL.into_iter().collect()
    }
}

/// How messages move between the connector and a link partner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkMode {
    /// The sending side delivers proactively
    #[default]
    Push,
    /// The receiving side fetches on its own schedule
    Pull,
    /// The partner calls the connector, the connector never initiates
    Passive,
}

/// Capability flags a link plugin declares statically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginFeature {
    SupportsMultiplePartners,
    RcvPullMode,
    RcvPushMode,
    RcvPassiveMode,
    SendPullMode,
    SendPushMode,
    SendPassiveMode,
    SupportsLinkShutdown,
    SupportsLinkPartnerShutdown,
    SupportsRetry,
    /// Submit capabilities may be called concurrently for one partner
    SupportsConcurrentSubmit,
    GatewayPlugin,
    BackendPlugin,
}

/// Named set of transport properties describing how to reach one side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkConfiguration {
    pub config_name: LinkConfigName,

    /// Owning business domain
    #[serde(default)]
    pub domain: BusinessDomainId,

    /// Name of the plugin implementation that handles this configuration
    pub link_impl: String,

    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl LinkConfiguration {
    pub fn new(
        domain: BusinessDomainId,
        config_name: impl Into<LinkConfigName>,
        link_impl: impl Into<String>,
    ) -> Self {
        Self {
            config_name: config_name.into(),
            domain,
            link_impl: link_impl.into(),
            properties: HashMap::new(),
        }
    }

    /// Builder: add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

fn default_pull_interval_secs() -> u64 {
    60
}

/// A remote endpoint reachable through a link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPartner {
    pub link_partner_name: LinkPartnerName,

    #[serde(default)]
    pub description: Option<String>,

    pub link_type: LinkType,

    #[serde(default)]
    pub send_link_mode: LinkMode,

    #[serde(default)]
    pub rcv_link_mode: LinkMode,

    /// Seconds between two pulls when the receive mode is PULL
    #[serde(default = "default_pull_interval_secs")]
    pub pull_interval_secs: u64,

    #[serde(default)]
    pub properties: HashMap<String, String>,

    /// Configuration this partner is reached through
    pub link_configuration: LinkConfiguration,
}

impl LinkPartner {
    pub fn new(
        name: impl Into<LinkPartnerName>,
        link_type: LinkType,
        link_configuration: LinkConfiguration,
    ) -> Self {
        Self {
            link_partner_name: name.into(),
            description: None,
            link_type,
            send_link_mode: LinkMode::Push,
            rcv_link_mode: LinkMode::Passive,
            pull_interval_secs: default_pull_interval_secs(),
            properties: HashMap::new(),
            link_configuration,
        }
    }

    /// Builder: set the receive mode
    pub fn with_rcv_mode(mut self, mode: LinkMode) -> Self {
        self.rcv_link_mode = mode;
        self
    }

    /// Builder: set the send mode
    pub fn with_send_mode(mut self, mode: LinkMode) -> Self {
        self.send_link_mode = mode;
        self
    }

    /// Builder: add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builder: set the pull interval
    pub fn with_pull_interval(mut self, interval: Duration) -> Self {
        self.pull_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn domain(&self) -> &BusinessDomainId {
        &self.link_configuration.domain
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_config() -> LinkConfiguration {
        LinkConfiguration::new(BusinessDomainId::default(), "wsbackend", "wsbackendplugin")
    }

    #[test]
    fn test_all_link_types() {
        let all = LinkType::all();
        assert_eq!(all.len(), 2);
        assert!(all.contains(&LinkType::Backend));
    }

    #[test]
    fn test_partner_defaults() {
        let partner = LinkPartner::new("partner1", LinkType::Backend, backend_config());
        assert_eq!(partner.send_link_mode, LinkMode::Push);
        assert_eq!(partner.rcv_link_mode, LinkMode::Passive);
        assert_eq!(partner.pull_interval(), Duration::from_secs(60));
        assert!(partner.domain().is_default());
    }

    #[test]
    fn test_pull_interval_never_zero() {
        let partner = LinkPartner::new("partner1", LinkType::Gateway, backend_config())
            .with_pull_interval(Duration::from_millis(10));
        assert_eq!(partner.pull_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partner_parse_from_json() {
        let json = r#"{
            "linkPartnerName": "gw",
            "linkType": "GATEWAY",
            "rcvLinkMode": "PULL",
            "pullIntervalSecs": 5,
            "linkConfiguration": {
                "configName": "gwpull",
                "linkImpl": "gwwspullplugin",
                "properties": {"gw.address": "http://gw"}
            }
        }"#;

        let partner: LinkPartner = serde_json::from_str(json).unwrap();
        assert_eq!(partner.rcv_link_mode, LinkMode::Pull);
        assert_eq!(partner.link_configuration.link_impl, "gwwspullplugin");
        assert!(partner.domain().is_default());
    }
}
