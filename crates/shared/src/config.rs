//! Configuration types for the connector

use crate::error::{ConfigError, ConnectorError};
use crate::ids::{BusinessDomainId, LinkConfigName, LinkPartnerName};
use crate::link::{LinkConfiguration, LinkMode, LinkPartner, LinkType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_pull_interval_secs() -> u64 {
    60
}

/// A link partner as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPartnerSection {
    pub name: LinkPartnerName,

    pub link_type: LinkType,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub send_link_mode: LinkMode,

    #[serde(default)]
    pub rcv_link_mode: LinkMode,

    #[serde(default = "default_pull_interval_secs")]
    pub pull_interval_secs: u64,

    #[serde(default)]
    pub properties: HashMap<String, String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A link configuration and its partners as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSection {
    pub config_name: LinkConfigName,

    pub link_impl: String,

    #[serde(default)]
    pub properties: HashMap<String, String>,

    #[serde(default)]
    pub partners: Vec<LinkPartnerSection>,
}

/// Configuration of one business domain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessDomainConfig {
    pub id: BusinessDomainId,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Flat property map, bound to typed configuration per domain
    #[serde(default)]
    pub properties: HashMap<String, String>,

    #[serde(default)]
    pub links: Vec<LinkSection>,
}

impl BusinessDomainConfig {
    /// Link configurations of this domain, owned by the domain
    pub fn link_configurations(&self) -> Vec<LinkConfiguration> {
        self.links
            .iter()
            .map(|link| LinkConfiguration {
                config_name: link.config_name.clone(),
                domain: self.id.clone(),
                link_impl: link.link_impl.clone(),
                properties: link.properties.clone(),
            })
            .collect()
    }

    /// All enabled link partners of this domain with their configuration resolved
    pub fn link_partners(&self) -> Vec<LinkPartner> {
        self.links
            .iter()
            .zip(self.link_configurations())
            .flat_map(|(link, configuration)| {
                link.partners
                    .iter()
                    .filter(|p| p.enabled)
                    .map(move |p| LinkPartner {
                        link_partner_name: p.name.clone(),
                        description: p.description.clone(),
                        link_type: p.link_type,
                        send_link_mode: p.send_link_mode,
                        rcv_link_mode: p.rcv_link_mode,
                        pull_interval_secs: p.pull_interval_secs,
                        properties: p.properties.clone(),
                        link_configuration: configuration.clone(),
                    })
            })
            .collect()
    }
}

/// Root configuration file format
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfig {
    #[serde(default)]
    pub domains: Vec<BusinessDomainConfig>,

    #[serde(default)]
    pub controller: ControllerSettings,
}

impl ConnectorConfig {
    /// Load configuration from a JSON or YAML file, chosen by extension
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let config: Self = match extension.as_str() {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string()).into()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check names and uniqueness within each domain
    pub fn validate(&self) -> Result<(), ConnectorError> {
        let mut domain_ids = std::collections::HashSet::new();
        for domain in &self.domains {
            BusinessDomainId::parse(domain.id.as_str())?;
            if !domain_ids.insert(domain.id.clone()) {
                return Err(ConfigError::Invalid(format!("Business domain '{}' is configured twice", domain.id)).into());
            }

            let mut partner_names = std::collections::HashSet::new();
            for link in &domain.links {
                LinkConfigName::parse(link.config_name.as_str())?;
                if link.link_impl.trim().is_empty() {
                    return Err(ConfigError::EmptyImplementation(link.config_name.clone()).into());
                }
                for partner in &link.partners {
                    LinkPartnerName::parse(partner.name.as_str())?;
                    if !partner_names.insert(partner.name.clone()) {
                        return Err(ConfigError::Invalid(format!(
                            "Link partner '{}' is configured twice in domain '{}'",
                            partner.name, domain.id
                        ))
                        .into());
                    }
                }
            }
        }
        Ok(())
    }

    pub fn domain_ids(&self) -> Vec<&BusinessDomainId> {
        self.domains.iter().map(|d| &d.id).collect()
    }
}

fn default_queue_names() -> QueueNames {
    QueueNames::default()
}

fn default_finished_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_evidence_check_interval_secs() -> u64 {
    60
}

/// Names of the work queues; each has a dead-letter queue named `DLQ.<name>`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueNames {
    pub to_link: String,
    pub to_connector: String,
    pub cleanup: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            to_link: "toLinkQueue".to_string(),
            to_connector: "toConnectorQueue".to_string(),
            cleanup: "toCleanupQueue".to_string(),
        }
    }
}

/// Settings of the message controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSettings {
    /// Attempts per message before it is parked on the dead-letter queue
    pub max_transport_attempts: u32,

    /// Milliseconds a worker waits for the next message
    pub dequeue_timeout_ms: u64,

    #[serde(default = "default_queue_names")]
    pub queues: QueueNames,

    /// Seconds a confirmed or rejected business message is kept after cleanup
    #[serde(default = "default_finished_retention_secs")]
    pub finished_retention_secs: u64,

    /// Seconds between two checks for missing evidences
    #[serde(default = "default_evidence_check_interval_secs")]
    pub evidence_check_interval_secs: u64,
}

impl ControllerSettings {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn finished_retention(&self) -> Duration {
        Duration::from_secs(self.finished_retention_secs)
    }

    pub fn evidence_check_interval(&self) -> Duration {
        Duration::from_secs(self.evidence_check_interval_secs.max(1))
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_transport_attempts: 3,
            dequeue_timeout_ms: 1000,
            queues: QueueNames::default(),
            finished_retention_secs: default_finished_retention_secs(),
            evidence_check_interval_secs: default_evidence_check_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
domains:
  - id: defaultBusinessDomain
    properties:
      connector.gateway.link-partner-name: gw
    links:
      - configName: wsbackend
        linkImpl: wsbackendplugin
        partners:
          - name: partner1
            linkType: BACKEND
            properties:
              certificate-dn: CN=partner1
      - configName: gwpull
        linkImpl: gwwspullplugin
        partners:
          - name: gw
            linkType: GATEWAY
            rcvLinkMode: PULL
            pullIntervalSecs: 5
          - name: disabled-gw
            linkType: GATEWAY
            enabled: false
controller:
  maxTransportAttempts: 5
  dequeueTimeoutMs: 200
"#;

    #[test]
    fn test_config_parse_yaml() {
        let config: ConnectorConfig = serde_yaml::from_str(YAML).unwrap();
        config.validate().unwrap();

        assert_eq!(config.domains.len(), 1);
        assert_eq!(config.controller.max_transport_attempts, 5);
        assert_eq!(config.controller.queues.to_link, "toLinkQueue");
        assert_eq!(config.controller.finished_retention(), Duration::from_secs(86400));
        assert_eq!(config.controller.evidence_check_interval(), Duration::from_secs(60));

        let partners = config.domains[0].link_partners();
        assert_eq!(partners.len(), 2);
        assert!(partners.iter().all(|p| p.domain().is_default()));
        let gw = partners.iter().find(|p| p.link_partner_name.as_str() == "gw").unwrap();
        assert_eq!(gw.rcv_link_mode, LinkMode::Pull);
        assert_eq!(gw.link_configuration.link_impl, "gwwspullplugin");
    }

    #[test]
    fn test_from_file_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = ConnectorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.domain_ids().len(), 1);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"domains": [{"id": "tenantA"}]}"#).unwrap();

        let config = ConnectorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.domains[0].id.as_str(), "tenantA");
        assert_eq!(config.controller.max_transport_attempts, 3);
    }

    #[test]
    fn test_from_file_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let err = ConnectorConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }

    #[test]
    fn test_validate_duplicate_partner() {
        let yaml = r#"
domains:
  - id: tenantA
    links:
      - configName: a
        linkImpl: wsbackendplugin
        partners:
          - name: p
            linkType: BACKEND
      - configName: b
        linkImpl: wsbackendplugin
        partners:
          - name: p
            linkType: BACKEND
"#;
        let config: ConnectorConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_domain_name() {
        let config: ConnectorConfig = serde_json::from_str(r#"{"domains": [{"id": "../x"}]}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_impl() {
        let config: ConnectorConfig =
            serde_json::from_str(r#"{"domains": [{"id": "a", "links": [{"configName": "l", "linkImpl": " "}]}]}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("empty implementation"));
    }
}
