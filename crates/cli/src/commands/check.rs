//! connector check command

use clap::Args;
use console::style;
use controller::Connector;
use link::{default_plugins, RecordingTransport};
use serde::Serialize;
use shared::{verify_storage_mapping, ConnectorConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Configuration file (JSON or YAML)
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Result of checking one item of the configuration
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub subject: String,
    pub error: Option<String>,
}

impl Finding {
    fn from_result<E: std::fmt::Display>(subject: String, result: Result<(), E>) -> Self {
        Self {
            subject,
            error: result.err().map(|e| e.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Check the evidence storage mapping, the backend routing rules and every
/// link configuration and partner of `config` against the shipped plugins
pub fn check(config: ConnectorConfig) -> anyhow::Result<Vec<Finding>> {
    let mut findings = vec![Finding::from_result(
        "evidence storage mapping".to_string(),
        verify_storage_mapping(),
    )];

    let domains = config.domains.clone();
    let connector = Connector::new(config, default_plugins(Arc::new(RecordingTransport::new())))?;
    let links = connector.link_manager();
    for domain in &domains {
        if domain.properties.keys().any(|key| key.starts_with("connector.backend.rules.")) {
            findings.push(Finding::from_result(
                format!("{}/backend rules", domain.id),
                connector.backend_rules(&domain.id).map(|_| ()),
            ));
        }
        for configuration in domain.link_configurations() {
            findings.push(Finding::from_result(
                format!("{}/{}", domain.id, configuration.config_name),
                links.check_configuration(&configuration),
            ));
        }
        for partner in domain.link_partners() {
            findings.push(Finding::from_result(
                format!(
                    "{}/{}/{}",
                    domain.id, partner.link_configuration.config_name, partner.link_partner_name
                ),
                links.check_partner(&partner),
            ));
        }
    }
    Ok(findings)
}

impl CheckCommand {
    pub fn run(&self, json: bool) -> anyhow::Result<()> {
        let config = ConnectorConfig::from_file(&self.config)?;
        let findings = check(config)?;

        if json {
            println!("{}", serde_json::to_string_pretty(&findings)?);
        } else {
            for finding in &findings {
                match &finding.error {
                    None => println!("{} {}", style("✓").green(), finding.subject),
                    Some(e) => println!("{} {}: {}", style("✗").red(), finding.subject, e),
                }
            }
        }

        let failed = findings.iter().filter(|f| !f.is_ok()).count();
        if failed > 0 {
            anyhow::bail!("{} of {} checks failed", failed, findings.len());
        }
        Ok(())
    }
}
