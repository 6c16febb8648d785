//! connector run command

use clap::Args;
use console::style;
use controller::{Connector, RunStats};
use link::{default_plugins, RecordingTransport};
use serde::Serialize;
use shared::{
    ConnectorConfig, LinkMode, LinkType, Message, MessageContent, MessageDetails, MessageDirection, Party,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Configuration file (JSON or YAML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Number of test messages received from the gateway
    #[arg(short, long, default_value_t = 1)]
    pub messages: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerReport {
    pub domain: String,
    pub partner: String,
    pub link_type: LinkType,
    pub state: String,
    pub pushed: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueReport {
    pub name: String,
    pub queued: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub stats: RunStats,
    pub partners: Vec<PartnerReport>,
    pub queues: Vec<QueueReport>,
    pub message_errors: usize,
}

fn test_message(index: usize) -> Message {
    let mut details = MessageDetails::new(
        MessageDirection::GatewayToBackend,
        Party::new("sender", Some("urn:oasis:names:tc:ebcore:partyid-type:unregistered")),
        Party::new("recipient", Some("urn:oasis:names:tc:ebcore:partyid-type:unregistered")),
    );
    details.ebms_message_id = Some(format!("test-{}@connector", index));
    details.conversation_id = Some(format!("conversation-{}", index));
    Message::business(details, MessageContent::default())
}

/// Bootstrap `config`, receive `messages` test messages from the gateway
/// partners and run the connector until it is idle
pub async fn run(config: ConnectorConfig, messages: usize) -> anyhow::Result<RunReport> {
    let transport = Arc::new(RecordingTransport::new());
    let connector = Connector::new(config, default_plugins(transport.clone()))?;

    let failed = connector.bootstrap().into_iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        warn!(failed, "Some link partners could not be activated");
    }

    let gateways: Vec<_> = connector
        .link_manager()
        .active_link_partners(None)
        .into_iter()
        .filter(|p| p.link_type() == LinkType::Gateway)
        .collect();
    if messages > 0 && gateways.is_empty() {
        anyhow::bail!("No active gateway link partner to receive test messages from");
    }

    for index in 0..messages {
        let gateway = &gateways[index % gateways.len()];
        let message = test_message(index);
        if gateway.link_partner().rcv_link_mode == LinkMode::Pull {
            transport.queue_for_pull(gateway.name(), message);
        } else {
            connector.receive(message, gateway.domain(), gateway.name(), LinkType::Gateway)?;
        }
    }
    let pulled = connector.pull_all();
    info!(messages, pulled, "Test messages handed to the connector");

    let stats = connector.run_until_idle().await?;

    let partners = connector
        .link_manager()
        .active_link_partners(None)
        .into_iter()
        .map(|p| PartnerReport {
            domain: p.domain().to_string(),
            partner: p.name().to_string(),
            link_type: p.link_type(),
            state: format!("{:?}", p.state()),
            pushed: transport.pushed_to(p.name()),
        })
        .collect();
    let queues = connector
        .queue_snapshots()
        .await?
        .into_iter()
        .map(|s| QueueReport {
            name: s.name,
            queued: s.queued.len(),
            dead_lettered: s.dead_lettered.len(),
        })
        .collect();

    let report = RunReport {
        stats,
        partners,
        queues,
        message_errors: connector.message_errors().len(),
    };
    connector.shutdown();
    Ok(report)
}

impl RunCommand {
    pub fn run(&self, json: bool) -> anyhow::Result<()> {
        let config = ConnectorConfig::from_file(&self.config)?;
        let runtime = tokio::runtime::Runtime::new()?;
        let report = runtime.block_on(run(config, self.messages))?;

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        let stats = &report.stats;
        println!(
            "Received {}, processed {}, delivered {}, requeued {}, dead-lettered {}, cleaned {}",
            stats.received,
            stats.processed,
            stats.delivered,
            stats.requeued,
            stats.dead_lettered,
            stats.cleaned
        );
        println!();
        println!("Link partners:");
        for p in &report.partners {
            println!(
                "  {:<12} {:<16} {:<8} {:<10} pushed {}",
                p.domain,
                p.partner,
                format!("{:?}", p.link_type),
                p.state,
                p.pushed
            );
        }
        println!();
        println!("Queues:");
        for q in &report.queues {
            let dlq = if q.dead_lettered > 0 {
                style(q.dead_lettered.to_string()).red()
            } else {
                style(q.dead_lettered.to_string()).green()
            };
            println!("  {:<20} queued {:<4} DLQ {}", q.name, q.queued, dlq);
        }
        if report.message_errors > 0 {
            println!();
            println!("{} message processing errors recorded", style(report.message_errors).yellow());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectorConfig {
        serde_json::from_value(serde_json::json!({
            "domains": [{
                "id": "tenantA",
                "properties": {
                    "connector.gateway.link-partner-name": "gw",
                    "connector.backend.default-link-partner-name": "backend1"
                },
                "links": [
                    {
                        "configName": "gwpull",
                        "linkImpl": "gwwspullplugin",
                        "properties": { "gw.address": "http://gateway/ws" },
                        "partners": [{
                            "name": "gw",
                            "linkType": "GATEWAY",
                            "rcvLinkMode": "PULL",
                            "pullIntervalSecs": 3600
                        }]
                    },
                    {
                        "configName": "test",
                        "linkImpl": "testbackend",
                        "partners": [{ "name": "backend1", "linkType": "BACKEND" }]
                    }
                ]
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_messages_loop_through_test_backend() {
        let report = run(config(), 3).await.unwrap();

        assert_eq!(report.stats.received, 6);
        assert_eq!(report.stats.delivered, 6);
        assert_eq!(report.stats.dead_lettered, 0);
        assert_eq!(report.stats.cleaned, 3);
        let gw = report.partners.iter().find(|p| p.partner == "gw").unwrap();
        assert_eq!(gw.pushed, 3);
        assert!(report.queues.iter().all(|q| q.dead_lettered == 0));
    }

    #[tokio::test]
    async fn test_no_gateway_partner() {
        let mut config = config();
        config.domains[0].links.remove(0);
        let err = run(config, 1).await.unwrap_err();
        assert!(err.to_string().contains("No active gateway"));
    }
}
