//! EvidenceTimeoutChecker - rejects outgoing messages whose evidences are overdue

use crate::evidence_store::{BusinessMessageRecord, EvidenceStore};
use crate::processor::{MessageProcessor, ProcessOutcome};
use chrono::{DateTime, Utc};
use scope::DomainConfigurations;
use serde::Deserialize;
use shared::{ConnectorError, ConnectorMessageId, EvidenceType, LinkPartnerName, MessageDirection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Evidence timeouts of a business domain, bound below
/// `connector.controller.evidence`. A zero duration disables its check.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvidenceTimeoutConfig {
    pub timeout_active: bool,
    pub relay_remmd_timeout_secs: u64,
    pub relay_remmd_warn_timeout_secs: u64,
    pub delivery_timeout_secs: u64,
    pub delivery_warn_timeout_secs: u64,
}

impl Default for EvidenceTimeoutConfig {
    fn default() -> Self {
        Self {
            timeout_active: true,
            relay_remmd_timeout_secs: 0,
            relay_remmd_warn_timeout_secs: 0,
            delivery_timeout_secs: 0,
            delivery_warn_timeout_secs: 0,
        }
    }
}

/// One overdue evidence found by a check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutAction {
    pub message_id: ConnectorMessageId,
    pub evidence_type: EvidenceType,
    pub forwarded_to: Option<LinkPartnerName>,
}

/// Counts of one [`EvidenceTimeoutChecker::check`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeoutReport {
    pub checked: usize,
    pub warned: usize,
    pub failed: Vec<TimeoutAction>,
    pub errors: usize,
}

enum Verdict {
    TimedOut,
    Warn,
    InTime,
}

/// Elapsed time against a timeout and a warn limit, zero meaning unset
fn judge(elapsed: chrono::Duration, timeout_secs: u64, warn_secs: u64) -> Verdict {
    let exceeds = |secs: u64| secs > 0 && elapsed > chrono::Duration::seconds(secs as i64);
    if exceeds(timeout_secs) {
        Verdict::TimedOut
    } else if exceeds(warn_secs) {
        Verdict::Warn
    } else {
        Verdict::InTime
    }
}

fn has_relay_evidence(record: &BusinessMessageRecord) -> bool {
    [
        EvidenceType::RelayRemmdAcceptance,
        EvidenceType::RelayRemmdRejection,
        EvidenceType::RelayRemmdFailure,
    ]
    .into_iter()
    .any(|t| record.has_evidence(t))
}

fn has_delivery_evidence(record: &BusinessMessageRecord) -> bool {
    record.has_evidence(EvidenceType::Delivery) || record.has_evidence(EvidenceType::NonDelivery)
}

pub struct EvidenceTimeoutChecker {
    configurations: DomainConfigurations,
    evidence_store: Arc<dyn EvidenceStore>,
    processor: Arc<MessageProcessor>,
}

impl EvidenceTimeoutChecker {
    pub fn new(
        configurations: DomainConfigurations,
        evidence_store: Arc<dyn EvidenceStore>,
        processor: Arc<MessageProcessor>,
    ) -> Self {
        Self {
            configurations,
            evidence_store,
            processor,
        }
    }

    /// Check every pending outgoing message handed to the gateway.
    ///
    /// A message without relay evidence past the relay timeout gets a
    /// RELAY_REMMD_FAILURE; otherwise one without delivery evidence past
    /// the delivery timeout gets a NON_DELIVERY. The generated evidence is
    /// applied and sent back to the backend.
    pub async fn check(&self, now: DateTime<Utc>) -> TimeoutReport {
        let mut report = TimeoutReport::default();
        let outgoing = self
            .evidence_store
            .delivered_pending()
            .into_iter()
            .filter(|record| record.message.direction() == MessageDirection::BackendToGateway);

        for record in outgoing {
            let Some(delivered_at) = record.delivered_at else {
                continue;
            };
            let config = match self
                .configurations
                .bind_for::<EvidenceTimeoutConfig>(&record.message.domain, "connector.controller.evidence")
            {
                Ok(config) => config,
                Err(e) => {
                    warn!(domain = %record.message.domain, error = %e, "Evidence timeouts not configured");
                    report.errors += 1;
                    continue;
                }
            };
            if !config.timeout_active {
                continue;
            }
            report.checked += 1;

            let elapsed = now - delivered_at;
            match self.judge_record(&record, &config, elapsed) {
                (Some(evidence_type), _) => match self.fail(&record, evidence_type).await {
                    Ok(action) => report.failed.push(action),
                    Err(e) => {
                        error!(message_id = %record.message.connector_message_id, error = %e, "Timeout evidence not applied");
                        report.errors += 1;
                    }
                },
                (None, true) => report.warned += 1,
                (None, false) => {}
            }
        }
        report
    }

    /// Evidence to generate, and whether a warn limit was passed
    fn judge_record(
        &self,
        record: &BusinessMessageRecord,
        config: &EvidenceTimeoutConfig,
        elapsed: chrono::Duration,
    ) -> (Option<EvidenceType>, bool) {
        let message_id = &record.message.connector_message_id;
        let mut warned = false;

        if !has_relay_evidence(record) {
            match judge(elapsed, config.relay_remmd_timeout_secs, config.relay_remmd_warn_timeout_secs) {
                Verdict::TimedOut => return (Some(EvidenceType::RelayRemmdFailure), false),
                Verdict::Warn => {
                    warn!(message_id = %message_id, "No relay evidence received yet, warning limit reached");
                    warned = true;
                }
                Verdict::InTime => {}
            }
        }
        if !has_delivery_evidence(record) {
            match judge(elapsed, config.delivery_timeout_secs, config.delivery_warn_timeout_secs) {
                Verdict::TimedOut => return (Some(EvidenceType::NonDelivery), warned),
                Verdict::Warn => {
                    warn!(message_id = %message_id, "No delivery evidence received yet, warning limit reached");
                    warned = true;
                }
                Verdict::InTime => {}
            }
        }
        (None, warned)
    }

    async fn fail(
        &self,
        record: &BusinessMessageRecord,
        evidence_type: EvidenceType,
    ) -> Result<TimeoutAction, ConnectorError> {
        let outcome = self.processor.apply_generated_evidence(record, evidence_type).await?;
        warn!(
            message_id = %record.message.connector_message_id,
            evidence = %evidence_type,
            "Evidence timeout reached, generated evidence sent"
        );
        let forwarded_to = match outcome {
            ProcessOutcome::EvidenceApplied { forwarded_to, .. } => forwarded_to,
            _ => None,
        };
        Ok(TimeoutAction {
            message_id: record.message.connector_message_id.clone(),
            evidence_type,
            forwarded_to,
        })
    }

    /// Check every `interval` until `shutdown` turns true
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "Evidence timeout checker started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.check(Utc::now()).await;
                    if !report.failed.is_empty() || report.errors > 0 {
                        info!(
                            checked = report.checked,
                            failed = report.failed.len(),
                            errors = report.errors,
                            "Evidence timeouts checked"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Evidence timeout checker stopped");
    }
}

impl std::fmt::Debug for EvidenceTimeoutChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvidenceTimeoutChecker").finish_non_exhaustive()
    }
}
