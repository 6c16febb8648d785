//! AdminAuditLog - Audit trail of administrative operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::BusinessDomainId;
use std::collections::VecDeque;
use tracing::{info, warn};

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: AdminEventType,
    pub domain: Option<BusinessDomainId>,
    /// Link configuration, link partner or queue entry the operation targeted
    pub subject: String,
    pub success: bool,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Types of administrative operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminEventType {
    LinkActivated,
    LinkDeactivated,
    PartnerEnabled,
    PartnerDisabled,
    DlqMessageMoved,
    QueueMessageDeleted,
    RoutingRuleAdded,
    RoutingRuleRemoved,
}

/// Bounded audit trail; the oldest entries are dropped first
#[derive(Debug)]
pub struct AdminAuditLog {
    entries: VecDeque<AuditEntry>,
    max_entries: usize,
}

impl AdminAuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries,
        }
    }

    pub fn log(&mut self, entry: AuditEntry) {
        let domain = entry.domain.as_ref().map(|d| d.as_str()).unwrap_or("-");
        if entry.success {
            info!(event = ?entry.event_type, domain, subject = %entry.subject, "Administrative operation");
        } else {
            warn!(
                event = ?entry.event_type,
                domain,
                subject = %entry.subject,
                reason = entry.reason.as_deref().unwrap_or("-"),
                "Administrative operation failed"
            );
        }
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Record the outcome of an administrative operation
    pub fn record(
        &mut self,
        event_type: AdminEventType,
        domain: Option<&BusinessDomainId>,
        subject: impl Into<String>,
        outcome: Result<(), String>,
    ) {
        self.record_with(event_type, domain, subject, outcome, None);
    }

    /// Record the outcome of an administrative operation with details of
    /// what it touched
    pub fn record_with(
        &mut self,
        event_type: AdminEventType,
        domain: Option<&BusinessDomainId>,
        subject: impl Into<String>,
        outcome: Result<(), String>,
        metadata: Option<serde_json::Value>,
    ) {
        let (success, reason) = match outcome {
            Ok(()) => (true, None),
            Err(reason) => (false, Some(reason)),
        };
        self.log(AuditEntry {
            timestamp: Utc::now(),
            event_type,
            domain: domain.cloned(),
            subject: subject.into(),
            success,
            reason,
            metadata,
        });
    }

    /// Most recent entries first
    pub fn recent(&self, limit: usize) -> Vec<&AuditEntry> {
        self.entries.iter().rev().take(limit).collect()
    }

    pub fn recent_failures(&self, limit: usize) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| !e.success)
            .take(limit)
            .collect()
    }

    pub fn for_domain(&self, domain: &BusinessDomainId) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.domain.as_ref() == Some(domain))
            .collect()
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            total_entries: self.entries.len(),
            failure_count: self.entries.iter().filter(|e| !e.success).count(),
        }
    }

    pub fn export_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.entries).unwrap_or_default()
    }
}

impl Default for AdminAuditLog {
    fn default() -> Self {
        Self::new(10000)
    }
}

/// Audit statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditStats {
    pub total_entries: usize,
    pub failure_count: usize,
}
