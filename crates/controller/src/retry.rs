//! TransportRetryService - decides whether a failed transport may be repeated

use crate::evidence_store::EvidenceStore;
use link::{LinkManager, SubmitReceipt};
use shared::{is_business_message, ConnectorError, MessageException, TransportStep};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Why a transport step may or may not be repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    /// The step carries no message, there is nothing to send again
    NoMessage,
    /// The business message is already confirmed or rejected
    AlreadyTerminal,
}

impl RetryDecision {
    pub fn is_retry(self) -> bool {
        self == RetryDecision::Retry
    }
}

pub struct TransportRetryService {
    evidence_store: Arc<dyn EvidenceStore>,
    link_manager: Arc<LinkManager>,
}

impl TransportRetryService {
    pub fn new(evidence_store: Arc<dyn EvidenceStore>, link_manager: Arc<LinkManager>) -> Self {
        Self {
            evidence_store,
            link_manager,
        }
    }

    /// Decide on repeating `step`. Evidence messages are always repeated,
    /// business messages only until they reached a terminal confirmation.
    pub fn retry_decision(&self, step: &TransportStep) -> Result<RetryDecision, ConnectorError> {
        let Some(message) = &step.message else {
            info!(
                transport_id = step.transport_id.as_str(),
                message_id = %step.connector_message_id,
                "Transport step carries no message, not retryable"
            );
            return Ok(RetryDecision::NoMessage);
        };

        if !is_business_message(message) {
            return Ok(RetryDecision::Retry);
        }

        if self.evidence_store.has_terminal_confirmation(&message.connector_message_id)? {
            info!(
                transport_id = step.transport_id.as_str(),
                message_id = %message.connector_message_id,
                "Business message already confirmed or rejected, not retryable"
            );
            return Ok(RetryDecision::AlreadyTerminal);
        }
        Ok(RetryDecision::Retry)
    }

    /// Whether `step` may be repeated. A failing evidence lookup counts as
    /// not retryable.
    pub fn is_retry_able(&self, step: &TransportStep) -> bool {
        match self.retry_decision(step) {
            Ok(decision) => decision.is_retry(),
            Err(e) => {
                error!(transport_id = step.transport_id.as_str(), error = %e, "Retry check failed");
                false
            }
        }
    }

    /// Submit the message of `step` again, through the same path as the
    /// original delivery
    pub fn retry_transport(&self, step: &TransportStep) -> Result<SubmitReceipt, ConnectorError> {
        let message = step.message.as_ref().ok_or_else(|| {
            MessageException::new(
                Some(step.connector_message_id.clone()),
                format!("Transport step '{}' has no message to retry", step.transport_id.as_str()),
            )
        })?;
        debug!(transport_id = step.transport_id.as_str(), partner = %step.link_partner, "Retrying transport");
        Ok(self
            .link_manager
            .submit_to_link_partner(&message.domain, &step.link_partner, message)?)
    }
}

impl std::fmt::Debug for TransportRetryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRetryService")
            .field("link_manager", &self.link_manager)
            .finish_non_exhaustive()
    }
}
