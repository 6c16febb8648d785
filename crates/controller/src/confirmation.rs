//! MessageConfirmator - applies incoming evidences to their business message

use crate::evidence_store::{BusinessMessageState, EvidenceStore};
use shared::{highest_priority, ConnectorError, ConnectorMessageId, EvidenceType, MessageException};
use std::sync::Arc;
use tracing::{info, warn};

/// Effect of one evidence on its business message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// The message is now confirmed
    Confirmed,
    /// The message is now rejected
    Rejected,
    /// Persisted without changing the message state
    Recorded,
    /// Not applied, with the reason
    Ignored(String),
}

#[derive(Clone)]
pub struct MessageConfirmator {
    store: Arc<dyn EvidenceStore>,
}

impl MessageConfirmator {
    pub fn new(store: Arc<dyn EvidenceStore>) -> Self {
        Self { store }
    }

    /// Apply an evidence of `evidence_type` to the business message `id`.
    ///
    /// The same type is persisted only once per message. An evidence of
    /// lower priority than the highest already related one is persisted but
    /// leaves the state alone. Negative evidences reject the message;
    /// DELIVERY and RETRIEVAL confirm it unless it was rejected before.
    pub fn confirm(
        &self,
        id: &ConnectorMessageId,
        evidence_type: EvidenceType,
    ) -> Result<ConfirmationOutcome, ConnectorError> {
        let record = self.store.record(id).ok_or_else(|| {
            MessageException::new(Some(id.clone()), format!("No business message to apply {} to", evidence_type))
        })?;

        if !self.store.add_evidence(id, evidence_type)? {
            warn!(message_id = %id, evidence = %evidence_type, "Evidence already persisted, ignored");
            return Ok(ConfirmationOutcome::Ignored(format!("{} already persisted", evidence_type)));
        }

        if let Some(highest) = highest_priority(record.evidences.iter().copied()) {
            if evidence_type.priority() < highest.priority() {
                warn!(message_id = %id, evidence = %evidence_type, highest = %highest, "Evidence of lower priority, state unchanged");
                return Ok(ConfirmationOutcome::Ignored(format!(
                    "{} has lower priority than {}",
                    evidence_type, highest
                )));
            }
        }

        if evidence_type.is_negative() {
            self.store.set_state(id, BusinessMessageState::Rejected)?;
            info!(message_id = %id, evidence = %evidence_type, "Business message rejected");
            return Ok(ConfirmationOutcome::Rejected);
        }

        if evidence_type.is_confirming() {
            if record.state == BusinessMessageState::Rejected {
                warn!(message_id = %id, evidence = %evidence_type, "Business message already rejected");
                return Ok(ConfirmationOutcome::Ignored("message already rejected".to_string()));
            }
            self.store.set_state(id, BusinessMessageState::Confirmed)?;
            info!(message_id = %id, evidence = %evidence_type, "Business message confirmed");
            return Ok(ConfirmationOutcome::Confirmed);
        }

        Ok(ConfirmationOutcome::Recorded)
    }
}

impl std::fmt::Debug for MessageConfirmator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageConfirmator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence_store::InMemoryEvidenceStore;
    use shared::{Message, MessageContent, MessageDetails, MessageDirection, Party};

    fn setup() -> (Arc<InMemoryEvidenceStore>, MessageConfirmator, ConnectorMessageId) {
        let store = Arc::new(InMemoryEvidenceStore::new());
        let message = Message::business(
            MessageDetails::new(MessageDirection::BackendToGateway, Party::default(), Party::default()),
            MessageContent::default(),
        );
        store.register_business_message(&message).unwrap();
        let confirmator = MessageConfirmator::new(store.clone());
        (store, confirmator, message.connector_message_id)
    }

    #[test]
    fn test_acceptance_is_recorded() {
        let (store, confirmator, id) = setup();
        assert_eq!(
            confirmator.confirm(&id, EvidenceType::SubmissionAcceptance).unwrap(),
            ConfirmationOutcome::Recorded
        );
        assert_eq!(store.record(&id).unwrap().state, BusinessMessageState::Pending);
    }

    #[test]
    fn test_delivery_confirms() {
        let (store, confirmator, id) = setup();
        confirmator.confirm(&id, EvidenceType::RelayRemmdAcceptance).unwrap();
        assert_eq!(
            confirmator.confirm(&id, EvidenceType::Delivery).unwrap(),
            ConfirmationOutcome::Confirmed
        );
        assert!(store.has_terminal_confirmation(&id).unwrap());
    }

    #[test]
    fn test_negative_evidence_rejects() {
        let (_store, confirmator, id) = setup();
        assert_eq!(
            confirmator.confirm(&id, EvidenceType::RelayRemmdRejection).unwrap(),
            ConfirmationOutcome::Rejected
        );
    }

    #[test]
    fn test_duplicate_is_ignored() {
        let (_store, confirmator, id) = setup();
        confirmator.confirm(&id, EvidenceType::Delivery).unwrap();
        assert!(matches!(
            confirmator.confirm(&id, EvidenceType::Delivery).unwrap(),
            ConfirmationOutcome::Ignored(_)
        ));
    }

    #[test]
    fn test_lower_priority_does_not_change_state() {
        let (store, confirmator, id) = setup();
        confirmator.confirm(&id, EvidenceType::NonDelivery).unwrap();
        let outcome = confirmator.confirm(&id, EvidenceType::Delivery).unwrap();

        assert!(matches!(outcome, ConfirmationOutcome::Ignored(ref reason) if reason.contains("lower priority")));
        let record = store.record(&id).unwrap();
        assert_eq!(record.state, BusinessMessageState::Rejected);
        assert_eq!(record.evidences, vec![EvidenceType::NonDelivery, EvidenceType::Delivery]);
    }

    #[test]
    fn test_retrieval_after_rejection_is_ignored() {
        let (store, confirmator, id) = setup();
        confirmator.confirm(&id, EvidenceType::SubmissionRejection).unwrap();
        let outcome = confirmator.confirm(&id, EvidenceType::Retrieval).unwrap();

        assert_eq!(outcome, ConfirmationOutcome::Ignored("message already rejected".to_string()));
        assert_eq!(store.record(&id).unwrap().state, BusinessMessageState::Rejected);
    }

    #[test]
    fn test_unknown_business_message() {
        let (_store, confirmator, _id) = setup();
        let err = confirmator
            .confirm(&ConnectorMessageId::new("missing"), EvidenceType::Delivery)
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Message(_)));
    }
}
