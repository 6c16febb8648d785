//! EvidenceStore - port to the persisted business messages and their evidences

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{BusinessDomainId, ConnectorError, ConnectorMessageId, EvidenceType, LinkPartnerName, Message};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Processing state of a business message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessMessageState {
    Pending,
    Confirmed,
    Rejected,
}

impl BusinessMessageState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BusinessMessageState::Pending)
    }
}

/// A persisted business message with the evidences related to it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessMessageRecord {
    pub message: Message,
    pub evidences: Vec<EvidenceType>,
    pub state: BusinessMessageState,
    pub registered_at: DateTime<Utc>,
    /// When the message was handed to the partner on its target side
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the message became confirmed or rejected
    pub finished_at: Option<DateTime<Utc>>,
}

impl BusinessMessageRecord {
    fn new(message: Message) -> Self {
        Self {
            message,
            evidences: Vec::new(),
            state: BusinessMessageState::Pending,
            registered_at: Utc::now(),
            delivered_at: None,
            finished_at: None,
        }
    }

    pub fn has_evidence(&self, evidence_type: EvidenceType) -> bool {
        self.evidences.contains(&evidence_type)
    }
}

/// Persistence collaborator for business messages and evidences
pub trait EvidenceStore: Send + Sync {
    fn register_business_message(&self, message: &Message) -> Result<(), ConnectorError>;

    /// Business message referenced by a connector, ebMS or backend message id
    fn find_business_message(&self, reference: &str) -> Option<ConnectorMessageId>;

    fn record(&self, id: &ConnectorMessageId) -> Option<BusinessMessageRecord>;

    /// Persist an evidence for a business message. `Ok(false)` when the
    /// type was already persisted for it.
    fn add_evidence(&self, id: &ConnectorMessageId, evidence_type: EvidenceType) -> Result<bool, ConnectorError>;

    fn set_state(&self, id: &ConnectorMessageId, state: BusinessMessageState) -> Result<(), ConnectorError>;

    /// Whether the business message is already confirmed or rejected
    fn has_terminal_confirmation(&self, id: &ConnectorMessageId) -> Result<bool, ConnectorError>;

    /// Note that the message reached its target partner. `Ok(false)` when
    /// the message is not persisted.
    fn mark_delivered(&self, id: &ConnectorMessageId, at: DateTime<Utc>) -> Result<bool, ConnectorError>;

    /// Pending business messages already handed to their target partner
    fn delivered_pending(&self) -> Vec<BusinessMessageRecord>;

    /// Backend partner that handled an earlier message of the conversation
    fn find_backend_by_conversation(&self, domain: &BusinessDomainId, conversation_id: &str)
        -> Option<LinkPartnerName>;

    /// Drop the business content of a finished message, keeping its ids and
    /// evidences. `Ok(false)` when the message is unknown or still pending.
    fn release_content(&self, id: &ConnectorMessageId) -> Result<bool, ConnectorError>;

    /// Remove messages finished before `before`, returning how many
    fn evict_finished(&self, before: DateTime<Utc>) -> usize;
}

/// In-memory evidence store for tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryEvidenceStore {
    records: RwLock<HashMap<ConnectorMessageId, BusinessMessageRecord>>,
}

impl InMemoryEvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectorMessageId, BusinessMessageRecord>> {
        self.records.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectorMessageId, BusinessMessageRecord>> {
        self.records.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unknown(id: &ConnectorMessageId) -> ConnectorError {
        ConnectorError::Persistence(format!("Business message '{}' is not persisted", id))
    }
}

impl EvidenceStore for InMemoryEvidenceStore {
    fn register_business_message(&self, message: &Message) -> Result<(), ConnectorError> {
        self.write()
            .entry(message.connector_message_id.clone())
            .and_modify(|record| record.message = message.clone())
            .or_insert_with(|| BusinessMessageRecord::new(message.clone()));
        Ok(())
    }

    fn find_business_message(&self, reference: &str) -> Option<ConnectorMessageId> {
        self.read()
            .values()
            .find(|record| {
                let details = &record.message.details;
                record.message.connector_message_id.as_str() == reference
                    || details.ebms_message_id.as_deref() == Some(reference)
                    || details.backend_message_id.as_deref() == Some(reference)
            })
            .map(|record| record.message.connector_message_id.clone())
    }

    fn record(&self, id: &ConnectorMessageId) -> Option<BusinessMessageRecord> {
        self.read().get(id).cloned()
    }

    fn add_evidence(&self, id: &ConnectorMessageId, evidence_type: EvidenceType) -> Result<bool, ConnectorError> {
        let mut records = self.write();
        let record = records.get_mut(id).ok_or_else(|| Self::unknown(id))?;
        let occurrences = record.evidences.iter().filter(|t| **t == evidence_type).count();
        if occurrences >= evidence_type.max_occurrence() {
            return Ok(false);
        }
        record.evidences.push(evidence_type);
        Ok(true)
    }

    fn set_state(&self, id: &ConnectorMessageId, state: BusinessMessageState) -> Result<(), ConnectorError> {
        let mut records = self.write();
        let record = records.get_mut(id).ok_or_else(|| Self::unknown(id))?;
        record.state = state;
        record.finished_at = state.is_terminal().then(Utc::now);
        Ok(())
    }

    fn has_terminal_confirmation(&self, id: &ConnectorMessageId) -> Result<bool, ConnectorError> {
        Ok(self.read().get(id).is_some_and(|record| record.state.is_terminal()))
    }

    fn mark_delivered(&self, id: &ConnectorMessageId, at: DateTime<Utc>) -> Result<bool, ConnectorError> {
        let mut records = self.write();
        let Some(record) = records.get_mut(id) else {
            return Ok(false);
        };
        record.delivered_at.get_or_insert(at);
        Ok(true)
    }

    fn delivered_pending(&self) -> Vec<BusinessMessageRecord> {
        self.read()
            .values()
            .filter(|record| record.state == BusinessMessageState::Pending && record.delivered_at.is_some())
            .cloned()
            .collect()
    }

    fn find_backend_by_conversation(
        &self,
        domain: &BusinessDomainId,
        conversation_id: &str,
    ) -> Option<LinkPartnerName> {
        self.read()
            .values()
            .filter(|record| {
                record.message.domain == *domain
                    && record.message.details.conversation_id.as_deref() == Some(conversation_id)
            })
            .filter_map(|record| {
                record
                    .message
                    .details
                    .connector_backend
                    .clone()
                    .map(|backend| (record.registered_at, backend))
            })
            .max_by_key(|(registered_at, _)| *registered_at)
            .map(|(_, backend)| backend)
    }

    fn release_content(&self, id: &ConnectorMessageId) -> Result<bool, ConnectorError> {
        let mut records = self.write();
        match records.get_mut(id) {
            Some(record) if record.state.is_terminal() => {
                record.message.content = None;
                for confirmation in &mut record.message.transported_confirmations {
                    confirmation.evidence = None;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn evict_finished(&self, before: DateTime<Utc>) -> usize {
        let mut records = self.write();
        let count = records.len();
        records.retain(|_, record| !record.finished_at.is_some_and(|finished| finished < before));
        count - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{MessageContent, MessageDetails, MessageDirection, Party};

    fn message() -> Message {
        let mut details = MessageDetails::new(MessageDirection::GatewayToBackend, Party::default(), Party::default());
        details.ebms_message_id = Some("ebms-1".to_string());
        Message::business(details, MessageContent::default())
    }

    #[test]
    fn test_find_by_any_id() {
        let store = InMemoryEvidenceStore::new();
        let message = message();
        store.register_business_message(&message).unwrap();

        assert_eq!(store.find_business_message("ebms-1"), Some(message.connector_message_id.clone()));
        assert_eq!(
            store.find_business_message(message.connector_message_id.as_str()),
            Some(message.connector_message_id.clone())
        );
        assert_eq!(store.find_business_message("unknown"), None);
    }

    #[test]
    fn test_evidence_persisted_once_per_type() {
        let store = InMemoryEvidenceStore::new();
        let message = message();
        store.register_business_message(&message).unwrap();

        assert!(store.add_evidence(message.id(), EvidenceType::Delivery).unwrap());
        assert!(!store.add_evidence(message.id(), EvidenceType::Delivery).unwrap());
        assert_eq!(store.record(message.id()).unwrap().evidences, vec![EvidenceType::Delivery]);
    }

    #[test]
    fn test_terminal_confirmation() {
        let store = InMemoryEvidenceStore::new();
        let message = message();
        store.register_business_message(&message).unwrap();
        assert!(!store.has_terminal_confirmation(message.id()).unwrap());

        store.set_state(message.id(), BusinessMessageState::Rejected).unwrap();
        assert!(store.has_terminal_confirmation(message.id()).unwrap());
        assert!(!store.has_terminal_confirmation(&ConnectorMessageId::new("other")).unwrap());
    }

    #[test]
    fn test_delivered_pending_excludes_finished() {
        let store = InMemoryEvidenceStore::new();
        let delivered = message();
        let finished = message();
        store.register_business_message(&delivered).unwrap();
        store.register_business_message(&finished).unwrap();
        store.register_business_message(&message()).unwrap();

        let now = Utc::now();
        assert!(store.mark_delivered(delivered.id(), now).unwrap());
        assert!(store.mark_delivered(finished.id(), now).unwrap());
        assert!(!store.mark_delivered(&ConnectorMessageId::new("nope"), now).unwrap());
        store.set_state(finished.id(), BusinessMessageState::Confirmed).unwrap();

        let pending = store.delivered_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message.id(), delivered.id());
        assert_eq!(pending[0].delivered_at, Some(now));
    }

    #[test]
    fn test_backend_by_conversation() {
        let store = InMemoryEvidenceStore::new();
        let mut first = message();
        first.details.conversation_id = Some("conv-1".to_string());
        first.details.connector_backend = Some(LinkPartnerName::new("backend2"));
        store.register_business_message(&first).unwrap();

        let domain = BusinessDomainId::default();
        assert_eq!(
            store.find_backend_by_conversation(&domain, "conv-1"),
            Some(LinkPartnerName::new("backend2"))
        );
        assert_eq!(store.find_backend_by_conversation(&domain, "conv-2"), None);
        assert_eq!(
            store.find_backend_by_conversation(&BusinessDomainId::new("other"), "conv-1"),
            None
        );
    }

    // ============== Cleanup Tests ==============

    #[test]
    fn test_release_content_only_when_finished() {
        let store = InMemoryEvidenceStore::new();
        let message = message();
        store.register_business_message(&message).unwrap();
        assert!(!store.release_content(message.id()).unwrap());

        store.set_state(message.id(), BusinessMessageState::Confirmed).unwrap();
        assert!(store.release_content(message.id()).unwrap());

        let record = store.record(message.id()).unwrap();
        assert!(record.message.content.is_none());
        assert_eq!(record.message.details.ebms_message_id.as_deref(), Some("ebms-1"));
        assert_eq!(store.find_business_message("ebms-1"), Some(message.connector_message_id.clone()));
    }

    #[test]
    fn test_evict_finished_keeps_pending() {
        let store = InMemoryEvidenceStore::new();
        let pending = message();
        let finished = message();
        store.register_business_message(&pending).unwrap();
        store.register_business_message(&finished).unwrap();
        store.set_state(finished.id(), BusinessMessageState::Rejected).unwrap();

        assert_eq!(store.evict_finished(Utc::now() - chrono::Duration::hours(1)), 0);
        assert_eq!(store.evict_finished(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert_eq!(store.len(), 1);
        assert!(store.record(pending.id()).is_some());
    }

    #[test]
    fn test_unknown_message() {
        let store = InMemoryEvidenceStore::new();
        let err = store
            .add_evidence(&ConnectorMessageId::new("nope"), EvidenceType::Delivery)
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Persistence(_)));
    }
}
