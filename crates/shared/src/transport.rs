//! Transport steps - one delivery attempt of a message to a link partner

use crate::error::ConfigError;
use crate::ids::{ConnectorMessageId, LinkPartnerName};
use crate::message::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a transport step. States are ordered by priority; priority 10 and
/// above is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportState {
    Pending,
    PendingDownloaded,
    Accepted,
    Failed,
}

impl TransportState {
    pub fn priority(self) -> u8 {
        match self {
            TransportState::Pending => 1,
            TransportState::PendingDownloaded => 2,
            TransportState::Accepted => 10,
            TransportState::Failed => 11,
        }
    }

    pub fn is_final(self) -> bool {
        self.priority() >= 10
    }
}

/// Status update recorded on a transport step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStatusUpdate {
    pub state: TransportState,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Id of a transport step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(String);

impl TransportId {
    pub fn for_attempt(message_id: &ConnectorMessageId, partner: &LinkPartnerName, attempt: u32) -> Self {
        Self(format!("{}_{}_{}", message_id, partner, attempt))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One attempt to deliver a message to a link partner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStep {
    pub transport_id: TransportId,

    /// The transported message, absent when it is no longer available
    pub message: Option<Message>,

    pub connector_message_id: ConnectorMessageId,

    pub link_partner: LinkPartnerName,

    pub attempt: u32,

    pub created: DateTime<Utc>,

    #[serde(default)]
    pub remote_message_id: Option<String>,

    status_updates: Vec<TransportStatusUpdate>,

    #[serde(default)]
    final_state_reached: Option<DateTime<Utc>>,
}

impl TransportStep {
    pub fn new(message: Message, link_partner: LinkPartnerName, attempt: u32) -> Self {
        let connector_message_id = message.connector_message_id.clone();
        Self {
            transport_id: TransportId::for_attempt(&connector_message_id, &link_partner, attempt),
            message: Some(message),
            connector_message_id,
            link_partner,
            attempt,
            created: Utc::now(),
            remote_message_id: None,
            status_updates: Vec::new(),
            final_state_reached: None,
        }
    }

    /// Step whose message payload is no longer available
    pub fn without_message(
        connector_message_id: ConnectorMessageId,
        link_partner: LinkPartnerName,
        attempt: u32,
    ) -> Self {
        Self {
            transport_id: TransportId::for_attempt(&connector_message_id, &link_partner, attempt),
            message: None,
            connector_message_id,
            link_partner,
            attempt,
            created: Utc::now(),
            remote_message_id: None,
            status_updates: Vec::new(),
            final_state_reached: None,
        }
    }

    /// Record a status update. Updates must arrive with strictly increasing
    /// priority.
    pub fn add_status(&mut self, state: TransportState, text: Option<String>) -> Result<(), ConfigError> {
        if let Some(last) = self.last_state() {
            if state.priority() <= last.priority() {
                return Err(ConfigError::Invalid(format!(
                    "Cannot add state {:?} to transport {}: state {:?} has higher or equal priority",
                    state,
                    self.transport_id.as_str(),
                    last
                )));
            }
        }

        let now = Utc::now();
        if state.is_final() {
            self.final_state_reached = Some(now);
        }
        self.status_updates.push(TransportStatusUpdate {
            state,
            created: now,
            text,
        });
        Ok(())
    }

    pub fn last_state(&self) -> Option<TransportState> {
        self.status_updates.last().map(|u| u.state)
    }

    pub fn status_updates(&self) -> &[TransportStatusUpdate] {
        &self.status_updates
    }

    pub fn final_state_reached(&self) -> Option<DateTime<Utc>> {
        self.final_state_reached
    }

    pub fn is_in_pending_state(&self) -> bool {
        self.last_state() == Some(TransportState::Pending)
    }

    pub fn is_accepted(&self) -> bool {
        self.last_state() == Some(TransportState::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageContent, MessageDetails, MessageDirection, Party};

    fn step() -> TransportStep {
        let message = Message::business(
            MessageDetails::new(MessageDirection::BackendToGateway, Party::default(), Party::default()),
            MessageContent::default(),
        );
        TransportStep::new(message, LinkPartnerName::new("partner1"), 1)
    }

    #[test]
    fn test_status_updates_increase_in_priority() {
        let mut step = step();
        step.add_status(TransportState::Pending, None).unwrap();
        assert!(step.is_in_pending_state());
        step.add_status(TransportState::Accepted, Some("remote-1".to_string())).unwrap();
        assert!(step.is_accepted());
        assert!(step.final_state_reached().is_some());
        assert_eq!(step.status_updates().len(), 2);
    }

    #[test]
    fn test_lower_priority_update_rejected() {
        let mut step = step();
        step.add_status(TransportState::Accepted, None).unwrap();
        assert!(step.add_status(TransportState::Pending, None).is_err());
        assert!(step.add_status(TransportState::Accepted, None).is_err());
        assert_eq!(step.last_state(), Some(TransportState::Accepted));
    }

    #[test]
    fn test_pending_is_not_final() {
        let mut step = step();
        step.add_status(TransportState::Pending, None).unwrap();
        assert!(step.final_state_reached().is_none());
    }

    #[test]
    fn test_transport_id_includes_attempt() {
        let step = step();
        assert!(step.transport_id.as_str().ends_with("_partner1_1"));
    }

    #[test]
    fn test_step_without_message() {
        let step = TransportStep::without_message(ConnectorMessageId::new("m1"), LinkPartnerName::new("p"), 2);
        assert!(step.message.is_none());
        assert_eq!(step.connector_message_id.as_str(), "m1");
    }
}
