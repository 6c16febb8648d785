//! Message model and message classification helpers

use crate::evidence::EvidenceType;
use crate::ids::{BusinessDomainId, ConnectorMessageId, LinkPartnerName};
use crate::link::LinkType;
use serde::{Deserialize, Serialize};

/// Transport direction of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageDirection {
    BackendToGateway,
    GatewayToBackend,
}

impl MessageDirection {
    /// The logical inverse of this direction
    pub fn inverse(self) -> Self {
        match self {
            MessageDirection::BackendToGateway => MessageDirection::GatewayToBackend,
            MessageDirection::GatewayToBackend => MessageDirection::BackendToGateway,
        }
    }

    /// Direction of a message received through a link of the given type
    pub fn from_source(source: LinkType) -> Self {
        match source {
            LinkType::Backend => MessageDirection::BackendToGateway,
            LinkType::Gateway => MessageDirection::GatewayToBackend,
        }
    }

    pub fn source(self) -> LinkType {
        match self {
            MessageDirection::BackendToGateway => LinkType::Backend,
            MessageDirection::GatewayToBackend => LinkType::Gateway,
        }
    }

    pub fn target(self) -> LinkType {
        match self {
            MessageDirection::BackendToGateway => LinkType::Gateway,
            MessageDirection::GatewayToBackend => LinkType::Backend,
        }
    }
}

/// Role a party plays in an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyRoleType {
    #[default]
    Initiator,
    Responder,
}

/// Sending or receiving party of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    pub party_id: String,

    #[serde(default)]
    pub party_id_type: Option<String>,

    /// Human-readable role, set by the caller
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub role_type: PartyRoleType,
}

impl Party {
    pub fn new(party_id: impl Into<String>, party_id_type: Option<&str>) -> Self {
        Self {
            party_id: party_id.into(),
            party_id_type: party_id_type.map(str::to_string),
            role: None,
            role_type: PartyRoleType::Initiator,
        }
    }

    /// Builder: set the role string
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Builder: set the role type
    pub fn with_role_type(mut self, role_type: PartyRoleType) -> Self {
        self.role_type = role_type;
        self
    }

    /// Copy of the identifier fields only
    fn identifiers_with(&self, role_type: PartyRoleType, role: Option<String>) -> Self {
        Self {
            party_id: self.party_id.clone(),
            party_id_type: self.party_id_type.clone(),
            role,
            role_type,
        }
    }
}

/// Routing metadata of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDetails {
    pub direction: MessageDirection,

    pub from_party: Party,

    pub to_party: Party,

    #[serde(default)]
    pub original_sender: Option<String>,

    #[serde(default)]
    pub final_recipient: Option<String>,

    #[serde(default)]
    pub ebms_message_id: Option<String>,

    #[serde(default)]
    pub backend_message_id: Option<String>,

    #[serde(default)]
    pub ref_to_message_id: Option<String>,

    #[serde(default)]
    pub conversation_id: Option<String>,

    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub service_type: Option<String>,

    #[serde(default)]
    pub action: Option<String>,

    /// Backend partner responsible for this message
    #[serde(default)]
    pub connector_backend: Option<LinkPartnerName>,

    /// Gateway partner the message travels through
    #[serde(default)]
    pub gateway_name: Option<LinkPartnerName>,
}

impl MessageDetails {
    pub fn new(direction: MessageDirection, from_party: Party, to_party: Party) -> Self {
        Self {
            direction,
            from_party,
            to_party,
            original_sender: None,
            final_recipient: None,
            ebms_message_id: None,
            backend_message_id: None,
            ref_to_message_id: None,
            conversation_id: None,
            service: None,
            service_type: None,
            action: None,
            connector_backend: None,
            gateway_name: None,
        }
    }

    /// Builder: set original sender and final recipient
    pub fn with_endpoints(
        mut self,
        original_sender: impl Into<String>,
        final_recipient: impl Into<String>,
    ) -> Self {
        self.original_sender = Some(original_sender.into());
        self.final_recipient = Some(final_recipient.into());
        self
    }
}

/// Business payload of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub xml_content: Vec<u8>,

    #[serde(default)]
    pub document: Option<Vec<u8>>,
}

/// Evidence attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageConfirmation {
    pub evidence_type: EvidenceType,

    /// Signed evidence document, absent or empty until it has been produced
    #[serde(default)]
    pub evidence: Option<Vec<u8>>,
}

impl MessageConfirmation {
    pub fn new(evidence_type: EvidenceType, evidence: Vec<u8>) -> Self {
        Self {
            evidence_type,
            evidence: Some(evidence),
        }
    }

    /// Confirmation that still needs its evidence document
    pub fn trigger(evidence_type: EvidenceType) -> Self {
        Self {
            evidence_type,
            evidence: None,
        }
    }

    pub fn has_evidence(&self) -> bool {
        self.evidence.as_ref().is_some_and(|e| !e.is_empty())
    }
}

/// A business or evidence document travelling through the connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub connector_message_id: ConnectorMessageId,

    /// Business domain the message belongs to
    #[serde(default)]
    pub domain: BusinessDomainId,

    pub details: MessageDetails,

    #[serde(default)]
    pub content: Option<MessageContent>,

    /// Evidences carried by this message
    #[serde(default)]
    pub transported_confirmations: Vec<MessageConfirmation>,

    /// Evidences received for this message so far
    #[serde(default)]
    pub related_confirmations: Vec<MessageConfirmation>,
}

impl Message {
    /// Create a business message
    pub fn business(details: MessageDetails, content: MessageContent) -> Self {
        Self {
            connector_message_id: ConnectorMessageId::generate(),
            domain: BusinessDomainId::default(),
            details,
            content: Some(content),
            transported_confirmations: Vec::new(),
            related_confirmations: Vec::new(),
        }
    }

    /// Create an evidence message carrying one confirmation
    pub fn evidence(details: MessageDetails, confirmation: MessageConfirmation) -> Self {
        Self {
            connector_message_id: ConnectorMessageId::generate(),
            domain: BusinessDomainId::default(),
            details,
            content: None,
            transported_confirmations: vec![confirmation],
            related_confirmations: Vec::new(),
        }
    }

    /// Builder: tag with a business domain
    pub fn in_domain(mut self, domain: BusinessDomainId) -> Self {
        self.domain = domain;
        self
    }

    /// Builder: append a transported confirmation
    pub fn with_confirmation(mut self, confirmation: MessageConfirmation) -> Self {
        self.transported_confirmations.push(confirmation);
        self
    }

    pub fn id(&self) -> &ConnectorMessageId {
        &self.connector_message_id
    }

    pub fn direction(&self) -> MessageDirection {
        self.details.direction
    }

    /// Highest-priority evidence type among the related confirmations
    pub fn highest_related_evidence(&self) -> Option<EvidenceType> {
        crate::evidence::highest_priority(
            self.related_confirmations.iter().map(|c| c.evidence_type),
        )
    }
}

/// An evidence message carries no business content
pub fn is_evidence_message(message: &Message) -> bool {
    message.content.is_none()
}

pub fn is_business_message(message: &Message) -> bool {
    !is_evidence_message(message)
}

/// Whether the first attached confirmation still lacks its evidence document
pub fn awaits_evidence(message: &Message) -> bool {
    message
        .transported_confirmations
        .first()
        .is_some_and(|c| !c.has_evidence())
}

/// A business message whose attached confirmation still lacks its evidence
/// document, i.e. an evidence has to be produced for it
pub fn is_evidence_trigger_message(message: &Message) -> bool {
    is_business_message(message) && awaits_evidence(message)
}

/// Evidence type of an evidence message, if it carries any confirmation
pub fn evidence_type_of(message: &Message) -> Option<EvidenceType> {
    message
        .transported_confirmations
        .first()
        .map(|c| c.evidence_type)
}

/// Build the details of the reverse exchange.
///
/// The direction is inverted, the parties change places (the new sender is
/// always the initiator, the new receiver the responder), and original
/// sender and final recipient are swapped. Each position keeps its role
/// string; the caller sets the proper roles afterwards.
pub fn switch_message_direction(details: &MessageDetails) -> MessageDetails {
    let mut switched = details.clone();

    switched.direction = details.direction.inverse();
    switched.from_party = details
        .to_party
        .identifiers_with(PartyRoleType::Initiator, details.from_party.role.clone());
    switched.to_party = details
        .from_party
        .identifiers_with(PartyRoleType::Responder, details.to_party.role.clone());
    switched.original_sender = details.final_recipient.clone();
    switched.final_recipient = details.original_sender.clone();

    switched
}
