//! EvidenceBuilder - produces evidence documents for trigger messages

use chrono::Utc;
use shared::{ConnectorError, EvidenceType, Message, MessageException};

/// Creates the evidence document of `evidence_type` about a business message
pub trait EvidenceBuilder: Send + Sync {
    fn create_evidence(&self, evidence_type: EvidenceType, business: &Message) -> Result<Vec<u8>, ConnectorError>;
}

/// Unsigned XML evidence naming the business message and the issue time
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainEvidenceBuilder;

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl EvidenceBuilder for PlainEvidenceBuilder {
    fn create_evidence(&self, evidence_type: EvidenceType, business: &Message) -> Result<Vec<u8>, ConnectorError> {
        let details = &business.details;
        let reference = details
            .ebms_message_id
            .as_deref()
            .or(details.backend_message_id.as_deref())
            .unwrap_or(business.connector_message_id.as_str());

        let document = format!(
            r#"<evidence type="{}" code="{}" messageId="{}" issued="{}"><sender>{}</sender><recipient>{}</recipient></evidence>"#,
            evidence_type,
            evidence_type.storage_code(),
            escape(reference),
            Utc::now().to_rfc3339(),
            escape(details.original_sender.as_deref().unwrap_or_default()),
            escape(details.final_recipient.as_deref().unwrap_or_default()),
        );
        Ok(document.into_bytes())
    }
}

/// Fill every confirmation of `message` that still lacks its document.
/// An empty document from the builder is an error.
pub(crate) fn complete_confirmations(
    builder: &dyn EvidenceBuilder,
    message: &mut Message,
    business: &Message,
) -> Result<usize, ConnectorError> {
    let mut created = 0;
    for confirmation in message.transported_confirmations.iter_mut().filter(|c| !c.has_evidence()) {
        let evidence = builder.create_evidence(confirmation.evidence_type, business)?;
        if evidence.is_empty() {
            return Err(MessageException::new(
                Some(message.connector_message_id.clone()),
                format!("Evidence builder produced an empty {} evidence", confirmation.evidence_type),
            )
            .into());
        }
        confirmation.evidence = Some(evidence);
        created += 1;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{MessageConfirmation, MessageContent, MessageDetails, MessageDirection, Party};

    struct EmptyBuilder;

    impl EvidenceBuilder for EmptyBuilder {
        fn create_evidence(&self, _: EvidenceType, _: &Message) -> Result<Vec<u8>, ConnectorError> {
            Ok(Vec::new())
        }
    }

    fn business() -> Message {
        let mut details = MessageDetails::new(MessageDirection::GatewayToBackend, Party::default(), Party::default())
            .with_endpoints("a<b", "c");
        details.ebms_message_id = Some("ebms-7".to_string());
        Message::business(details, MessageContent::default())
    }

    #[test]
    fn test_plain_evidence_names_business_message() {
        let document = PlainEvidenceBuilder
            .create_evidence(EvidenceType::Delivery, &business())
            .unwrap();
        let text = String::from_utf8(document).unwrap();

        assert!(text.contains(r#"messageId="ebms-7""#));
        assert!(text.contains("a&lt;b"));
        assert!(text.starts_with("<evidence"));
    }

    #[test]
    fn test_only_missing_documents_are_created() {
        let business = business();
        let mut message = business
            .clone()
            .with_confirmation(MessageConfirmation::new(EvidenceType::SubmissionAcceptance, b"<kept/>".to_vec()))
            .with_confirmation(MessageConfirmation::trigger(EvidenceType::RelayRemmdAcceptance));

        let created = complete_confirmations(&PlainEvidenceBuilder, &mut message, &business).unwrap();

        assert_eq!(created, 1);
        assert_eq!(message.transported_confirmations[0].evidence.as_deref(), Some(&b"<kept/>"[..]));
        assert!(message.transported_confirmations[1].has_evidence());
    }

    #[test]
    fn test_empty_document_is_an_error() {
        let business = business();
        let mut message = business.clone().with_confirmation(MessageConfirmation::trigger(EvidenceType::Delivery));

        let err = complete_confirmations(&EmptyBuilder, &mut message, &business).unwrap_err();
        assert!(matches!(err, ConnectorError::Message(_)));
    }
}
