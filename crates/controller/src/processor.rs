//! MessageProcessor - consumes the to-connector queue

use crate::confirmation::{ConfirmationOutcome, MessageConfirmator};
use crate::evidence_builder::{complete_confirmations, EvidenceBuilder, PlainEvidenceBuilder};
use crate::evidence_store::{BusinessMessageRecord, EvidenceStore};
use crate::exception::{store_message_exception_async, ExceptionPolicy};
use crate::router::MessageRouter;
use audit::MessageErrorStore;
use queue::TransportQueues;
use shared::{
    awaits_evidence, evidence_type_of, is_business_message, is_evidence_trigger_message, switch_message_direction,
    ConnectorError, EvidenceType, LinkPartnerName, LinkType, Message, MessageConfirmation, MessageException,
    QueueError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

const PROCESSING: ExceptionPolicy = ExceptionPolicy::pass("processing message received from link partner");

/// What happened to one message taken from the to-connector queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Business message handed to the to-link queue
    Forwarded { target: LinkPartnerName },
    /// Evidence applied to its business message and, unless ignored,
    /// handed on to the other side
    EvidenceApplied {
        outcome: ConfirmationOutcome,
        forwarded_to: Option<LinkPartnerName>,
    },
    /// Processing failed, the message was parked on the DLQ
    DeadLettered { reason: String },
}

pub struct MessageProcessor {
    router: Arc<MessageRouter>,
    confirmator: MessageConfirmator,
    evidence_store: Arc<dyn EvidenceStore>,
    evidence_builder: Arc<dyn EvidenceBuilder>,
    queues: TransportQueues,
    errors: Arc<dyn MessageErrorStore>,
}

impl MessageProcessor {
    pub fn new(
        router: Arc<MessageRouter>,
        evidence_store: Arc<dyn EvidenceStore>,
        queues: TransportQueues,
        errors: Arc<dyn MessageErrorStore>,
    ) -> Self {
        Self {
            router,
            confirmator: MessageConfirmator::new(Arc::clone(&evidence_store)),
            evidence_store,
            evidence_builder: Arc::new(PlainEvidenceBuilder),
            queues,
            errors,
        }
    }

    /// Builder: produce evidence documents with `builder`
    pub fn with_evidence_builder(mut self, builder: Arc<dyn EvidenceBuilder>) -> Self {
        self.evidence_builder = builder;
        self
    }

    /// Route one received message
    pub async fn process(&self, message: Message) -> Result<ProcessOutcome, ConnectorError> {
        if is_business_message(&message) {
            self.process_business(message).await
        } else {
            self.process_evidence(message).await
        }
    }

    async fn process_business(&self, mut message: Message) -> Result<ProcessOutcome, ConnectorError> {
        if is_evidence_trigger_message(&message) {
            let business = message.clone();
            let created = complete_confirmations(self.evidence_builder.as_ref(), &mut message, &business)?;
            debug!(created, "Evidence created for business message");
        }
        self.backend_from_conversation(&mut message);
        let target = self.router.resolve_target(&mut message)?;
        self.evidence_store.register_business_message(&message)?;
        self.queues.to_link.put_on_queue(message).await?;
        debug!(target = %target, "Business message queued for link partner");
        Ok(ProcessOutcome::Forwarded { target })
    }

    /// A message bound for the backend continues its conversation with the
    /// backend that handled the conversation before
    fn backend_from_conversation(&self, message: &mut Message) {
        if !matches!(message.direction().target(), LinkType::Backend) || message.details.connector_backend.is_some() {
            return;
        }
        let Some(conversation_id) = message.details.conversation_id.as_deref() else {
            return;
        };
        if let Some(backend) = self.evidence_store.find_backend_by_conversation(&message.domain, conversation_id) {
            info!(conversation_id, backend = %backend, "Backend taken from conversation");
            message.details.connector_backend = Some(backend);
        }
    }

    async fn process_evidence(&self, mut message: Message) -> Result<ProcessOutcome, ConnectorError> {
        let message_id = message.connector_message_id.clone();
        let evidence_type = evidence_type_of(&message)
            .ok_or_else(|| MessageException::new(Some(message_id.clone()), "Evidence message carries no confirmation"))?;
        let reference = message.details.ref_to_message_id.clone().ok_or_else(|| {
            MessageException::new(Some(message_id.clone()), "Evidence message references no business message")
        })?;
        let business = self
            .evidence_store
            .find_business_message(&reference)
            .and_then(|id| self.evidence_store.record(&id))
            .ok_or_else(|| {
                MessageException::new(
                    Some(message_id.clone()),
                    format!("Evidence references unknown business message '{}'", reference),
                )
            })?;
        let business_id = business.message.connector_message_id.clone();

        if awaits_evidence(&message) {
            complete_confirmations(self.evidence_builder.as_ref(), &mut message, &business.message)?;
            debug!(evidence = %evidence_type, business_message = %business_id, "Evidence created for trigger");
        }

        let outcome = self.confirmator.confirm(&business_id, evidence_type)?;
        if let ConfirmationOutcome::Ignored(reason) = &outcome {
            info!(evidence = %evidence_type, business_message = %business_id, reason = %reason, "Evidence not forwarded");
            return Ok(ProcessOutcome::EvidenceApplied {
                outcome,
                forwarded_to: None,
            });
        }

        if self.evidence_store.has_terminal_confirmation(&business_id)? {
            self.queues.to_cleanup.put_on_queue(business.message.clone()).await?;
        }

        // The evidence travels to the partner the business message came from
        match message.direction().target() {
            LinkType::Gateway if message.details.gateway_name.is_none() => {
                message.details.gateway_name = business.message.details.gateway_name.clone();
            }
            LinkType::Backend if message.details.connector_backend.is_none() => {
                message.details.connector_backend = business.message.details.connector_backend.clone();
            }
            _ => {}
        }
        let target = self.router.resolve_target(&mut message)?;
        self.queues.to_link.put_on_queue(message).await?;
        Ok(ProcessOutcome::EvidenceApplied {
            outcome,
            forwarded_to: Some(target),
        })
    }

    /// Create an evidence of `evidence_type` for a business message, apply it
    /// and send it back to the partner the business message came from
    pub async fn apply_generated_evidence(
        &self,
        business: &BusinessMessageRecord,
        evidence_type: EvidenceType,
    ) -> Result<ProcessOutcome, ConnectorError> {
        let mut details = switch_message_direction(&business.message.details);
        details.ref_to_message_id = Some(business.message.connector_message_id.as_str().to_string());
        let evidence = Message::evidence(details, MessageConfirmation::trigger(evidence_type))
            .in_domain(business.message.domain.clone());
        self.process_evidence(evidence).await
    }

    /// Take the next message from the to-connector queue and process it.
    /// Failures are persisted and park the message on the DLQ.
    pub async fn process_next(&self, timeout: Duration) -> Result<Option<ProcessOutcome>, QueueError> {
        let queue = &self.queues.to_connector;
        let Some(entry) = queue.dequeue(timeout).await? else {
            return Ok(None);
        };

        let span = info_span!(
            "process",
            domain = %entry.message.domain,
            message_id = %entry.message.connector_message_id
        );
        let message_id = entry.message.connector_message_id.clone();
        let result = store_message_exception_async(
            self.errors.as_ref(),
            PROCESSING,
            Some(&message_id),
            self.process(entry.message.clone()).instrument(span),
        )
        .await;

        match result {
            Ok(Some(outcome)) => Ok(Some(outcome)),
            Ok(None) => Ok(None),
            Err(e) => {
                let reason = e.to_string();
                queue.move_to_dlq(entry, reason.clone()).await?;
                Ok(Some(ProcessOutcome::DeadLettered { reason }))
            }
        }
    }

    /// Process messages until `shutdown` turns true or the queue closes
    pub async fn run(&self, timeout: Duration, shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queues.to_connector.name(), "Message processor started");
        while !*shutdown.borrow() {
            match self.process_next(timeout).await {
                Ok(_) => {}
                Err(QueueError::Closed(_)) => break,
                Err(e) => warn!(error = %e, "Processing queue failed"),
            }
        }
        info!("Message processor stopped");
    }
}

impl std::fmt::Debug for MessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProcessor")
            .field("queues", &self.queues)
            .finish_non_exhaustive()
    }
}
