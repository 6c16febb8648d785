//! TransportWorker - dispatches queued messages to their link partner

use crate::evidence_store::EvidenceStore;
use crate::exception::{store_message_exception_async, ExceptionPolicy};
use crate::retry::TransportRetryService;
use crate::router::target_partner;
use audit::MessageErrorStore;
use link::{LinkManager, SubmitReceipt};
use queue::{QueuedMessage, TransportQueue};
use chrono::Utc;
use shared::{
    is_business_message, ConnectorError, ControllerSettings, LinkPartnerName, LinkPluginError, QueueError,
    TransportState, TransportStep,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument};

const TRANSPORT: ExceptionPolicy = ExceptionPolicy::pass("transport to link partner");

const DEFAULT_STEP_HISTORY: usize = 1000;

/// What happened to one message taken from the to-link queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered {
        partner: LinkPartnerName,
        attempt: u32,
        remote_message_id: Option<String>,
    },
    /// Failed, put back for another attempt
    Requeued {
        partner: LinkPartnerName,
        attempt: u32,
        reason: String,
    },
    DeadLettered { reason: String },
}

/// Failures that will not go away by sending again
fn is_permanent(err: &ConnectorError) -> bool {
    match err {
        ConnectorError::Link(e) => matches!(
            e,
            LinkPluginError::Configuration(_)
                | LinkPluginError::FeatureNotSupported(_)
                | LinkPluginError::Binding { .. }
                | LinkPluginError::Transport { retryable: false, .. }
        ),
        ConnectorError::Message(_) | ConnectorError::Config(_) => true,
        _ => false,
    }
}

pub struct TransportWorker {
    link_manager: Arc<LinkManager>,
    retry: Arc<TransportRetryService>,
    evidence_store: Arc<dyn EvidenceStore>,
    queue: Arc<dyn TransportQueue>,
    errors: Arc<dyn MessageErrorStore>,
    max_attempts: u32,
    steps: Mutex<VecDeque<TransportStep>>,
    max_steps: usize,
}

impl TransportWorker {
    pub fn new(
        link_manager: Arc<LinkManager>,
        retry: Arc<TransportRetryService>,
        evidence_store: Arc<dyn EvidenceStore>,
        queue: Arc<dyn TransportQueue>,
        errors: Arc<dyn MessageErrorStore>,
        settings: &ControllerSettings,
    ) -> Self {
        Self {
            link_manager,
            retry,
            evidence_store,
            queue,
            errors,
            max_attempts: settings.max_transport_attempts.max(1),
            steps: Mutex::new(VecDeque::new()),
            max_steps: DEFAULT_STEP_HISTORY,
        }
    }

    /// Take the next message from the to-link queue and dispatch it
    pub async fn process_next(&self, timeout: Duration) -> Result<Option<DispatchOutcome>, QueueError> {
        let Some(entry) = self.queue.dequeue(timeout).await? else {
            return Ok(None);
        };

        let Some(partner) = target_partner(&entry.message).cloned() else {
            let reason = format!("Message {} names no target link partner", entry.message.connector_message_id);
            warn!(queue = %self.queue.name(), "{}", reason);
            self.queue.move_to_dlq(entry, reason.clone()).await?;
            return Ok(Some(DispatchOutcome::DeadLettered { reason }));
        };

        let span = info_span!(
            "transport",
            domain = %entry.message.domain,
            partner = %partner,
            attempt = entry.delivery_count
        );
        self.transport(entry, partner).instrument(span).await.map(Some)
    }

    async fn transport(&self, entry: QueuedMessage, partner: LinkPartnerName) -> Result<DispatchOutcome, QueueError> {
        let attempt = entry.delivery_count;
        let mut step = TransportStep::new(entry.message.clone(), partner.clone(), attempt);
        record_status(&mut step, TransportState::Pending, None);

        let result = store_message_exception_async(
            self.errors.as_ref(),
            TRANSPORT,
            Some(&step.connector_message_id),
            self.dispatch(&step),
        )
        .await;

        let outcome = match result {
            Ok(receipt) => {
                step.remote_message_id = receipt.and_then(|r| r.remote_message_id);
                record_status(&mut step, TransportState::Accepted, None);
                info!(message_id = %step.connector_message_id, "Message delivered to link partner");
                if is_business_message(&entry.message) {
                    if let Err(e) = self.evidence_store.mark_delivered(&step.connector_message_id, Utc::now()) {
                        warn!(message_id = %step.connector_message_id, error = %e, "Delivery time not recorded");
                    }
                }
                DispatchOutcome::Delivered {
                    partner,
                    attempt,
                    remote_message_id: step.remote_message_id.clone(),
                }
            }
            Err(err) => {
                let reason = err.to_string();
                record_status(&mut step, TransportState::Failed, Some(reason.clone()));

                if !is_permanent(&err) && attempt < self.max_attempts && self.retry.is_retry_able(&step) {
                    debug!(attempt, max_attempts = self.max_attempts, "Transport will be retried");
                    self.queue.requeue(entry).await?;
                    DispatchOutcome::Requeued {
                        partner,
                        attempt,
                        reason,
                    }
                } else {
                    warn!(attempt, reason = %reason, "Transport given up");
                    self.queue.move_to_dlq(entry, reason.clone()).await?;
                    DispatchOutcome::DeadLettered { reason }
                }
            }
        };

        self.remember(step);
        Ok(outcome)
    }

    /// Submit off the async runtime, plugins block on their transport.
    /// Repeated attempts go through the retry service.
    async fn dispatch(&self, step: &TransportStep) -> Result<SubmitReceipt, ConnectorError> {
        let step = step.clone();
        let task = if step.attempt > 1 {
            let retry = Arc::clone(&self.retry);
            tokio::task::spawn_blocking(move || retry.retry_transport(&step))
        } else {
            let link_manager = Arc::clone(&self.link_manager);
            tokio::task::spawn_blocking(move || -> Result<SubmitReceipt, ConnectorError> {
                let message = step.message.as_ref().ok_or_else(|| {
                    LinkPluginError::Lifecycle(format!("Transport step {} has no message", step.transport_id.as_str()))
                })?;
                Ok(link_manager.submit_to_link_partner(&message.domain, &step.link_partner, message)?)
            })
        };
        task.await
            .map_err(|e| LinkPluginError::Lifecycle(format!("Dispatch task failed: {}", e)))?
    }

    fn remember(&self, step: TransportStep) {
        let mut steps = self.steps.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if steps.len() >= self.max_steps {
            steps.pop_front();
        }
        steps.push_back(step);
    }

    /// Most recent transport steps, oldest first
    pub fn transport_steps(&self) -> Vec<TransportStep> {
        let steps = self.steps.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        steps.iter().cloned().collect()
    }

    /// Dispatch messages until `shutdown` turns true or the queue closes
    pub async fn run(&self, timeout: Duration, shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue.name(), max_attempts = self.max_attempts, "Transport worker started");
        while !*shutdown.borrow() {
            match self.process_next(timeout).await {
                Ok(_) => {}
                Err(QueueError::Closed(_)) => break,
                Err(e) => warn!(error = %e, "Dispatch queue failed"),
            }
        }
        info!("Transport worker stopped");
    }
}

fn record_status(step: &mut TransportStep, state: TransportState, text: Option<String>) {
    if let Err(e) = step.add_status(state, text) {
        warn!(transport_id = step.transport_id.as_str(), error = %e, "Transport status rejected");
    }
}

impl std::fmt::Debug for TransportWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportWorker")
            .field("queue", &self.queue.name())
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}
