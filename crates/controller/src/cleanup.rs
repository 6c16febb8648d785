//! CleanupWorker - consumes the cleanup queue and trims finished messages

use crate::evidence_store::EvidenceStore;
use crate::exception::{store_message_exception, ExceptionPolicy};
use audit::MessageErrorStore;
use chrono::{DateTime, Utc};
use queue::TransportQueue;
use shared::{ConnectorMessageId, QueueError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const CLEANUP: ExceptionPolicy = ExceptionPolicy::pass("cleanup of finished message");

/// What happened to one message taken from the cleanup queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Business content dropped, ids and evidences kept
    Released(ConnectorMessageId),
    /// Message unknown or not finished, left as it is
    Skipped(ConnectorMessageId),
    DeadLettered { reason: String },
}

pub struct CleanupWorker {
    evidence_store: Arc<dyn EvidenceStore>,
    queue: Arc<dyn TransportQueue>,
    errors: Arc<dyn MessageErrorStore>,
    retention: Duration,
}

impl CleanupWorker {
    pub fn new(
        evidence_store: Arc<dyn EvidenceStore>,
        queue: Arc<dyn TransportQueue>,
        errors: Arc<dyn MessageErrorStore>,
        retention: Duration,
    ) -> Self {
        Self {
            evidence_store,
            queue,
            errors,
            retention,
        }
    }

    /// Take the next finished message from the cleanup queue and release
    /// its business content
    pub async fn process_next(&self, timeout: Duration) -> Result<Option<CleanupOutcome>, QueueError> {
        let Some(entry) = self.queue.dequeue(timeout).await? else {
            return Ok(None);
        };
        let id = entry.message.connector_message_id.clone();

        let result = store_message_exception(self.errors.as_ref(), CLEANUP, Some(&id), || {
            self.evidence_store.release_content(&id)
        });
        match result {
            Ok(Some(true)) => {
                debug!(message_id = %id, "Finished message released");
                Ok(Some(CleanupOutcome::Released(id)))
            }
            Ok(_) => {
                debug!(message_id = %id, "Message not finished, nothing to release");
                Ok(Some(CleanupOutcome::Skipped(id)))
            }
            Err(e) => {
                let reason = e.to_string();
                self.queue.move_to_dlq(entry, reason.clone()).await?;
                Ok(Some(CleanupOutcome::DeadLettered { reason }))
            }
        }
    }

    /// Remove messages finished longer than the retention before `now`
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return 0;
        };
        let evicted = self.evidence_store.evict_finished(now - retention);
        if evicted > 0 {
            info!(evicted, "Finished messages evicted");
        }
        evicted
    }

    /// Consume the cleanup queue until `shutdown` turns true or the queue
    /// closes. Expired messages are evicted whenever the queue runs dry.
    pub async fn run(&self, timeout: Duration, shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue.name(), retention_secs = self.retention.as_secs(), "Cleanup worker started");
        while !*shutdown.borrow() {
            match self.process_next(timeout).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.evict_expired(Utc::now());
                }
                Err(QueueError::Closed(_)) => break,
                Err(e) => warn!(error = %e, "Cleanup queue failed"),
            }
        }
        info!("Cleanup worker stopped");
    }
}

impl std::fmt::Debug for CleanupWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupWorker")
            .field("queue", &self.queue.name())
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence_store::{BusinessMessageState, InMemoryEvidenceStore};
    use audit::MessageErrorLog;
    use queue::InMemoryQueue;
    use shared::{Message, MessageContent, MessageDetails, MessageDirection, Party};

    const TICK: Duration = Duration::from_millis(10);

    struct Setup {
        store: Arc<InMemoryEvidenceStore>,
        queue: Arc<InMemoryQueue>,
        worker: CleanupWorker,
    }

    fn setup(retention: Duration) -> Setup {
        let store = Arc::new(InMemoryEvidenceStore::new());
        let queue = Arc::new(InMemoryQueue::new("toCleanupQueue"));
        let worker = CleanupWorker::new(store.clone(), queue.clone(), Arc::new(MessageErrorLog::default()), retention);
        Setup { store, queue, worker }
    }

    fn finished(store: &InMemoryEvidenceStore) -> Message {
        let message = Message::business(
            MessageDetails::new(MessageDirection::GatewayToBackend, Party::default(), Party::default()),
            MessageContent {
                xml_content: b"<doc/>".to_vec(),
                document: None,
            },
        );
        store.register_business_message(&message).unwrap();
        store.set_state(message.id(), BusinessMessageState::Confirmed).unwrap();
        message
    }

    #[tokio::test]
    async fn test_cleanup_queue_is_drained() {
        let s = setup(Duration::from_secs(3600));
        let message = finished(&s.store);
        s.queue.put_on_queue(message.clone()).await.unwrap();

        let outcome = s.worker.process_next(TICK).await.unwrap().unwrap();
        assert_eq!(outcome, CleanupOutcome::Released(message.connector_message_id.clone()));
        assert!(s.queue.is_empty());
        assert!(s.store.record(message.id()).unwrap().message.content.is_none());
        assert!(s.worker.process_next(TICK).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_message_is_skipped() {
        let s = setup(Duration::from_secs(3600));
        let message = Message::business(
            MessageDetails::new(MessageDirection::GatewayToBackend, Party::default(), Party::default()),
            MessageContent::default(),
        );
        s.store.register_business_message(&message).unwrap();
        s.queue.put_on_queue(message.clone()).await.unwrap();

        let outcome = s.worker.process_next(TICK).await.unwrap().unwrap();
        assert!(matches!(outcome, CleanupOutcome::Skipped(_)));
        assert!(s.store.record(message.id()).unwrap().message.content.is_some());
    }

    #[tokio::test]
    async fn test_expired_messages_are_evicted() {
        let s = setup(Duration::from_secs(60));
        let message = finished(&s.store);

        assert_eq!(s.worker.evict_expired(Utc::now()), 0);
        assert_eq!(s.worker.evict_expired(Utc::now() + chrono::Duration::seconds(61)), 1);
        assert!(s.store.record(message.id()).is_none());
    }
}
