//! In-memory transport queue

use crate::transport_queue::{QueueEntryId, QueuedMessage, TransportQueue};
use async_trait::async_trait;
use shared::{Message, QueueError};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<QueuedMessage>,
    dlq: VecDeque<QueuedMessage>,
    closed: bool,
}

/// Queue and DLQ held under one lock, so moving between them is atomic
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    state: Mutex<QueueState>,
    available: Notify,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, entry: QueuedMessage) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed(self.name.clone()));
            }
            state.queue.push_back(entry);
        }
        self.available.notify_one();
        Ok(())
    }

    fn not_found(&self, id: QueueEntryId) -> QueueError {
        QueueError::NotFound {
            queue: self.name.clone(),
            id: id.to_string(),
        }
    }

    /// Refuse new entries and wake all waiting consumers
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
        info!(queue = %self.name, "Queue closed");
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dlq_len(&self) -> usize {
        self.lock().dlq.len()
    }
}

#[async_trait]
impl TransportQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put_on_queue(&self, message: Message) -> Result<QueueEntryId, QueueError> {
        let entry = QueuedMessage::new(message);
        let id = entry.id;
        debug!(queue = %self.name, entry = %id, message_id = %entry.message.connector_message_id, "Message enqueued");
        self.push(entry)?;
        Ok(id)
    }

    async fn requeue(&self, entry: QueuedMessage) -> Result<(), QueueError> {
        debug!(queue = %self.name, entry = %entry.id, deliveries = entry.delivery_count, "Message requeued");
        self.push(entry)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking, so a put between check and wait is not missed
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if let Some(mut entry) = state.queue.pop_front() {
                    entry.delivery_count += 1;
                    return Ok(Some(entry));
                }
                if state.closed {
                    return Err(QueueError::Closed(self.name.clone()));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn move_to_dlq(&self, mut entry: QueuedMessage, reason: String) -> Result<(), QueueError> {
        warn!(
            queue = %self.name,
            entry = %entry.id,
            message_id = %entry.message.connector_message_id,
            reason = %reason,
            "Message parked on dead-letter queue"
        );
        entry.failure_reason = Some(reason);
        self.lock().dlq.push_back(entry);
        Ok(())
    }

    async fn list_all_messages(&self) -> Result<Vec<QueuedMessage>, QueueError> {
        Ok(self.lock().queue.iter().cloned().collect())
    }

    async fn list_all_messages_in_dlq(&self) -> Result<Vec<QueuedMessage>, QueueError> {
        Ok(self.lock().dlq.iter().cloned().collect())
    }

    async fn move_msg_from_dlq_to_queue(&self, id: QueueEntryId) -> Result<QueuedMessage, QueueError> {
        let moved = {
            let mut state = self.lock();
            if state.closed {
                return Err(QueueError::Closed(self.name.clone()));
            }
            let position = state.dlq.iter().position(|e| e.id == id).ok_or_else(|| self.not_found(id))?;
            let mut entry = state.dlq.remove(position).ok_or_else(|| self.not_found(id))?;
            entry.failure_reason = None;
            entry.delivery_count = 0;
            state.queue.push_back(entry.clone());
            entry
        };
        self.available.notify_one();
        info!(queue = %self.name, entry = %id, "Message moved from dead-letter queue");
        Ok(moved)
    }

    async fn delete_msg(&self, id: QueueEntryId) -> Result<QueuedMessage, QueueError> {
        let mut state = self.lock();
        let deleted = match state.queue.iter().position(|e| e.id == id) {
            Some(position) => state.queue.remove(position),
            None => match state.dlq.iter().position(|e| e.id == id) {
                Some(position) => state.dlq.remove(position),
                None => None,
            },
        };
        let deleted = deleted.ok_or_else(|| self.not_found(id))?;
        info!(queue = %self.name, entry = %id, "Message deleted");
        Ok(deleted)
    }
}
