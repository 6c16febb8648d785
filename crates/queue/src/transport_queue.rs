//! TransportQueue - contract of a work queue and its dead-letter queue

use crate::memory::InMemoryQueue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Message, QueueError, QueueNames};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Prefix of the dead-letter queue belonging to a work queue
pub const DLQ_PREFIX: &str = "DLQ.";

/// Id of one queue entry, stable across moves between queue and DLQ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueEntryId(Uuid);

impl QueueEntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl std::fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message sitting in a queue or its DLQ
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMessage {
    pub id: QueueEntryId,
    pub message: Message,
    pub enqueued_at: DateTime<Utc>,
    /// Number of times the entry has been handed to a consumer
    pub delivery_count: u32,
    /// Why the entry was parked on the DLQ
    pub failure_reason: Option<String>,
}

impl QueuedMessage {
    pub fn new(message: Message) -> Self {
        Self {
            id: QueueEntryId::generate(),
            message,
            enqueued_at: Utc::now(),
            delivery_count: 0,
            failure_reason: None,
        }
    }
}

/// Point-in-time view of a queue for operators
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub name: String,
    pub dlq_name: String,
    pub queued: Vec<QueuedMessage>,
    pub dead_lettered: Vec<QueuedMessage>,
}

/// A durable work queue with an associated dead-letter queue.
///
/// Moves and deletes are applied completely or not at all. Listings are
/// snapshots and may be stale relative to concurrent producers and consumers.
#[async_trait]
pub trait TransportQueue: Send + Sync {
    fn name(&self) -> &str;

    fn dlq_name(&self) -> String {
        format!("{}{}", DLQ_PREFIX, self.name())
    }

    async fn put_on_queue(&self, message: Message) -> Result<QueueEntryId, QueueError>;

    /// Put a consumed entry back, keeping its id and delivery count
    async fn requeue(&self, entry: QueuedMessage) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next entry. `Ok(None)` on timeout.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedMessage>, QueueError>;

    /// Park a consumed entry on the DLQ
    async fn move_to_dlq(&self, entry: QueuedMessage, reason: String) -> Result<(), QueueError>;

    async fn list_all_messages(&self) -> Result<Vec<QueuedMessage>, QueueError>;

    async fn list_all_messages_in_dlq(&self) -> Result<Vec<QueuedMessage>, QueueError>;

    /// Move one entry from the DLQ back to the end of the queue
    async fn move_msg_from_dlq_to_queue(&self, id: QueueEntryId) -> Result<QueuedMessage, QueueError>;

    /// Delete one entry from the queue or, failing that, from the DLQ
    async fn delete_msg(&self, id: QueueEntryId) -> Result<QueuedMessage, QueueError>;

    async fn snapshot(&self) -> Result<QueueSnapshot, QueueError> {
        Ok(QueueSnapshot {
            name: self.name().to_string(),
            dlq_name: self.dlq_name(),
            queued: self.list_all_messages().await?,
            dead_lettered: self.list_all_messages_in_dlq().await?,
        })
    }
}

/// The work queues of one connector instance
#[derive(Clone)]
pub struct TransportQueues {
    /// Messages waiting for dispatch to a link partner
    pub to_link: Arc<dyn TransportQueue>,
    /// Messages received from link partners, waiting for processing
    pub to_connector: Arc<dyn TransportQueue>,
    /// Messages whose processing has finished and await cleanup
    pub to_cleanup: Arc<dyn TransportQueue>,
}

impl TransportQueues {
    /// In-memory queues named after `names`
    pub fn in_memory(names: &QueueNames) -> Self {
        Self {
            to_link: Arc::new(InMemoryQueue::new(names.to_link.clone())),
            to_connector: Arc::new(InMemoryQueue::new(names.to_connector.clone())),
            to_cleanup: Arc::new(InMemoryQueue::new(names.cleanup.clone())),
        }
    }

    pub fn all(&self) -> [&Arc<dyn TransportQueue>; 3] {
        [&self.to_link, &self.to_connector, &self.to_cleanup]
    }

    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn TransportQueue>> {
        self.all().into_iter().find(|q| q.name() == name || q.dlq_name() == name)
    }
}

impl std::fmt::Debug for TransportQueues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportQueues")
            .field("to_link", &self.to_link.name())
            .field("to_connector", &self.to_connector.name())
            .field("to_cleanup", &self.to_cleanup.name())
            .finish()
    }
}
