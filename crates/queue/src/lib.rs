//! # Connector Queue
//!
//! Named work queues, each paired with a dead-letter queue.

mod memory;
mod transport_queue;

pub use memory::InMemoryQueue;
pub use transport_queue::{QueueEntryId, QueueSnapshot, QueuedMessage, TransportQueue, TransportQueues, DLQ_PREFIX};
