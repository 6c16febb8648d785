//! Wire transports used by the shipped plugins
//!
//! The web-service bindings that talk to real backends and gateways live
//! outside this crate and implement these traits. [`RecordingTransport`]
//! keeps everything in memory.

use shared::{LinkPartnerName, LinkPluginError, Message};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Delivers a message to a remote endpoint
pub trait PushTransport: Send + Sync {
    /// Push `message` to `address`, returning the id the remote side assigned
    fn push(&self, partner: &LinkPartnerName, address: &str, message: &Message) -> Result<String, LinkPluginError>;
}

/// Fetches pending messages from a remote endpoint
pub trait PullTransport: Send + Sync {
    fn pull(&self, partner: &LinkPartnerName, address: &str) -> Result<Vec<Message>, LinkPluginError>;
}

/// A message handed to [`RecordingTransport::push`]
#[derive(Debug, Clone)]
pub struct PushedMessage {
    pub partner: LinkPartnerName,
    pub address: String,
    pub message: Message,
}

#[derive(Debug, Default)]
struct Recording {
    pushed: Vec<PushedMessage>,
    pending: HashMap<LinkPartnerName, VecDeque<Message>>,
    /// Failures returned by the next pushes, oldest first
    failures: VecDeque<bool>,
}

/// In-memory transport recording pushed messages and serving queued ones
#[derive(Debug, Default)]
pub struct RecordingTransport {
    inner: Mutex<Recording>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pushed(&self) -> Vec<PushedMessage> {
        self.lock().pushed.clone()
    }

    pub fn pushed_to(&self, partner: &LinkPartnerName) -> usize {
        self.lock().pushed.iter().filter(|p| &p.partner == partner).count()
    }

    /// Make `message` available to the next pull of `partner`
    pub fn queue_for_pull(&self, partner: &LinkPartnerName, message: Message) {
        self.lock()
            .pending
            .entry(partner.clone())
            .or_default()
            .push_back(message);
    }

    /// Fail the next `count` pushes
    pub fn fail_next_pushes(&self, count: usize, retryable: bool) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.failures.push_back(retryable);
        }
    }
}

impl PushTransport for RecordingTransport {
    fn push(&self, partner: &LinkPartnerName, address: &str, message: &Message) -> Result<String, LinkPluginError> {
        let mut inner = self.lock();
        if let Some(retryable) = inner.failures.pop_front() {
            return Err(LinkPluginError::Transport {
                partner: partner.clone(),
                reason: format!("push to {} failed", address),
                retryable,
            });
        }
        inner.pushed.push(PushedMessage {
            partner: partner.clone(),
            address: address.to_string(),
            message: message.clone(),
        });
        Ok(format!("remote-{}", message.connector_message_id))
    }
}

impl PullTransport for RecordingTransport {
    fn pull(&self, partner: &LinkPartnerName, _address: &str) -> Result<Vec<Message>, LinkPluginError> {
        Ok(self
            .lock()
            .pending
            .get_mut(partner)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default())
    }
}
