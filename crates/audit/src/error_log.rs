//! MessageErrorLog - Persisted message processing errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{ConnectorError, ConnectorMessageId};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// One failure raised while processing a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    pub timestamp: DateTime<Utc>,
    pub message_id: Option<ConnectorMessageId>,
    /// Where the failure was caught
    pub info_text: String,
    pub error: String,
    /// Display of every error in the source chain, outermost first
    pub causes: Vec<String>,
}

impl MessageError {
    pub fn from_error(
        message_id: Option<ConnectorMessageId>,
        info_text: impl Into<String>,
        error: &(dyn std::error::Error + 'static),
    ) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            timestamp: Utc::now(),
            message_id,
            info_text: info_text.into(),
            error: error.to_string(),
            causes,
        }
    }
}

/// Port to the store message errors are persisted in
pub trait MessageErrorStore: Send + Sync {
    fn store_message_error(&self, error: MessageError) -> Result<(), ConnectorError>;

    fn errors_for(&self, message_id: &ConnectorMessageId) -> Vec<MessageError>;
}

/// Bounded in-memory message error store
#[derive(Debug)]
pub struct MessageErrorLog {
    entries: Mutex<VecDeque<MessageError>>,
    max_entries: usize,
}

impl MessageErrorLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MessageError>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn recent(&self, limit: usize) -> Vec<MessageError> {
        self.lock().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn export_json(&self) -> serde_json::Value {
        serde_json::to_value(&*self.lock()).unwrap_or_default()
    }
}

impl Default for MessageErrorLog {
    fn default() -> Self {
        Self::new(10000)
    }
}

impl MessageErrorStore for MessageErrorLog {
    fn store_message_error(&self, error: MessageError) -> Result<(), ConnectorError> {
        let mut entries = self.lock();
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(error);
        Ok(())
    }

    fn errors_for(&self, message_id: &ConnectorMessageId) -> Vec<MessageError> {
        self.lock()
            .iter()
            .filter(|e| e.message_id.as_ref() == Some(message_id))
            .cloned()
            .collect()
    }
}
