//! Persisting message processing failures around a processing call

use audit::{MessageError, MessageErrorStore};
use shared::{ConnectorError, ConnectorMessageId};
use std::future::Future;
use tracing::{error, warn};

/// How a processing failure is handled once it has been persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionPolicy {
    /// Return the failure to the caller after persisting it
    pub pass_exception: bool,
    /// Where the failure was caught, stored with it
    pub info_text: &'static str,
}

impl ExceptionPolicy {
    pub const fn pass(info_text: &'static str) -> Self {
        Self {
            pass_exception: true,
            info_text,
        }
    }

    pub const fn swallow(info_text: &'static str) -> Self {
        Self {
            pass_exception: false,
            info_text,
        }
    }
}

fn persist(
    store: &dyn MessageErrorStore,
    policy: ExceptionPolicy,
    message_id: Option<&ConnectorMessageId>,
    err: &ConnectorError,
) {
    // A failure naming its message wins over the id given by the caller
    let message_id = match err {
        ConnectorError::Message(e) if e.message_id.is_some() => e.message_id.clone(),
        _ => message_id.cloned(),
    };
    error!(
        message_id = message_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
        info = policy.info_text,
        error = %err,
        "Message processing failed"
    );
    if let Err(store_err) = store.store_message_error(MessageError::from_error(message_id, policy.info_text, err)) {
        warn!(error = %store_err, "Message error could not be persisted");
    }
}

/// Run `process`, persisting a failure into `store`.
///
/// `Ok(Some(_))` on success. A failure is persisted and then returned when
/// the policy passes it on, or turned into `Ok(None)` otherwise.
pub fn store_message_exception<T, F>(
    store: &dyn MessageErrorStore,
    policy: ExceptionPolicy,
    message_id: Option<&ConnectorMessageId>,
    process: F,
) -> Result<Option<T>, ConnectorError>
where
    F: FnOnce() -> Result<T, ConnectorError>,
{
    match process() {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            persist(store, policy, message_id, &err);
            if policy.pass_exception {
                Err(err)
            } else {
                Ok(None)
            }
        }
    }
}

/// Async form of [`store_message_exception`]
pub async fn store_message_exception_async<T, Fut>(
    store: &dyn MessageErrorStore,
    policy: ExceptionPolicy,
    message_id: Option<&ConnectorMessageId>,
    process: Fut,
) -> Result<Option<T>, ConnectorError>
where
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    match process.await {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            persist(store, policy, message_id, &err);
            if policy.pass_exception {
                Err(err)
            } else {
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit::MessageErrorLog;
    use shared::MessageException;

    #[test]
    fn test_success_passes_value_through() {
        let log = MessageErrorLog::default();
        let result = store_message_exception(&log, ExceptionPolicy::pass("test"), None, || Ok(42)).unwrap();
        assert_eq!(result, Some(42));
        assert!(log.is_empty());
    }

    #[test]
    fn test_failure_is_persisted_and_passed() {
        let log = MessageErrorLog::default();
        let id = ConnectorMessageId::new("m1");
        let err = store_message_exception::<(), _>(&log, ExceptionPolicy::pass("toLink"), Some(&id), || {
            Err(ConnectorError::Persistence("db down".to_string()))
        })
        .unwrap_err();

        assert!(matches!(err, ConnectorError::Persistence(_)));
        let stored = log.errors_for(&id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].info_text, "toLink");
    }

    #[test]
    fn test_failure_is_persisted_and_swallowed() {
        let log = MessageErrorLog::default();
        let result = store_message_exception::<(), _>(&log, ExceptionPolicy::swallow("cleanup"), None, || {
            Err(ConnectorError::Persistence("gone".to_string()))
        })
        .unwrap();

        assert_eq!(result, None);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_message_id_taken_from_message_exception() {
        let log = MessageErrorLog::default();
        let inner = ConnectorMessageId::new("inner");
        let _ = store_message_exception::<(), _>(
            &log,
            ExceptionPolicy::swallow("router"),
            Some(&ConnectorMessageId::new("outer")),
            || Err(MessageException::new(Some(inner.clone()), "no target").into()),
        );
        assert_eq!(log.errors_for(&inner).len(), 1);
    }

    #[tokio::test]
    async fn test_async_form() {
        let log = MessageErrorLog::default();
        let result = store_message_exception_async::<u8, _>(&log, ExceptionPolicy::swallow("worker"), None, async {
            Err(ConnectorError::Persistence("x".to_string()))
        })
        .await
        .unwrap();
        assert_eq!(result, None);
        assert_eq!(log.len(), 1);
    }
}
