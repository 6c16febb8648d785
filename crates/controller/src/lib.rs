//! # Connector Controller
//!
//! Routing of messages between link partners, evidence confirmation and
//! evidence timeouts, the transport retry policy and cleanup of finished
//! messages.

mod cleanup;
mod confirmation;
mod connector;
mod evidence_builder;
mod evidence_store;
mod evidence_timeout;
mod exception;
mod processor;
mod retry;
mod router;
mod routing;
mod worker;

pub use cleanup::{CleanupOutcome, CleanupWorker};
pub use confirmation::{ConfirmationOutcome, MessageConfirmator};
pub use connector::{Connector, ConnectorHandle, RunStats};
pub use evidence_builder::{EvidenceBuilder, PlainEvidenceBuilder};
pub use evidence_store::{BusinessMessageRecord, BusinessMessageState, EvidenceStore, InMemoryEvidenceStore};
pub use evidence_timeout::{EvidenceTimeoutChecker, EvidenceTimeoutConfig, TimeoutAction, TimeoutReport};
pub use exception::{store_message_exception, store_message_exception_async, ExceptionPolicy};
pub use processor::{MessageProcessor, ProcessOutcome};
pub use retry::{RetryDecision, TransportRetryService};
pub use router::{target_partner, BackendRouting, GatewayRouting, InboundMessages, MessageRouter, RoutingConfig, RuleSection};
pub use routing::{first_match, sort_rules, RoutingAttribute, RoutingExpression, RoutingRule};
pub use worker::{DispatchOutcome, TransportWorker};
