//! Error types for the connector

use crate::ids::{BusinessDomainId, ConnectorMessageId, LinkConfigName, LinkPartnerName};
use crate::link::PluginFeature;
use thiserror::Error;

/// Configuration and usage defects. These are fatal and never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {kind} name '{name}'")]
    InvalidName { kind: &'static str, name: String },

    #[error("No link plugin claims implementation '{implementation}'")]
    NoPluginForImplementation { implementation: String },

    #[error("Implementation '{implementation}' is claimed by more than one plugin: {}", plugins.join(", "))]
    AmbiguousPlugin {
        implementation: String,
        plugins: Vec<String>,
    },

    #[error("Link configuration '{0}' has an empty implementation name")]
    EmptyImplementation(LinkConfigName),

    #[error("Evidence type '{0}' has no storage mapping")]
    UnmappedEvidenceType(String),

    #[error("Invalid routing expression '{expression}' at column {column}: {reason}")]
    InvalidRoutingExpression {
        expression: String,
        column: usize,
        reason: String,
    },

    #[error("Unsupported configuration file format '{0}'")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Invalid(String),
}

/// Error thrown when a capability is used that the plugin did not declare
#[derive(Debug, Error)]
#[error("Plugin '{plugin}' does not support feature {feature:?}")]
pub struct FeatureNotSupportedError {
    pub plugin: String,
    pub feature: PluginFeature,
}

/// Transport and lifecycle failures local to a link plugin
#[derive(Debug, Error)]
pub enum LinkPluginError {
    #[error(transparent)]
    FeatureNotSupported(#[from] FeatureNotSupportedError),

    #[error("No active link partner '{partner}' in business domain '{domain}'")]
    NoActivePartner {
        domain: BusinessDomainId,
        partner: LinkPartnerName,
    },

    #[error("Link partner '{partner}' has been shut down")]
    PartnerShutdown { partner: LinkPartnerName },

    #[error("Link partner '{partner}' is unusable: {reason}")]
    PartnerUnusable {
        partner: LinkPartnerName,
        reason: String,
    },

    #[error("Context of link '{link}' is closed")]
    ContextClosed { link: LinkConfigName },

    #[error("Binding properties to {target} failed: {reason}")]
    Binding { target: String, reason: String },

    #[error("Transport to link partner '{partner}' failed: {reason}")]
    Transport {
        partner: LinkPartnerName,
        reason: String,
        retryable: bool,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("{0}")]
    Lifecycle(String),
}

impl LinkPluginError {
    /// Whether the failure leaves the affected link or partner unusable
    pub fn is_lifecycle_failure(&self) -> bool {
        matches!(
            self,
            LinkPluginError::ContextClosed { .. }
                | LinkPluginError::Lifecycle(_)
                | LinkPluginError::PartnerUnusable { .. }
        )
    }

    /// Whether the failure is a transient transport failure worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, LinkPluginError::Transport { retryable: true, .. })
    }
}

/// Failures of the business-domain scope store
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("No business domain is set for the current thread of execution")]
    NoCurrentDomain,

    #[error("Scoped instance '{name}' in domain '{domain}' is not of type {expected}")]
    TypeMismatch {
        domain: BusinessDomainId,
        name: String,
        expected: &'static str,
    },

    #[error("Business domain '{0}' is not registered")]
    UnknownDomain(BusinessDomainId),

    #[error("Business domain '{0}' is already registered")]
    DomainExists(BusinessDomainId),

    #[error("Binding properties with prefix '{prefix}' failed: {reason}")]
    Binding { prefix: String, reason: String },
}

/// Failures of the transport queue adapter
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Message '{id}' not found in queue '{queue}'")]
    NotFound { queue: String, id: String },

    #[error("Queue '{0}' is closed")]
    Closed(String),

    #[error("No queue named '{0}'")]
    UnknownQueue(String),
}

/// Failure raised while processing a message, carrying the affected message id
#[derive(Debug, Error)]
#[error("{text}")]
pub struct MessageException {
    pub message_id: Option<ConnectorMessageId>,
    pub text: String,
    #[source]
    pub source: Option<Box<ConnectorError>>,
}

impl MessageException {
    pub fn new(message_id: Option<ConnectorMessageId>, text: impl Into<String>) -> Self {
        Self {
            message_id,
            text: text.into(),
            source: None,
        }
    }

    /// Builder: attach the underlying cause
    pub fn with_source(mut self, source: ConnectorError) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// General connector error type
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Link(#[from] LinkPluginError),

    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Message(#[from] MessageException),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<FeatureNotSupportedError> for ConnectorError {
    fn from(err: FeatureNotSupportedError) -> Self {
        ConnectorError::Link(err.into())
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_not_supported_message() {
        let err: LinkPluginError = FeatureNotSupportedError {
            plugin: "wsbackendplugin".to_string(),
            feature: PluginFeature::RcvPullMode,
        }
        .into();
        assert!(err.to_string().contains("RcvPullMode"));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_ambiguous_plugin_lists_claimants() {
        let err = ConfigError::AmbiguousPlugin {
            implementation: "impl".to_string(),
            plugins: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Implementation 'impl' is claimed by more than one plugin: a, b"
        );
    }

    #[test]
    fn test_error_classification() {
        let transient = LinkPluginError::Transport {
            partner: LinkPartnerName::new("p"),
            reason: "timeout".to_string(),
            retryable: true,
        };
        assert!(transient.is_transient());
        assert!(!transient.is_lifecycle_failure());

        let closed = LinkPluginError::ContextClosed {
            link: LinkConfigName::new("l"),
        };
        assert!(closed.is_lifecycle_failure());
    }

    #[test]
    fn test_message_exception_source_chain() {
        let err = MessageException::new(None, "processing failed")
            .with_source(ConnectorError::Persistence("db down".to_string()));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Persistence error: db down"));
    }
}
