//! Identifier types for business domains, link configurations and link partners

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Pattern every configured name has to match
const NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$";

fn name_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(NAME_PATTERN).ok()).as_ref()
}

/// Check a configured name against the allowed name pattern
pub fn is_valid_name(name: &str) -> bool {
    name_regex().map(|r| r.is_match(name)).unwrap_or(false)
}

fn validate(kind: &'static str, name: &str) -> Result<(), ConfigError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create the identifier without validating it
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Create the identifier, rejecting names outside the allowed pattern
            pub fn parse(value: impl Into<String>) -> Result<Self, ConfigError> {
                let value = value.into();
                validate($kind, &value)?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

name_type!(
    /// Tenant identifier. Opaque to the core, immutable once created.
    BusinessDomainId,
    "business domain"
);

name_type!(
    /// Name of a link configuration, unique within its business domain
    LinkConfigName,
    "link configuration"
);

name_type!(
    /// Name of a link partner, unique within its business domain
    LinkPartnerName,
    "link partner"
);

impl BusinessDomainId {
    /// Id of the domain every instance carries out of the box
    pub const DEFAULT: &'static str = "defaultBusinessDomain";

    pub fn default_domain() -> Self {
        Self::new(Self::DEFAULT)
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for BusinessDomainId {
    fn default() -> Self {
        Self::default_domain()
    }
}

/// Connector-internal id of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectorMessageId(String);

impl ConnectorMessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectorMessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["wsbackend", "partner1", "gw.pull-01", "Domain_A"] {
            assert!(is_valid_name(name), "{} should be valid", name);
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", " partner", "-lead", "a b", "../etc", "name\0", "partner/1"] {
            assert!(!is_valid_name(name), "{:?} should be invalid", name);
        }
    }

    #[test]
    fn test_parse_rejects_invalid_name() {
        let err = LinkPartnerName::parse("bad name").unwrap_err();
        assert!(err.to_string().contains("link partner"));
    }

    #[test]
    fn test_default_domain() {
        let domain = BusinessDomainId::default();
        assert!(domain.is_default());
        assert_eq!(domain.as_str(), "defaultBusinessDomain");
    }

    #[test]
    fn test_generated_message_ids_differ() {
        assert_ne!(ConnectorMessageId::generate(), ConnectorMessageId::generate());
    }

    #[test]
    fn test_serde_transparent() {
        let name = LinkPartnerName::new("partner1");
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"partner1\"");
    }
}
