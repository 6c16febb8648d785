//! Evidence taxonomy

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of evidence attesting an event in the delivery lifecycle of a message.
///
/// Every type carries a unique priority. An evidence of lower priority never
/// overrides the state set by an evidence of higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceType {
    SubmissionAcceptance,
    SubmissionRejection,
    RelayRemmdAcceptance,
    RelayRemmdRejection,
    RelayRemmdFailure,
    Delivery,
    NonDelivery,
    Retrieval,
    NonRetrieval,
}

impl EvidenceType {
    pub const ALL: [EvidenceType; 9] = [
        EvidenceType::SubmissionAcceptance,
        EvidenceType::SubmissionRejection,
        EvidenceType::RelayRemmdAcceptance,
        EvidenceType::RelayRemmdRejection,
        EvidenceType::RelayRemmdFailure,
        EvidenceType::Delivery,
        EvidenceType::NonDelivery,
        EvidenceType::Retrieval,
        EvidenceType::NonRetrieval,
    ];

    pub fn priority(self) -> u8 {
        match self {
            EvidenceType::SubmissionAcceptance => 1,
            EvidenceType::SubmissionRejection => 2,
            EvidenceType::RelayRemmdAcceptance => 3,
            EvidenceType::RelayRemmdRejection => 4,
            EvidenceType::RelayRemmdFailure => 5,
            EvidenceType::Delivery => 6,
            EvidenceType::NonDelivery => 7,
            EvidenceType::Retrieval => 8,
            EvidenceType::NonRetrieval => 9,
        }
    }

    /// How often the type may be attached to one business message
    pub fn max_occurrence(self) -> usize {
        1
    }

    /// Evidence that moves a business message into the rejected state
    pub fn is_negative(self) -> bool {
        matches!(
            self,
            EvidenceType::SubmissionRejection
                | EvidenceType::RelayRemmdRejection
                | EvidenceType::RelayRemmdFailure
                | EvidenceType::NonDelivery
                | EvidenceType::NonRetrieval
        )
    }

    /// Evidence that moves a business message into the confirmed state
    pub fn is_confirming(self) -> bool {
        matches!(self, EvidenceType::Delivery | EvidenceType::Retrieval)
    }

    pub fn is_positive(self) -> bool {
        !self.is_negative()
    }

    /// Code under which the type is kept by the evidence repository
    pub fn storage_code(self) -> &'static str {
        match self {
            EvidenceType::SubmissionAcceptance => "SUBMISSION_ACCEPTANCE",
            EvidenceType::SubmissionRejection => "SUBMISSION_REJECTION",
            EvidenceType::RelayRemmdAcceptance => "RELAY_REMMD_ACCEPTANCE",
            EvidenceType::RelayRemmdRejection => "RELAY_REMMD_REJECTION",
            EvidenceType::RelayRemmdFailure => "RELAY_REMMD_FAILURE",
            EvidenceType::Delivery => "DELIVERY",
            EvidenceType::NonDelivery => "NON_DELIVERY",
            EvidenceType::Retrieval => "RETRIEVAL",
            EvidenceType::NonRetrieval => "NON_RETRIEVAL",
        }
    }

    /// Map a repository code back to the evidence type
    pub fn from_storage_code(code: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|t| t.storage_code() == code)
            .ok_or_else(|| ConfigError::UnmappedEvidenceType(code.to_string()))
    }
}

impl fmt::Display for EvidenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_code())
    }
}

/// Verify that every evidence type survives the round trip through its
/// storage code and that no two types share a priority.
///
/// A failure here is a defect of the build, callers abort startup on it.
pub fn verify_storage_mapping() -> Result<(), ConfigError> {
    let mut seen_priorities = std::collections::HashSet::new();
    for evidence_type in EvidenceType::ALL {
        let mapped = EvidenceType::from_storage_code(evidence_type.storage_code())?;
        if mapped != evidence_type {
            return Err(ConfigError::UnmappedEvidenceType(evidence_type.to_string()));
        }
        if !seen_priorities.insert(evidence_type.priority()) {
            return Err(ConfigError::Invalid(format!(
                "Evidence priority {} is used twice",
                evidence_type.priority()
            )));
        }
    }
    Ok(())
}

/// Pick the evidence type with the highest priority
pub fn highest_priority<I>(types: I) -> Option<EvidenceType>
where
    I: IntoIterator<Item = EvidenceType>,
{
    types.into_iter().max_by_key(|t| t.priority())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_storage_mapping_is_bijective() {
        verify_storage_mapping().unwrap();

        for evidence_type in EvidenceType::ALL {
            let code = evidence_type.storage_code();
            assert_eq!(EvidenceType::from_storage_code(code).unwrap(), evidence_type);
        }

        let codes: HashSet<_> = EvidenceType::ALL.iter().map(|t| t.storage_code()).collect();
        assert_eq!(codes.len(), EvidenceType::ALL.len());
    }

    #[test]
    fn test_priorities_are_unique() {
        let priorities: HashSet<_> = EvidenceType::ALL.iter().map(|t| t.priority()).collect();
        assert_eq!(priorities.len(), EvidenceType::ALL.len());
    }

    #[test]
    fn test_unknown_storage_code_is_config_error() {
        let err = EvidenceType::from_storage_code("SOMETHING_ELSE").unwrap_err();
        assert!(matches!(err, ConfigError::UnmappedEvidenceType(code) if code == "SOMETHING_ELSE"));
    }

    #[test]
    fn test_classification() {
        assert!(EvidenceType::Delivery.is_confirming());
        assert!(EvidenceType::Retrieval.is_confirming());
        assert!(EvidenceType::NonDelivery.is_negative());
        assert!(EvidenceType::RelayRemmdFailure.is_negative());
        assert!(EvidenceType::SubmissionAcceptance.is_positive());
        assert!(!EvidenceType::SubmissionAcceptance.is_confirming());
    }

    #[test]
    fn test_highest_priority() {
        let picked = highest_priority([
            EvidenceType::SubmissionAcceptance,
            EvidenceType::Delivery,
            EvidenceType::RelayRemmdAcceptance,
        ]);
        assert_eq!(picked, Some(EvidenceType::Delivery));
        assert_eq!(highest_priority(Vec::new()), None);
    }

    #[test]
    fn test_serde_uses_storage_style_names() {
        let json = serde_json::to_string(&EvidenceType::RelayRemmdFailure).unwrap();
        assert_eq!(json, "\"RELAY_REMMD_FAILURE\"");
    }
}
