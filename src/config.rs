//! Matcher configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MatchError, PersistenceError, ValidationError};

/// Default responsible agent stamped on provenance entries.
pub const DEFAULT_ATTRIBUTION: &str = "https://w3id.org/oc/meta/prov/pa/4";

/// Default minimum title similarity for container reconciliation.
pub const DEFAULT_TITLE_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Configuration of an [`InstanceMatcher`](crate::InstanceMatcher) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    /// Responsible agent recorded on every provenance entry.
    pub attribution: String,

    /// Minimum title similarity, in `(0, 1]`, for two same-typed containers
    /// of merged resources to be merged as well.
    pub title_similarity_threshold: f64,

    /// Collapse roles that end up duplicated (same resource, same role type,
    /// same agent) after an agent merge.
    pub collapse_duplicate_roles: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            attribution: DEFAULT_ATTRIBUTION.to_string(),
            title_similarity_threshold: DEFAULT_TITLE_SIMILARITY_THRESHOLD,
            collapse_duplicate_roles: true,
        }
    }
}

impl MatchConfig {
    /// Set the attribution string.
    #[must_use]
    pub fn with_attribution(mut self, attribution: impl Into<String>) -> Self {
        self.attribution = attribution.into();
        self
    }

    /// Set the container title similarity threshold.
    #[must_use]
    pub const fn with_title_similarity_threshold(mut self, threshold: f64) -> Self {
        self.title_similarity_threshold = threshold;
        self
    }

    /// Enable or disable duplicate role collapsing.
    #[must_use]
    pub const fn with_collapse_duplicate_roles(mut self, enabled: bool) -> Self {
        self.collapse_duplicate_roles = enabled;
        self
    }

    /// Check field ranges.
    ///
    /// # Errors
    /// - `MissingField` for a blank attribution
    /// - `InvalidField` for a threshold outside `(0, 1]`
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.attribution.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "attribution".to_string(),
            });
        }
        let t = self.title_similarity_threshold;
        if t.is_nan() || t <= 0.0 || t > 1.0 {
            return Err(ValidationError::InvalidField {
                field: "title_similarity_threshold".to_string(),
                reason: format!("must be in (0, 1] (got {t})"),
            });
        }
        Ok(self)
    }

    /// Parse and validate a JSON configuration document.
    ///
    /// Missing fields take their defaults.
    ///
    /// # Errors
    /// - `InvalidField` if the document is not valid JSON for this type
    /// - any error from [`MatchConfig::validate`]
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidField {
            field: "config".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()
    }

    /// Read, parse and validate a JSON configuration file.
    ///
    /// # Errors
    /// - `Persistence` if the file cannot be read
    /// - `Validation` if its content is invalid
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MatchError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))?;
        Ok(Self::from_json_str(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MatchConfig::default().validate().unwrap();
        assert_eq!(config.attribution, DEFAULT_ATTRIBUTION);
        assert!(config.collapse_duplicate_roles);
    }

    #[test]
    fn test_threshold_range_is_enforced() {
        for bad in [0.0, -0.5, 1.01, f64::NAN] {
            assert!(MatchConfig::default()
                .with_title_similarity_threshold(bad)
                .validate()
                .is_err());
        }
        assert!(MatchConfig::default()
            .with_title_similarity_threshold(1.0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_blank_attribution_is_rejected() {
        let err = MatchConfig::default().with_attribution(" ").validate().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { .. }));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MatchConfig::from_json_str(r#"{"title_similarity_threshold": 0.9}"#).unwrap();
        assert!((config.title_similarity_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.attribution, DEFAULT_ATTRIBUTION);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        assert!(MatchConfig::from_json_str(r#"{"debug": true}"#).is_err());
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = MatchConfig::from_file(dir.path().join("missing.json")).unwrap_err();
        assert!(err.is_persistence());
    }
}
