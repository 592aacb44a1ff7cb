//! Store configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Tunables for a [`ResourceStore`](crate::ResourceStore).
///
/// Every field has a default, so a JSON document only needs the keys it
/// wants to override:
///
/// ```
/// let cfg = livestore::StoreConfig::from_json(r#"{ "intersection_fold_threshold": 64 }"#).unwrap();
/// assert_eq!(cfg.intersection_fold_threshold, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Byte budget of the long-string value cache.
    pub long_string_cache_bytes: usize,
    /// Candidate count above which an intersection folds its cheapest
    /// filtering predicate in as a bulk pass instead of testing each
    /// candidate individually.
    pub intersection_fold_threshold: usize,
    /// Instantiate non-live lists through a snapshot predicate so results
    /// leaving the match set mid-evaluation are not dropped.
    pub snapshot_non_live: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            long_string_cache_bytes: 4 * 1024 * 1024,
            intersection_fold_threshold: 1024,
            snapshot_non_live: true,
        }
    }
}

impl StoreConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: StoreConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.intersection_fold_threshold == 0 {
            return Err(Error::InvalidConfig(
                "intersection_fold_threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let cfg = StoreConfig::from_json(r#"{ "snapshot_non_live": false }"#).unwrap();
        assert!(!cfg.snapshot_non_live);
        assert_eq!(cfg.long_string_cache_bytes, StoreConfig::default().long_string_cache_bytes);
    }

    #[test]
    fn test_rejects_zero_threshold() {
        let err = StoreConfig::from_json(r#"{ "intersection_fold_threshold": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(matches!(StoreConfig::from_json("{"), Err(Error::ConfigParse(_))));
    }
}
