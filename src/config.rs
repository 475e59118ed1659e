use crate::error::{IntakeError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct IntakeConfig {
    #[schemars(description = "How many events the recent-event KPI listing returns")]
    pub recent_event_limit: usize,

    #[schemars(description = "How many campaigns the recent-campaign KPI listing returns")]
    pub recent_campaign_limit: usize,

    #[schemars(
        description = "Delete the parent and its already-written dependents when a dependent insert fails"
    )]
    pub compensate_on_failure: bool,

    #[schemars(description = "Prefix of the upload name recorded for subscription batches")]
    pub subscription_upload_prefix: String,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            recent_event_limit: 20,
            recent_campaign_limit: 10,
            compensate_on_failure: true,
            subscription_upload_prefix: "SUSCRIPCIONES".to_string(),
        }
    }
}

impl IntakeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: IntakeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.recent_event_limit == 0 {
            return Err(IntakeError::InvalidConfig(
                "recent_event_limit must be at least 1".to_string(),
            ));
        }
        if self.recent_campaign_limit == 0 {
            return Err(IntakeError::InvalidConfig(
                "recent_campaign_limit must be at least 1".to_string(),
            ));
        }
        if self.subscription_upload_prefix.trim().is_empty() {
            return Err(IntakeError::InvalidConfig(
                "subscription_upload_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = IntakeConfig::from_json_str(r#"{"recent_event_limit": 5}"#).unwrap();
        assert_eq!(config.recent_event_limit, 5);
        assert_eq!(config.recent_campaign_limit, 10);
        assert!(config.compensate_on_failure);
        assert_eq!(config.subscription_upload_prefix, "SUSCRIPCIONES");
    }

    #[test]
    fn test_rejects_zero_limits() {
        let result = IntakeConfig::from_json_str(r#"{"recent_campaign_limit": 0}"#);
        assert!(matches!(result, Err(IntakeError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let result = IntakeConfig::from_json_str("{ not json");
        assert!(matches!(result, Err(IntakeError::Serialization(_))));
    }
}
