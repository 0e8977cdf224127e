use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::retry::{Backoff, RetryPolicy};

/// Construction-time settings of a [`crate::Client`].
///
/// Every field is optional in the serialized form:
///
/// ```json
/// {"backoff": {"steps": 5, "initialDelayMs": 1000, "factor": 1.5, "jitter": 0.5}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientOptions {
    pub backoff: Backoff,
}

impl ClientOptions {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read client options from {}", path.display()))?;
        let options: ClientOptions = serde_json::from_str(&text)
            .with_context(|| format!("Could not parse client options in {}", path.display()))?;
        options
            .backoff
            .validate()
            .with_context(|| format!("Invalid client options in {}", path.display()))?;
        Ok(options)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::new(self.backoff)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn empty_document_means_defaults() {
        let options: ClientOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, ClientOptions::default());
    }

    #[test]
    fn reads_overrides_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{"backoff": {"steps": 2, "initialDelayMs": 20}}"#).unwrap();
        let options = ClientOptions::from_json_file(&path).unwrap();
        assert_eq!(options.backoff.steps, 2);
        assert_eq!(options.backoff.duration, Duration::from_millis(20));
        assert_eq!(options.retry_policy().unwrap().backoff(), &options.backoff);
    }

    #[test]
    fn rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, r#"{"backoff": {"steps": 0}}"#).unwrap();
        let err = ClientOptions::from_json_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("steps must be at least 1"));

        std::fs::write(&path, r#"{"retries": 3}"#).unwrap();
        assert!(ClientOptions::from_json_file(&path).is_err());
    }
}
