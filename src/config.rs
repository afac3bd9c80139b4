use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::http::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS, ErrorKind, RetryPolicy};

/// Construction-time settings for [`crate::http::ResilientClient`].
///
/// Loaded from JSON with every field optional:
///
/// ```json
/// { "max_attempts": 5, "timeout": 2.5, "retry_on": ["connection", "timeout"] }
/// ```
///
/// A `null` timeout disables it; an absent one means the default.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Total attempts per request, the first one included.
    pub max_attempts: u32,
    /// Per-attempt timeout in seconds.
    pub timeout: Option<f64>,
    /// Error kinds worth another attempt. `None` means connection and timeout failures.
    pub retry_on: Option<Vec<ErrorKind>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: Some(DEFAULT_TIMEOUT_SECS),
            retry_on: None,
        }
    }
}

impl ClientConfig {
    #[tracing::instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: ClientConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        let retry_on: HashSet<ErrorKind> = match &self.retry_on {
            Some(kinds) => kinds.iter().copied().collect(),
            None => ErrorKind::default_retryable(),
        };
        RetryPolicy::new(self.max_attempts, retry_on)
    }

    /// Per-attempt timeout, `None` when disabled.
    pub fn timeout(&self) -> Result<Option<Duration>> {
        match self.timeout {
            None => Ok(None),
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::try_from_secs_f64(secs)
                .map(Some)
                .with_context(|| format!("timeout of {} seconds is too large", secs)),
            Some(secs) => bail!("timeout must be a positive number of seconds, got {}", secs),
        }
    }
}
