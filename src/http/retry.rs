//! Retry policy and error classification.

use anyhow::{Result, bail};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use super::transport::TransportError;

/// Default number of attempts (first try included) for one request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-attempt timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 10.0;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Connection refused, reset or dropped.
    Connection,
    /// The attempt exceeded the transport timeout.
    Timeout,
    /// A 4xx or 5xx response. Never retried.
    HttpStatus,
    /// Any other transport failure.
    Other,
}

impl ErrorKind {
    /// Kinds retried when no explicit set is configured.
    pub fn default_retryable() -> HashSet<ErrorKind> {
        HashSet::from([ErrorKind::Connection, ErrorKind::Timeout])
    }

    fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::HttpStatus => "http-status",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connection" => Ok(ErrorKind::Connection),
            "timeout" => Ok(ErrorKind::Timeout),
            "http-status" => Ok(ErrorKind::HttpStatus),
            "other" => Ok(ErrorKind::Other),
            other => bail!(
                "Unknown error kind '{}'; expected one of: connection, timeout, http-status, other",
                other
            ),
        }
    }
}

/// Maps a transport failure to its [`ErrorKind`].
pub fn classify(error: &TransportError) -> ErrorKind {
    match error {
        TransportError::Connect(_) => ErrorKind::Connection,
        TransportError::Timeout(_) => ErrorKind::Timeout,
        TransportError::Status(_) => ErrorKind::HttpStatus,
        TransportError::Other(_) => ErrorKind::Other,
    }
}

/// How many attempts a request gets and which failures earn another one.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    retry_on: HashSet<ErrorKind>,
}

impl RetryPolicy {
    /// `max_attempts` counts every transport call, the first one included.
    ///
    /// `HttpStatus` is accepted in `retry_on` but has no effect.
    pub fn new(max_attempts: u32, retry_on: HashSet<ErrorKind>) -> Result<Self> {
        if max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if retry_on.contains(&ErrorKind::HttpStatus) {
            warn!("HTTP status failures are never retried; ignoring 'http-status' in retry set");
        }
        Ok(Self {
            max_attempts,
            retry_on,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_on(&self) -> &HashSet<ErrorKind> {
        &self.retry_on
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        kind != ErrorKind::HttpStatus && self.retry_on.contains(&kind)
    }

    /// Whether a failure of `kind` on attempt `attempt` (1-based) gets another try.
    pub fn should_retry(&self, attempt: u32, kind: ErrorKind) -> bool {
        self.is_retryable(kind) && attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_on: ErrorKind::default_retryable(),
        }
    }
}
