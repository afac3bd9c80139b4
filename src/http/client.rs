//! HTTP client that retries transient transport failures.

use anyhow::Result;
use log::{debug, warn};
use reqwest::Method;

use super::reqwest_transport::ReqwestTransport;
use super::retry::{RetryPolicy, classify};
use super::transport::{HttpResponse, RequestOptions, Transport, TransportError};
use crate::config::ClientConfig;

/// Issues requests through a [`Transport`], retrying failures the policy allows.
///
/// Connection failures and timeouts are retried by default. Responses with a
/// 4xx or 5xx status are returned as [`TransportError::Status`] on the first
/// occurrence. Once the attempt budget is spent the last transport error is
/// returned as-is.
///
/// The client keeps no per-request state, so a shared reference may be used
/// from several tasks at once as long as the transport allows it.
pub struct ResilientClient<T: Transport = ReqwestTransport> {
    transport: T,
    policy: RetryPolicy,
}

impl ResilientClient<ReqwestTransport> {
    /// Builds a client on top of a fresh `reqwest` transport.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let policy = config.retry_policy()?;
        let timeout = config.timeout()?;
        let transport = ReqwestTransport::new(timeout)?;
        Ok(Self::with_transport(transport, policy))
    }
}

impl<T: Transport> ResilientClient<T> {
    pub fn with_transport(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `method url` until it succeeds, fails for good, or runs out of attempts.
    #[tracing::instrument(skip(self, options))]
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            debug!("{} {}: attempt {}/{}", method, url, attempt, max_attempts);

            let error = match self.transport.send(&method, url, &options).await {
                Ok(response) => return response.error_for_status(url),
                Err(e) => e,
            };

            let kind = classify(&error);
            if !self.policy.should_retry(attempt, kind) {
                if self.policy.is_retryable(kind) {
                    warn!(
                        "{} {}: giving up after {} attempts ({})",
                        method, url, attempt, error
                    );
                } else {
                    debug!("{} {}: non-retryable {} error: {}", method, url, kind, error);
                }
                return Err(error);
            }

            warn!(
                "{} {}: attempt {}/{} failed ({}), retrying...",
                method, url, attempt, max_attempts, error
            );
            attempt += 1;
        }
    }

    pub async fn get(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(Method::GET, url, options).await
    }

    pub async fn post(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(Method::POST, url, options).await
    }

    pub async fn put(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(Method::PUT, url, options).await
    }

    pub async fn patch(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(Method::PATCH, url, options).await
    }

    pub async fn delete(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.execute(Method::DELETE, url, options).await
    }

    /// Releases the transport. Consumes the client so it cannot be closed twice.
    pub async fn close(self) {
        self.transport.close().await;
    }
}
