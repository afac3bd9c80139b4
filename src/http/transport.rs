//! Transport abstraction used by the retrying client.
//!
//! The client never talks to the network itself. It hands every attempt to a
//! [`Transport`], which performs one request and reports either a response or
//! a [`TransportError`] that the retry policy can classify.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

/// Boxed error carried by the non-status transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Performs single HTTP requests on behalf of the retrying client.
///
/// Implementations must be safe to share between tasks: the client may be
/// used concurrently and every caller ends up in `send`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one request. Status codes are not interpreted here.
    async fn send(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, TransportError>;

    /// Releases sockets and pooled connections. Calling it twice is harmless.
    async fn close(&self);
}

/// Request body variants understood by the transports.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with an `application/json` content type.
    Json(serde_json::Value),
    Text(String),
    Bytes(Vec<u8>),
}

/// Headers, query parameters and body for a request.
///
/// The client forwards this record untouched on every attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(text.into()));
        self
    }

    pub fn bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = Some(RequestBody::Bytes(bytes.into()));
        self
    }
}

/// A fully read HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Turns a 4xx or 5xx response into [`TransportError::Status`].
    pub fn error_for_status(self, url: &str) -> Result<Self, TransportError> {
        if self.status.is_client_error() || self.status.is_server_error() {
            return Err(TransportError::Status(HttpStatusError {
                url: url.to_string(),
                response: self,
            }));
        }
        Ok(self)
    }
}

/// A response whose status code signals a client or server error.
#[derive(Debug)]
pub struct HttpStatusError {
    url: String,
    response: HttpResponse,
}

impl HttpStatusError {
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn into_response(self) -> HttpResponse {
        self.response
    }
}

/// Failures reported by a [`Transport`], or raised by the client for error statuses.
#[derive(Debug)]
pub enum TransportError {
    /// The connection could not be established or was dropped.
    Connect(BoxError),
    /// The request did not complete within the configured timeout.
    Timeout(BoxError),
    /// The server answered with a 4xx or 5xx status.
    Status(HttpStatusError),
    /// Anything else: invalid URLs, body errors, a closed transport.
    Other(BoxError),
}

impl TransportError {
    /// Status code for [`TransportError::Status`], `None` otherwise.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Status(e) => Some(e.status()),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connect(e) => write!(f, "Connection failed: {}", e),
            TransportError::Timeout(e) => write!(f, "Request timed out: {}", e),
            TransportError::Status(e) => {
                write!(f, "HTTP {} error for {}", e.status().as_u16(), e.url())
            }
            TransportError::Other(e) => write!(f, "Request error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Connect(e) | TransportError::Timeout(e) | TransportError::Other(e) => {
                Some(e.as_ref())
            }
            TransportError::Status(_) => None,
        }
    }
}
