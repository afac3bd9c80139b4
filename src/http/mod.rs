//! HTTP client module with retry logic and error classification.

mod client;
mod reqwest_transport;
mod retry;
mod transport;

pub use client::ResilientClient;
pub use reqwest_transport::ReqwestTransport;
pub use retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS, ErrorKind, RetryPolicy, classify};
pub use transport::{
    BoxError, HttpResponse, HttpStatusError, RequestBody, RequestOptions, Transport,
    TransportError,
};
