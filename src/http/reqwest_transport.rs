//! [`Transport`] implementation backed by `reqwest`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method};
use std::sync::RwLock;
use std::time::Duration;

use super::transport::{HttpResponse, RequestBody, RequestOptions, Transport, TransportError};

const USER_AGENT: &str = concat!("resilient-http/", env!("CARGO_PKG_VERSION"));

/// Sends requests through a shared `reqwest::Client`.
///
/// The timeout given at construction applies to every request, from
/// connecting until the body has been read.
pub struct ReqwestTransport {
    client: RwLock<Option<Client>>,
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(USER_AGENT);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self::from_client(client))
    }

    /// Wraps an already configured client.
    pub fn from_client(client: Client) -> Self {
        Self {
            client: RwLock::new(Some(client)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }

    fn client(&self) -> Option<Client> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[tracing::instrument(skip(self, options))]
    async fn send(
        &self,
        method: &Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        let Some(client) = self.client() else {
            return Err(TransportError::Other("transport is closed".into()));
        };

        let mut request = client
            .request(method.clone(), url)
            .headers(options.headers.clone());
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        request = match &options.body {
            Some(RequestBody::Json(value)) => request.json(value),
            Some(RequestBody::Text(text)) => request.body(text.clone()),
            Some(RequestBody::Bytes(bytes)) => request.body(bytes.clone()),
            None => request,
        };

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        debug!("{} {} -> {} ({} bytes)", method, url, status, body.len());

        Ok(HttpResponse::new(status, headers, body.to_vec()))
    }

    async fn close(&self) {
        let previous = self
            .client
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if previous.is_some() {
            debug!("HTTP transport closed");
        }
    }
}

/// Sorts a reqwest failure into the transport error variants.
fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(Box::new(error))
    } else if error.is_connect() || is_dropped_connection(&error) {
        TransportError::Connect(Box::new(error))
    } else {
        TransportError::Other(Box::new(error))
    }
}

/// Whether the peer closed or reset the connection under an in-flight request.
fn is_dropped_connection(error: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() {
                return true;
            }
        }
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ResilientClient, RetryPolicy};
    use mockito::Matcher;
    use reqwest::StatusCode;
    use reqwest::header::{AUTHORIZATION, HeaderValue};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a local URL nothing is listening on.
    fn refused_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/", port)
    }

    #[tokio::test]
    async fn test_send_success() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("GET", "/test")
            .with_status(200)
            .with_header("x-request-id", "abc")
            .with_body("Success")
            .create_async()
            .await;

        let transport = ReqwestTransport::new(Some(Duration::from_secs(2))).unwrap();
        let response = transport
            .send(&Method::GET, &format!("{}/test", url), &RequestOptions::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.bytes(), b"Success");
        assert_eq!(response.headers()["x-request-id"], "abc");
    }

    #[tokio::test]
    async fn test_send_forwards_headers_query_and_json() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("POST", "/items")
            .match_header("authorization", "Bearer my-token")
            .match_header("content-type", "application/json")
            .match_query(Matcher::UrlEncoded("key".into(), "value".into()))
            .match_body(r#"{"key":"value"}"#)
            .with_status(201)
            .create_async()
            .await;

        let options = RequestOptions::new()
            .header(AUTHORIZATION, HeaderValue::from_static("Bearer my-token"))
            .query("key", "value")
            .json(serde_json::json!({"key": "value"}));

        let transport = ReqwestTransport::new(None).unwrap();
        let response = transport
            .send(&Method::POST, &format!("{}/items", url), &options)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_send_raw_body() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("PUT", "/raw")
            .match_body("plain payload")
            .with_status(204)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(None).unwrap();
        let options = RequestOptions::new().text("plain payload");
        let response = transport
            .send(&Method::PUT, &format!("{}/raw", url), &options)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_send_does_not_interpret_error_status() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _m = server
            .mock("GET", "/")
            .with_status(404)
            .create_async()
            .await;

        let transport = ReqwestTransport::new(None).unwrap();
        let response = transport
            .send(&Method::GET, &url, &RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        let transport = ReqwestTransport::new(Some(Duration::from_secs(2))).unwrap();
        let err = transport
            .send(&Method::GET, &refused_url(), &RequestOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Connect(_)), "got {:?}", err);
    }

    /// Serves a listener that accepts every connection and closes it unanswered.
    async fn spawn_hangup_server() -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepts);
        let server = tokio::spawn(async move {
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                drop(socket);
            }
        });
        (format!("http://{}/", addr), accepts, server)
    }

    #[tokio::test]
    async fn test_dropped_connection_is_connect_error() {
        let (url, _accepts, server) = spawn_hangup_server().await;

        let transport = ReqwestTransport::new(Some(Duration::from_secs(2))).unwrap();
        let err = transport
            .send(&Method::GET, &url, &RequestOptions::new())
            .await
            .unwrap_err();

        server.abort();
        assert!(matches!(err, TransportError::Connect(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_retried() {
        let (url, accepts, server) = spawn_hangup_server().await;

        let transport = ReqwestTransport::new(Some(Duration::from_secs(2))).unwrap();
        let client = ResilientClient::with_transport(transport, RetryPolicy::default());
        let err = client.get(&url, RequestOptions::new()).await.unwrap_err();

        server.abort();
        assert!(matches!(err, TransportError::Connect(_)), "got {:?}", err);
        assert_eq!(accepts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unresponsive_server_is_timeout_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            // Accept and hold the socket without ever answering.
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let transport = ReqwestTransport::new(Some(Duration::from_millis(200))).unwrap();
        let err = transport
            .send(&Method::GET, &format!("http://{}/", addr), &RequestOptions::new())
            .await
            .unwrap_err();

        server.abort();
        assert!(matches!(err, TransportError::Timeout(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_invalid_url_is_other_error() {
        let transport = ReqwestTransport::new(None).unwrap();
        let err = transport
            .send(&Method::GET, "not a url", &RequestOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Other(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_sends() {
        let transport = ReqwestTransport::new(None).unwrap();
        assert!(!transport.is_closed());

        transport.close().await;
        assert!(transport.is_closed());
        transport.close().await;
        assert!(transport.is_closed());

        let err = transport
            .send(&Method::GET, "http://test.com", &RequestOptions::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("transport is closed"));
    }
}
