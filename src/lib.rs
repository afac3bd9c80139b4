//! Resilient HTTP requests: retry transient transport failures, surface
//! HTTP error statuses immediately.
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use resilient_http::{ClientConfig, RequestOptions, ResilientClient};
//!
//! let client = ResilientClient::new(ClientConfig::default())?;
//! let response = client
//!     .get("https://example.com", RequestOptions::new().query("key", "value"))
//!     .await?;
//! println!("{}", response.status());
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod http;

pub use config::ClientConfig;
pub use http::{ErrorKind, HttpResponse, RequestOptions, ResilientClient, TransportError};
