use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};
use resilient_http::{ClientConfig, ErrorKind, RequestOptions, ResilientClient};
use std::io::Write;
use std::path::PathBuf;

/// resilient-http - send an HTTP request, retrying transient failures
///
/// Connection failures and timeouts are retried up to --max-attempts times in
/// total. Responses with a 4xx or 5xx status fail immediately.
///
/// Examples:
///   resilient-http get https://example.com/api -q page=2
///   resilient-http post https://example.com/api --json '{"key":"value"}'
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE or any other verb)
    #[arg(value_name = "METHOD")]
    method: String,

    /// Request URL
    #[arg(value_name = "URL")]
    url: String,

    /// Request header, repeatable
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
    headers: Vec<(HeaderName, HeaderValue)>,

    /// Query parameter, repeatable
    #[arg(short = 'q', long = "query", value_name = "KEY=VALUE", value_parser = parse_query)]
    query: Vec<(String, String)>,

    /// JSON request body
    #[arg(long, value_name = "JSON", conflicts_with = "data")]
    json: Option<String>,

    /// Raw request body
    #[arg(short = 'd', long, value_name = "DATA")]
    data: Option<String>,

    /// JSON config file with max_attempts, timeout and retry_on
    #[arg(short = 'c', long, env = "RESILIENT_HTTP_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Total attempts per request (overrides the config file)
    #[arg(long, env = "RESILIENT_HTTP_MAX_ATTEMPTS", value_name = "N")]
    max_attempts: Option<u32>,

    /// Per-attempt timeout in seconds (overrides the config file)
    #[arg(long, env = "RESILIENT_HTTP_TIMEOUT", value_name = "SECS", conflicts_with = "no_timeout")]
    timeout: Option<f64>,

    /// Disable the per-attempt timeout
    #[arg(long)]
    no_timeout: bool,

    /// Comma-separated error kinds to retry: connection, timeout, other
    #[arg(long, value_delimiter = ',', value_name = "KINDS")]
    retry_on: Option<Vec<ErrorKind>>,

    /// Print the status line and response headers before the body
    #[arg(short = 'i', long)]
    include: bool,

    /// Log every attempt
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Some(timeout);
        }
        if self.no_timeout {
            config.timeout = None;
        }
        if let Some(kinds) = &self.retry_on {
            config.retry_on = Some(kinds.clone());
        }
        Ok(config)
    }

    fn request_options(&self) -> Result<RequestOptions> {
        let mut options = RequestOptions::new();
        for (name, value) in &self.headers {
            options = options.header(name.clone(), value.clone());
        }
        for (key, value) in &self.query {
            options = options.query(key, value);
        }
        if let Some(json) = &self.json {
            let value = serde_json::from_str(json).context("Invalid JSON body")?;
            options = options.json(value);
        } else if let Some(data) = &self.data {
            options = options.text(data);
        }
        Ok(options)
    }

    fn method(&self) -> Result<Method> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("Invalid HTTP method '{}'", self.method))
    }
}

fn parse_header(s: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got '{}'", s))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| e.to_string())?;
    let value = HeaderValue::from_str(value.trim()).map_err(|e| e.to_string())?;
    Ok((name, value))
}

fn parse_query(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected 'key=value', got '{}'", s))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let method = cli.method()?;
    let options = cli.request_options()?;
    let client = ResilientClient::new(cli.client_config()?)?;

    let result = client.execute(method.clone(), &cli.url, options).await;
    client.close().await;
    let response = result.with_context(|| format!("{} {} failed", method, cli.url))?;

    let mut stdout = std::io::stdout().lock();
    if cli.include {
        writeln!(stdout, "HTTP {}", response.status())?;
        for (name, value) in response.headers() {
            writeln!(stdout, "{}: {}", name, value.to_str().unwrap_or("<binary>"))?;
        }
        writeln!(stdout)?;
    }
    stdout.write_all(response.bytes())?;
    stdout.flush()?;
    Ok(())
}
