//! Request abstraction used by entity services, plus its HTTP implementation.

use async_trait::async_trait;
use color_eyre::{eyre::bail, eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;

use crate::entity::Payload;

/// Extra request headers, name to value.
pub type Headers = BTreeMap<String, String>;

/// One eventual value per request. Failures are returned to the caller
/// untouched; retries are the caller's business.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Fetch a single record.
  async fn get(&self, endpoint: &str, headers: &Headers) -> Result<Value>;

  /// Fetch a collection (or a single record, treated as a one-item list).
  async fn query(&self, endpoint: &str, headers: &Headers) -> Result<Value>;

  async fn create(&self, endpoint: &str, body: Option<&Payload>, headers: &Headers) -> Result<Value>;

  async fn update(&self, endpoint: &str, body: Option<&Payload>, headers: &Headers) -> Result<Value>;

  async fn delete(&self, endpoint: &str, headers: &Headers) -> Result<Value>;
}

/// JSON-over-HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
}

impl HttpTransport {
  pub fn new(base_url: &str) -> Result<Self> {
    Self::with_client(reqwest::Client::new(), base_url)
  }

  pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid API URL {}: {}", base_url, e))?;
    Ok(Self { client, base_url })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url_for(&self, endpoint: &str) -> Result<Url> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      endpoint.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| eyre!("Invalid endpoint {}: {}", joined, e))
  }

  async fn send(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<&Payload>,
    headers: &Headers,
  ) -> Result<Value> {
    let url = self.url_for(endpoint)?;
    debug!(%method, %url, headers = headers.len(), "Sending request");

    let mut request = self.client.request(method.clone(), url.clone());
    for (name, value) in headers {
      request = request.header(name.as_str(), value.as_str());
    }
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", method, url, e))?;

    let status = response.status();
    if !status.is_success() {
      let detail = response.text().await.unwrap_or_default();
      bail!("{} {} returned {}: {}", method, url, status, detail);
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;
    if bytes.is_empty() {
      return Ok(Value::Null);
    }

    serde_json::from_slice(&bytes).map_err(|e| eyre!("Failed to parse response from {}: {}", url, e))
  }
}

#[async_trait]
impl Transport for HttpTransport {
  async fn get(&self, endpoint: &str, headers: &Headers) -> Result<Value> {
    self.send(Method::GET, endpoint, None, headers).await
  }

  async fn query(&self, endpoint: &str, headers: &Headers) -> Result<Value> {
    self.send(Method::GET, endpoint, None, headers).await
  }

  async fn create(&self, endpoint: &str, body: Option<&Payload>, headers: &Headers) -> Result<Value> {
    self.send(Method::POST, endpoint, body, headers).await
  }

  async fn update(&self, endpoint: &str, body: Option<&Payload>, headers: &Headers) -> Result<Value> {
    self.send(Method::PUT, endpoint, body, headers).await
  }

  async fn delete(&self, endpoint: &str, headers: &Headers) -> Result<Value> {
    self.send(Method::DELETE, endpoint, None, headers).await
  }
}
