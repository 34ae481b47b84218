//! Active connectivity probing.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use url::Url;

use crate::error::{Result, SyncError};

/// Transport a connectivity probe is issued through.
///
/// The monitor depends on this trait so tests can script probe outcomes;
/// [`HttpProbe`] is the production implementation.
#[async_trait]
pub trait ProbeTransport: Send + Sync {
  /// Issue one GET against `url` and report whether it answered 2xx.
  async fn probe(&self, url: &Url) -> Result<bool>;
}

/// Build the probe URL: `<base>?__ping=<epoch-ms>`.
///
/// The timestamp parameter defeats every HTTP cache between us and the
/// server; a cached 200 would report connectivity we do not have. An
/// unparseable base yields None and the caller falls back to the platform's
/// passive flag.
pub fn ping_url(base: &str) -> Option<Url> {
  let mut url = Url::parse(base).ok()?;
  url
    .query_pairs_mut()
    .append_pair("__ping", &Utc::now().timestamp_millis().to_string());
  Some(url)
}

/// reqwest-backed probe transport.
pub struct HttpProbe {
  client: reqwest::Client,
}

impl HttpProbe {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| SyncError::Config(format!("failed to build probe client: {}", e)))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl ProbeTransport for HttpProbe {
  async fn probe(&self, url: &Url) -> Result<bool> {
    let response = self.client.get(url.clone()).send().await?;
    Ok(response.status().is_success())
  }
}
