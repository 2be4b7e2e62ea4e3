//! Overpass API client with endpoint failover for transient failures.

use color_eyre::{eyre::eyre, Report, Result};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::query;
use super::types::{OsmElement, OverpassResponse};
use crate::grid::{GeoBounds, TileVariant};

pub const DEFAULT_ENDPOINTS: &[&str] = &[
  "https://overpass-api.de/api/interpreter",
  "https://overpass.kumi.systems/api/interpreter",
  "https://overpass.osm.ch/api/interpreter",
];

/// Outcome of one endpoint attempt. Transient failures move on to the next
/// endpoint; terminal ones surface immediately.
enum AttemptError {
  Transient(String),
  Terminal(Report),
}

/// Overpass client. One `fetch_tile` call yields one logical outcome no
/// matter how many endpoints were tried along the way.
#[derive(Clone)]
pub struct OverpassClient {
  http: reqwest::Client,
  endpoints: Vec<Url>,
  query_timeout_secs: u32,
}

impl OverpassClient {
  pub fn new(endpoints: &[String], timeout: Duration, query_timeout_secs: u32) -> Result<Self> {
    if endpoints.is_empty() {
      return Err(eyre!("At least one Overpass endpoint is required"));
    }
    let endpoints = endpoints
      .iter()
      .map(|e| Url::parse(e).map_err(|err| eyre!("Invalid Overpass endpoint {}: {}", e, err)))
      .collect::<Result<Vec<_>>>()?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("lampgrid/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      endpoints,
      query_timeout_secs,
    })
  }

  /// Fetch the elements for one tile's bounds.
  pub async fn fetch_tile(&self, bounds: &GeoBounds, variant: TileVariant) -> Result<Vec<OsmElement>> {
    let query = query::build_query(bounds, variant, self.query_timeout_secs);
    self.run_query(&query).await
  }

  /// Run a raw query, trying alternate endpoints on the transient failure
  /// class (timeout, 429, 502, 503, 504).
  pub async fn run_query(&self, query: &str) -> Result<Vec<OsmElement>> {
    let mut last_failure = String::new();
    for endpoint in &self.endpoints {
      match self.try_endpoint(endpoint, query).await {
        Ok(elements) => {
          debug!(%endpoint, count = elements.len(), "Overpass query succeeded");
          return Ok(elements);
        }
        Err(AttemptError::Transient(msg)) => {
          warn!(%endpoint, %msg, "transient Overpass failure, trying next endpoint");
          last_failure = msg;
        }
        Err(AttemptError::Terminal(report)) => return Err(report),
      }
    }
    Err(eyre!("All Overpass endpoints failed: {}", last_failure))
  }

  async fn try_endpoint(
    &self,
    endpoint: &Url,
    query: &str,
  ) -> std::result::Result<Vec<OsmElement>, AttemptError> {
    let response = self
      .http
      .post(endpoint.clone())
      .form(&[("data", query)])
      .send()
      .await
      .map_err(|e| AttemptError::Transient(e.to_string()))?;

    let status = response.status();
    if is_transient_status(status) {
      return Err(AttemptError::Transient(format!("HTTP {}", status)));
    }
    if !status.is_success() {
      return Err(AttemptError::Terminal(eyre!(
        "Overpass returned HTTP {}",
        status
      )));
    }

    let body: OverpassResponse = response
      .json()
      .await
      .map_err(|e| AttemptError::Terminal(eyre!("Failed to parse Overpass response: {}", e)))?;
    Ok(body.elements)
  }
}

/// Failure classes worth retrying against another endpoint.
fn is_transient_status(status: StatusCode) -> bool {
  matches!(status.as_u16(), 429 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transient_status_classes() {
    for code in [429u16, 502, 503, 504] {
      assert!(is_transient_status(StatusCode::from_u16(code).unwrap()));
    }
    for code in [200u16, 400, 404, 500] {
      assert!(!is_transient_status(StatusCode::from_u16(code).unwrap()));
    }
  }

  #[test]
  fn test_client_requires_an_endpoint() {
    assert!(OverpassClient::new(&[], Duration::from_secs(30), 25).is_err());
  }

  #[test]
  fn test_client_rejects_invalid_endpoint() {
    let endpoints = vec!["not a url".to_string()];
    assert!(OverpassClient::new(&endpoints, Duration::from_secs(30), 25).is_err());
  }

  #[test]
  fn test_client_accepts_defaults() {
    let endpoints: Vec<String> = DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect();
    assert!(OverpassClient::new(&endpoints, Duration::from_secs(30), 25).is_ok());
  }
}
