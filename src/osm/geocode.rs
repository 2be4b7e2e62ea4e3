//! Nominatim place lookup with a persistent response cache.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::cache::PersistentTileCache;
use crate::grid::GeoBounds;

pub const DEFAULT_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";

/// A successfully geocoded place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedPlace {
  pub display_name: String,
  pub bounds: GeoBounds,
}

/// Nominatim search result; the bounding box arrives as stringly-typed
/// [south, north, west, east].
#[derive(Debug, Deserialize)]
struct NominatimPlace {
  display_name: String,
  boundingbox: Vec<String>,
}

impl NominatimPlace {
  fn into_place(self) -> Result<GeocodedPlace> {
    if self.boundingbox.len() != 4 {
      return Err(eyre!(
        "Unexpected bounding box shape for '{}'",
        self.display_name
      ));
    }
    let mut coords = [0f64; 4];
    for (slot, raw) in coords.iter_mut().zip(&self.boundingbox) {
      *slot = raw
        .parse()
        .map_err(|e| eyre!("Bad bounding box coordinate '{}': {}", raw, e))?;
    }
    Ok(GeocodedPlace {
      display_name: self.display_name,
      bounds: GeoBounds {
        south: coords[0],
        north: coords[1],
        west: coords[2],
        east: coords[3],
      },
    })
  }
}

/// Geocoding client caching responses under the general OSM response
/// profile, so repeated lookups of the same place skip the network.
pub struct GeocodeClient {
  http: reqwest::Client,
  endpoint: Url,
  cache: PersistentTileCache,
}

impl GeocodeClient {
  pub fn new(endpoint: &str, timeout: Duration, cache: PersistentTileCache) -> Result<Self> {
    let endpoint =
      Url::parse(endpoint).map_err(|e| eyre!("Invalid Nominatim endpoint {}: {}", endpoint, e))?;
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("lampgrid/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self {
      http,
      endpoint,
      cache,
    })
  }

  /// Resolve a free-form place name to its bounding box.
  pub async fn lookup(&self, place: &str) -> Result<GeocodedPlace> {
    let key = cache_key(place);
    if let Some(hit) = self.cache.get::<GeocodedPlace>(&key) {
      debug!(%place, "geocode cache hit");
      return Ok(hit);
    }

    let response = self
      .http
      .get(self.endpoint.clone())
      .query(&[("q", place), ("format", "json"), ("limit", "1")])
      .send()
      .await
      .map_err(|e| eyre!("Nominatim request failed: {}", e))?;

    if !response.status().is_success() {
      return Err(eyre!("Nominatim returned HTTP {}", response.status()));
    }

    let places: Vec<NominatimPlace> = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse Nominatim response: {}", e))?;

    let place_result = places
      .into_iter()
      .next()
      .ok_or_else(|| eyre!("No results for '{}'", place))?
      .into_place()?;

    self.cache.put(&key, &place_result);
    Ok(place_result)
  }
}

/// SHA-256 of the normalized query, for stable fixed-length cache keys.
fn cache_key(place: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(place.trim().to_lowercase().as_bytes());
  format!("geocode_{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_normalizes_case_and_whitespace() {
    assert_eq!(cache_key("Berlin"), cache_key("  berlin "));
    assert_ne!(cache_key("Berlin"), cache_key("Hamburg"));
    assert!(cache_key("Berlin").starts_with("geocode_"));
  }

  #[test]
  fn test_bounding_box_parsing() {
    let raw = NominatimPlace {
      display_name: "Berlin, Deutschland".to_string(),
      boundingbox: vec![
        "52.3382448".to_string(),
        "52.6755087".to_string(),
        "13.0883450".to_string(),
        "13.7611609".to_string(),
      ],
    };
    let place = raw.into_place().unwrap();
    assert_eq!(place.display_name, "Berlin, Deutschland");
    assert!((place.bounds.south - 52.3382448).abs() < 1e-9);
    assert!((place.bounds.north - 52.6755087).abs() < 1e-9);
    assert!((place.bounds.west - 13.088345).abs() < 1e-9);
    assert!((place.bounds.east - 13.7611609).abs() < 1e-9);
  }

  #[test]
  fn test_malformed_bounding_box_rejected() {
    let raw = NominatimPlace {
      display_name: "nowhere".to_string(),
      boundingbox: vec!["52.3".to_string()],
    };
    assert!(raw.into_place().is_err());

    let raw = NominatimPlace {
      display_name: "nowhere".to_string(),
      boundingbox: vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()],
    };
    assert!(raw.into_place().is_err());
  }

  #[test]
  fn test_geocoded_place_survives_cache_round_trip() {
    use crate::cache::{CacheProfile, MemoryMedium};
    use std::sync::Arc;

    let cache = PersistentTileCache::new(Arc::new(MemoryMedium::new()), CacheProfile::osm_response());
    let place = GeocodedPlace {
      display_name: "Berlin".to_string(),
      bounds: GeoBounds {
        north: 52.67,
        south: 52.33,
        east: 13.76,
        west: 13.08,
      },
    };
    let key = cache_key("Berlin");
    assert!(cache.put(&key, &place));
    assert_eq!(cache.get::<GeocodedPlace>(&key), Some(place));
  }
}
