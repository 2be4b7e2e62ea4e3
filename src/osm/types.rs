//! Typed Overpass API response elements.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level Overpass JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverpassResponse {
  #[serde(default)]
  pub elements: Vec<OsmElement>,
}

/// A point on a way's geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeomPoint {
  pub lat: f64,
  pub lon: f64,
}

/// One OSM element (node or way) as returned by Overpass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OsmElement {
  #[serde(rename = "type")]
  pub kind: String,
  pub id: u64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lat: Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lon: Option<f64>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub tags: BTreeMap<String, String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub nodes: Vec<u64>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub geometry: Vec<GeomPoint>,
}

impl OsmElement {
  fn tag(&self, key: &str) -> Option<&str> {
    self.tags.get(key).map(String::as_str)
  }

  pub fn is_street_lamp(&self) -> bool {
    self.kind == "node" && self.tag("highway") == Some("street_lamp")
  }

  pub fn is_bench(&self) -> bool {
    self.kind == "node" && self.tag("amenity") == Some("bench")
  }

  pub fn is_lit_way(&self) -> bool {
    self.kind == "way" && self.tag("lit") == Some("yes")
  }

  pub fn is_unlit_way(&self) -> bool {
    self.kind == "way" && self.tag("lit") == Some("no")
  }
}

/// Per-category counts over a batch of elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElementStats {
  pub lamps: usize,
  pub benches: usize,
  pub lit_ways: usize,
  pub unlit_ways: usize,
  pub total: usize,
}

impl ElementStats {
  pub fn collect<'a>(elements: impl IntoIterator<Item = &'a OsmElement>) -> Self {
    let mut stats = Self::default();
    for element in elements {
      stats.total += 1;
      if element.is_street_lamp() {
        stats.lamps += 1;
      } else if element.is_bench() {
        stats.benches += 1;
      } else if element.is_lit_way() {
        stats.lit_ways += 1;
      } else if element.is_unlit_way() {
        stats.unlit_ways += 1;
      }
    }
    stats
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"{
    "version": 0.6,
    "generator": "Overpass API",
    "elements": [
      {
        "type": "node",
        "id": 2624299129,
        "lat": 52.5013,
        "lon": 13.4021,
        "tags": {"highway": "street_lamp", "lamp_type": "electric"}
      },
      {
        "type": "node",
        "id": 3224421,
        "lat": 52.5017,
        "lon": 13.4088,
        "tags": {"amenity": "bench", "backrest": "yes"}
      },
      {
        "type": "way",
        "id": 4921733,
        "nodes": [29207758, 29207759],
        "geometry": [
          {"lat": 52.5011, "lon": 13.4005},
          {"lat": 52.5014, "lon": 13.4011}
        ],
        "tags": {"highway": "residential", "lit": "yes"}
      }
    ]
  }"#;

  #[test]
  fn test_parse_overpass_response() {
    let response: OverpassResponse = serde_json::from_str(SAMPLE).unwrap();
    assert_eq!(response.elements.len(), 3);

    let lamp = &response.elements[0];
    assert!(lamp.is_street_lamp());
    assert_eq!(lamp.lat, Some(52.5013));

    let way = &response.elements[2];
    assert!(way.is_lit_way());
    assert!(!way.is_unlit_way());
    assert_eq!(way.nodes.len(), 2);
    assert_eq!(way.geometry[0].lat, 52.5011);
  }

  #[test]
  fn test_elements_survive_cache_round_trip() {
    let response: OverpassResponse = serde_json::from_str(SAMPLE).unwrap();
    let json = serde_json::to_string(&response.elements).unwrap();
    let back: Vec<OsmElement> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, response.elements);
  }

  #[test]
  fn test_element_stats() {
    let response: OverpassResponse = serde_json::from_str(SAMPLE).unwrap();
    let stats = ElementStats::collect(&response.elements);
    assert_eq!(stats.lamps, 1);
    assert_eq!(stats.benches, 1);
    assert_eq!(stats.lit_ways, 1);
    assert_eq!(stats.unlit_ways, 0);
    assert_eq!(stats.total, 3);
  }

  #[test]
  fn test_lamp_tag_on_way_is_not_a_lamp() {
    let element = OsmElement {
      kind: "way".to_string(),
      id: 1,
      lat: None,
      lon: None,
      tags: [("highway".to_string(), "street_lamp".to_string())].into(),
      nodes: Vec::new(),
      geometry: Vec::new(),
    };
    assert!(!element.is_street_lamp());
  }
}
