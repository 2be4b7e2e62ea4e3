//! Overpass QL construction for the two tile variants.

use crate::grid::{GeoBounds, TileVariant};

fn bbox(bounds: &GeoBounds) -> String {
  format!(
    "{:.7},{:.7},{:.7},{:.7}",
    bounds.south, bounds.west, bounds.north, bounds.east
  )
}

/// Build the query fetching a tile's data.
///
/// Detail tiles carry street-lamp nodes, bench nodes, and every way with a
/// `lit` tag; overview tiles carry lit ways only, for the low-zoom layer.
pub fn build_query(bounds: &GeoBounds, variant: TileVariant, timeout_secs: u32) -> String {
  let bbox = bbox(bounds);
  match variant {
    TileVariant::Detail => format!(
      "[out:json][timeout:{timeout}];\
       (node[\"highway\"=\"street_lamp\"]({bbox});\
       node[\"amenity\"=\"bench\"]({bbox});\
       way[\"lit\"]({bbox}););\
       out geom;",
      timeout = timeout_secs,
      bbox = bbox
    ),
    TileVariant::Overview => format!(
      "[out:json][timeout:{timeout}];\
       way[\"lit\"=\"yes\"]({bbox});\
       out geom;",
      timeout = timeout_secs,
      bbox = bbox
    ),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bounds() -> GeoBounds {
    GeoBounds {
      north: 52.51,
      south: 52.50,
      east: 13.41,
      west: 13.40,
    }
  }

  #[test]
  fn test_detail_query_selects_all_layers() {
    let query = build_query(&bounds(), TileVariant::Detail, 25);
    assert!(query.starts_with("[out:json][timeout:25];"));
    assert!(query.contains("node[\"highway\"=\"street_lamp\"]"));
    assert!(query.contains("node[\"amenity\"=\"bench\"]"));
    assert!(query.contains("way[\"lit\"]"));
    assert!(query.contains("52.5000000,13.4000000,52.5100000,13.4100000"));
    assert!(query.ends_with("out geom;"));
  }

  #[test]
  fn test_overview_query_is_lit_ways_only() {
    let query = build_query(&bounds(), TileVariant::Overview, 40);
    assert!(query.contains("[timeout:40]"));
    assert!(query.contains("way[\"lit\"=\"yes\"]"));
    assert!(!query.contains("street_lamp"));
    assert!(!query.contains("bench"));
  }
}
