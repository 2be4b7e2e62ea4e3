//! Grid addressing for fixed-size geographic tiles.
//!
//! Tile ids are derived purely from grid-aligned coordinates; bounds are
//! always recomputable from the id and grid size, never stored separately.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

/// Fixed prefix of every tile id.
pub const ID_PREFIX: &str = "rect";

/// Id suffix marking low-zoom overview tiles.
const OVERVIEW_TAG: &str = "ov";

/// Decimal places used when rendering grid-aligned coordinates into ids.
const ID_PRECISION: usize = 4;

/// Geographic bounding box, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
  pub north: f64,
  pub south: f64,
  pub east: f64,
  pub west: f64,
}

impl GeoBounds {
  pub fn contains(&self, lat: f64, lon: f64) -> bool {
    lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
  }
}

/// Orthogonal tile axis: tiles of different variants covering the same
/// geography are distinct cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileVariant {
  /// Full-detail data (street lamps, benches, lit ways)
  #[default]
  Detail,
  /// Low-zoom overview layer (lit ways only)
  Overview,
}

impl TileVariant {
  fn tag(&self) -> Option<&'static str> {
    match self {
      TileVariant::Detail => None,
      TileVariant::Overview => Some(OVERVIEW_TAG),
    }
  }
}

/// Current map view, as reported by the map widget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
  pub bounds: GeoBounds,
  pub zoom: u8,
}

/// Grid-aligned index of a coordinate, snapping values that sit within
/// float noise of a grid line onto it before flooring.
fn grid_index(value: f64, grid_size: f64) -> i64 {
  let q = value / grid_size;
  let r = q.round();
  if (q - r).abs() < 1e-6 {
    r as i64
  } else {
    q.floor() as i64
  }
}

/// Same snapping rule, aligning outward on the high edge.
fn grid_ceil_index(value: f64, grid_size: f64) -> i64 {
  let q = value / grid_size;
  let r = q.round();
  if (q - r).abs() < 1e-6 {
    r as i64
  } else {
    q.ceil() as i64
  }
}

fn format_id(lat_index: i64, lon_index: i64, grid_size: f64) -> String {
  format!(
    "{}_{:.prec$}_{:.prec$}",
    ID_PREFIX,
    lat_index as f64 * grid_size,
    lon_index as f64 * grid_size,
    prec = ID_PRECISION
  )
}

/// Tile id for the grid cell containing (lat, lon). Two coordinates map to
/// the same id iff they floor-divide to the same cell.
pub fn tile_id(lat: f64, lon: f64, grid_size: f64) -> String {
  format_id(grid_index(lat, grid_size), grid_index(lon, grid_size), grid_size)
}

/// Tag a base id with a variant suffix, producing a disjoint key space.
pub fn with_variant(id: &str, variant: TileVariant) -> String {
  match variant.tag() {
    Some(tag) => format!("{}_{}", id, tag),
    None => id.to_string(),
  }
}

/// Variant encoded in an id. Unrecognized suffixes are the caller's problem;
/// `tile_bounds` rejects them as malformed.
pub fn variant_of(id: &str) -> TileVariant {
  if id.ends_with(&format!("_{}", OVERVIEW_TAG)) {
    TileVariant::Overview
  } else {
    TileVariant::Detail
  }
}

/// Parse the grid-aligned coordinates back out of an id and derive the cell
/// bounds for the given grid size.
pub fn tile_bounds(id: &str, grid_size: f64) -> Result<GeoBounds> {
  let parts: Vec<&str> = id.split('_').collect();
  let coords = match parts.as_slice() {
    [ID_PREFIX, lat, lon] => (lat, lon),
    [ID_PREFIX, lat, lon, tag] if *tag == OVERVIEW_TAG => (lat, lon),
    _ => return Err(eyre!("Malformed tile id: {}", id)),
  };

  let south: f64 = coords
    .0
    .parse()
    .map_err(|_| eyre!("Malformed tile id: {}", id))?;
  let west: f64 = coords
    .1
    .parse()
    .map_err(|_| eyre!("Malformed tile id: {}", id))?;

  Ok(GeoBounds {
    north: south + grid_size,
    south,
    east: west + grid_size,
    west,
  })
}

/// Every grid cell intersecting `bounds`, row-major, aligned outward to grid
/// lines. A bound sitting exactly on a grid line is still covered; degenerate
/// bounds yield at least one tile. Antimeridian and polar wrap are not
/// handled; the caller supplies bounds in a single unwrapped range.
pub fn tiles_covering(bounds: &GeoBounds, grid_size: f64) -> Vec<String> {
  let south_i = grid_index(bounds.south, grid_size);
  let mut north_i = grid_ceil_index(bounds.north, grid_size);
  let west_i = grid_index(bounds.west, grid_size);
  let mut east_i = grid_ceil_index(bounds.east, grid_size);

  if north_i <= south_i {
    north_i = south_i + 1;
  }
  if east_i <= west_i {
    east_i = west_i + 1;
  }

  let mut ids = Vec::with_capacity(((north_i - south_i) * (east_i - west_i)) as usize);
  for row in south_i..north_i {
    for col in west_i..east_i {
      ids.push(format_id(row, col, grid_size));
    }
  }
  ids
}
