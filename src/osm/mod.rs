//! OpenStreetMap HTTP edges: the Overpass client, query construction,
//! response types, and Nominatim geocoding.

pub mod client;
pub mod geocode;
pub mod query;
pub mod types;
