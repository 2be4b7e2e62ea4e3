//! Storage medium abstraction, cache profiles, and the on-disk entry format.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Version token embedded in every key prefix. Bumping it safely invalidates
/// all entries written under the previous format.
pub const CACHE_FORMAT_VERSION: &str = "v2";

/// Failure classes a storage medium can report. Quota exhaustion is kept
/// distinct because the cache reacts to it with an emergency eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
  QuotaExceeded,
  Backend(String),
}

impl std::fmt::Display for StorageError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      StorageError::QuotaExceeded => write!(f, "storage quota exceeded"),
      StorageError::Backend(msg) => write!(f, "storage backend error: {}", msg),
    }
  }
}

impl std::error::Error for StorageError {}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Durable string key/value medium backing the persistent cache.
///
/// Writes are last-writer-wins per key; no transactions are required. A
/// medium may refuse writes with `StorageError::QuotaExceeded` when it runs
/// out of space.
pub trait StorageMedium: Send + Sync {
  fn get(&self, key: &str) -> StorageResult<Option<String>>;
  fn set(&self, key: &str, value: &str) -> StorageResult<()>;
  fn remove(&self, key: &str) -> StorageResult<()>;
  fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Size/count bound a cache profile enforces on its namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBound {
  /// Age-based cleanup only
  Unbounded,
  /// At most this many entries; a fixed batch is removed when exceeded
  MaxEntries(usize),
  /// At most this many payload bytes; cleaned down to 80% when exceeded
  MaxBytes(u64),
}

/// Per-use-site cache policy: key namespace, TTL, and size bound.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheProfile {
  pub name: &'static str,
  pub key_prefix: String,
  pub ttl: Duration,
  pub bound: CacheBound,
}

impl CacheProfile {
  fn with_namespace(name: &'static str, ttl: Duration, bound: CacheBound) -> Self {
    Self {
      name,
      key_prefix: format!("lampgrid_{}_{}_", CACHE_FORMAT_VERSION, name),
      ttl,
      bound,
    }
  }

  /// Rectangle tile cache: 24h TTL, age-based cleanup only.
  pub fn rectangle() -> Self {
    Self::with_namespace("rect", Duration::hours(24), CacheBound::Unbounded)
  }

  /// General OSM response cache: 24h TTL, capped at 1000 entries.
  pub fn osm_response() -> Self {
    Self::with_namespace("resp", Duration::hours(24), CacheBound::MaxEntries(1000))
  }

  /// Large-payload cache: 7d TTL, capped at 50MB of payload bytes.
  pub fn large_payload() -> Self {
    Self::with_namespace("bulk", Duration::days(7), CacheBound::MaxBytes(50 * 1024 * 1024))
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_bound(mut self, bound: CacheBound) -> Self {
    self.bound = bound;
    self
  }

  /// Storage key for a tile id under this profile's namespace.
  pub fn key_for(&self, id: &str) -> String {
    format!("{}{}", self.key_prefix, id)
  }
}

/// On-disk entry layout: one JSON document per tile under a namespaced key.
/// `size` is the serialized byte length of the payload alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
  pub payload: P,
  pub timestamp: DateTime<Utc>,
  pub size: u64,
}

/// Envelope header, parseable without touching the payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeMeta {
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub size: u64,
}
