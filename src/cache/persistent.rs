//! TTL- and size-bounded persistent tile cache over a storage medium.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::eviction::{self, EntryMeta};
use super::traits::{CacheProfile, Envelope, EnvelopeMeta, StorageError, StorageMedium};

/// Key written and deleted once at startup to probe whether the medium
/// accepts writes at all.
const SENTINEL_KEY: &str = "lampgrid_probe";

/// Usage counters for one cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
  pub count: usize,
  pub total_size_bytes: u64,
  pub available: bool,
}

/// One namespace of the durable tile cache, configured by a profile.
///
/// Storage availability is probed once at construction; when the probe fails
/// every operation silently degrades to a no-op (`get` misses, `put` reports
/// false) so callers keep working on the in-memory tier alone.
pub struct PersistentTileCache {
  medium: Arc<dyn StorageMedium>,
  profile: CacheProfile,
  available: bool,
}

impl PersistentTileCache {
  pub fn new(medium: Arc<dyn StorageMedium>, profile: CacheProfile) -> Self {
    let available = probe(medium.as_ref());
    if !available {
      warn!(
        profile = profile.name,
        "durable storage unavailable, entries will not persist this session"
      );
    }
    Self {
      medium,
      profile,
      available,
    }
  }

  pub fn profile(&self) -> &CacheProfile {
    &self.profile
  }

  pub fn is_available(&self) -> bool {
    self.available
  }

  /// Store a payload under the tile id, stamped with the current time.
  /// Returns false when the entry could not be persisted; the caller keeps
  /// its in-memory copy either way.
  pub fn put<P: Serialize>(&self, id: &str, payload: &P) -> bool {
    self.put_at(id, payload, Utc::now())
  }

  pub fn put_at<P: Serialize>(&self, id: &str, payload: &P, timestamp: DateTime<Utc>) -> bool {
    if !self.available {
      return false;
    }

    let payload_json = match serde_json::to_string(payload) {
      Ok(json) => json,
      Err(e) => {
        warn!(profile = self.profile.name, %id, error = %e, "payload not serializable");
        return false;
      }
    };
    let envelope = Envelope {
      payload,
      timestamp,
      size: payload_json.len() as u64,
    };
    let value = match serde_json::to_string(&envelope) {
      Ok(json) => json,
      Err(e) => {
        warn!(profile = self.profile.name, %id, error = %e, "entry not serializable");
        return false;
      }
    };

    let key = self.profile.key_for(id);
    match self.medium.set(&key, &value) {
      Ok(()) => {
        self.run_eviction();
        true
      }
      Err(StorageError::QuotaExceeded) => {
        // Free the lowest-priority entries and retry exactly once
        warn!(profile = self.profile.name, %id, "storage quota hit, evicting");
        self.sweep_expired();
        self.emergency_evict();
        match self.medium.set(&key, &value) {
          Ok(()) => true,
          Err(e) => {
            warn!(profile = self.profile.name, %id, error = %e, "entry dropped after eviction retry");
            false
          }
        }
      }
      Err(e) => {
        warn!(profile = self.profile.name, %id, error = %e, "cache write failed");
        false
      }
    }
  }

  /// Read a payload. Expiry is enforced here, not just on sweeps: an entry
  /// past its TTL is deleted and reported absent. Corrupted entries are
  /// treated the same way.
  pub fn get<P: DeserializeOwned>(&self, id: &str) -> Option<P> {
    self.get_entry(id).map(|(payload, _)| payload)
  }

  /// Like `get`, also exposing the entry's write timestamp.
  pub fn get_entry<P: DeserializeOwned>(&self, id: &str) -> Option<(P, DateTime<Utc>)> {
    if !self.available {
      return None;
    }
    let key = self.profile.key_for(id);
    let raw = self.medium.get(&key).ok().flatten()?;

    match serde_json::from_str::<Envelope<P>>(&raw) {
      Ok(envelope) => {
        if self.expired(envelope.timestamp, Utc::now()) {
          let _ = self.medium.remove(&key);
          return None;
        }
        Some((envelope.payload, envelope.timestamp))
      }
      Err(e) => {
        debug!(profile = self.profile.name, %id, error = %e, "dropping corrupted cache entry");
        let _ = self.medium.remove(&key);
        None
      }
    }
  }

  /// Whether a live entry exists, without deserializing its payload.
  pub fn contains(&self, id: &str) -> bool {
    if !self.available {
      return false;
    }
    let key = self.profile.key_for(id);
    let raw = match self.medium.get(&key) {
      Ok(Some(raw)) => raw,
      _ => return false,
    };
    match serde_json::from_str::<EnvelopeMeta>(&raw) {
      Ok(meta) if !self.expired(meta.timestamp, Utc::now()) => true,
      _ => {
        let _ = self.medium.remove(&key);
        false
      }
    }
  }

  pub fn remove(&self, id: &str) {
    if !self.available {
      return;
    }
    let _ = self.medium.remove(&self.profile.key_for(id));
  }

  /// Remove every entry under this profile's namespace.
  pub fn clear(&self) {
    if !self.available {
      return;
    }
    for key in self.namespace_keys() {
      let _ = self.medium.remove(&key);
    }
  }

  pub fn stats(&self) -> CacheStats {
    if !self.available {
      return CacheStats {
        count: 0,
        total_size_bytes: 0,
        available: false,
      };
    }
    let entries = self.entries();
    CacheStats {
      count: entries.len(),
      total_size_bytes: entries.iter().map(|e| e.size).sum(),
      available: true,
    }
  }

  /// Remove every expired entry; returns how many went.
  pub fn sweep_expired(&self) -> usize {
    if !self.available {
      return 0;
    }
    let entries = self.entries();
    let expired = eviction::expired_keys(&entries, self.profile.ttl, Utc::now());
    let removed = expired.len();
    for key in expired {
      let _ = self.medium.remove(&key);
    }
    if removed > 0 {
      debug!(profile = self.profile.name, removed, "swept expired entries");
    }
    removed
  }

  /// Remove oldest entries until usage is at or below the profile's target.
  pub fn enforce_size_bound(&self) -> usize {
    if !self.available {
      return 0;
    }
    let entries = self.entries();
    let removals = eviction::plan_removals(&entries, self.profile.bound);
    let removed = removals.len();
    for key in removals {
      let _ = self.medium.remove(&key);
    }
    if removed > 0 {
      debug!(profile = self.profile.name, removed, "evicted entries over size bound");
    }
    removed
  }

  /// Opportunistic cleanup after a successful write: expired entries first,
  /// then the size bound.
  fn run_eviction(&self) {
    self.sweep_expired();
    self.enforce_size_bound();
  }

  fn emergency_evict(&self) {
    let entries = self.entries();
    for key in eviction::emergency_batch(&entries) {
      let _ = self.medium.remove(&key);
    }
  }

  fn namespace_keys(&self) -> Vec<String> {
    self
      .medium
      .keys_with_prefix(&self.profile.key_prefix)
      .unwrap_or_default()
  }

  /// Scan this namespace's entry headers. Entries whose envelope no longer
  /// parses are dropped on sight and excluded.
  fn entries(&self) -> Vec<EntryMeta> {
    let mut entries = Vec::new();
    for key in self.namespace_keys() {
      let raw = match self.medium.get(&key) {
        Ok(Some(raw)) => raw,
        _ => continue,
      };
      match serde_json::from_str::<EnvelopeMeta>(&raw) {
        Ok(meta) => entries.push(EntryMeta {
          key,
          timestamp: meta.timestamp,
          size: meta.size,
        }),
        Err(_) => {
          let _ = self.medium.remove(&key);
        }
      }
    }
    entries
  }

  fn expired(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - timestamp > self.profile.ttl
  }
}

/// Write-then-delete a sentinel key; the result is cached for the session.
fn probe(medium: &dyn StorageMedium) -> bool {
  medium.set(SENTINEL_KEY, "1").is_ok() && medium.remove(SENTINEL_KEY).is_ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryMedium;
  use crate::cache::traits::CacheBound;
  use chrono::Duration;
  use serde_json::json;

  fn rect_cache() -> (Arc<MemoryMedium>, PersistentTileCache) {
    let medium = Arc::new(MemoryMedium::new());
    let cache = PersistentTileCache::new(medium.clone(), CacheProfile::rectangle());
    (medium, cache)
  }

  #[test]
  fn test_put_get_round_trip() {
    let (_, cache) = rect_cache();
    let payload = json!({"test": "data", "n": [1, 2, 3]});
    assert!(cache.put("rect_52.5000_13.4000", &payload));
    assert_eq!(
      cache.get::<serde_json::Value>("rect_52.5000_13.4000"),
      Some(payload)
    );
    assert!(cache.contains("rect_52.5000_13.4000"));
  }

  #[test]
  fn test_get_miss() {
    let (_, cache) = rect_cache();
    assert_eq!(cache.get::<serde_json::Value>("rect_0.0000_0.0000"), None);
    assert!(!cache.contains("rect_0.0000_0.0000"));
  }

  #[test]
  fn test_expiry_enforced_on_read() {
    let (_, cache) = rect_cache();
    let stale = Utc::now() - Duration::hours(25);
    cache.put_at("old", &json!({"v": 1}), stale);
    assert_eq!(cache.get::<serde_json::Value>("old"), None);
    // the read already deleted it
    assert_eq!(cache.stats().count, 0);
  }

  #[test]
  fn test_contains_enforces_expiry() {
    let (_, cache) = rect_cache();
    cache.put_at("old", &json!({"v": 1}), Utc::now() - Duration::hours(25));
    assert!(!cache.contains("old"));
    assert_eq!(cache.stats().count, 0);
  }

  #[test]
  fn test_sweep_expired_counts_and_stats() {
    let (_, cache) = rect_cache();
    cache.put_at("a", &json!(1), Utc::now() - Duration::hours(30));
    cache.put_at("b", &json!(2), Utc::now() - Duration::hours(30));
    cache.put("c", &json!(3));
    assert_eq!(cache.stats().count, 3);
    assert_eq!(cache.sweep_expired(), 2);
    assert_eq!(cache.stats().count, 1);
  }

  #[test]
  fn test_corrupted_entry_dropped_on_read() {
    let (medium, cache) = rect_cache();
    let key = cache.profile().key_for("bad");
    medium.set(&key, "{not json").unwrap();
    assert_eq!(cache.get::<serde_json::Value>("bad"), None);
    assert_eq!(medium.get(&key).unwrap(), None);
  }

  #[test]
  fn test_clear_only_touches_own_namespace() {
    let medium = Arc::new(MemoryMedium::new());
    let rect = PersistentTileCache::new(medium.clone(), CacheProfile::rectangle());
    let resp = PersistentTileCache::new(medium.clone(), CacheProfile::osm_response());
    rect.put("a", &json!(1));
    resp.put("a", &json!(2));

    rect.clear();
    assert_eq!(rect.stats().count, 0);
    assert_eq!(resp.stats().count, 1);
  }

  #[test]
  fn test_entry_cap_evicts_oldest_batch() {
    let medium = Arc::new(MemoryMedium::new());
    let profile = CacheProfile::osm_response().with_bound(CacheBound::MaxEntries(10));
    let cache = PersistentTileCache::new(medium, profile);

    let base = Utc::now() - Duration::minutes(60);
    for i in 0..11 {
      cache.put_at(&format!("e{:02}", i), &json!(i), base + Duration::minutes(i));
    }
    // the 11th put tripped the bound: a 30% batch of the oldest went
    let stats = cache.stats();
    assert_eq!(stats.count, 8);
    assert!(!cache.contains("e00"));
    assert!(!cache.contains("e01"));
    assert!(!cache.contains("e02"));
    assert!(cache.contains("e10"));
  }

  #[test]
  fn test_byte_cap_evicts_down_to_target() {
    let medium = Arc::new(MemoryMedium::new());
    // payload "xxxxxxxxxx..." serializes to 32 bytes with quotes
    let payload = json!("x".repeat(30));
    let profile = CacheProfile::large_payload().with_bound(CacheBound::MaxBytes(100));
    let cache = PersistentTileCache::new(medium, profile);

    let base = Utc::now() - Duration::minutes(60);
    for i in 0..4 {
      cache.put_at(&format!("e{}", i), &payload, base + Duration::minutes(i));
    }
    let stats = cache.stats();
    assert!(stats.total_size_bytes <= 80, "usage {} over target", stats.total_size_bytes);
    // oldest went first
    assert!(!cache.contains("e0"));
    assert!(cache.contains("e3"));
  }

  #[test]
  fn test_quota_failure_evicts_and_retries_once() {
    // room for roughly three envelopes
    let medium = Arc::new(MemoryMedium::with_quota(400));
    let cache = PersistentTileCache::new(medium, CacheProfile::rectangle());

    let base = Utc::now() - Duration::minutes(60);
    let mut stored = 0;
    for i in 0..8 {
      if cache.put_at(&format!("e{}", i), &json!({"i": i}), base + Duration::minutes(i)) {
        stored += 1;
      }
    }
    // every write eventually landed because eviction made room each time
    assert_eq!(stored, 8);
    assert!(cache.contains("e7"));
    assert!(!cache.contains("e0"));
  }

  #[test]
  fn test_unavailable_medium_degrades_to_noops() {
    let medium = Arc::new(MemoryMedium::with_quota(0));
    let cache = PersistentTileCache::new(medium, CacheProfile::rectangle());
    assert!(!cache.is_available());
    assert!(!cache.put("a", &json!(1)));
    assert_eq!(cache.get::<serde_json::Value>("a"), None);
    assert!(!cache.contains("a"));
    assert_eq!(cache.sweep_expired(), 0);
    let stats = cache.stats();
    assert!(!stats.available);
    assert_eq!(stats.count, 0);
  }

  #[test]
  fn test_remove() {
    let (_, cache) = rect_cache();
    cache.put("a", &json!(1));
    cache.remove("a");
    assert!(!cache.contains("a"));
  }
}
