//! In-memory tile state store with read-through promotion from the
//! persistent tier.
//!
//! The store owns three collections: loaded records, the set of ids
//! currently in flight, and failure histories. Terminal transitions always
//! leave the loading set first, so a tile is never loading and terminal at
//! the same time.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};

use crate::cache::{CacheStats, PersistentTileCache};
use crate::event::{TileEvent, TileEventSender};
use crate::grid::{variant_of, TileVariant};
use crate::retry::FailureInfo;

/// Payload types a tile can carry. Payloads are copied, never shared,
/// between the in-memory and persistent tiers.
pub trait TilePayload: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static> TilePayload for T {}

/// Tile lifecycle status as the coordinator sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStatus {
  Absent,
  Loading,
  Loaded,
  Failed,
}

/// A loaded tile held in memory.
#[derive(Debug, Clone)]
pub struct TileRecord<P> {
  pub payload: P,
  pub loaded_at: DateTime<Utc>,
}

/// Counts per lifecycle bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
  pub loaded: usize,
  pub loading: usize,
  pub failed: usize,
}

/// Authoritative, process-lifetime view of every tile's state.
pub struct TileStateStore<P: TilePayload> {
  tiles: HashMap<String, TileRecord<P>>,
  loading: HashSet<String>,
  failed: HashMap<String, FailureInfo>,
  detail_cache: PersistentTileCache,
  overview_cache: PersistentTileCache,
  events: Option<TileEventSender>,
}

impl<P: TilePayload> TileStateStore<P> {
  pub fn new(detail_cache: PersistentTileCache, overview_cache: PersistentTileCache) -> Self {
    Self {
      tiles: HashMap::new(),
      loading: HashSet::new(),
      failed: HashMap::new(),
      detail_cache,
      overview_cache,
      events: None,
    }
  }

  /// Attach a change-notification channel.
  pub fn with_events(mut self, events: TileEventSender) -> Self {
    self.events = Some(events);
    self
  }

  fn emit(&self, event: TileEvent) {
    if let Some(tx) = &self.events {
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(event);
    }
  }

  fn cache_for(&self, id: &str) -> &PersistentTileCache {
    match variant_of(id) {
      TileVariant::Detail => &self.detail_cache,
      TileVariant::Overview => &self.overview_cache,
    }
  }

  /// Record that a fetch is in flight. Idempotent.
  pub fn mark_loading(&mut self, id: &str) {
    if self.loading.insert(id.to_string()) {
      self.emit(TileEvent::Loading { id: id.to_string() });
    }
  }

  /// Record a successful fetch, writing through to the persistent tier.
  pub fn mark_loaded(&mut self, id: &str, payload: P) {
    self.loading.remove(id);
    self.failed.remove(id);

    // non-fatal when this fails; the tile just stays session-only
    let _ = self.cache_for(id).put(id, &payload);

    self.tiles.insert(
      id.to_string(),
      TileRecord {
        payload,
        loaded_at: Utc::now(),
      },
    );
    self.emit(TileEvent::Loaded { id: id.to_string() });
  }

  /// Record a failed fetch, incrementing the failure history.
  pub fn mark_failed(&mut self, id: &str) {
    self.mark_failed_at(id, Utc::now());
  }

  pub fn mark_failed_at(&mut self, id: &str, now: DateTime<Utc>) {
    self.loading.remove(id);
    let info = self.failed.entry(id.to_string()).or_insert(FailureInfo {
      attempts: 0,
      last_failure: now,
    });
    info.attempts += 1;
    info.last_failure = now;
    let attempts = info.attempts;
    self.emit(TileEvent::Failed {
      id: id.to_string(),
      attempts,
    });
  }

  /// Whether the tile is loaded. A miss in memory falls through to the
  /// persistent tier; a hit there populates the in-memory map with the
  /// entry's original timestamp. The promotion has no other side effects —
  /// no events, no failure-record changes.
  pub fn is_loaded(&mut self, id: &str) -> bool {
    if self.tiles.contains_key(id) {
      return true;
    }
    if let Some((payload, timestamp)) = self.cache_for(id).get_entry::<P>(id) {
      self.tiles.insert(
        id.to_string(),
        TileRecord {
          payload,
          loaded_at: timestamp,
        },
      );
      return true;
    }
    false
  }

  pub fn is_loading(&self, id: &str) -> bool {
    self.loading.contains(id)
  }

  /// Failure history for a tile, if any.
  pub fn failure(&self, id: &str) -> Option<FailureInfo> {
    self.failed.get(id).copied()
  }

  /// Drop a stale loading flag (manual retry does this before restarting).
  pub fn clear_loading(&mut self, id: &str) -> bool {
    self.loading.remove(id)
  }

  /// Clear a tile's failure record so automatic retries resume.
  pub fn reset_failure(&mut self, id: &str) {
    self.failed.remove(id);
  }

  /// Memory-tier status. Loading wins over a leftover record; a promoted
  /// loaded record wins over a failure history from a previous session.
  pub fn status(&self, id: &str) -> TileStatus {
    if self.loading.contains(id) {
      TileStatus::Loading
    } else if self.tiles.contains_key(id) {
      TileStatus::Loaded
    } else if self.failed.contains_key(id) {
      TileStatus::Failed
    } else {
      TileStatus::Absent
    }
  }

  /// Payloads of the currently-loaded tiles among `ids`, each at most once,
  /// silently skipping everything not loaded in memory.
  pub fn data_for(&self, ids: &[String]) -> Vec<P> {
    let mut seen = HashSet::new();
    ids
      .iter()
      .filter(|id| seen.insert(id.as_str()))
      .filter_map(|id| self.tiles.get(id).map(|r| r.payload.clone()))
      .collect()
  }

  /// Drop all in-memory state; optionally also the persistent tiers.
  pub fn clear(&mut self, include_persistent: bool) {
    self.tiles.clear();
    self.loading.clear();
    self.failed.clear();
    if include_persistent {
      self.detail_cache.clear();
      self.overview_cache.clear();
    }
  }

  pub fn stats(&self) -> StoreStats {
    StoreStats {
      loaded: self.tiles.len(),
      loading: self.loading.len(),
      failed: self.failed.len(),
    }
  }

  /// Sweep expired entries out of both persistent tiers.
  pub fn sweep_persistent(&self) -> usize {
    self.detail_cache.sweep_expired() + self.overview_cache.sweep_expired()
  }

  pub fn persistent_stats(&self) -> (CacheStats, CacheStats) {
    (self.detail_cache.stats(), self.overview_cache.stats())
  }
}
