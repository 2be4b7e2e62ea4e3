//! Fetch coordination: decides which viewport tiles to request and records
//! the outcomes in the state store.
//!
//! The decision ladder per tile: already loaded -> use the cache; already in
//! flight -> skip; failure history the backoff policy rejects -> skip;
//! otherwise mark loading and fetch. In-flight fetches for tiles that leave
//! the viewport are not cancelled; their completions still land in the
//! shared store so a later re-entry finds them resolved.

use chrono::Utc;
use color_eyre::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::grid::{self, GeoBounds, TileVariant, Viewport};
use crate::osm::client::OverpassClient;
use crate::osm::types::OsmElement;
use crate::retry::RetryPolicy;
use crate::state::{TileStateStore, TileStatus};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The opaque fetch seam. The production implementation is the Overpass
/// client; endpoint failover happens inside it, so one call here is one
/// logical attempt from the coordinator's point of view.
pub trait TileFetcher: Send + Sync {
  fn fetch(&self, bounds: GeoBounds, variant: TileVariant) -> BoxFuture<Result<Vec<OsmElement>>>;
}

impl TileFetcher for OverpassClient {
  fn fetch(&self, bounds: GeoBounds, variant: TileVariant) -> BoxFuture<Result<Vec<OsmElement>>> {
    let client = self.clone();
    Box::pin(async move { client.fetch_tile(&bounds, variant).await })
  }
}

/// Grid configuration for the two variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSettings {
  pub detail_size_deg: f64,
  pub overview_size_deg: f64,
  /// Zoom at and above which the detail variant is used
  pub detail_zoom: u8,
}

impl Default for GridSettings {
  fn default() -> Self {
    Self {
      detail_size_deg: 0.01,
      overview_size_deg: 0.05,
      detail_zoom: 14,
    }
  }
}

impl GridSettings {
  pub fn variant_for(&self, zoom: u8) -> TileVariant {
    if zoom >= self.detail_zoom {
      TileVariant::Detail
    } else {
      TileVariant::Overview
    }
  }

  pub fn size_for(&self, variant: TileVariant) -> f64 {
    match variant {
      TileVariant::Detail => self.detail_size_deg,
      TileVariant::Overview => self.overview_size_deg,
    }
  }
}

/// Store type the coordinator drives.
pub type ElementStore = TileStateStore<Vec<OsmElement>>;

pub struct FetchCoordinator {
  store: Arc<Mutex<ElementStore>>,
  fetcher: Arc<dyn TileFetcher>,
  policy: RetryPolicy,
  grid: GridSettings,
}

impl FetchCoordinator {
  pub fn new(
    store: ElementStore,
    fetcher: Arc<dyn TileFetcher>,
    policy: RetryPolicy,
    grid: GridSettings,
  ) -> Self {
    Self {
      store: Arc::new(Mutex::new(store)),
      fetcher,
      policy,
      grid,
    }
  }

  pub fn store(&self) -> Arc<Mutex<ElementStore>> {
    Arc::clone(&self.store)
  }

  /// A poisoned lock means a fetch task panicked mid-update; the collections
  /// themselves are still coherent, so keep going with the inner value.
  fn lock_store(&self) -> MutexGuard<'_, ElementStore> {
    self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// The tile ids the viewport needs, tagged for its variant.
  pub fn tiles_for(&self, viewport: &Viewport) -> (TileVariant, Vec<String>) {
    let variant = self.grid.variant_for(viewport.zoom);
    let size = self.grid.size_for(variant);
    let ids = grid::tiles_covering(&viewport.bounds, size)
      .into_iter()
      .map(|id| grid::with_variant(&id, variant))
      .collect();
    (variant, ids)
  }

  /// React to a viewport change: start fetches for every tile the viewport
  /// needs that is neither loaded, in flight, nor backed off. Returns the
  /// handles of the fetches actually started.
  pub fn viewport_changed(&self, viewport: &Viewport) -> Vec<JoinHandle<()>> {
    let (variant, ids) = self.tiles_for(viewport);
    let size = self.grid.size_for(variant);
    let now = Utc::now();

    let mut handles = Vec::new();
    for id in ids {
      let start = {
        let mut store = self.lock_store();
        if store.is_loaded(&id) || store.is_loading(&id) {
          false
        } else if !self.policy.should_retry(store.failure(&id).as_ref(), now) {
          false
        } else {
          store.mark_loading(&id);
          true
        }
      };
      if start {
        handles.push(self.spawn_fetch(id, size, variant));
      }
    }
    handles
  }

  /// User-triggered retry of a failed tile. Clears any stale loading flag,
  /// bypasses the backoff delay, but the attempt cap still applies.
  pub fn retry_tile(&self, id: &str) -> Option<JoinHandle<()>> {
    let variant = grid::variant_of(id);
    let size = self.grid.size_for(variant);
    let start = {
      let mut store = self.lock_store();
      store.clear_loading(id);
      if store.is_loaded(id) {
        false
      } else if self.policy.should_retry_manual(store.failure(id).as_ref()) {
        store.mark_loading(id);
        true
      } else {
        false
      }
    };
    if start {
      Some(self.spawn_fetch(id.to_string(), size, variant))
    } else {
      None
    }
  }

  fn spawn_fetch(&self, id: String, grid_size: f64, variant: TileVariant) -> JoinHandle<()> {
    let store = Arc::clone(&self.store);
    let fetcher = Arc::clone(&self.fetcher);
    tokio::spawn(async move {
      let outcome = match grid::tile_bounds(&id, grid_size) {
        Ok(bounds) => fetcher.fetch(bounds, variant).await,
        Err(e) => Err(e),
      };

      let mut store = match store.lock() {
        Ok(store) => store,
        Err(poisoned) => poisoned.into_inner(),
      };
      match outcome {
        Ok(elements) => {
          debug!(%id, count = elements.len(), "tile loaded");
          store.mark_loaded(&id, elements);
        }
        Err(e) => {
          warn!(%id, error = %e, "tile fetch failed");
          store.mark_failed(&id);
        }
      }
    })
  }

  /// Loaded payloads for the viewport, one entry per loaded tile. Tiles
  /// persisted in an earlier session get promoted on the way.
  pub fn visible_data(&self, viewport: &Viewport) -> Vec<Vec<OsmElement>> {
    let (_, ids) = self.tiles_for(viewport);
    let mut store = self.lock_store();
    let loaded: Vec<String> = ids.into_iter().filter(|id| store.is_loaded(id)).collect();
    store.data_for(&loaded)
  }

  /// Tile geometry and status for the overlay rectangles.
  pub fn tile_states(&self, viewport: &Viewport) -> Vec<(String, GeoBounds, TileStatus)> {
    let (variant, ids) = self.tiles_for(viewport);
    let size = self.grid.size_for(variant);
    let store = self.lock_store();
    ids
      .into_iter()
      .filter_map(|id| {
        let bounds = grid::tile_bounds(&id, size).ok()?;
        let status = store.status(&id);
        Some((id, bounds, status))
      })
      .collect()
  }

  /// Drop expired entries from the persistent tiers.
  pub fn sweep_caches(&self) -> usize {
    self.lock_store().sweep_persistent()
  }
}
