mod cache;
mod config;
mod coordinator;
mod event;
mod grid;
mod osm;
mod retry;
mod state;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cache::{MemoryMedium, PersistentTileCache, SqliteMedium, StorageMedium};
use coordinator::FetchCoordinator;
use event::TileEvent;
use grid::{GeoBounds, Viewport};
use osm::client::OverpassClient;
use osm::geocode::GeocodeClient;
use osm::types::ElementStats;
use state::{TileStateStore, TileStatus};

#[derive(Parser, Debug)]
#[command(name = "lampgrid")]
#[command(about = "Prefetch and inspect cached OpenStreetMap street-lamp tiles")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lampgrid/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Bounding box to fetch, as south,west,north,east in degrees
  #[arg(short, long, value_name = "S,W,N,E", conflicts_with = "place")]
  bbox: Option<String>,

  /// Place name to geocode into a bounding box
  #[arg(short, long)]
  place: Option<String>,

  /// Zoom level deciding between detail and overview tiles
  #[arg(short, long, default_value_t = 16)]
  zoom: u8,

  /// Immediately retry tiles that failed during this run
  #[arg(long)]
  retry_failed: bool,

  /// Print cache statistics and exit
  #[arg(long)]
  stats: bool,

  /// Remove every cached entry and exit
  #[arg(long)]
  clear_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let medium = open_medium(&config);
  let detail_cache = PersistentTileCache::new(medium.clone(), config.cache.rectangle_profile());
  let overview_cache =
    PersistentTileCache::new(medium.clone(), config.cache.large_payload_profile());
  let response_cache = PersistentTileCache::new(medium.clone(), config.cache.response_profile());

  if args.clear_cache {
    detail_cache.clear();
    overview_cache.clear();
    response_cache.clear();
    println!("Cache cleared.");
    return Ok(());
  }

  if args.stats {
    print_cache_stats(&detail_cache, &overview_cache, &response_cache);
    return Ok(());
  }

  let bounds = resolve_bounds(&args, &config, response_cache).await?;
  let viewport = Viewport {
    bounds,
    zoom: args.zoom,
  };

  let (events_tx, mut events_rx) = event::channel();
  let store = TileStateStore::new(detail_cache, overview_cache).with_events(events_tx);
  let swept = store.sweep_persistent();
  if swept > 0 {
    info!(swept, "removed expired cache entries at startup");
  }

  let client = OverpassClient::new(
    &config.overpass.endpoints,
    Duration::from_secs(config.overpass.timeout_secs),
    config.overpass.query_timeout_secs,
  )?;
  let coordinator = FetchCoordinator::new(
    store,
    Arc::new(client),
    config.retry.policy(),
    config.grid.settings(),
  );

  let progress = tokio::spawn(async move {
    while let Some(event) = events_rx.recv().await {
      match event {
        TileEvent::Loading { .. } => {}
        TileEvent::Loaded { id } => info!(%id, "loaded"),
        TileEvent::Failed { id, attempts } => warn!(%id, attempts, "failed"),
      }
    }
  });

  let (variant, needed) = coordinator.tiles_for(&viewport);
  info!(tiles = needed.len(), ?variant, "viewport computed");

  let handles = coordinator.viewport_changed(&viewport);
  let started = handles.len();
  futures::future::join_all(handles).await;

  if args.retry_failed {
    let failed: Vec<String> = coordinator
      .tile_states(&viewport)
      .into_iter()
      .filter(|(_, _, status)| *status == TileStatus::Failed)
      .map(|(id, _, _)| id)
      .collect();
    if !failed.is_empty() {
      info!(count = failed.len(), "retrying failed tiles");
      let retries: Vec<_> = failed
        .iter()
        .filter_map(|id| coordinator.retry_tile(id))
        .collect();
      futures::future::join_all(retries).await;
    }
  }

  progress.abort();
  print_run_summary(&coordinator, &viewport, needed.len(), started);

  Ok(())
}

/// Open the durable medium, degrading to a session-only in-memory store when
/// the database cannot be opened at all.
fn open_medium(config: &config::Config) -> Arc<dyn StorageMedium> {
  let opened = match &config.cache.db_path {
    Some(path) => SqliteMedium::open(path),
    None => SqliteMedium::open_default(),
  };
  match opened {
    Ok(medium) => Arc::new(medium),
    Err(e) => {
      warn!(error = %e, "durable cache unavailable, using in-memory storage for this session");
      Arc::new(MemoryMedium::new())
    }
  }
}

async fn resolve_bounds(
  args: &Args,
  config: &config::Config,
  response_cache: PersistentTileCache,
) -> Result<GeoBounds> {
  if let Some(raw) = &args.bbox {
    return parse_bbox(raw);
  }
  if let Some(place) = &args.place {
    let geocoder = GeocodeClient::new(
      &config.nominatim.endpoint,
      Duration::from_secs(config.nominatim.timeout_secs),
      response_cache,
    )?;
    let found = geocoder.lookup(place).await?;
    info!(place = %found.display_name, "geocoded");
    return Ok(found.bounds);
  }
  Err(eyre!(
    "Nothing to do: pass --bbox or --place (or --stats / --clear-cache)"
  ))
}

fn parse_bbox(raw: &str) -> Result<GeoBounds> {
  let parts: Vec<f64> = raw
    .split(',')
    .map(|p| {
      p.trim()
        .parse::<f64>()
        .map_err(|e| eyre!("Invalid bbox component '{}': {}", p.trim(), e))
    })
    .collect::<Result<_>>()?;

  match parts.as_slice() {
    [south, west, north, east] => {
      if south > north || west > east {
        return Err(eyre!(
          "Bounding box is inverted: expected south,west,north,east"
        ));
      }
      Ok(GeoBounds {
        north: *north,
        south: *south,
        east: *east,
        west: *west,
      })
    }
    _ => Err(eyre!("Expected bbox as south,west,north,east")),
  }
}

fn print_cache_stats(
  detail: &PersistentTileCache,
  overview: &PersistentTileCache,
  response: &PersistentTileCache,
) {
  for cache in [detail, overview, response] {
    let stats = cache.stats();
    println!(
      "{:>6}: {} entries, {} bytes{}",
      cache.profile().name,
      stats.count,
      stats.total_size_bytes,
      if stats.available {
        ""
      } else {
        " (storage unavailable)"
      }
    );
  }
}

fn print_run_summary(
  coordinator: &FetchCoordinator,
  viewport: &Viewport,
  needed: usize,
  started: usize,
) {
  let payloads = coordinator.visible_data(viewport);
  let elements = ElementStats::collect(payloads.iter().flatten());

  println!(
    "Tiles: {} needed, {} fetched, {} loaded",
    needed,
    started,
    payloads.len()
  );
  println!(
    "Elements: {} total ({} lamps, {} benches, {} lit ways, {} unlit ways)",
    elements.total, elements.lamps, elements.benches, elements.lit_ways, elements.unlit_ways
  );

  let failed: Vec<_> = coordinator
    .tile_states(viewport)
    .into_iter()
    .filter(|(_, _, status)| *status == TileStatus::Failed)
    .collect();
  if !failed.is_empty() {
    println!("Failed tiles (rerun with --retry-failed to retry):");
    for (id, bounds, _) in failed {
      println!(
        "  {} [{:.4},{:.4} - {:.4},{:.4}]",
        id, bounds.south, bounds.west, bounds.north, bounds.east
      );
    }
  }

  let store = coordinator.store();
  let locked = store.lock();
  if let Ok(store) = locked {
    let (detail_stats, overview_stats) = store.persistent_stats();
    println!(
      "Cache: {} detail entries ({} bytes), {} overview entries ({} bytes)",
      detail_stats.count,
      detail_stats.total_size_bytes,
      overview_stats.count,
      overview_stats.total_size_bytes
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_bbox() {
    let bounds = parse_bbox("52.48, 13.38, 52.52, 13.42").unwrap();
    assert_eq!(bounds.south, 52.48);
    assert_eq!(bounds.west, 13.38);
    assert_eq!(bounds.north, 52.52);
    assert_eq!(bounds.east, 13.42);
  }

  #[test]
  fn test_parse_bbox_rejects_garbage() {
    assert!(parse_bbox("52.48,13.38,52.52").is_err());
    assert!(parse_bbox("a,b,c,d").is_err());
    // inverted corners
    assert!(parse_bbox("52.52,13.38,52.48,13.42").is_err());
  }
}
