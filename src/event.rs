//! Tile lifecycle change notifications.
//!
//! The state store emits an event for every status transition; whoever draws
//! loading/error/success overlays subscribes to the channel. The store never
//! reaches into rendering directly.

use tokio::sync::mpsc;

/// A tile status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileEvent {
  /// Fetch started
  Loading { id: String },
  /// Fetch succeeded; payload is available via the state store
  Loaded { id: String },
  /// Fetch failed; `attempts` is the running failure count
  Failed { id: String, attempts: u32 },
}

pub type TileEventSender = mpsc::UnboundedSender<TileEvent>;
pub type TileEventReceiver = mpsc::UnboundedReceiver<TileEvent>;

/// Create an event channel pair for a state store and its subscriber.
pub fn channel() -> (TileEventSender, TileEventReceiver) {
  mpsc::unbounded_channel()
}
