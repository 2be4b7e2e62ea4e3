//! Durable tile caching: storage media, the TTL/size-bounded persistent
//! cache, and eviction planning.
//!
//! One cache implementation serves every use site; behavior differences
//! (rectangle tiles, generic OSM responses, large overview payloads) are
//! profile configuration, not separate code paths.

mod eviction;
mod persistent;
mod storage;
mod traits;

pub use persistent::{CacheStats, PersistentTileCache};
pub use storage::{MemoryMedium, SqliteMedium};
pub use traits::{CacheBound, CacheProfile, StorageError, StorageMedium, CACHE_FORMAT_VERSION};
