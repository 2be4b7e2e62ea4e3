//! Storage medium implementations: SQLite-backed and in-memory.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{StorageError, StorageMedium, StorageResult};

/// Key/value table shared by every cache profile; namespacing happens in the
/// key prefixes.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// SQLite-backed durable medium.
pub struct SqliteMedium {
  conn: Mutex<Connection>,
}

impl SqliteMedium {
  /// Open or create the database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::init(conn)
  }

  /// Non-durable connection for tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::init(conn)
  }

  fn init(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Default database path under the platform data directory.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lampgrid").join("cache.db"))
  }

  fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))
  }
}

fn map_sqlite_err(e: rusqlite::Error) -> StorageError {
  match &e {
    rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::DiskFull => {
      StorageError::QuotaExceeded
    }
    other => StorageError::Backend(other.to_string()),
  }
}

impl StorageMedium for SqliteMedium {
  fn get(&self, key: &str) -> StorageResult<Option<String>> {
    let conn = self.lock()?;
    conn
      .query_row("SELECT value FROM kv_cache WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(map_sqlite_err)
  }

  fn set(&self, key: &str, value: &str) -> StorageResult<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO kv_cache (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(map_sqlite_err)?;
    Ok(())
  }

  fn remove(&self, key: &str) -> StorageResult<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM kv_cache WHERE key = ?", params![key])
      .map_err(map_sqlite_err)?;
    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT key FROM kv_cache")
      .map_err(map_sqlite_err)?;
    // LIKE treats '_' as a wildcard and every prefix is full of them, so
    // filter on the Rust side instead
    let keys = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(map_sqlite_err)?
      .filter_map(|r| r.ok())
      .filter(|k| k.starts_with(prefix))
      .collect();
    Ok(keys)
  }
}

/// In-memory medium. Serves as the session-only fallback when durable
/// storage cannot be opened, and as the storage double in tests; the
/// optional byte quota reproduces a browser-style bounded store.
pub struct MemoryMedium {
  entries: Mutex<HashMap<String, String>>,
  quota_bytes: Option<usize>,
}

impl MemoryMedium {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      quota_bytes: None,
    }
  }

  pub fn with_quota(quota_bytes: usize) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      quota_bytes: Some(quota_bytes),
    }
  }

  fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
    self
      .entries
      .lock()
      .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))
  }
}

impl Default for MemoryMedium {
  fn default() -> Self {
    Self::new()
  }
}

impl StorageMedium for MemoryMedium {
  fn get(&self, key: &str) -> StorageResult<Option<String>> {
    Ok(self.lock()?.get(key).cloned())
  }

  fn set(&self, key: &str, value: &str) -> StorageResult<()> {
    let mut entries = self.lock()?;
    if let Some(quota) = self.quota_bytes {
      let used: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| k.len() + v.len())
        .sum();
      if used + key.len() + value.len() > quota {
        return Err(StorageError::QuotaExceeded);
      }
    }
    entries.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> StorageResult<()> {
    self.lock()?.remove(key);
    Ok(())
  }

  fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
    Ok(
      self
        .lock()?
        .keys()
        .filter(|k| k.starts_with(prefix))
        .cloned()
        .collect(),
    )
  }
}
