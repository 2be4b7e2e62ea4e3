//! Eviction planning: expired entries first, then oldest-first to a target.
//!
//! Pure functions over entry metadata so the policies are testable without a
//! storage medium.

use chrono::{DateTime, Duration, Utc};

use super::traits::CacheBound;

/// Share of a byte cap usage is cleaned down to.
const BYTE_TARGET_RATIO: f64 = 0.8;

/// Share of a count cap removed in one cleanup batch.
const ENTRY_BATCH_RATIO: f64 = 0.3;

/// Metadata of one stored entry, as seen during a namespace scan.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMeta {
  /// Full storage key
  pub key: String,
  pub timestamp: DateTime<Utc>,
  pub size: u64,
}

fn oldest_first(entries: &[EntryMeta]) -> Vec<&EntryMeta> {
  let mut sorted: Vec<&EntryMeta> = entries.iter().collect();
  sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.key.cmp(&b.key)));
  sorted
}

/// Keys of entries whose TTL has elapsed at `now`.
pub fn expired_keys(entries: &[EntryMeta], ttl: Duration, now: DateTime<Utc>) -> Vec<String> {
  entries
    .iter()
    .filter(|e| now - e.timestamp > ttl)
    .map(|e| e.key.clone())
    .collect()
}

/// Keys to remove so that usage drops to the profile's target, oldest first.
/// Expects `entries` to already have expired entries swept out.
pub fn plan_removals(entries: &[EntryMeta], bound: CacheBound) -> Vec<String> {
  match bound {
    CacheBound::Unbounded => Vec::new(),
    CacheBound::MaxEntries(max) => {
      if entries.len() <= max {
        return Vec::new();
      }
      let batch = ((max as f64 * ENTRY_BATCH_RATIO).ceil() as usize).max(entries.len() - max);
      oldest_first(entries)
        .into_iter()
        .take(batch)
        .map(|e| e.key.clone())
        .collect()
    }
    CacheBound::MaxBytes(cap) => {
      let mut total: u64 = entries.iter().map(|e| e.size).sum();
      if total <= cap {
        return Vec::new();
      }
      let target = (cap as f64 * BYTE_TARGET_RATIO) as u64;
      let mut removals = Vec::new();
      for entry in oldest_first(entries) {
        if total <= target {
          break;
        }
        total = total.saturating_sub(entry.size);
        removals.push(entry.key.clone());
      }
      removals
    }
  }
}

/// Batch sacrificed when a write hits the medium's quota: the oldest 30% of
/// live entries, at least one.
pub fn emergency_batch(entries: &[EntryMeta]) -> Vec<String> {
  if entries.is_empty() {
    return Vec::new();
  }
  let batch = ((entries.len() as f64 * ENTRY_BATCH_RATIO).ceil() as usize).max(1);
  oldest_first(entries)
    .into_iter()
    .take(batch)
    .map(|e| e.key.clone())
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(key: &str, age_secs: i64, size: u64) -> EntryMeta {
    EntryMeta {
      key: key.to_string(),
      timestamp: Utc::now() - Duration::seconds(age_secs),
      size,
    }
  }

  #[test]
  fn test_expired_keys_respects_ttl() {
    let entries = vec![entry("old", 7200, 1), entry("new", 60, 1)];
    let expired = expired_keys(&entries, Duration::hours(1), Utc::now());
    assert_eq!(expired, vec!["old".to_string()]);
  }

  #[test]
  fn test_unbounded_never_plans_removals() {
    let entries = vec![entry("a", 100, 1_000_000), entry("b", 50, 1_000_000)];
    assert!(plan_removals(&entries, CacheBound::Unbounded).is_empty());
  }

  #[test]
  fn test_entry_cap_removes_fixed_batch_oldest_first() {
    let entries: Vec<EntryMeta> = (0..12).map(|i| entry(&format!("e{:02}", i), 100 - i, 1)).collect();
    // over a cap of 10 -> batch is 30% of the cap (3), oldest entries go
    let removed = plan_removals(&entries, CacheBound::MaxEntries(10));
    assert_eq!(removed, vec!["e00".to_string(), "e01".to_string(), "e02".to_string()]);
  }

  #[test]
  fn test_entry_cap_under_limit_is_noop() {
    let entries: Vec<EntryMeta> = (0..5).map(|i| entry(&format!("e{}", i), i, 1)).collect();
    assert!(plan_removals(&entries, CacheBound::MaxEntries(10)).is_empty());
  }

  #[test]
  fn test_byte_cap_cleans_down_to_eighty_percent() {
    let entries = vec![
      entry("oldest", 400, 30),
      entry("older", 300, 30),
      entry("newer", 200, 30),
      entry("newest", 100, 30),
    ];
    // 120 bytes over a 100 byte cap; target is 80 -> drop the oldest two
    let removed = plan_removals(&entries, CacheBound::MaxBytes(100));
    assert_eq!(removed, vec!["oldest".to_string(), "older".to_string()]);

    let remaining: u64 = entries
      .iter()
      .filter(|e| !removed.contains(&e.key))
      .map(|e| e.size)
      .sum();
    assert!(remaining <= 80);
  }

  #[test]
  fn test_byte_cap_under_limit_is_noop() {
    let entries = vec![entry("a", 100, 10), entry("b", 50, 10)];
    assert!(plan_removals(&entries, CacheBound::MaxBytes(100)).is_empty());
  }

  #[test]
  fn test_emergency_batch_takes_at_least_one() {
    let entries = vec![entry("only", 100, 1)];
    assert_eq!(emergency_batch(&entries), vec!["only".to_string()]);
    assert!(emergency_batch(&[]).is_empty());
  }

  #[test]
  fn test_emergency_batch_is_oldest_third() {
    let entries: Vec<EntryMeta> = (0..10).map(|i| entry(&format!("e{}", i), 100 - i, 1)).collect();
    let batch = emergency_batch(&entries);
    assert_eq!(batch, vec!["e0".to_string(), "e1".to_string(), "e2".to_string()]);
  }
}
