//! Retry and backoff policy for failed tile fetches.

use chrono::{DateTime, Duration, Utc};

/// Failure history of a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureInfo {
  /// Recorded fetch failures so far
  pub attempts: u32,
  /// When the most recent failure happened
  pub last_failure: DateTime<Utc>,
}

/// Decides whether a tile with the given failure history may be reloaded.
///
/// The delay is enforced even on the first retry; after `max_attempts`
/// failures the tile is given up on until its record is explicitly cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub retry_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      retry_delay: Duration::milliseconds(5000),
    }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, retry_delay_ms: i64) -> Self {
    Self {
      max_attempts,
      retry_delay: Duration::milliseconds(retry_delay_ms),
    }
  }

  /// Whether an automatic reload is allowed at `now`.
  pub fn should_retry(&self, failure: Option<&FailureInfo>, now: DateTime<Utc>) -> bool {
    match failure {
      None => true,
      Some(f) if f.attempts >= self.max_attempts => false,
      Some(f) => now - f.last_failure > self.retry_delay,
    }
  }

  /// Whether a user-triggered reload is allowed. Bypasses the delay but the
  /// attempt cap still applies.
  pub fn should_retry_manual(&self, failure: Option<&FailureInfo>) -> bool {
    failure.map_or(true, |f| f.attempts < self.max_attempts)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_no_failure_record_always_retries() {
    let policy = RetryPolicy::default();
    assert!(policy.should_retry(None, Utc::now()));
  }

  #[test]
  fn test_delay_enforced_after_first_failure() {
    let policy = RetryPolicy::default();
    let now = Utc::now();
    let failure = FailureInfo {
      attempts: 1,
      last_failure: now,
    };
    assert!(!policy.should_retry(Some(&failure), now));
    assert!(!policy.should_retry(Some(&failure), now + Duration::milliseconds(4999)));
    assert!(policy.should_retry(Some(&failure), now + Duration::milliseconds(5001)));
  }

  #[test]
  fn test_attempt_cap_is_permanent() {
    let policy = RetryPolicy::default();
    let now = Utc::now();
    let failure = FailureInfo {
      attempts: 3,
      last_failure: now - Duration::days(2),
    };
    assert!(!policy.should_retry(Some(&failure), now));
  }

  #[test]
  fn test_manual_retry_bypasses_delay_not_cap() {
    let policy = RetryPolicy::default();
    let fresh = FailureInfo {
      attempts: 1,
      last_failure: Utc::now(),
    };
    assert!(policy.should_retry_manual(Some(&fresh)));

    let spent = FailureInfo {
      attempts: 3,
      last_failure: Utc::now(),
    };
    assert!(!policy.should_retry_manual(Some(&spent)));
    assert!(policy.should_retry_manual(None));
  }

  #[test]
  fn test_custom_constants() {
    let policy = RetryPolicy::new(1, 100);
    let now = Utc::now();
    let failure = FailureInfo {
      attempts: 1,
      last_failure: now,
    };
    assert!(!policy.should_retry(Some(&failure), now + Duration::days(1)));
  }
}
