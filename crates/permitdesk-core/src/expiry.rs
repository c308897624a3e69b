//! Sliding expiration policy and the clock it reads from

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::backend::SessionRecord;

/// Default session lifetime: 24 hours
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Computes expiry timestamps from a fixed lifetime window.
///
/// Every successful read or write moves `expires_at` to `now + lifetime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    lifetime: TimeDelta,
}

impl ExpiryPolicy {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime: TimeDelta::from_std(lifetime).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn next_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, record: &SessionRecord, now: DateTime<Utc>) -> bool {
        record.expires_at <= now
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_LIFETIME)
    }
}

/// Source of "now" for expiry decisions
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay tooling.
///
/// Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        self.millis
            .store(instant.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let delta = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            session_id: "s1".to_string(),
            session_data: b"a=1".to_vec(),
            expires_at,
        }
    }

    #[test]
    fn test_next_expiry_adds_lifetime() {
        let policy = ExpiryPolicy::default();
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();

        assert_eq!(policy.next_expiry(now), now + TimeDelta::hours(24));
    }

    #[test]
    fn test_expiry_boundary_is_dead() {
        let policy = ExpiryPolicy::new(Duration::from_secs(60));
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();

        assert!(policy.is_expired(&record(now), now));
        assert!(policy.is_expired(&record(now - TimeDelta::seconds(1)), now));
        assert!(!policy.is_expired(&record(now + TimeDelta::seconds(1)), now));
    }

    #[test]
    fn test_huge_lifetime_saturates() {
        let policy = ExpiryPolicy::new(Duration::from_secs(u64::MAX));
        let now = Utc::now();

        assert_eq!(policy.next_expiry(now), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let start = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);
        let other = clock.clone();

        other.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + TimeDelta::seconds(90));

        clock.set(start);
        assert_eq!(other.now(), start);
    }
}
