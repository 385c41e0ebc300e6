//! Rate limiting of sync requests
//!
//! A user cannot start two syncs within a cooldown period. This is a soft guard against accidental rapid re-triggering: it does not prevent two syncs from running concurrently (see [`SyncService`](crate::provider::SyncService) for that).

use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;

/// How many users a [`MemoryThrottle`] tracks at most. The oldest markers are evicted first
const MAX_TRACKED_KEYS: u64 = 10_000;

/// Something that remembers when users started their last sync
pub trait SyncThrottle: Send + Sync {
    /// If `key` is not in its cooldown period, mark it for `cooldown` and return `Ok`.
    /// Otherwise, return the time left before it can be started again
    fn try_acquire(&self, key: &str, cooldown: Duration) -> Result<(), Duration>;

    /// Forget about `key`, so that a new sync can start right away
    fn release(&self, key: &str);
}


/// When a sync was started, and for how long it blocks the next ones
#[derive(Clone, Copy, Debug)]
struct Marker {
    started: Instant,
    cooldown: Duration,
}

impl Marker {
    fn time_left(&self, now: Instant) -> Duration {
        (self.started + self.cooldown).saturating_duration_since(now)
    }
}

/// Every marker lives as long as its own cooldown
struct CooldownExpiry;

impl Expiry<String, Marker> for CooldownExpiry {
    fn expire_after_create(&self, _key: &String, marker: &Marker, _created_at: Instant) -> Option<Duration> {
        Some(marker.cooldown)
    }
}


/// A throttle that keeps its markers in an in-memory expiring cache, for this process only
pub struct MemoryThrottle {
    markers: Cache<String, Marker>,
}

impl MemoryThrottle {
    pub fn new() -> Self {
        let markers = Cache::builder()
            .max_capacity(MAX_TRACKED_KEYS)
            .expire_after(CooldownExpiry)
            .build();
        Self { markers }
    }
}

impl Default for MemoryThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncThrottle for MemoryThrottle {
    fn try_acquire(&self, key: &str, cooldown: Duration) -> Result<(), Duration> {
        let now = Instant::now();
        let entry = self.markers
            .entry(key.to_string())
            .or_insert_with(|| Marker { started: now, cooldown });

        if entry.is_fresh() {
            return Ok(());
        }
        let left = entry.into_value().time_left(now);
        if left.is_zero() {
            // Expired, but not evicted yet
            self.markers.insert(key.to_string(), Marker { started: now, cooldown });
            return Ok(());
        }
        Err(left)
    }

    fn release(&self, key: &str) {
        self.markers.invalidate(key);
    }
}

/// A throttle that never throttles
#[derive(Debug, Default, Clone, Copy)]
pub struct NoThrottle;

impl SyncThrottle for NoThrottle {
    fn try_acquire(&self, _key: &str, _cooldown: Duration) -> Result<(), Duration> {
        Ok(())
    }

    fn release(&self, _key: &str) {}
}
