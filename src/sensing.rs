//! Local sensing corroboration cache.
//!
//! Maps an observed entity's public key to the last time and location this
//! node personally sensed it. Written by the external sensor-ingestion
//! endpoint, read by the confidence scorer and the rebroadcast engine.
//!
//! Entries are whole-entry replacements (last write per key wins) and are
//! never evicted; they simply go stale once the freshness threshold elapses.
//! The lock is held only for the duration of a single map operation, never
//! across an await point.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use tracing::debug;

use crate::keys::PublicKey;
use crate::packet::ObjectLocation;

#[derive(Debug, Clone)]
struct SensedEntry {
    location: ObjectLocation,
    sensed_at_ms: u64,
}

/// Shared registry of locally sensed public keys.
///
/// Cheap to clone; all clones share one underlying map.
#[derive(Debug, Clone)]
pub struct SensingRegistry {
    threshold_ms: u64,
    inner: Arc<Mutex<HashMap<PublicKey, SensedEntry>>>,
}

impl SensingRegistry {
    /// Create an empty registry with the given freshness threshold.
    pub fn new(sensing_threshold: Duration) -> Self {
        Self {
            threshold_ms: sensing_threshold.as_millis() as u64,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PublicKey, SensedEntry>> {
        // Whole-entry writes keep the map consistent even if a writer panicked.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a local sensing observation happening now.
    ///
    /// # Errors
    ///
    /// Returns `Clock` if the system time is before the Unix epoch.
    pub fn record(&self, public_key: PublicKey, location: ObjectLocation) -> crate::error::Result<()> {
        let now = crate::packet::now_ms()?;
        self.record_at(public_key, location, now);
        Ok(())
    }

    /// Record a sensing observation at an explicit time.
    ///
    /// Useful for replaying sensor feeds that stamp their own times.
    pub fn record_at(&self, public_key: PublicKey, location: ObjectLocation, sensed_at_ms: u64) {
        debug!(public_key = %public_key, location = %location, sensed_at_ms, "sensed");
        self.lock().insert(
            public_key,
            SensedEntry {
                location,
                sensed_at_ms,
            },
        );
    }

    /// Whether this node sensed `public_key` recently enough to vouch for a
    /// claim timestamped `timestamp_ms`.
    ///
    /// True iff an entry exists and `sensed_at + threshold > timestamp_ms`.
    pub fn is_fresh(&self, public_key: &PublicKey, timestamp_ms: u64) -> bool {
        self.lock()
            .get(public_key)
            .is_some_and(|entry| entry.sensed_at_ms + self.threshold_ms > timestamp_ms)
    }

    /// Last sensed location for `public_key`, if any.
    pub fn location_of(&self, public_key: &PublicKey) -> Option<ObjectLocation> {
        self.lock().get(public_key).map(|entry| entry.location.clone())
    }

    /// Number of distinct keys ever sensed.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been sensed yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
