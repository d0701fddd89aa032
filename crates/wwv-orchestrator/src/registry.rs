//! Global calibration registry (§5: "single-writer, many-reader... lock
//! on write, lock-free snapshot reads"). Keyed by `station_freq`
//! (`ChannelDescriptor::station_freq_key`), holding each broadcast's
//! current calibration offset in milliseconds.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

/// Lock-free-read, serialized-write registry of per-broadcast calibration
/// offsets. Readers pay one atomic load; writers take a short-lived
/// mutex only to serialize concurrent writers before publishing a new
/// immutable snapshot (§5 shared-resource policy).
pub struct CalibrationRegistry {
    snapshot: ArcSwap<HashMap<String, f64>>,
    write_lock: Mutex<()>,
}

impl Default for CalibrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Lock-free read of the current calibration offset for `key`,
    /// defaulting to 0.0 (no calibration learned yet).
    pub fn offset_ms(&self, key: &str) -> f64 {
        self.snapshot.load().get(key).copied().unwrap_or(0.0)
    }

    /// A cheap `Arc` clone of the entire current snapshot, for callers
    /// that need to read several keys without repeated atomic loads.
    pub fn snapshot(&self) -> Arc<HashMap<String, f64>> {
        self.snapshot.load_full()
    }

    /// Updates a single key's calibration offset. Per-broadcast updates
    /// are commutative (§5 "global calibration updates are commutative
    /// and applied under a lock"): concurrent writers to different keys
    /// never conflict, and each write republishes a fresh immutable map.
    pub fn set_offset_ms(&self, key: &str, offset_ms: f64) {
        let _guard = self.write_lock.lock();
        let mut next = HashMap::clone(&self.snapshot.load());
        next.insert(key.to_string(), offset_ms);
        self.snapshot.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_key_defaults_to_zero() {
        let registry = CalibrationRegistry::new();
        assert_eq!(registry.offset_ms("WWV_5.000"), 0.0);
    }

    #[test]
    fn write_then_read_round_trips() {
        let registry = CalibrationRegistry::new();
        registry.set_offset_ms("WWV_5.000", 1.25);
        assert_eq!(registry.offset_ms("WWV_5.000"), 1.25);
        assert_eq!(registry.offset_ms("WWVH_10.000"), 0.0);
    }

    #[test]
    fn concurrent_writers_to_different_keys_both_land() {
        use std::thread;
        let registry = Arc::new(CalibrationRegistry::new());
        let r1 = registry.clone();
        let r2 = registry.clone();
        let t1 = thread::spawn(move || r1.set_offset_ms("a", 1.0));
        let t2 = thread::spawn(move || r2.set_offset_ms("b", 2.0));
        t1.join().unwrap();
        t2.join().unwrap();
        assert_eq!(registry.offset_ms("a"), 1.0);
        assert_eq!(registry.offset_ms("b"), 2.0);
    }
}
