use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Injectable wall-clock source.
///
/// Every component that timestamps something it emits (archive segment
/// headers, state-file `established_at`/`last_update_utc` fields) goes
/// through this trait rather than calling `SystemTime::now()` directly, so
/// tests can pin time and assert exact values instead of racing the clock.
pub trait WallClock: Send + Sync + 'static {
    /// Seconds since the Unix epoch, as an `f64` to match the rest of the
    /// data model (`TimeSnap::utc_anchor`, `ClockOffsetMeasurement::utc`).
    fn now_utc(&self) -> f64;
}

/// Default implementation backed by `SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now_utc(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_secs_f64()
    }
}

/// Deterministic clock for tests: holds a fixed-point value in
/// microseconds (atomic so it can be shared and advanced from another
/// thread without a lock) and only moves when told to.
#[derive(Debug, Clone)]
pub struct MockClock {
    micros: Arc<AtomicU64>,
}

impl MockClock {
    pub fn at(utc_seconds: f64) -> Self {
        Self {
            micros: Arc::new(AtomicU64::new((utc_seconds * 1_000_000.0) as u64)),
        }
    }

    pub fn advance(&self, delta_seconds: f64) {
        let delta_micros = (delta_seconds * 1_000_000.0) as u64;
        self.micros.fetch_add(delta_micros, Ordering::SeqCst);
    }

    pub fn set(&self, utc_seconds: f64) {
        self.micros
            .store((utc_seconds * 1_000_000.0) as u64, Ordering::SeqCst);
    }
}

impl WallClock for MockClock {
    fn now_utc(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances() {
        let clock = MockClock::at(1_700_000_000.0);
        assert!((clock.now_utc() - 1_700_000_000.0).abs() < 1e-6);
        clock.advance(1.5);
        assert!((clock.now_utc() - 1_700_000_001.5).abs() < 1e-6);
    }
}
