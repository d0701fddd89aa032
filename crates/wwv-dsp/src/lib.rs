//! Phase 2 front end: matched-filter tone detection (C3, C4) and the
//! stateful 20 kHz -> 10 Hz decimator (C5).

pub mod decimator;
pub mod fir;
pub mod matched_filter;
pub mod startup;
pub mod streaming;

pub use decimator::Decimator;
pub use startup::{fallback_time_snap, StartupBuffer, StartupDetection};
pub use streaming::StreamingDetector;
