//! Versioned state-file manager (C14) for the three persisted state
//! kinds named in §6: `convergence_state.json`, `broadcast_calibration.json`,
//! and `time_snap.json`. Each is just a `StateStore<T>` over its own
//! payload type, constructed by the orchestrator at the appropriate path
//! under `state_root`.

pub mod store;

pub use store::StateStore;

/// Filenames the orchestrator persists under `state_root` (§6 "State files").
pub mod filenames {
    pub const CONVERGENCE_STATE: &str = "convergence_state.json";
    pub const BROADCAST_CALIBRATION: &str = "broadcast_calibration.json";
    pub const TIME_SNAP: &str = "time_snap.json";
    pub const VALIDATOR_STATE: &str = "ground_truth_validator.json";
    /// Per-minute `D_clock` rows a channel worker appends, read back by
    /// Phase 3 via `ClockOffsetSeries::load_csv` (§6, §4.11). Append-only,
    /// not a `StateStore` snapshot, so it carries no schema version.
    pub const CLOCK_OFFSET_SERIES: &str = "clock_offset.csv";
}

/// Current schema version for every state kind in this crate's charge.
/// A future breaking change to any payload bumps its own constant, not
/// this one — kept separate so crates can evolve independently.
pub const CONVERGENCE_STATE_SCHEMA_VERSION: u32 = 1;
pub const BROADCAST_CALIBRATION_SCHEMA_VERSION: u32 = 1;
pub const TIME_SNAP_SCHEMA_VERSION: u32 = 1;
pub const VALIDATOR_STATE_SCHEMA_VERSION: u32 = 1;
/// Recorded into a corrected product's `/meta` attributes to tag which
/// revision of the clock-offset CSV column layout produced it. The CSV
/// itself carries no envelope, so this is metadata provenance only, not
/// a version a reader validates against.
pub const CLOCK_OFFSET_SERIES_SCHEMA_VERSION: u32 = 1;
