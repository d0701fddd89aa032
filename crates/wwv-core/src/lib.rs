//! Shared data model, wrap-aware arithmetic, and error taxonomy for the
//! WWV/WWVH/CHU timing pipeline.
//!
//! This crate has no DSP and no I/O: it is the common contract every other
//! crate in the workspace builds against, the way `spark-core` anchors the
//! rest of its workspace.

pub mod channel;
pub mod clock;
pub mod detection;
pub mod error;
pub mod sample;
pub mod time_snap;
pub mod wrap;

pub use channel::{ChannelDescriptor, Station, StationHint};
pub use clock::{MockClock, SystemWallClock, WallClock};
pub use detection::{
    ClockOffsetMeasurement, ConvergenceState, DiscriminationResult, MethodScore, PropagationMode,
    ToneDetection,
};
pub use error::{QualityAnnotation, QualityFlag, WwvError, WwvResult};
pub use sample::{GapCause, GapEntry, Packet, Sample};
pub use time_snap::{TimeSnap, TimeSnapSource};
