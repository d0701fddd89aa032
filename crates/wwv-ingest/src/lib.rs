//! Phase 1: RTP resequencing (C1) and lossless raw archival (C2).

pub mod archive;
pub mod resequencer;

pub use archive::{ArchiveConfig, ArchiveSegment, SegmentMeta};
pub use resequencer::{Emission, IngestOutcome, Resequencer, ResequencerConfig};
