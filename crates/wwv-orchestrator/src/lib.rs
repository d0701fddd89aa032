//! Pipeline orchestrator (C13): wires configuration, per-channel workers,
//! the shared calibration registry, and the ground-truth validator into
//! one runnable pipeline, per §4.13 and §5.

pub mod config;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod worker;

pub use config::{ChannelConfig, PipelineConfig, RtpSourceConfig};
pub use orchestrator::Orchestrator;
pub use queue::{BoundedPacketQueue, PushOutcome};
pub use registry::CalibrationRegistry;
pub use worker::{ChannelWorker, WorkerContext};
