//! Phase 2 core: BCD time-code correlation and station discrimination
//! (C6), the `D_clock` Kalman tracker (C9), and the ground-truth
//! validator (C10).

pub mod bcd;
pub mod discriminator;
pub mod kalman;
pub mod validator;

pub use bcd::{differential_delay_ms, BcdPeak};
pub use discriminator::{discriminate, FeatureVector, LogisticWeights};
pub use kalman::{KalmanState, KalmanTracker, MultiBroadcastFusion, ProcessNoise};
pub use validator::{GroundTruthValidator, ValidationOutcome, ValidationSample, ValidatorState};
