//! Ionospheric model and transmission-time solver (C7, C8): the
//! physics layer the Kalman tracker's `ClockOffsetMeasurement`s are
//! built from.

pub mod geometry;
pub mod ionosphere;
pub mod solver;

pub use geometry::{great_circle_distance_km, station_location};
pub use ionosphere::{CalibratedModel, IonosphericModel, IriClimatology, LatLon, ParametricDiurnal, StaticDayNight};
pub use solver::{enumerate_candidates, select_mode, ModeCandidate, ModeSelection};
