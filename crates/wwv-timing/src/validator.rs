//! Ground-truth validator (C10): three independent tiers of validation
//! feed a running bias/sigma estimate per station, published as a
//! recommended calibration offset for the Kalman and calibration
//! modules to consume. This component never writes another component's
//! state directly (§4.10): it only publishes.

use wwv_core::{PropagationMode, Station};

/// One observation fed to the validator, tagged with which tier produced it.
#[derive(Debug, Clone, Copy)]
pub enum ValidationSample {
    /// Tier 1, gold standard: measured `D_clock` against a GPS-PPS edge.
    GpsPps { station: Station, error_ms: f64 },
    /// Tier 2: a silent/exclusive minute's discrimination outcome, checked
    /// against the station known to be the only one transmitting.
    SilentMinuteCrossCheck {
        station: Station,
        expected: Station,
        discriminated: Station,
    },
    /// Tier 3: measured vs. predicted propagation delay for a resolved mode.
    PropagationConsistency {
        station: Station,
        mode: PropagationMode,
        measured_delay_ms: f64,
        predicted_delay_ms: f64,
        tolerance_ms: f64,
    },
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
struct RunningStats {
    count: u64,
    mean_ms: f64,
    m2: f64, // Welford's accumulator for variance
    cross_check_hits: u64,
    cross_check_misses: u64,
    propagation_consistent: u64,
    propagation_inconsistent: u64,
}

impl RunningStats {
    fn push_bias(&mut self, error_ms: f64) {
        self.count += 1;
        let delta = error_ms - self.mean_ms;
        self.mean_ms += delta / self.count as f64;
        let delta2 = error_ms - self.mean_ms;
        self.m2 += delta * delta2;
    }

    fn sigma_ms(&self) -> f64 {
        if self.count < 2 {
            return f64::INFINITY;
        }
        (self.m2 / (self.count - 1) as f64).sqrt()
    }
}

/// Accumulated validation statistics, persisted to JSON under a schema
/// version via `wwv-state`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidatorState {
    pub schema_version: u32,
    per_station: std::collections::HashMap<Station, RunningStats>,
}

impl Default for ValidatorState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            per_station: std::collections::HashMap::new(),
        }
    }
}

/// Outcome of ingesting one sample: what the validator concluded, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Recorded toward the running bias estimate (tier 1 or 3).
    Recorded,
    /// Silent-minute discrimination matched the expected station.
    CrossCheckPass,
    /// Silent-minute discrimination disagreed with the known-exclusive station.
    CrossCheckFail,
    /// Propagation delay fell within tolerance of prediction.
    PropagationConsistent,
    /// Propagation delay fell outside tolerance: a mode-selection or calibration problem.
    PropagationInconsistent,
}

const MIN_SAMPLES_FOR_RECOMMENDATION: u64 = 20;

/// Accumulates ground-truth evidence across the three tiers described in
/// §4.10 and exposes a recommended per-station calibration offset.
pub struct GroundTruthValidator {
    state: ValidatorState,
}

impl Default for GroundTruthValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl GroundTruthValidator {
    pub fn new() -> Self {
        Self {
            state: ValidatorState::default(),
        }
    }

    pub fn from_state(state: ValidatorState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ValidatorState {
        &self.state
    }

    /// Ingests one validation sample, updating the relevant station's
    /// running statistics, and reports what happened.
    pub fn ingest(&mut self, sample: ValidationSample) -> ValidationOutcome {
        match sample {
            ValidationSample::GpsPps { station, error_ms } => {
                let stats = self.per_station_mut(station);
                stats.push_bias(error_ms);
                ValidationOutcome::Recorded
            }
            ValidationSample::SilentMinuteCrossCheck {
                station,
                expected,
                discriminated,
            } => {
                let matched = discriminated == expected;
                let stats = self.per_station_mut(station);
                if matched {
                    stats.cross_check_hits += 1;
                } else {
                    stats.cross_check_misses += 1;
                }
                if matched {
                    ValidationOutcome::CrossCheckPass
                } else {
                    ValidationOutcome::CrossCheckFail
                }
            }
            ValidationSample::PropagationConsistency {
                station,
                mode: _,
                measured_delay_ms,
                predicted_delay_ms,
                tolerance_ms,
            } => {
                let within = (measured_delay_ms - predicted_delay_ms).abs() <= tolerance_ms;
                let stats = self.per_station_mut(station);
                if within {
                    stats.propagation_consistent += 1;
                } else {
                    stats.propagation_inconsistent += 1;
                }
                if within {
                    ValidationOutcome::PropagationConsistent
                } else {
                    ValidationOutcome::PropagationInconsistent
                }
            }
        }
    }

    fn per_station_mut(&mut self, station: Station) -> &mut RunningStats {
        self.state.per_station.entry(station).or_default()
    }

    /// The calibration offset this validator recommends subtracting from
    /// `station`'s raw `D_clock` measurements, or `None` before enough
    /// gold-standard samples have accumulated (§4.10: "publishes
    /// `recommended_calibration_offset_ms`").
    pub fn recommended_calibration_offset_ms(&self, station: Station) -> Option<f64> {
        let stats = self.state.per_station.get(&station)?;
        if stats.count < MIN_SAMPLES_FOR_RECOMMENDATION {
            return None;
        }
        Some(stats.mean_ms)
    }

    pub fn bias_sigma_ms(&self, station: Station) -> Option<f64> {
        self.state.per_station.get(&station).map(|s| s.sigma_ms())
    }

    /// Fraction of silent-minute cross-checks that matched the expected
    /// station, or `None` if none have run yet.
    pub fn cross_check_accuracy(&self, station: Station) -> Option<f64> {
        let stats = self.state.per_station.get(&station)?;
        let total = stats.cross_check_hits + stats.cross_check_misses;
        if total == 0 {
            return None;
        }
        Some(stats.cross_check_hits as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gold_standard_bias_converges() {
        let mut validator = GroundTruthValidator::new();
        for _ in 0..30 {
            validator.ingest(ValidationSample::GpsPps {
                station: Station::Wwv,
                error_ms: 1.5,
            });
        }
        let rec = validator.recommended_calibration_offset_ms(Station::Wwv).unwrap();
        assert!((rec - 1.5).abs() < 1e-6);
    }

    #[test]
    fn recommendation_withheld_below_sample_floor() {
        let mut validator = GroundTruthValidator::new();
        for _ in 0..5 {
            validator.ingest(ValidationSample::GpsPps {
                station: Station::Wwvh,
                error_ms: 0.5,
            });
        }
        assert!(validator.recommended_calibration_offset_ms(Station::Wwvh).is_none());
    }

    #[test]
    fn silent_minute_cross_check_tracks_accuracy() {
        let mut validator = GroundTruthValidator::new();
        for _ in 0..8 {
            validator.ingest(ValidationSample::SilentMinuteCrossCheck {
                station: Station::Wwvh,
                expected: Station::Wwvh,
                discriminated: Station::Wwvh,
            });
        }
        validator.ingest(ValidationSample::SilentMinuteCrossCheck {
            station: Station::Wwvh,
            expected: Station::Wwvh,
            discriminated: Station::Wwv,
        });
        let accuracy = validator.cross_check_accuracy(Station::Wwvh).unwrap();
        assert!((accuracy - 8.0 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn propagation_inconsistency_is_flagged() {
        let mut validator = GroundTruthValidator::new();
        let outcome = validator.ingest(ValidationSample::PropagationConsistency {
            station: Station::Wwv,
            mode: PropagationMode::OneHopF,
            measured_delay_ms: 12.0,
            predicted_delay_ms: 5.0,
            tolerance_ms: 1.0,
        });
        assert_eq!(outcome, ValidationOutcome::PropagationInconsistent);
    }
}
