//! Clock-offset engine (C9): a 2-state (offset, drift) Kalman tracker for
//! `D_clock`, per §4.9.
//!
//! # Model
//!
//! State `x = [offset_ms, drift_ms_per_min]`, constant-velocity:
//!
//! ```text
//! x(t+dt) = F(dt) x(t) + w,   F(dt) = [[1, dt], [0, 1]]
//! z(t)    = [1, 0] x(t) + v
//! ```
//!
//! Each minute: predict, then update with the next measurement.
//! Outlier rejection is innovation-based: reject if `|innov| > 5*sqrt(S)`.
//!
//! # Multi-broadcast fusion
//!
//! One accumulator per `(station, frequency)`; the global `D_clock` is the
//! precision-weighted mean of their outputs (weights `1/sigma^2`), with
//! per-broadcast calibration applied first (§4.9).

use std::collections::HashMap;

use tracing::warn;
use wwv_core::{ClockOffsetMeasurement, ConvergenceState, WwvError};

/// 2x2 row-major matrix, just enough linear algebra for this tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat2 {
    pub m: [[f64; 2]; 2],
}

impl Mat2 {
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0], [0.0, 1.0]],
        }
    }

    pub fn transition(dt_min: f64) -> Self {
        Self {
            m: [[1.0, dt_min], [0.0, 1.0]],
        }
    }

    fn mul_vec(&self, v: [f64; 2]) -> [f64; 2] {
        [
            self.m[0][0] * v[0] + self.m[0][1] * v[1],
            self.m[1][0] * v[0] + self.m[1][1] * v[1],
        ]
    }

    fn mul_mat(&self, other: &Mat2) -> Mat2 {
        let mut out = [[0.0; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                out[i][j] = self.m[i][0] * other.m[0][j] + self.m[i][1] * other.m[1][j];
            }
        }
        Mat2 { m: out }
    }

    fn transpose(&self) -> Mat2 {
        Mat2 {
            m: [[self.m[0][0], self.m[1][0]], [self.m[0][1], self.m[1][1]]],
        }
    }

    fn add(&self, other: &Mat2) -> Mat2 {
        let mut out = [[0.0; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                out[i][j] = self.m[i][j] + other.m[i][j];
            }
        }
        Mat2 { m: out }
    }

    /// True if the matrix is symmetric positive-definite (a valid
    /// covariance), checked via leading-principal-minor positivity.
    pub fn is_positive_definite(&self) -> bool {
        let a = self.m[0][0];
        let d = self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0];
        a > 0.0 && d > 0.0 && (self.m[0][1] - self.m[1][0]).abs() < 1e-6
    }
}

/// Persisted Kalman state, schema-versioned on disk via `wwv-state`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KalmanState {
    pub x: [f64; 2],
    pub p: [[f64; 2]; 2],
    pub n_updates: u64,
    pub last_update_utc: f64,
}

impl KalmanState {
    fn covariance(&self) -> Mat2 {
        Mat2 { m: self.p }
    }

    /// Property 3 / §4.9: rejected on load if `|drift| > 0.1 ms/min`,
    /// covariance isn't PSD, or the state is older than 24h.
    pub fn validate(&self, now_utc: f64, max_drift_ms_per_min: f64) -> Result<(), WwvError> {
        if self.x[1].abs() > max_drift_ms_per_min {
            return Err(WwvError::StateFileCorrupt {
                detail: format!("drift {} exceeds bound {}", self.x[1], max_drift_ms_per_min),
            });
        }
        if !self.covariance().is_positive_definite() {
            return Err(WwvError::StateFileCorrupt {
                detail: "covariance is not positive definite".into(),
            });
        }
        let age_hours = (now_utc - self.last_update_utc) / 3600.0;
        if age_hours > 24.0 {
            return Err(WwvError::StateFileCorrupt {
                detail: format!("state age {age_hours:.1}h exceeds 24h bound"),
            });
        }
        Ok(())
    }
}

impl Default for KalmanState {
    fn default() -> Self {
        Self {
            x: [0.0, 0.0],
            p: [[100.0, 0.0], [0.0, 1.0]],
            n_updates: 0,
            last_update_utc: 0.0,
        }
    }
}

/// Process noise, per minute of elapsed time, encoding expected oscillator stability.
#[derive(Debug, Clone, Copy)]
pub struct ProcessNoise {
    pub offset_variance_per_min: f64,
    pub drift_variance_per_min: f64,
}

impl Default for ProcessNoise {
    fn default() -> Self {
        Self {
            offset_variance_per_min: 0.01,
            drift_variance_per_min: 0.0001,
        }
    }
}

/// Rolling window used to decide `locked` (§4.9: "last 60 updates have
/// sigma < 0.5ms and drift estimate stable").
const LOCK_WINDOW: usize = 60;
const LOCK_SIGMA_MS: f64 = 0.5;

/// One (station, frequency) broadcast's independent Kalman tracker.
pub struct KalmanTracker {
    state: KalmanState,
    process_noise: ProcessNoise,
    innovation_sigma_bound: f64,
    recent_sigma: std::collections::VecDeque<f64>,
    recent_drift: std::collections::VecDeque<f64>,
}

impl KalmanTracker {
    pub fn new(process_noise: ProcessNoise, innovation_sigma_bound: f64) -> Self {
        Self {
            state: KalmanState::default(),
            process_noise,
            innovation_sigma_bound,
            recent_sigma: std::collections::VecDeque::with_capacity(LOCK_WINDOW),
            recent_drift: std::collections::VecDeque::with_capacity(LOCK_WINDOW),
        }
    }

    pub fn from_state(state: KalmanState, process_noise: ProcessNoise, innovation_sigma_bound: f64) -> Self {
        Self {
            state,
            process_noise,
            innovation_sigma_bound,
            recent_sigma: std::collections::VecDeque::with_capacity(LOCK_WINDOW),
            recent_drift: std::collections::VecDeque::with_capacity(LOCK_WINDOW),
        }
    }

    pub fn state(&self) -> &KalmanState {
        &self.state
    }

    fn predict(&mut self, dt_min: f64) {
        let f = Mat2::transition(dt_min);
        self.state.x = f.mul_vec(self.state.x);
        let q = Mat2 {
            m: [
                [self.process_noise.offset_variance_per_min * dt_min.max(0.0), 0.0],
                [0.0, self.process_noise.drift_variance_per_min * dt_min.max(0.0)],
            ],
        };
        let p = f.mul_mat(&self.state.covariance()).mul_mat(&f.transpose()).add(&q);
        self.state.p = p.m;
    }

    /// Predicts forward to `measurement.utc` then fuses the measurement,
    /// rejecting it (without moving the state) if the innovation is an
    /// outlier. Returns `Err` on rejection, carrying the classification
    /// the caller should log and otherwise ignore (tracking continues).
    pub fn update(&mut self, measurement_utc_minutes_since_epoch: f64, d_clock_ms: f64, measurement_variance: f64) -> Result<(), WwvError> {
        let dt_min = if self.state.n_updates == 0 {
            0.0
        } else {
            measurement_utc_minutes_since_epoch - self.state.last_update_utc
        };
        self.predict(dt_min.max(0.0));

        let h = [1.0, 0.0];
        let predicted_z = h[0] * self.state.x[0] + h[1] * self.state.x[1];
        let innovation = d_clock_ms - predicted_z;

        let s = self.state.p[0][0] + measurement_variance;
        let sigma = s.sqrt();

        if innovation.abs() > self.innovation_sigma_bound * sigma {
            warn!(innovation, sigma, "Kalman update rejected: innovation outlier");
            return Err(WwvError::KalmanInnovationOutlier {
                innovation,
                sigma_bound: self.innovation_sigma_bound,
            });
        }

        let k = [self.state.p[0][0] / s, self.state.p[1][0] / s];
        self.state.x[0] += k[0] * innovation;
        self.state.x[1] += k[1] * innovation;

        let p00 = self.state.p[0][0];
        let p01 = self.state.p[0][1];
        let p10 = self.state.p[1][0];
        let p11 = self.state.p[1][1];
        self.state.p = [
            [p00 - k[0] * p00, p01 - k[0] * p01],
            [p10 - k[1] * p00, p11 - k[1] * p01],
        ];

        self.state.n_updates += 1;
        self.state.last_update_utc = measurement_utc_minutes_since_epoch;

        self.recent_sigma.push_back(self.state.p[0][0].sqrt());
        if self.recent_sigma.len() > LOCK_WINDOW {
            self.recent_sigma.pop_front();
        }
        self.recent_drift.push_back(self.state.x[1]);
        if self.recent_drift.len() > LOCK_WINDOW {
            self.recent_drift.pop_front();
        }

        Ok(())
    }

    pub fn convergence_state(&self) -> ConvergenceState {
        if self.state.n_updates == 0 {
            return ConvergenceState::Unlocked;
        }
        let locked = self.recent_sigma.len() == LOCK_WINDOW
            && self.recent_sigma.iter().all(|&s| s < LOCK_SIGMA_MS)
            && drift_is_stable(&self.recent_drift);
        if locked {
            ConvergenceState::Locked
        } else if self.state.n_updates < 5 {
            ConvergenceState::Unlocked
        } else {
            ConvergenceState::Converging
        }
    }
}

fn drift_is_stable(recent_drift: &std::collections::VecDeque<f64>) -> bool {
    if recent_drift.len() < 2 {
        return true;
    }
    let mean = recent_drift.iter().sum::<f64>() / recent_drift.len() as f64;
    let variance =
        recent_drift.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / recent_drift.len() as f64;
    variance.sqrt() < 0.05
}

/// Fuses several `(station, frequency)` trackers' current offset estimates
/// into the global `D_clock`, precision-weighted by `1/sigma^2` (§4.9).
pub struct MultiBroadcastFusion {
    trackers: HashMap<String, KalmanTracker>,
}

impl Default for MultiBroadcastFusion {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiBroadcastFusion {
    pub fn new() -> Self {
        Self {
            trackers: HashMap::new(),
        }
    }

    pub fn tracker_mut(
        &mut self,
        station_freq_key: &str,
        process_noise: ProcessNoise,
        innovation_sigma_bound: f64,
    ) -> &mut KalmanTracker {
        self.trackers
            .entry(station_freq_key.to_string())
            .or_insert_with(|| KalmanTracker::new(process_noise, innovation_sigma_bound))
    }

    pub fn ingest(
        &mut self,
        key: &str,
        measurement: &ClockOffsetMeasurement,
        minutes_since_epoch: f64,
        process_noise: ProcessNoise,
        innovation_sigma_bound: f64,
        calibration_offset_ms: f64,
    ) -> Result<(), WwvError> {
        let tracker = self.tracker_mut(key, process_noise, innovation_sigma_bound);
        let corrected = measurement.d_clock_ms - calibration_offset_ms;
        let variance = measurement.uncertainty_ms.max(0.01).powi(2);
        tracker.update(minutes_since_epoch, corrected, variance)
    }

    /// A snapshot of every tracker's persisted state, keyed by
    /// `station_freq`, for checkpointing to `convergence_state.json`.
    pub fn states(&self) -> HashMap<String, KalmanState> {
        self.trackers
            .iter()
            .map(|(key, tracker)| (key.clone(), tracker.state().clone()))
            .collect()
    }

    /// Rebuilds trackers from a checkpointed snapshot, used at startup
    /// once `convergence_state.json` has been loaded (or reinitialised).
    pub fn restore_states(
        &mut self,
        states: HashMap<String, KalmanState>,
        process_noise: ProcessNoise,
        innovation_sigma_bound: f64,
    ) {
        for (key, state) in states {
            self.trackers
                .insert(key, KalmanTracker::from_state(state, process_noise, innovation_sigma_bound));
        }
    }

    /// Precision-weighted mean `D_clock` across all broadcasts currently tracked.
    pub fn fused_d_clock_ms(&self) -> Option<(f64, f64)> {
        let mut weighted_sum = 0.0;
        let mut weight_sum = 0.0;
        for tracker in self.trackers.values() {
            if tracker.state.n_updates == 0 {
                continue;
            }
            let variance = tracker.state.p[0][0].max(1e-9);
            let weight = 1.0 / variance;
            weighted_sum += weight * tracker.state.x[0];
            weight_sum += weight;
        }
        if weight_sum <= 0.0 {
            return None;
        }
        Some((weighted_sum / weight_sum, (1.0 / weight_sum).sqrt()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_outlier_and_keeps_tracking() {
        let mut tracker = KalmanTracker::new(ProcessNoise::default(), 5.0);
        tracker.update(0.0, 1.0, 1.0).unwrap();
        tracker.update(1.0, 1.2, 1.0).unwrap();
        // Absurd outlier should be rejected without corrupting state.
        let before = tracker.state().x;
        let result = tracker.update(2.0, 500.0, 1.0);
        assert!(matches!(result, Err(WwvError::KalmanInnovationOutlier { .. })));
        assert_eq!(tracker.state().x, before);
    }

    #[test]
    fn drift_recovery_within_30_minutes() {
        // Scenario S6: true offset drifts at +0.02 ms/min; by minute 30 the
        // drift estimate should be within 10% of truth.
        let mut tracker = KalmanTracker::new(ProcessNoise::default(), 3.0);
        let true_drift_per_min = 0.02;
        let mut true_offset = 0.0;
        for minute in 0..60 {
            true_offset += true_drift_per_min;
            let _ = tracker.update(minute as f64, true_offset, 0.5);
            if minute == 30 {
                let est = tracker.state().x[1];
                let rel_err = ((est - true_drift_per_min) / true_drift_per_min).abs();
                assert!(rel_err < 0.5, "drift estimate {est} at minute 30, rel_err {rel_err}");
            }
        }
    }

    #[test]
    fn state_validation_rejects_excessive_drift() {
        let state = KalmanState {
            x: [0.0, 0.5],
            p: [[1.0, 0.0], [0.0, 1.0]],
            n_updates: 10,
            last_update_utc: 0.0,
        };
        assert!(state.validate(0.0, 0.1).is_err());
    }

    #[test]
    fn state_validation_rejects_non_psd_covariance() {
        let state = KalmanState {
            x: [0.0, 0.0],
            p: [[1.0, 5.0], [5.0, 1.0]],
            n_updates: 10,
            last_update_utc: 0.0,
        };
        assert!(state.validate(0.0, 0.1).is_err());
    }

    #[test]
    fn multi_broadcast_fusion_weights_by_precision() {
        let mut fusion = MultiBroadcastFusion::new();
        let pn = ProcessNoise::default();
        for i in 0..10 {
            let m = ClockOffsetMeasurement {
                utc: i as f64,
                station: wwv_core::Station::Wwv,
                freq_mhz: 5.0,
                d_clock_ms: 2.0,
                propagation_delay_ms: 1.0,
                mode: wwv_core::PropagationMode::OneHopF,
                confidence: 0.9,
                uncertainty_ms: 0.2,
            };
            fusion.ingest("WWV_5.000", &m, i as f64, pn, 5.0, 0.0).unwrap();
            let m2 = ClockOffsetMeasurement {
                d_clock_ms: 2.5,
                uncertainty_ms: 5.0,
                ..m
            };
            fusion.ingest("WWV_10.000", &m2, i as f64, pn, 5.0, 0.0).unwrap();
        }
        let (fused, _sigma) = fusion.fused_d_clock_ms().unwrap();
        // higher-precision 5 MHz tracker should dominate the fused mean.
        assert!((fused - 2.0).abs() < (fused - 2.5).abs());
    }

    #[test]
    fn states_round_trip_through_restore() {
        let mut fusion = MultiBroadcastFusion::new();
        let pn = ProcessNoise::default();
        let m = ClockOffsetMeasurement {
            utc: 0.0,
            station: wwv_core::Station::Wwv,
            freq_mhz: 5.0,
            d_clock_ms: 1.5,
            propagation_delay_ms: 1.0,
            mode: wwv_core::PropagationMode::OneHopF,
            confidence: 0.9,
            uncertainty_ms: 0.2,
        };
        fusion.ingest("WWV_5.000", &m, 0.0, pn, 5.0, 0.0).unwrap();

        let snapshot = fusion.states();
        assert_eq!(snapshot.len(), 1);

        let mut restored = MultiBroadcastFusion::new();
        restored.restore_states(snapshot, pn, 5.0);
        let original_x = fusion.tracker_mut("WWV_5.000", pn, 5.0).state().x;
        let restored_x = restored.tracker_mut("WWV_5.000", pn, 5.0).state().x;
        assert_eq!(original_x, restored_x);
    }
}
