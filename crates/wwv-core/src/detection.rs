use crate::channel::Station;
use crate::error::QualityAnnotation;

/// Result of a single matched-filter tone search (C3/C4).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToneDetection {
    pub station: Station,
    pub tone_frequency_hz: f64,
    pub onset_rtp_ts: f64,
    pub timing_error_ms: f64,
    pub snr_db: f64,
    pub confidence: f64,
    pub phase_rad: f64,
}

/// Per-method sub-result contributing to a `DiscriminationResult` (§4.6
/// features 1-5).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MethodScore {
    pub name_index: u8,
    pub normalized_value: f64,
}

/// Output of the five-method station vote (C6).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DiscriminationResult {
    pub minute_utc: f64,
    pub p_wwv: f64,
    pub p_wwvh: f64,
    pub p_uncertain: f64,
    pub methods: Vec<MethodScore>,
    pub entropy: f64,
    pub dominant: Option<Station>,
    pub quality: QualityAnnotation,
}

impl DiscriminationResult {
    /// Property 4: the three probabilities must sum to 1 within 1e-9.
    pub fn is_normalized(&self) -> bool {
        (self.p_wwv + self.p_wwvh + self.p_uncertain - 1.0).abs() < 1e-9
    }
}

/// Propagation mode identified by the transmission-time solver (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PropagationMode {
    OneHopE,
    OneHopF,
    TwoHopF,
    ThreeHopF,
    Chordal,
    Sidescatter,
}

/// One fused `D_clock` observation, ready for the Kalman tracker (C9).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ClockOffsetMeasurement {
    pub utc: f64,
    pub station: Station,
    pub freq_mhz: f64,
    pub d_clock_ms: f64,
    pub propagation_delay_ms: f64,
    pub mode: PropagationMode,
    pub confidence: f64,
    pub uncertainty_ms: f64,
}

/// Convergence tier reported by the Kalman tracker (C9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ConvergenceState {
    Unlocked,
    Converging,
    Locked,
}
