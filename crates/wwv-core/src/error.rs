use std::fmt;

/// Stable error taxonomy shared across every pipeline crate.
///
/// Mirrors the error-kind table in the design's error-handling section:
/// each variant is either locally recovered by its owning component (and
/// only surfaced for logging/telemetry) or propagated to the orchestrator
/// as a degraded-but-continuing condition. Nothing in this pipeline is
/// allowed to panic across a component boundary; every fallible operation
/// returns `Result<_, WwvError>`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum WwvError {
    /// `seq` behind the resequencer's expected window; dropped, not counted as loss.
    #[error("duplicate or stale packet (seq behind window)")]
    PacketDuplicate,

    /// `seq` inside the window but its slot already vacated; counted as loss.
    #[error("packet too old for resequencer window")]
    PacketTooOld,

    /// Gap exceeded the resync bound; the resequencer flushed and resynced.
    #[error("resync required: gap of {jump} samples exceeds bound")]
    Resync { jump: i64 },

    /// A non-fatal source outage: no packets for longer than the configured silence window.
    #[error("RTP source unavailable for {elapsed_secs}s")]
    SourceUnavailable { elapsed_secs: f64 },

    /// Tone search completed without a detection meeting the SNR threshold.
    #[error("tone detection below SNR threshold ({snr_db:.1} dB < {threshold_db:.1} dB)")]
    TonePoorSnr { snr_db: f64, threshold_db: f64 },

    /// 1000 Hz and 1200 Hz templates scored within 3 dB of each other.
    #[error("tone detections ambiguous between WWV and WWVH markers")]
    TonesAmbiguous,

    /// Discrimination's maximum posterior fell below the confidence floor.
    #[error("discrimination uncertain: max(p) = {max_p:.3}")]
    DiscriminationUncertain { max_p: f64 },

    /// Kalman innovation exceeded the configured sigma bound; measurement rejected.
    #[error("Kalman innovation outlier: |innov|={innovation:.3} > {sigma_bound:.1}*sqrt(S)")]
    KalmanInnovationOutlier { innovation: f64, sigma_bound: f64 },

    /// A persisted state file failed a load-time invariant and was reinitialised.
    #[error("state file corrupt or invalid, reinitialising: {detail}")]
    StateFileCorrupt { detail: String },

    /// Archive write failed; channel enters degraded mode with retry/backoff.
    #[error("archive write failed: {0}")]
    ArchiveWriteFailed(String),

    /// No NTP and no tone detection for longer than the fallback window.
    #[error("no authoritative time source for {elapsed_secs}s, falling back to wall clock")]
    TimeSnapMissing { elapsed_secs: f64 },

    /// Catch-all for I/O failures surfaced from an adapter boundary (archive files, state files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for malformed persisted JSON/CSV.
    #[error("serialization error: {0}")]
    Serde(String),
}

impl WwvError {
    /// A stable, machine-matchable code, following the `<domain>.<reason>` convention.
    ///
    /// Downstream telemetry keys off this rather than the `Display` string, which
    /// is allowed to carry dynamic detail.
    pub fn code(&self) -> &'static str {
        match self {
            WwvError::PacketDuplicate => "ingest.packet_duplicate",
            WwvError::PacketTooOld => "ingest.packet_too_old",
            WwvError::Resync { .. } => "ingest.resync",
            WwvError::SourceUnavailable { .. } => "ingest.source_unavailable",
            WwvError::TonePoorSnr { .. } => "dsp.tone_poor_snr",
            WwvError::TonesAmbiguous => "dsp.tones_ambiguous",
            WwvError::DiscriminationUncertain { .. } => "timing.discrimination_uncertain",
            WwvError::KalmanInnovationOutlier { .. } => "timing.kalman_innovation_outlier",
            WwvError::StateFileCorrupt { .. } => "state.corrupt",
            WwvError::ArchiveWriteFailed(_) => "ingest.archive_write_failed",
            WwvError::TimeSnapMissing { .. } => "timing.time_snap_missing",
            WwvError::Io(_) => "io.generic",
            WwvError::Serde(_) => "state.serde",
        }
    }

    /// Whether this kind, by design, is locally recovered (continue processing)
    /// rather than escalated to a channel-fatal condition.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, WwvError::ArchiveWriteFailed(_))
    }
}

/// Discontinuity/quality kinds recorded per processed minute, surfaced to
/// consumers as the "quality annotation" the design calls for without
/// specifying a concrete type (see SPEC_FULL.md §4.x).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum QualityFlag {
    GapFilled,
    SourceUnavailable,
    TonePoorSnr,
    TonesAmbiguous,
    DiscriminationUncertain,
    KalmanInnovationOutlier,
    StateFileCorrupt,
    ArchiveDegraded,
    TimeSnapLowConfidence,
    QueueOverflow,
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QualityFlag::GapFilled => "gap_filled",
            QualityFlag::SourceUnavailable => "source_unavailable",
            QualityFlag::TonePoorSnr => "tone_poor_snr",
            QualityFlag::TonesAmbiguous => "tones_ambiguous",
            QualityFlag::DiscriminationUncertain => "discrimination_uncertain",
            QualityFlag::KalmanInnovationOutlier => "kalman_innovation_outlier",
            QualityFlag::StateFileCorrupt => "state_file_corrupt",
            QualityFlag::ArchiveDegraded => "archive_degraded",
            QualityFlag::TimeSnapLowConfidence => "time_snap_low_confidence",
            QualityFlag::QueueOverflow => "queue_overflow",
        };
        f.write_str(s)
    }
}

/// Accumulates which quality-affecting kinds fired for one processing minute.
///
/// Attached to every `ClockOffsetMeasurement` and `DiscriminationResult` that
/// leaves the pipeline, so an uploader-side consumer can see at a glance
/// whether a given minute's numbers should be trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QualityAnnotation {
    flags: Vec<QualityFlag>,
}

impl QualityAnnotation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, flag: QualityFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn flags(&self) -> &[QualityFlag] {
        &self.flags
    }
}

pub type WwvResult<T> = Result<T, WwvError>;
