//! Configuration surface (§6): every option the orchestrator recognises,
//! loaded from a single TOML document. Defaults match §6 exactly.

use std::path::PathBuf;

use wwv_core::StationHint;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub center_freq_hz: f64,
    pub sample_rate_hz: u32,
    pub ssrc: u32,
    pub station_hint: StationHint,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RtpSourceConfig {
    pub multicast_group: String,
    pub port: u16,
    pub interface: String,
}

/// Receiver antenna location, needed by the propagation solver (C8) to
/// compute great-circle geometry for every enumerated hop candidate.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ReceiverLocationConfig {
    pub lat_deg: f64,
    pub lon_deg: f64,
}

/// Which `IonosphericModel` tier (§4.7) the orchestrator instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IonosphereTierConfig {
    Climatology,
    ParametricDiurnal,
    StaticDayNight,
}

impl Default for IonosphereTierConfig {
    fn default() -> Self {
        IonosphereTierConfig::Climatology
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ArchiveSurfaceConfig {
    pub root: PathBuf,
    pub file_duration_sec: f64,
    pub compression_level: u8,
}

impl Default for ArchiveSurfaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./archive"),
            file_duration_sec: 3600.0,
            compression_level: 9,
        }
    }
}

/// Phase 2 tuning surface, defaults from §6.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Phase2Config {
    pub startup_buffer_sec: f64,
    pub periodic_tone_check_sec: f64,
    pub innovation_sigma: f64,
    pub reset_on_drift_ms_per_min: f64,
}

impl Default for Phase2Config {
    fn default() -> Self {
        Self {
            startup_buffer_sec: 120.0,
            periodic_tone_check_sec: 300.0,
            innovation_sigma: 5.0,
            reset_on_drift_ms_per_min: 0.1,
        }
    }
}

/// Phase 3 tuning surface, defaults from §6.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Phase3Config {
    pub streaming_latency_sec: f64,
    pub output_rate_hz: f64,
}

impl Default for Phase3Config {
    fn default() -> Self {
        Self {
            streaming_latency_sec: 120.0,
            output_rate_hz: 10.0,
        }
    }
}

/// Top-level orchestrator configuration, deserialised from the
/// operator-supplied TOML document.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PipelineConfig {
    pub channels: Vec<ChannelConfig>,
    pub rtp_source: RtpSourceConfig,
    pub receiver_location: ReceiverLocationConfig,
    #[serde(default)]
    pub archive: ArchiveSurfaceConfig,
    #[serde(default)]
    pub phase2: Phase2Config,
    #[serde(default)]
    pub phase3: Phase3Config,
    #[serde(default)]
    pub ionosphere_tier: IonosphereTierConfig,
    pub state_root: PathBuf,
    /// Bound on each channel worker's packet queue (§5 back-pressure).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Hard deadline for graceful shutdown before forcing termination (§5).
    #[serde(default = "default_shutdown_deadline_sec")]
    pub shutdown_deadline_sec: f64,
}

fn default_queue_capacity() -> usize {
    4096
}

fn default_shutdown_deadline_sec() -> f64 {
    30.0
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase2_defaults_match_spec() {
        let defaults = Phase2Config::default();
        assert_eq!(defaults.startup_buffer_sec, 120.0);
        assert_eq!(defaults.periodic_tone_check_sec, 300.0);
        assert_eq!(defaults.innovation_sigma, 5.0);
        assert_eq!(defaults.reset_on_drift_ms_per_min, 0.1);
    }

    #[test]
    fn phase3_defaults_match_spec() {
        let defaults = Phase3Config::default();
        assert_eq!(defaults.streaming_latency_sec, 120.0);
        assert_eq!(defaults.output_rate_hz, 10.0);
    }

    #[test]
    fn parses_minimal_toml_with_defaults() {
        let toml_text = r#"
state_root = "/tmp/wwv-state"

[rtp_source]
multicast_group = "239.1.1.1"
port = 5004
interface = "eth0"

[receiver_location]
lat_deg = 40.0
lon_deg = -105.0

[[channels]]
name = "wwv_5mhz"
center_freq_hz = 5000000.0
sample_rate_hz = 20000
ssrc = 1
station_hint = "Shared"
"#;
        let config: PipelineConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.channels.len(), 1);
        assert_eq!(config.phase2.innovation_sigma, 5.0);
        assert_eq!(config.queue_capacity, 4096);
    }
}
