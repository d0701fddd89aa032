/// Which broadcast station(s) a channel is expected to carry.
///
/// `Shared` marks a co-channel frequency where both WWV and WWVH (or CHU
/// alongside either) may be present and discrimination (C6) is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum StationHint {
    Wwv,
    Wwvh,
    Chu,
    Shared,
}

/// The station actually identified for a given observation, as opposed to
/// the channel's a-priori `StationHint`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Station {
    Wwv,
    Wwvh,
    Chu,
}

impl Station {
    /// The minute-marker tone frequency this station transmits (Hz).
    pub fn marker_tone_hz(self) -> f64 {
        match self {
            Station::Wwv | Station::Chu => 1000.0,
            Station::Wwvh => 1200.0,
        }
    }

    /// Nominal marker duration in milliseconds (§4.3).
    pub fn marker_duration_ms(self) -> f64 {
        match self {
            Station::Wwv | Station::Wwvh => 800.0,
            Station::Chu => 500.0,
        }
    }
}

/// Immutable once a channel is opened. Identifies an RTP stream (by SSRC)
/// and the station(s) expected on it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChannelDescriptor {
    pub name: String,
    pub center_frequency_hz: f64,
    pub sample_rate_hz: u32,
    pub station_hint: StationHint,
    pub ssrc: u32,
}

impl ChannelDescriptor {
    pub fn station_freq_key(&self, station: Station) -> String {
        format!("{:?}_{:.3}", station, self.center_frequency_hz / 1.0e6)
    }
}
