use crate::channel::Station;
use crate::wrap::signed_wrap_u32;

/// Provenance tier of a `TimeSnap`. Ordered so that `tone_running >=
/// tone_startup > ntp > wall_clock` — `PartialOrd`'s derived lexical order
/// on the enum's declaration order gives us that directly as long as
/// variants stay declared strongest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum TimeSnapSource {
    TonePrecise,
    TonePrimary,
    Ntp,
    WallClock,
}

impl TimeSnapSource {
    /// Confidence range documented for this tier in §4.3.
    pub fn typical_confidence_range(self) -> (f64, f64) {
        match self {
            TimeSnapSource::TonePrecise | TimeSnapSource::TonePrimary => (0.90, 0.99),
            TimeSnapSource::Ntp => (0.5, 0.7),
            TimeSnapSource::WallClock => (0.1, 0.3),
        }
    }
}

/// The precision-timing anchor: maps any later sample (by `rtp_ts`) to a
/// UTC timestamp. The only permitted time mapping once established (§3).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeSnap {
    pub rtp_ts_anchor: u32,
    pub utc_anchor: f64,
    pub sample_rate: u32,
    pub source: TimeSnapSource,
    pub confidence: f64,
    pub established_at: f64,
    pub station: Station,
}

impl TimeSnap {
    /// `utc(t) = utc_anchor + signed_wrap(t - rtp_ts_anchor) / sample_rate`.
    pub fn utc_of(&self, rtp_ts: u32) -> f64 {
        let delta_samples = signed_wrap_u32(rtp_ts, self.rtp_ts_anchor);
        self.utc_anchor + (delta_samples as f64) / (self.sample_rate as f64)
    }

    /// Whether `other` would be a valid *upgrade* of `self` under the
    /// tier-then-confidence rule in §3/§8 property 2: adoption never
    /// lowers the confidence tier, and only a strictly better candidate
    /// within the same or a higher tier replaces the current snap.
    pub fn is_upgraded_by(&self, other: &TimeSnap) -> bool {
        match other.source.cmp(&self.source) {
            std::cmp::Ordering::Less => true, // lower ordinal = stronger tier
            std::cmp::Ordering::Equal => other.confidence > self.confidence,
            std::cmp::Ordering::Greater => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(source: TimeSnapSource, confidence: f64) -> TimeSnap {
        TimeSnap {
            rtp_ts_anchor: 0,
            utc_anchor: 1_700_000_000.0,
            sample_rate: 20_000,
            source,
            confidence,
            established_at: 1_700_000_000.0,
            station: Station::Wwv,
        }
    }

    #[test]
    fn monotonic_tier_never_downgrades() {
        // property 2: tone_* > ntp > wall_clock, upgrades never apply in reverse.
        let tone = snap(TimeSnapSource::TonePrimary, 0.95);
        let ntp = snap(TimeSnapSource::Ntp, 0.99);
        assert!(!tone.is_upgraded_by(&ntp), "ntp must never replace a tone snap even at higher confidence");
        assert!(ntp.is_upgraded_by(&tone));
    }

    #[test]
    fn same_tier_upgrades_on_confidence() {
        let weak = snap(TimeSnapSource::TonePrimary, 0.90);
        let strong = snap(TimeSnapSource::TonePrecise, 0.97);
        assert!(weak.is_upgraded_by(&strong));
        assert!(!strong.is_upgraded_by(&weak));
    }

    #[test]
    fn utc_mapping_respects_wrap() {
        let mut anchor = snap(TimeSnapSource::TonePrimary, 0.95);
        anchor.rtp_ts_anchor = 0xFFFF_FE00;
        anchor.sample_rate = 1000;
        // 512 samples after the anchor, even across the u32 wrap.
        let utc = anchor.utc_of(0x0000_0000u32.wrapping_add(256));
        assert!((utc - (1_700_000_000.0 + 0.768)).abs() < 1e-9);
    }
}
