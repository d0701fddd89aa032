//! Transmission-time solver (C8): enumerates candidate propagation
//! modes for a station/frequency/arrival-time triple, scores them
//! against an observed delay, and returns the best mode plus its
//! uncertainty (§4.8).

use wwv_core::{PropagationMode, Station};

use crate::geometry::{great_circle_distance_km, station_location};
use crate::ionosphere::{IonosphericModel, LatLon};

const SPEED_OF_LIGHT_KM_PER_MS: f64 = 299.792458;
const E_LAYER_HEIGHT_KM: f64 = 110.0;

/// Ionospheric group delay constant: `tau_iono_ms = K * slant_TEC_tecu / freq_mhz^2`,
/// derived from `40.3 * TEC / (c * f^2)` with TEC in TECU and f in MHz (§4.8: "1/f^2 physics").
const K_IONO_MS_PER_TECU_MHZ2: f64 = 0.1343;

fn hop_count(mode: PropagationMode) -> Option<u32> {
    match mode {
        PropagationMode::OneHopE | PropagationMode::OneHopF => Some(1),
        PropagationMode::TwoHopF => Some(2),
        PropagationMode::ThreeHopF => Some(3),
        PropagationMode::Chordal | PropagationMode::Sidescatter => None,
    }
}

fn reflection_height_km(mode: PropagationMode, ionosphere: &dyn IonosphericModel, utc: f64, midpoint: LatLon) -> f64 {
    match mode {
        PropagationMode::OneHopE => E_LAYER_HEIGHT_KM,
        _ => ionosphere.layer_height_km(utc, midpoint),
    }
}

/// A candidate propagation mode with its predicted delay and the
/// ionospheric slant TEC that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeCandidate {
    pub mode: PropagationMode,
    pub predicted_delay_ms: f64,
    pub geometric_delay_ms: f64,
    pub ionospheric_delay_ms: f64,
    pub slant_tec_tecu: f64,
}

/// Slant-path length for `n` hops off a layer at `height_km`, given the
/// total great-circle ground distance, via the classical secant-law
/// ray-hop approximation (equal-height equal-angle hops).
fn hop_slant_path_km(ground_distance_km: f64, height_km: f64, n_hops: u32) -> f64 {
    let per_hop_ground = ground_distance_km / n_hops as f64;
    let half_ground = per_hop_ground / 2.0;
    let per_hop_slant = 2.0 * (half_ground.powi(2) + height_km.powi(2)).sqrt();
    per_hop_slant * n_hops as f64
}

fn hop_secant(ground_distance_km: f64, height_km: f64, n_hops: u32) -> f64 {
    let per_hop_ground = ground_distance_km / n_hops as f64;
    let zenith = (per_hop_ground / 2.0 / height_km).atan();
    (1.0 / zenith.cos()).min(10.0)
}

/// Enumerates every candidate mode for a station/frequency/arrival-time
/// triple and computes each one's predicted delay using great-circle
/// geometry and the supplied ionospheric model.
pub fn enumerate_candidates(
    station: Station,
    receiver: LatLon,
    freq_mhz: f64,
    utc: f64,
    ionosphere: &dyn IonosphericModel,
) -> Vec<ModeCandidate> {
    let transmitter = station_location(station);
    let ground_distance_km = great_circle_distance_km(transmitter, receiver);
    let midpoint = LatLon {
        lat_deg: (transmitter.lat_deg + receiver.lat_deg) / 2.0,
        lon_deg: (transmitter.lon_deg + receiver.lon_deg) / 2.0,
    };

    let hop_modes = [
        PropagationMode::OneHopE,
        PropagationMode::OneHopF,
        PropagationMode::TwoHopF,
        PropagationMode::ThreeHopF,
    ];

    let mut candidates: Vec<ModeCandidate> = hop_modes
        .iter()
        .map(|&mode| {
            let n = hop_count(mode).expect("hop modes always have a hop count");
            let height_km = reflection_height_km(mode, ionosphere, utc, midpoint);
            let slant_km = hop_slant_path_km(ground_distance_km, height_km, n);
            let secant = hop_secant(ground_distance_km, height_km, n);
            let vertical_tec = ionosphere.tec_tecu(utc, midpoint);
            let slant_tec = vertical_tec * secant * n as f64;
            let geometric_delay_ms = slant_km / SPEED_OF_LIGHT_KM_PER_MS;
            let ionospheric_delay_ms = K_IONO_MS_PER_TECU_MHZ2 * slant_tec / freq_mhz.powi(2);
            ModeCandidate {
                mode,
                predicted_delay_ms: geometric_delay_ms + ionospheric_delay_ms,
                geometric_delay_ms,
                ionospheric_delay_ms,
                slant_tec_tecu: slant_tec,
            }
        })
        .collect();

    // Chordal: a near-direct low-angle path, negligible reflection, used
    // for short baselines where the great-circle path itself is plausible.
    let chordal_geometric_ms = ground_distance_km / SPEED_OF_LIGHT_KM_PER_MS;
    let chordal_vertical_tec = ionosphere.tec_tecu(utc, midpoint);
    let chordal_iono_ms = K_IONO_MS_PER_TECU_MHZ2 * chordal_vertical_tec * 0.1 / freq_mhz.powi(2);
    candidates.push(ModeCandidate {
        mode: PropagationMode::Chordal,
        predicted_delay_ms: chordal_geometric_ms + chordal_iono_ms,
        geometric_delay_ms: chordal_geometric_ms,
        ionospheric_delay_ms: chordal_iono_ms,
        slant_tec_tecu: chordal_vertical_tec * 0.1,
    });

    // Sidescatter: off-great-circle path, systematically longer than the
    // direct route, with a single-hop-equivalent ionospheric contribution.
    let sidescatter_height = ionosphere.layer_height_km(utc, midpoint);
    let sidescatter_path_km = ground_distance_km * 1.15 + sidescatter_height * 0.5;
    let sidescatter_vertical_tec = ionosphere.tec_tecu(utc, midpoint);
    let sidescatter_iono_ms = K_IONO_MS_PER_TECU_MHZ2 * sidescatter_vertical_tec * 1.5 / freq_mhz.powi(2);
    candidates.push(ModeCandidate {
        mode: PropagationMode::Sidescatter,
        predicted_delay_ms: sidescatter_path_km / SPEED_OF_LIGHT_KM_PER_MS + sidescatter_iono_ms,
        geometric_delay_ms: sidescatter_path_km / SPEED_OF_LIGHT_KM_PER_MS,
        ionospheric_delay_ms: sidescatter_iono_ms,
        slant_tec_tecu: sidescatter_vertical_tec * 1.5,
    });

    candidates
}

/// Best-matching mode for an observed delay, plus a confidence derived
/// from how much better it fits than the runner-up (§4.8: "mode selection
/// scores candidates by predicted delay consistency with observations").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeSelection {
    pub mode: PropagationMode,
    pub predicted_delay_ms: f64,
    pub confidence: f64,
    pub uncertainty_ms: f64,
}

pub fn select_mode(candidates: &[ModeCandidate], observed_delay_ms: f64) -> Option<ModeSelection> {
    if candidates.is_empty() {
        return None;
    }
    let mut scored: Vec<(f64, &ModeCandidate)> = candidates
        .iter()
        .map(|c| ((c.predicted_delay_ms - observed_delay_ms).abs(), c))
        .collect();
    scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let (best_err, best) = scored[0];
    let runner_up_err = scored.get(1).map(|(e, _)| *e).unwrap_or(f64::INFINITY);
    // confidence rises with the separation between best and runner-up,
    // relative to the magnitude of the best error itself.
    let gap = (runner_up_err - best_err).max(0.0);
    let confidence = (gap / (gap + best_err + 1.0)).clamp(0.0, 1.0);

    Some(ModeSelection {
        mode: best.mode,
        predicted_delay_ms: best.predicted_delay_ms,
        confidence,
        uncertainty_ms: best_err.max(0.05),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ionosphere::StaticDayNight;

    #[test]
    fn ionospheric_delay_scales_as_inverse_frequency_squared() {
        // Property 6: fixed TEC, the 2.5MHz delay is 16x the 10MHz delay.
        let ionosphere = StaticDayNight::default();
        let receiver = LatLon {
            lat_deg: 35.0,
            lon_deg: -100.0,
        };
        let candidates_low = enumerate_candidates(Station::Wwv, receiver, 2.5, 43200.0, &ionosphere);
        let candidates_high = enumerate_candidates(Station::Wwv, receiver, 10.0, 43200.0, &ionosphere);
        let low = candidates_low
            .iter()
            .find(|c| c.mode == PropagationMode::OneHopF)
            .unwrap();
        let high = candidates_high
            .iter()
            .find(|c| c.mode == PropagationMode::OneHopF)
            .unwrap();
        let ratio = low.ionospheric_delay_ms / high.ionospheric_delay_ms;
        assert!((ratio - 16.0).abs() / 16.0 < 0.01, "ratio={ratio}");
    }

    #[test]
    fn higher_hop_count_yields_longer_geometric_delay() {
        let ionosphere = StaticDayNight::default();
        let receiver = LatLon {
            lat_deg: 35.0,
            lon_deg: -100.0,
        };
        let candidates = enumerate_candidates(Station::Wwv, receiver, 10.0, 43200.0, &ionosphere);
        let one_hop = candidates
            .iter()
            .find(|c| c.mode == PropagationMode::OneHopF)
            .unwrap();
        let three_hop = candidates
            .iter()
            .find(|c| c.mode == PropagationMode::ThreeHopF)
            .unwrap();
        assert!(three_hop.geometric_delay_ms > one_hop.geometric_delay_ms);
    }

    #[test]
    fn select_mode_picks_closest_match() {
        let ionosphere = StaticDayNight::default();
        let receiver = LatLon {
            lat_deg: 35.0,
            lon_deg: -100.0,
        };
        let candidates = enumerate_candidates(Station::Wwv, receiver, 10.0, 43200.0, &ionosphere);
        let one_hop = candidates
            .iter()
            .find(|c| c.mode == PropagationMode::OneHopF)
            .unwrap();
        let selection = select_mode(&candidates, one_hop.predicted_delay_ms).unwrap();
        assert_eq!(selection.mode, PropagationMode::OneHopF);
    }
}
