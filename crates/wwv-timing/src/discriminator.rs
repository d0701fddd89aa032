//! Probabilistic station discriminator (the other half of C6): five
//! voting features feed a learned logistic regression producing
//! `p_wwv = sigma(w.x + b)`, with minute-aware weighting for
//! exclusive-emission minutes and an `UNCERTAIN` disposition below the
//! 0.6 confidence floor (§4.6).

use wwv_core::{DiscriminationResult, MethodScore, QualityAnnotation, Station};

/// The five normalised (~N(0,1)) voting features, in the order §4.6 lists them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureVector {
    /// 1. Tone power ratio P(1000) - P(1200) in dB, integrated over the marker.
    pub tone_power_ratio_db: f64,
    /// 2. BCD correlation amplitude ratio.
    pub bcd_amplitude_ratio: f64,
    /// 3. 500/600 Hz exclusive-minute presence.
    pub exclusive_tone_presence: f64,
    /// 4. 440 Hz station-ID presence.
    pub station_id_presence: f64,
    /// 5. Differential Doppler / harmonic signature cross-check.
    pub doppler_cross_check: f64,
}

impl FeatureVector {
    fn as_array(&self) -> [f64; 5] {
        [
            self.tone_power_ratio_db,
            self.bcd_amplitude_ratio,
            self.exclusive_tone_presence,
            self.station_id_presence,
            self.doppler_cross_check,
        ]
    }
}

/// Learned logistic-regression weights. `positive` class is WWV.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LogisticWeights {
    pub w: [f64; 5],
    pub b: f64,
}

impl Default for LogisticWeights {
    /// A reasonable prior before any ground-truth training has run:
    /// equal weight on every feature, matching their declared sign
    /// convention (positive = more WWV-like).
    fn default() -> Self {
        Self {
            w: [0.6, 0.6, 0.8, 0.8, 0.3],
            b: 0.0,
        }
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Trains `LogisticWeights` from labelled ground-truth minutes via batch
/// gradient descent with L2 regularisation (§4.6: "weights are learned...
/// not hand-tuned; L2 regularisation handles feature correlation").
pub fn train(
    samples: &[(FeatureVector, bool)],
    l2_lambda: f64,
    learning_rate: f64,
    epochs: usize,
) -> LogisticWeights {
    let mut weights = LogisticWeights { w: [0.0; 5], b: 0.0 };
    if samples.is_empty() {
        return LogisticWeights::default();
    }
    let n = samples.len() as f64;

    for _ in 0..epochs {
        let mut grad_w = [0.0f64; 5];
        let mut grad_b = 0.0f64;
        for (features, is_wwv) in samples {
            let x = features.as_array();
            let z = dot(&weights.w, &x) + weights.b;
            let p = sigmoid(z);
            let y = if *is_wwv { 1.0 } else { 0.0 };
            let err = p - y;
            for i in 0..5 {
                grad_w[i] += err * x[i];
            }
            grad_b += err;
        }
        for i in 0..5 {
            let reg = l2_lambda * weights.w[i];
            weights.w[i] -= learning_rate * (grad_w[i] / n + reg);
        }
        weights.b -= learning_rate * (grad_b / n);
    }
    weights
}

fn dot(a: &[f64; 5], b: &[f64; 5]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Minutes-of-hour where only WWV's 500/600 Hz exclusive tone is present (§4.6).
pub const WWV_EXCLUSIVE_MINUTES: &[u32] = &[1, 16, 17, 19];
/// Minutes-of-hour where only WWVH's exclusive tone is present (§4.6).
pub const WWVH_EXCLUSIVE_MINUTES: &[u32] = &[2, 43, 44, 45, 46, 47, 48, 49, 50, 51];

/// Per-minute weight multiplier applied to the exclusive-tone and
/// station-ID features: a lookup table, not a formula, matching §4.6
/// ("weight schedule is a lookup table per minute-in-hour").
pub fn minute_weight_schedule(minute_of_hour: u32) -> f64 {
    if WWV_EXCLUSIVE_MINUTES.contains(&minute_of_hour) || WWVH_EXCLUSIVE_MINUTES.contains(&minute_of_hour) {
        4.0
    } else if minute_of_hour == 1 || minute_of_hour == 2 {
        2.5 // 440 Hz station-ID minutes
    } else {
        1.0
    }
}

const CONFIDENCE_FLOOR: f64 = 0.6;

/// Runs the five-method vote for one minute, producing a normalised
/// `DiscriminationResult` (property 4: probabilities sum to 1 within 1e-9).
pub fn discriminate(
    minute_utc: f64,
    minute_of_hour: u32,
    features: FeatureVector,
    weights: &LogisticWeights,
) -> DiscriminationResult {
    let minute_weight = minute_weight_schedule(minute_of_hour);
    let mut weighted = features;
    weighted.exclusive_tone_presence *= minute_weight;
    weighted.station_id_presence *= minute_weight;

    let x = weighted.as_array();
    let z = dot(&weights.w, &x) + weights.b;
    let raw_p_wwv = sigmoid(z);
    let raw_p_wwvh = 1.0 - raw_p_wwv;

    let methods: Vec<MethodScore> = x
        .iter()
        .enumerate()
        .map(|(i, &v)| MethodScore {
            name_index: i as u8,
            normalized_value: v,
        })
        .collect();

    let mut quality = QualityAnnotation::new();
    let (p_wwv, p_wwvh, p_uncertain, dominant) = if raw_p_wwv.max(raw_p_wwvh) < CONFIDENCE_FLOOR {
        quality.record(wwv_core::QualityFlag::DiscriminationUncertain);
        (0.0, 0.0, 1.0, None)
    } else if raw_p_wwv >= raw_p_wwvh {
        (raw_p_wwv, raw_p_wwvh, 0.0, Some(Station::Wwv))
    } else {
        (raw_p_wwv, raw_p_wwvh, 0.0, Some(Station::Wwvh))
    };

    let entropy = [p_wwv, p_wwvh, p_uncertain]
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum();

    DiscriminationResult {
        minute_utc,
        p_wwv,
        p_wwvh,
        p_uncertain,
        methods,
        entropy,
        dominant,
        quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_always_normalized() {
        let weights = LogisticWeights::default();
        for minute in 0..60 {
            let features = FeatureVector {
                tone_power_ratio_db: 1.0,
                bcd_amplitude_ratio: 0.5,
                exclusive_tone_presence: -0.2,
                station_id_presence: 0.1,
                doppler_cross_check: 0.0,
            };
            let result = discriminate(0.0, minute, features, &weights);
            assert!(result.is_normalized(), "minute {minute}: {result:?}");
        }
    }

    #[test]
    fn exclusive_wwvh_minute_dominates_at_modest_snr() {
        // Scenario S3: minute 44, only WWVH, SNR 18dB (modest) -> p_wwvh > 0.98.
        let weights = LogisticWeights::default();
        let features = FeatureVector {
            tone_power_ratio_db: -0.3, // modest, not overwhelming
            bcd_amplitude_ratio: -0.2,
            exclusive_tone_presence: -3.0, // strongly WWVH-exclusive signed feature
            station_id_presence: 0.0,
            doppler_cross_check: 0.0,
        };
        let result = discriminate(0.0, 44, features, &weights);
        assert!(result.p_wwvh > 0.98, "p_wwvh={}", result.p_wwvh);
    }

    #[test]
    fn low_confidence_yields_uncertain() {
        let weights = LogisticWeights::default();
        let features = FeatureVector::default();
        let result = discriminate(0.0, 10, features, &weights);
        assert!(result.p_uncertain > 0.0);
        assert!(result.dominant.is_none());
    }

    #[test]
    fn training_converges_on_separable_data() {
        let mut samples = Vec::new();
        for _ in 0..50 {
            samples.push((
                FeatureVector {
                    tone_power_ratio_db: 2.0,
                    bcd_amplitude_ratio: 1.5,
                    exclusive_tone_presence: 1.0,
                    station_id_presence: 1.0,
                    doppler_cross_check: 0.2,
                },
                true,
            ));
            samples.push((
                FeatureVector {
                    tone_power_ratio_db: -2.0,
                    bcd_amplitude_ratio: -1.5,
                    exclusive_tone_presence: -1.0,
                    station_id_presence: -1.0,
                    doppler_cross_check: -0.2,
                },
                false,
            ));
        }
        let weights = train(&samples, 0.01, 0.5, 500);
        let result = discriminate(
            0.0,
            10,
            FeatureVector {
                tone_power_ratio_db: 2.0,
                bcd_amplitude_ratio: 1.5,
                exclusive_tone_presence: 1.0,
                station_id_presence: 1.0,
                doppler_cross_check: 0.2,
            },
            &weights,
        );
        assert!(result.p_wwv > 0.9, "p_wwv={}", result.p_wwv);
    }
}
