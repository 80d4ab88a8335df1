/*
 *  Copyright (C) 2025 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Transmission-Time Solver (C6, Step 3): turns a Step-1 tone onset plus a
//! Step-2 channel characterization into a clock-offset estimate, marginalized
//! over the propagation modes that could plausibly explain the measured
//! delay.

use crate::dsp::characterize::ChannelCharacterization;
use crate::dsp::chu_fsk::ChuDecode;
use crate::dsp::tone::ToneDetection;
use crate::stations::{GeodeticPoint, Station};

const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;
const E_LAYER_HEIGHT_KM: f64 = 110.0;
const F_LAYER_HEIGHT_KM: f64 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropagationMode {
    Ground,
    OneE,
    OneF,
    TwoF,
    ThreeF,
    FourF,
}

impl PropagationMode {
    pub const ALL: [PropagationMode; 6] = [
        PropagationMode::Ground,
        PropagationMode::OneE,
        PropagationMode::OneF,
        PropagationMode::TwoF,
        PropagationMode::ThreeF,
        PropagationMode::FourF,
    ];

    fn hops(self) -> u32 {
        match self {
            PropagationMode::Ground => 0,
            PropagationMode::OneE | PropagationMode::OneF => 1,
            PropagationMode::TwoF => 2,
            PropagationMode::ThreeF => 3,
            PropagationMode::FourF => 4,
        }
    }

    fn layer_height_km(self) -> f64 {
        match self {
            PropagationMode::OneE => E_LAYER_HEIGHT_KM,
            _ => F_LAYER_HEIGHT_KM,
        }
    }

    /// A priori spread (ms) in the delay this mode predicts, reflecting
    /// layer-height variability; ground wave is tightly constrained, higher
    /// hop counts progressively less so.
    fn mode_spread_ms(self) -> f64 {
        match self {
            PropagationMode::Ground => 0.05,
            PropagationMode::OneE => 0.4,
            PropagationMode::OneF => 0.6,
            PropagationMode::TwoF => 0.9,
            PropagationMode::ThreeF => 1.3,
            PropagationMode::FourF => 1.8,
        }
    }

    /// Slant-path geometric delay (ms) for a transmitter-receiver great
    /// circle distance `distance_km`.
    fn geometric_delay_ms(self, distance_km: f64) -> f64 {
        if self == PropagationMode::Ground {
            return distance_km / SPEED_OF_LIGHT_KM_S * 1000.0;
        }
        let hops = self.hops() as f64;
        let per_hop_ground = distance_km / hops;
        let slant = (self.layer_height_km().powi(2) + (per_hop_ground / 2.0).powi(2)).sqrt() * 2.0;
        (slant * hops) / SPEED_OF_LIGHT_KM_S * 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityGrade {
    A,
    B,
    C,
    D,
    X,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransmissionTimeEstimate {
    pub station: Station,
    pub d_clock_ms: f64,
    pub uncertainty_ms: f64,
    pub dominant_mode: PropagationMode,
    pub mode_posterior: Vec<(PropagationMode, f64)>,
    pub quality: QualityGrade,
}

fn gaussian_likelihood(residual_ms: f64, sigma_ms: f64) -> f64 {
    let sigma = sigma_ms.max(1e-6);
    (-0.5 * (residual_ms / sigma).powi(2)).exp() / sigma
}

/// Solve for D_clock given a qualifying tone detection, the channel's
/// characterization, the receiver's own geodetic position, and (if
/// decoded) a CHU FSK cross-check for this minute.
pub fn solve(
    detection: &ToneDetection,
    characterization: &ChannelCharacterization,
    receiver_location: GeodeticPoint,
    chu_decode: Option<&ChuDecode>,
    measurement_uncertainty_ms: f64,
) -> TransmissionTimeEstimate {
    let station = detection.station;
    let distance_km = station.geodetic().distance_km(receiver_location);

    let mut posterior: Vec<(PropagationMode, f64)> = PropagationMode::ALL
        .iter()
        .map(|&mode| {
            let predicted_delay = mode.geometric_delay_ms(distance_km);
            let residual = detection.timing_error_ms - predicted_delay;
            let sigma = (measurement_uncertainty_ms.powi(2) + mode.mode_spread_ms().powi(2)).sqrt();
            (mode, gaussian_likelihood(residual, sigma))
        })
        .collect();

    let total: f64 = posterior.iter().map(|(_, w)| w).sum();
    if total > 1e-12 {
        for (_, w) in posterior.iter_mut() {
            *w /= total;
        }
    } else {
        let n = posterior.len() as f64;
        for (_, w) in posterior.iter_mut() {
            *w = 1.0 / n;
        }
    }

    let d_clock_ms: f64 = posterior
        .iter()
        .map(|(mode, weight)| {
            let predicted_delay = mode.geometric_delay_ms(distance_km);
            weight * (detection.timing_error_ms - predicted_delay)
        })
        .sum();

    let variance: f64 = posterior
        .iter()
        .map(|(mode, weight)| {
            let sigma = (measurement_uncertainty_ms.powi(2) + mode.mode_spread_ms().powi(2)).sqrt();
            weight * sigma.powi(2)
        })
        .sum();
    let mut uncertainty_ms = variance.sqrt();

    // A corroborating CHU sub-millisecond timestamp tightens the estimate
    // directly rather than through the propagation-mode posterior.
    if let Some(chu) = chu_decode {
        let chu_residual = chu.frame_b_stop_bit_offset_ms;
        if chu_residual.abs() < 5.0 {
            uncertainty_ms = (uncertainty_ms * 0.3).max(0.05);
        }
    }

    let dominant_mode = posterior
        .iter()
        .cloned()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(mode, _)| mode)
        .unwrap_or(PropagationMode::Ground);

    let quality = grade_estimate(detection, characterization, uncertainty_ms, chu_decode.is_some());

    TransmissionTimeEstimate {
        station,
        d_clock_ms,
        uncertainty_ms,
        dominant_mode,
        mode_posterior: posterior,
        quality,
    }
}

fn grade_estimate(
    detection: &ToneDetection,
    characterization: &ChannelCharacterization,
    uncertainty_ms: f64,
    has_chu_corroboration: bool,
) -> QualityGrade {
    if !detection.qualifies() {
        return QualityGrade::X;
    }
    let station_confident = characterization.ground_truth_station.is_some() || has_chu_corroboration;

    if uncertainty_ms < 0.3 && detection.snr_db > 25.0 && station_confident {
        QualityGrade::A
    } else if uncertainty_ms < 0.8 && detection.snr_db > 18.0 {
        QualityGrade::B
    } else if uncertainty_ms < 1.5 {
        QualityGrade::C
    } else {
        QualityGrade::D
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::characterize::ChannelCharacterization;

    fn characterization(ground_truth: Option<Station>) -> ChannelCharacterization {
        ChannelCharacterization {
            wwv_bcd_amplitude: 1.0,
            wwvh_bcd_amplitude: 0.0,
            differential_delay_ms: 0.0,
            delay_spread_ms: 0.1,
            doppler_mean_hz: 0.0,
            doppler_std_hz: 0.05,
            coherence_time_s: 10.0,
            max_coherent_window_s: 5.0,
            ground_truth_station: ground_truth,
            chu_decode: None,
            fss: 0.0,
            harmonic_ratio_1000_500: 2.0,
            harmonic_ratio_1200_600: 2.0,
            dominant_station: Station::Wwv,
        }
    }

    fn detection(timing_error_ms: f64, snr_db: f64) -> ToneDetection {
        ToneDetection {
            station: Station::Wwv,
            frequency_hz: 10_000_000,
            onset_rtp: 0,
            timing_error_ms,
            snr_db,
            marker_power_db: 0.0,
            noise_floor_db: -20.0,
            peak_correlation: 0.9,
        }
    }

    #[test]
    fn ground_wave_dominates_at_short_distance() {
        let det = detection(0.2, 30.0);
        let receiver = Station::Wwv.geodetic();
        let est = solve(&det, &characterization(Some(Station::Wwv)), receiver, None, 0.1);
        assert_eq!(est.dominant_mode, PropagationMode::Ground);
        assert!(est.d_clock_ms.abs() < 1.0);
    }

    #[test]
    fn posterior_weights_sum_to_one() {
        let det = detection(3.0, 20.0);
        let receiver = Station::Wwvh.geodetic();
        let est = solve(&det, &characterization(None), receiver, None, 0.2);
        let total: f64 = est.mode_posterior.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn low_snr_detection_never_qualifies_for_a_grade() {
        let det = detection(0.1, 5.0);
        let receiver = Station::Wwv.geodetic();
        let est = solve(&det, &characterization(Some(Station::Wwv)), receiver, None, 0.1);
        assert_eq!(est.quality, QualityGrade::X);
    }
}
