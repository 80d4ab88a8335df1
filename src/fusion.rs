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

//! Cross-Broadcast Fuser (C8): combines every channel's current clock-offset
//! estimate for a station into one meta estimate, then combines the
//! per-station meta estimates into a single system-wide `D_clock`.

use crate::config::FusionConfig;
use crate::dsp::{QualityGrade, TransmissionTimeEstimate};
use crate::error::{FusionError, FusionResult};
use crate::stations::Station;
use crate::status::{append_csv_row, publish_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemConvergence {
    NoData,
    SingleSource,
    Converging,
    Locked,
    Divergent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusedEstimate {
    pub utc_minute: DateTime<Utc>,
    pub d_clock_ms: f64,
    pub uncertainty_ms: f64,
    pub contributing_sources: usize,
    pub system_convergence: SystemConvergence,
    pub per_station: Vec<(Station, f64)>,
}

fn quality_weight(grade: QualityGrade) -> f64 {
    match grade {
        QualityGrade::A => 1.0,
        QualityGrade::B => 0.7,
        QualityGrade::C => 0.4,
        QualityGrade::D => 0.15,
        QualityGrade::X => 0.0,
    }
}

/// One channel's contribution to this minute's fuse: its solved estimate
/// plus the SNR that produced it (folded into the weight alongside grade and
/// uncertainty).
pub struct FusionInput {
    pub channel: String,
    pub estimate: TransmissionTimeEstimate,
    pub snr_db: f64,
}

fn snr_weight(snr_db: f64) -> f64 {
    (snr_db / 10.0).clamp(0.1, 3.0)
}

fn weighted_mean(values: &[(f64, f64)]) -> Option<(f64, f64)> {
    let total_weight: f64 = values.iter().map(|(_, w)| w).sum();
    if total_weight <= 1e-9 {
        return None;
    }
    let mean = values.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight;
    let variance = values
        .iter()
        .map(|(v, w)| w * (v - mean).powi(2))
        .sum::<f64>()
        / total_weight;
    Some((mean, (variance / total_weight).sqrt()))
}

/// Fuse all channel contributions for one UTC minute into a single
/// system-wide estimate, grouping first by station then across stations.
pub fn fuse(inputs: &[FusionInput], utc_minute: DateTime<Utc>, config: &FusionConfig) -> FusedEstimate {
    if inputs.is_empty() {
        return FusedEstimate {
            utc_minute,
            d_clock_ms: 0.0,
            uncertainty_ms: f64::INFINITY,
            contributing_sources: 0,
            system_convergence: SystemConvergence::NoData,
            per_station: Vec::new(),
        };
    }

    let mut by_station: HashMap<Station, Vec<(f64, f64)>> = HashMap::new();
    for input in inputs {
        let weight = (1.0 / input.estimate.uncertainty_ms.max(1e-3))
            * quality_weight(input.estimate.quality)
            * snr_weight(input.snr_db);
        by_station
            .entry(input.estimate.station)
            .or_default()
            .push((input.estimate.d_clock_ms, weight));
    }

    let mut per_station = Vec::new();
    let mut station_means = Vec::new();
    for (station, values) in &by_station {
        if let Some((mean, std)) = weighted_mean(values) {
            per_station.push((*station, mean));
            let meta_weight = values.len() as f64 / std.max(1e-3);
            station_means.push((mean, meta_weight));
        }
    }

    let Some((d_clock_ms, uncertainty_ms)) = weighted_mean(&station_means) else {
        return FusedEstimate {
            utc_minute,
            d_clock_ms: 0.0,
            uncertainty_ms: f64::INFINITY,
            contributing_sources: inputs.len(),
            system_convergence: SystemConvergence::Divergent,
            per_station,
        };
    };

    let spread = if station_means.len() >= 2 {
        let vals: Vec<f64> = station_means.iter().map(|(v, _)| *v).collect();
        let max = vals.iter().cloned().fold(f64::MIN, f64::max);
        let min = vals.iter().cloned().fold(f64::MAX, f64::min);
        max - min
    } else {
        0.0
    };

    let system_convergence = if inputs.len() == 1 {
        SystemConvergence::SingleSource
    } else if spread <= config.locked_agreement_ms {
        SystemConvergence::Locked
    } else if spread <= config.converging_agreement_ms {
        SystemConvergence::Converging
    } else {
        SystemConvergence::Divergent
    };

    FusedEstimate {
        utc_minute,
        d_clock_ms,
        uncertainty_ms,
        contributing_sources: inputs.len(),
        system_convergence,
        per_station,
    }
}

/// Append `estimate` to the fused clock-offset series and republish the
/// latest-state snapshot atomically.
pub fn publish_fused_estimate(data_root: &Path, estimate: &FusedEstimate) -> FusionResult<()> {
    let csv_path = crate::paths::fused_d_clock_csv(data_root);
    let row = format!(
        "{},{:.6},{:.6},{},{:?}",
        estimate.utc_minute.to_rfc3339(),
        estimate.d_clock_ms,
        estimate.uncertainty_ms,
        estimate.contributing_sources,
        estimate.system_convergence
    );
    append_csv_row(&csv_path, "utc_minute,d_clock_ms,uncertainty_ms,contributing_sources,system_convergence", &row)
        .map_err(FusionError::from)?;

    let status_path = crate::paths::fusion_dir(data_root).join("fusion_state.json");
    publish_json(&status_path, estimate).map_err(FusionError::from)?;
    Ok(())
}

impl From<crate::error::StatusError> for FusionError {
    fn from(value: crate::error::StatusError) -> Self {
        match value {
            crate::error::StatusError::Io(e) => FusionError::Io(e),
            crate::error::StatusError::Json(e) => FusionError::Io(std::io::Error::other(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::PropagationMode;
    use chrono::TimeZone;

    fn estimate(station: Station, d_clock_ms: f64, uncertainty_ms: f64) -> TransmissionTimeEstimate {
        TransmissionTimeEstimate {
            station,
            d_clock_ms,
            uncertainty_ms,
            dominant_mode: PropagationMode::Ground,
            mode_posterior: vec![(PropagationMode::Ground, 1.0)],
            quality: QualityGrade::A,
        }
    }

    #[test]
    fn no_inputs_yields_no_data() {
        let minute = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let fused = fuse(&[], minute, &FusionConfig::default());
        assert_eq!(fused.system_convergence, SystemConvergence::NoData);
    }

    #[test]
    fn single_source_is_flagged_as_such() {
        let minute = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let inputs = vec![FusionInput {
            channel: "WWV_10_MHz".into(),
            estimate: estimate(Station::Wwv, 1.2, 0.3),
            snr_db: 25.0,
        }];
        let fused = fuse(&inputs, minute, &FusionConfig::default());
        assert_eq!(fused.system_convergence, SystemConvergence::SingleSource);
        assert!((fused.d_clock_ms - 1.2).abs() < 1e-6);
    }

    #[test]
    fn agreeing_stations_lock() {
        let minute = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let inputs = vec![
            FusionInput { channel: "WWV_10_MHz".into(), estimate: estimate(Station::Wwv, 1.0, 0.2), snr_db: 25.0 },
            FusionInput { channel: "WWVH_10_MHz".into(), estimate: estimate(Station::Wwvh, 1.05, 0.2), snr_db: 25.0 },
        ];
        let fused = fuse(&inputs, minute, &FusionConfig::default());
        assert_eq!(fused.system_convergence, SystemConvergence::Locked);
    }

    #[test]
    fn disagreeing_stations_are_divergent() {
        let minute = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let inputs = vec![
            FusionInput { channel: "WWV_10_MHz".into(), estimate: estimate(Station::Wwv, 1.0, 0.2), snr_db: 25.0 },
            FusionInput { channel: "WWVH_10_MHz".into(), estimate: estimate(Station::Wwvh, 20.0, 0.2), snr_db: 25.0 },
        ];
        let fused = fuse(&inputs, minute, &FusionConfig::default());
        assert_eq!(fused.system_convergence, SystemConvergence::Divergent);
    }
}
