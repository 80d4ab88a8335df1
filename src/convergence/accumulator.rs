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

//! Cumulative convergence state for one (station, frequency) pair. Tracks a
//! running mean/variance of `D_clock` over the station's entire observed
//! history (not a sliding window) and classifies how settled the timing
//! solution currently is.

use crate::dsp::TransmissionTimeEstimate;
use crate::error::{ConvergenceError, ConvergenceResult, StatusError};
use crate::status::{load_json, publish_json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

const MIN_SAMPLES_FOR_CONVERGING: u64 = 10;
const MIN_SAMPLES_FOR_LOCKED: u64 = 30;
const LOCKED_SEM_MS: f64 = 1.0;
const ANOMALY_SIGMA: f64 = 3.0;
const REACQUIRE_ANOMALY_COUNT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvergenceState {
    Acquiring,
    Converging,
    Locked,
    Reacquire,
}

/// On-disk representation; also the full accumulator state, so it loads
/// back into a live `ConvergenceAccumulator` without any lossy projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConvergenceState {
    pub n: u64,
    pub running_mean_ms: f64,
    pub running_variance_ms2: f64,
    pub state: ConvergenceState,
    pub locked_mean_ms: Option<f64>,
    pub locked_uncertainty_ms: Option<f64>,
    pub consecutive_anomaly_count: u32,
    pub last_updated: DateTime<Utc>,
}

pub struct ConvergenceAccumulator {
    n: u64,
    running_mean: f64,
    // Welford's running sum of squared deviations from the mean; population
    // variance is running_m2 / n.
    running_m2: f64,
    state: ConvergenceState,
    locked_mean: Option<f64>,
    locked_uncertainty: Option<f64>,
    consecutive_anomaly_count: u32,
    last_updated: Option<DateTime<Utc>>,
}

impl ConvergenceAccumulator {
    pub fn new() -> Self {
        ConvergenceAccumulator {
            n: 0,
            running_mean: 0.0,
            running_m2: 0.0,
            state: ConvergenceState::Acquiring,
            locked_mean: None,
            locked_uncertainty: None,
            consecutive_anomaly_count: 0,
            last_updated: None,
        }
    }

    /// Restore a previously persisted accumulator, or start fresh if `path`
    /// does not exist yet.
    pub fn load(path: &Path) -> ConvergenceResult<Self> {
        let loaded: Option<PersistedConvergenceState> =
            load_json(path).map_err(ConvergenceError::from)?;
        Ok(match loaded {
            Some(p) => ConvergenceAccumulator {
                n: p.n,
                running_mean: p.running_mean_ms,
                running_m2: p.running_variance_ms2 * p.n as f64,
                state: p.state,
                locked_mean: p.locked_mean_ms,
                locked_uncertainty: p.locked_uncertainty_ms,
                consecutive_anomaly_count: p.consecutive_anomaly_count,
                last_updated: Some(p.last_updated),
            },
            None => ConvergenceAccumulator::new(),
        })
    }

    fn population_std(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        (self.running_m2 / self.n as f64).sqrt()
    }

    fn reset_to_acquiring(&mut self) {
        self.n = 0;
        self.running_mean = 0.0;
        self.running_m2 = 0.0;
        self.locked_mean = None;
        self.locked_uncertainty = None;
        self.consecutive_anomaly_count = 0;
        self.state = ConvergenceState::Acquiring;
    }

    /// Fold in a new transmission-time estimate, returning the state
    /// transition if one occurred.
    pub fn ingest(&mut self, estimate: &TransmissionTimeEstimate, now: DateTime<Utc>) -> Option<(ConvergenceState, ConvergenceState)> {
        let from = self.state;
        self.last_updated = Some(now);

        if self.state == ConvergenceState::Locked {
            let locked_mean = self.locked_mean.unwrap_or(self.running_mean);
            let locked_sigma = self.locked_uncertainty.unwrap_or(0.0);
            let residual = estimate.d_clock_ms - locked_mean;
            if locked_sigma > 0.0 && residual.abs() > ANOMALY_SIGMA * locked_sigma {
                self.consecutive_anomaly_count += 1;
                if self.consecutive_anomaly_count >= REACQUIRE_ANOMALY_COUNT {
                    self.reset_to_acquiring();
                    self.state = ConvergenceState::Reacquire;
                }
            } else {
                self.consecutive_anomaly_count = 0;
            }
            return if from != self.state { Some((from, self.state)) } else { None };
        }

        self.n += 1;
        let delta = estimate.d_clock_ms - self.running_mean;
        self.running_mean += delta / self.n as f64;
        let delta2 = estimate.d_clock_ms - self.running_mean;
        self.running_m2 += delta * delta2;

        let std = self.population_std();
        let sem = std / (self.n as f64).sqrt();

        self.state = if self.n >= MIN_SAMPLES_FOR_LOCKED && sem < LOCKED_SEM_MS {
            self.locked_mean = Some(self.running_mean);
            self.locked_uncertainty = Some(std);
            self.consecutive_anomaly_count = 0;
            ConvergenceState::Locked
        } else if self.n >= MIN_SAMPLES_FOR_CONVERGING {
            ConvergenceState::Converging
        } else {
            ConvergenceState::Acquiring
        };

        if from != self.state { Some((from, self.state)) } else { None }
    }

    pub fn state(&self) -> ConvergenceState {
        self.state
    }

    pub fn snapshot(&self) -> PersistedConvergenceState {
        PersistedConvergenceState {
            n: self.n,
            running_mean_ms: self.running_mean,
            running_variance_ms2: if self.n == 0 { 0.0 } else { self.running_m2 / self.n as f64 },
            state: self.state,
            locked_mean_ms: self.locked_mean,
            locked_uncertainty_ms: self.locked_uncertainty,
            consecutive_anomaly_count: self.consecutive_anomaly_count,
            last_updated: self.last_updated.unwrap_or_else(Utc::now),
        }
    }

    pub fn publish(&self, path: &Path) -> ConvergenceResult<()> {
        publish_json(path, &self.snapshot()).map_err(ConvergenceError::from)
    }
}

impl Default for ConvergenceAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl From<StatusError> for ConvergenceError {
    fn from(value: StatusError) -> Self {
        ConvergenceError::CorruptState(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{PropagationMode, QualityGrade};
    use crate::stations::Station;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn estimate(d_clock_ms: f64) -> TransmissionTimeEstimate {
        TransmissionTimeEstimate {
            station: Station::Wwv,
            d_clock_ms,
            uncertainty_ms: 0.2,
            dominant_mode: PropagationMode::Ground,
            mode_posterior: vec![(PropagationMode::Ground, 1.0)],
            quality: QualityGrade::A,
        }
    }

    /// Feed `n` estimates that oscillate a small amount around 1.0 ms, so
    /// the accumulator locks with a nonzero σ (a perfectly constant series
    /// would have σ=0 and could never flag a 3σ anomaly).
    fn lock_with_jitter(acc: &mut ConvergenceAccumulator, base: DateTime<Utc>, n: i64) {
        for i in 0..n {
            let jittered = if i % 2 == 0 { 0.9 } else { 1.1 };
            acc.ingest(&estimate(jittered), base + chrono::Duration::minutes(i));
        }
    }

    #[test]
    fn starts_acquiring() {
        let acc = ConvergenceAccumulator::new();
        assert_eq!(acc.state(), ConvergenceState::Acquiring);
    }

    #[test]
    fn nine_samples_stay_acquiring() {
        let mut acc = ConvergenceAccumulator::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..9 {
            acc.ingest(&estimate(1.0), base + chrono::Duration::minutes(i));
        }
        assert_eq!(acc.state(), ConvergenceState::Acquiring);
    }

    #[test]
    fn tenth_sample_enters_converging() {
        let mut acc = ConvergenceAccumulator::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..10 {
            acc.ingest(&estimate(1.0), base + chrono::Duration::minutes(i));
        }
        assert_eq!(acc.state(), ConvergenceState::Converging);
    }

    #[test]
    fn stable_estimates_converge_then_lock() {
        let mut acc = ConvergenceAccumulator::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        lock_with_jitter(&mut acc, base, 30);
        assert_eq!(acc.state(), ConvergenceState::Locked);
        let snap = acc.snapshot();
        assert!((snap.running_mean_ms - 1.0).abs() < 0.3);
    }

    #[test]
    fn locked_mean_is_held_through_a_large_outlier() {
        let mut acc = ConvergenceAccumulator::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        lock_with_jitter(&mut acc, base, 30);
        assert_eq!(acc.state(), ConvergenceState::Locked);
        let locked_mean_before = acc.snapshot().running_mean_ms;

        // A wild outlier should raise the anomaly counter without disturbing
        // the held locked mean or kicking the state out of LOCKED.
        acc.ingest(&estimate(1000.0), base + chrono::Duration::minutes(30));
        assert_eq!(acc.state(), ConvergenceState::Locked);
        let snap = acc.snapshot();
        assert_eq!(snap.running_mean_ms, locked_mean_before);
        assert_eq!(snap.consecutive_anomaly_count, 1);
    }

    #[test]
    fn five_consecutive_anomalies_force_reacquire() {
        let mut acc = ConvergenceAccumulator::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        lock_with_jitter(&mut acc, base, 30);
        assert_eq!(acc.state(), ConvergenceState::Locked);

        let mut transition = None;
        for i in 0..5 {
            transition = acc.ingest(&estimate(1000.0), base + chrono::Duration::minutes(30 + i));
        }
        assert_eq!(transition, Some((ConvergenceState::Locked, ConvergenceState::Reacquire)));
        assert_eq!(acc.state(), ConvergenceState::Reacquire);

        let (_, to) = acc
            .ingest(&estimate(1.0), base + chrono::Duration::minutes(40))
            .expect("accumulator should leave REACQUIRE on the next ingest");
        assert_eq!(to, ConvergenceState::Acquiring);
    }

    #[test]
    fn snapshot_round_trips_through_load() {
        let mut acc = ConvergenceAccumulator::new();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        lock_with_jitter(&mut acc, base, 15);
        let dir = tempdir().unwrap();
        let path = dir.path().join("convergence.json");
        acc.publish(&path).unwrap();

        let reloaded = ConvergenceAccumulator::load(&path).unwrap();
        assert_eq!(reloaded.state(), acc.state());
        let (a, b) = (acc.snapshot(), reloaded.snapshot());
        assert_eq!(a.n, b.n);
        assert!((a.running_mean_ms - b.running_mean_ms).abs() < 1e-9);
    }

    #[test]
    fn load_with_no_existing_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let acc = ConvergenceAccumulator::load(&path).unwrap();
        assert_eq!(acc.state(), ConvergenceState::Acquiring);
    }
}
