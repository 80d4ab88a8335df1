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

//! Three-phase Step-1 search-window calibrator (section 4.10): a freshly
//! started channel has to search the full +/-500ms window until a handful of
//! tone detections land consistently, at which point the window can be
//! narrowed around the observed onset to cut the cost of the matched filter
//! and reduce the odds of locking onto a sidelobe.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const BOOTSTRAP_WINDOW_MS: f64 = 500.0;
const CALIBRATED_WINDOW_MS: f64 = 50.0;
const VERIFIED_WINDOW_MS: f64 = 15.0;

const CALIBRATED_AFTER: usize = 5;
const VERIFIED_AFTER: usize = 30;
const AGREEMENT_MS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalibratorPhase {
    Bootstrap,
    Calibrated,
    Verified,
}

pub struct Calibrator {
    phase: CalibratorPhase,
    recent_onsets_ms: VecDeque<f64>,
}

impl Calibrator {
    pub fn new() -> Self {
        Calibrator {
            phase: CalibratorPhase::Bootstrap,
            recent_onsets_ms: VecDeque::with_capacity(VERIFIED_AFTER),
        }
    }

    pub fn phase(&self) -> CalibratorPhase {
        self.phase
    }

    /// Half-width of the Step-1 search window this phase should use, to be
    /// passed as `detect_tones`'s `search_half_window_ms`.
    pub fn search_half_window_ms(&self) -> f64 {
        match self.phase {
            CalibratorPhase::Bootstrap => BOOTSTRAP_WINDOW_MS,
            CalibratorPhase::Calibrated => CALIBRATED_WINDOW_MS,
            CalibratorPhase::Verified => VERIFIED_WINDOW_MS,
        }
    }

    /// Record a qualifying detection's timing error and advance the phase
    /// if recent detections have been consistent.
    pub fn observe_qualifying_timing_error_ms(&mut self, timing_error_ms: f64) {
        if self.recent_onsets_ms.len() == VERIFIED_AFTER {
            self.recent_onsets_ms.pop_front();
        }
        self.recent_onsets_ms.push_back(timing_error_ms);

        let n = self.recent_onsets_ms.len();
        let spread = self.spread_ms();

        self.phase = if n >= VERIFIED_AFTER && spread <= AGREEMENT_MS {
            CalibratorPhase::Verified
        } else if n >= CALIBRATED_AFTER && spread <= AGREEMENT_MS * 2.0 {
            CalibratorPhase::Calibrated
        } else {
            CalibratorPhase::Bootstrap
        };
    }

    /// A missed or disqualified detection shouldn't immediately blow the
    /// calibration back open; only a long run of misses (handled by the
    /// caller clearing recent history) should.
    pub fn reset(&mut self) {
        self.phase = CalibratorPhase::Bootstrap;
        self.recent_onsets_ms.clear();
    }

    fn spread_ms(&self) -> f64 {
        let Some(&min) = self.recent_onsets_ms.iter().min_by(|a, b| a.partial_cmp(b).unwrap()) else {
            return f64::INFINITY;
        };
        let max = self.recent_onsets_ms.iter().cloned().fold(f64::MIN, f64::max);
        max - min
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_bootstrap_with_widest_window() {
        let cal = Calibrator::new();
        assert_eq!(cal.phase(), CalibratorPhase::Bootstrap);
        assert_eq!(cal.search_half_window_ms(), BOOTSTRAP_WINDOW_MS);
    }

    #[test]
    fn consistent_detections_narrow_the_window() {
        let mut cal = Calibrator::new();
        for _ in 0..CALIBRATED_AFTER {
            cal.observe_qualifying_timing_error_ms(0.5);
        }
        assert_eq!(cal.phase(), CalibratorPhase::Calibrated);
        for _ in 0..VERIFIED_AFTER {
            cal.observe_qualifying_timing_error_ms(0.5);
        }
        assert_eq!(cal.phase(), CalibratorPhase::Verified);
        assert_eq!(cal.search_half_window_ms(), VERIFIED_WINDOW_MS);
    }

    #[test]
    fn scattered_detections_stay_in_bootstrap() {
        let mut cal = Calibrator::new();
        for i in 0..CALIBRATED_AFTER {
            cal.observe_qualifying_timing_error_ms(if i % 2 == 0 { -40.0 } else { 40.0 });
        }
        assert_eq!(cal.phase(), CalibratorPhase::Bootstrap);
    }
}
