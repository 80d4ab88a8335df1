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

//! Single-bin Goertzel power estimator, used for the harmonic-ratio and
//! ground-truth-tone checks in the Channel Characterizer (C5) where a full
//! FFT would be wasted on one frequency of interest.

use crate::dsp::iq::IQSample;
use std::f64::consts::PI;

/// Power of `samples` at `freq_hz`, assuming `sample_rate_hz` and complex
/// baseband input (no folding around Nyquist needed).
pub fn goertzel_power(samples: &[IQSample], freq_hz: f64, sample_rate_hz: u32) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let k = (freq_hz * n / sample_rate_hz as f64).round();
    let omega = 2.0 * PI * k / n;
    let coeff = 2.0 * omega.cos();

    let mut s0;
    let mut s1 = 0.0f64;
    let mut s2 = 0.0f64;
    let sin_omega = omega.sin();
    let cos_omega = omega.cos();

    // Real-valued Goertzel applied independently to I and Q, then combined,
    // since our input is complex baseband rather than a real passband signal.
    let mut power_total = 0.0;
    for component in [true, false] {
        s1 = 0.0;
        s2 = 0.0;
        for sample in samples {
            let x = if component { sample.re as f64 } else { sample.im as f64 };
            s0 = x + coeff * s1 - s2;
            s2 = s1;
            s1 = s0;
        }
        let real = s1 - s2 * cos_omega;
        let imag = s2 * sin_omega;
        power_total += (real * real + imag * imag) / (n * n);
    }
    power_total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI as STD_PI;

    #[test]
    fn detects_power_at_target_frequency() {
        let rate = 20_000u32;
        let n = rate as usize;
        let freq = 1000.0;
        let samples: Vec<IQSample> = (0..n)
            .map(|i| {
                let t = i as f64 / rate as f64;
                let phase = 2.0 * STD_PI * freq * t;
                IQSample::new(phase.cos() as f32, phase.sin() as f32)
            })
            .collect();
        let on_target = goertzel_power(&samples, freq, rate);
        let off_target = goertzel_power(&samples, freq + 200.0, rate);
        assert!(on_target > off_target * 10.0);
    }
}
