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

//! Tone Detector (C4, Step 1): quadrature matched-filter detection of the
//! second-mark tones, establishing a coarse UTC anchor for the minute.

use crate::dsp::iq::IQSample;
use crate::sampler::MinuteFrame;
use crate::stations::Station;
use crate::time::{MIN_SNAP_CONFIDENCE, MIN_SNAP_SNR_DB};
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq)]
pub struct ToneDetection {
    pub station: Station,
    pub frequency_hz: u64,
    pub onset_rtp: u64,
    pub timing_error_ms: f64,
    pub snr_db: f64,
    pub marker_power_db: f64,
    pub noise_floor_db: f64,
    pub peak_correlation: f64,
}

impl ToneDetection {
    pub fn qualifies(&self) -> bool {
        self.confidence() >= MIN_SNAP_CONFIDENCE && self.snr_db >= MIN_SNAP_SNR_DB
    }

    /// Ad hoc confidence from correlation sharpness, used only to gate
    /// TimeSnap updates; the solver (C6) derives its own posterior.
    pub fn confidence(&self) -> f64 {
        (self.peak_correlation).clamp(0.0, 1.0)
    }
}

fn hanning(i: usize, n: usize) -> f64 {
    if n <= 1 {
        return 1.0;
    }
    0.5 - 0.5 * (2.0 * PI * i as f64 / (n - 1) as f64).cos()
}

/// Hanning-windowed complex-exponential template at the station's marker
/// tone frequency, `marker_duration_ms` long.
fn marker_template(station: Station, sample_rate_hz: u32) -> Vec<IQSample> {
    let tone_hz = station.marker_tone_hz();
    let n = (station.marker_duration_ms() / 1000.0 * sample_rate_hz as f64).round() as usize;
    (0..n)
        .map(|i| {
            let t = i as f64 / sample_rate_hz as f64;
            let phase = 2.0 * PI * tone_hz * t;
            let window = hanning(i, n);
            IQSample::new((phase.cos() * window) as f32, (phase.sin() * window) as f32)
        })
        .collect()
}

fn correlate_at(samples: &[IQSample], template: &[IQSample], offset: usize) -> f64 {
    let mut acc = IQSample::new(0.0, 0.0);
    for (t, tmpl) in samples[offset..offset + template.len()].iter().zip(template) {
        acc += t * tmpl.conj();
    }
    acc.norm() as f64
}

fn window_power(samples: &[IQSample]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| (s.norm_sqr()) as f64).sum::<f64>() / samples.len() as f64
}

const SEARCH_HALF_WINDOW_MS_DEFAULT: f64 = 500.0;

/// Search one expected second boundary for the station's marker tone within
/// `search_half_window_ms` of its expected position, narrowing under
/// Calibrator control (SPEC_FULL.md section 4.10).
fn detect_one_second(
    samples: &[IQSample],
    template: &[IQSample],
    expected_center: usize,
    sample_rate_hz: u32,
    search_half_window_ms: f64,
) -> Option<(usize, f64, f64)> {
    let radius = (search_half_window_ms / 1000.0 * sample_rate_hz as f64).round() as usize;
    let lo = expected_center.saturating_sub(radius);
    let hi = (expected_center + radius + template.len()).min(samples.len());
    if hi <= lo + template.len() {
        return None;
    }

    let mut best_offset = lo;
    let mut best_corr = 0.0f64;
    for offset in lo..=(hi - template.len()) {
        let corr = correlate_at(samples, template, offset);
        if corr > best_corr {
            best_corr = corr;
            best_offset = offset;
        }
    }

    let noise_floor = window_power(&samples[lo..hi]).max(1e-12);
    Some((best_offset, best_corr, noise_floor))
}

/// Run Step 1 over a full minute, returning every second's detection that
/// met the matched-filter threshold (callers decide whether any qualify to
/// update the channel's TimeSnap).
pub fn detect_tones(
    frame: &MinuteFrame,
    station: Station,
    sample_rate_hz: u32,
    frequency_hz: u64,
    search_half_window_ms: Option<f64>,
) -> Vec<ToneDetection> {
    let template = marker_template(station, sample_rate_hz);
    let window = search_half_window_ms.unwrap_or(SEARCH_HALF_WINDOW_MS_DEFAULT);
    let mut detections = Vec::with_capacity(60);

    for second in 0..60u64 {
        let expected_center = (second * sample_rate_hz as u64) as usize;
        let Some((onset, corr, noise_floor)) =
            detect_one_second(&frame.samples, &template, expected_center, sample_rate_hz, window)
        else {
            continue;
        };

        let marker_power = (corr * corr) / template.len() as f64;
        let snr_db = 10.0 * (marker_power / noise_floor).log10();
        let marker_power_db = 10.0 * marker_power.max(1e-12).log10();
        let noise_floor_db = 10.0 * noise_floor.log10();
        let timing_error_ms = (onset as f64 - expected_center as f64) / sample_rate_hz as f64 * 1000.0;
        let peak_correlation = corr / (template.len() as f64);

        detections.push(ToneDetection {
            station,
            frequency_hz,
            onset_rtp: onset as u64,
            timing_error_ms,
            snr_db,
            marker_power_db,
            noise_floor_db,
            peak_correlation,
        });
    }

    detections
}

/// Earliest detection that clears both the SNR and confidence thresholds,
/// the one allowed to establish or refresh the channel's TimeSnap.
pub fn earliest_qualifying<'a>(detections: &'a [ToneDetection]) -> Option<&'a ToneDetection> {
    detections.iter().find(|d| d.qualifies())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::DataQuality;
    use crate::time::{SnapSource, TimeSnap, HF_SAMPLE_RATE, SAMPLES_PER_MINUTE};
    use chrono::{TimeZone, Utc};

    fn synthetic_frame_with_tone(station: Station, snr_db_target: f64) -> MinuteFrame {
        let rate = HF_SAMPLE_RATE;
        let mut samples = vec![IQSample::new(0.0, 0.0); SAMPLES_PER_MINUTE as usize];
        let template = marker_template(station, rate);
        let noise_amp = 10f64.powf(-snr_db_target / 20.0) as f32;
        for second in 0..60usize {
            let base = second * rate as usize;
            for (i, t) in template.iter().enumerate() {
                samples[base + i] += *t;
            }
        }
        for s in samples.iter_mut() {
            *s += IQSample::new(noise_amp * 0.001, noise_amp * 0.001);
        }
        MinuteFrame {
            utc_minute: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            samples,
            discontinuities: Vec::new(),
            time_snap: TimeSnap {
                rtp_timestamp: 0,
                utc_timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                source: SnapSource::StartupEstimate,
                confidence: 0.0,
                established_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            },
            data_quality: DataQuality::Complete,
        }
    }

    #[test]
    fn clean_wwv_minute_detects_60_onsets_near_zero_error() {
        let frame = synthetic_frame_with_tone(Station::Wwv, 30.0);
        let detections = detect_tones(&frame, Station::Wwv, HF_SAMPLE_RATE, 10_000_000, None);
        assert_eq!(detections.len(), 60);
        for d in &detections {
            assert!(d.timing_error_ms.abs() < 1.0, "timing error {}", d.timing_error_ms);
        }
    }
}
