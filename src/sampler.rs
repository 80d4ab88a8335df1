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

//! Minute Sampler (C3): hands Stage 2 exactly one `MinuteFrame` per UTC
//! minute, delivered at least `grace_ms` after the boundary passes and
//! never before all of that minute's samples are accounted for (either
//! present or recorded as a discontinuity).

use crate::archive::Discontinuity;
use crate::dsp::iq::IQSample;
use crate::time::{minute_floor, TimeSnap, SAMPLES_PER_MINUTE};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataQuality {
    Complete,
    MinorGaps,
    Unusable,
}

#[derive(Debug, Clone)]
pub struct MinuteFrame {
    pub utc_minute: DateTime<Utc>,
    pub samples: Vec<IQSample>,
    pub discontinuities: Vec<Discontinuity>,
    pub time_snap: TimeSnap,
    pub data_quality: DataQuality,
}

struct Accumulator {
    utc_minute: DateTime<Utc>,
    samples: Vec<IQSample>,
    filled: u64,
    discontinuities: Vec<Discontinuity>,
    time_snap: TimeSnap,
    opened_at: DateTime<Utc>,
}

impl Accumulator {
    fn new(utc_minute: DateTime<Utc>, time_snap: TimeSnap, now: DateTime<Utc>) -> Self {
        Accumulator {
            utc_minute,
            samples: vec![IQSample::new(0.0, 0.0); SAMPLES_PER_MINUTE as usize],
            filled: 0,
            discontinuities: Vec::new(),
            time_snap,
            opened_at: now,
        }
    }

    fn completeness(&self) -> f64 {
        self.filled as f64 / SAMPLES_PER_MINUTE as f64
    }

    fn finalize(self, completeness_floor: f64) -> MinuteFrame {
        let data_quality = if self.completeness() >= 0.999 {
            DataQuality::Complete
        } else if self.completeness() >= completeness_floor {
            DataQuality::MinorGaps
        } else {
            DataQuality::Unusable
        };
        MinuteFrame {
            utc_minute: self.utc_minute,
            samples: self.samples,
            discontinuities: self.discontinuities,
            time_snap: self.time_snap,
            data_quality,
        }
    }
}

pub struct MinuteSampler {
    sample_rate_hz: u32,
    grace: Duration,
    completeness_floor: f64,
    current: Option<Accumulator>,
    ready: VecDeque<MinuteFrame>,
}

impl MinuteSampler {
    pub fn new(sample_rate_hz: u32, grace: Duration, completeness_floor: f64) -> Self {
        MinuteSampler {
            sample_rate_hz,
            grace,
            completeness_floor,
            current: None,
            ready: VecDeque::new(),
        }
    }

    /// Offset in samples of `utc` from the start of its own UTC minute.
    fn offset_into_minute(&self, utc: DateTime<Utc>, minute_start: DateTime<Utc>) -> i64 {
        let nanos = (utc - minute_start).num_nanoseconds().unwrap_or(0);
        nanos * self.sample_rate_hz as i64 / 1_000_000_000
    }

    fn open_or_rollover(&mut self, utc_minute: DateTime<Utc>, time_snap: &TimeSnap, now: DateTime<Utc>) {
        if let Some(acc) = &self.current {
            if acc.utc_minute == utc_minute {
                return;
            }
            let finished = self.current.take().unwrap();
            self.ready.push_back(finished.finalize(self.completeness_floor));
        }
        self.current = Some(Accumulator::new(utc_minute, time_snap.clone(), now));
    }

    /// Record one contiguous run of samples, splitting it at minute
    /// boundaries as needed.
    pub fn ingest_samples(&mut self, start_rtp: u64, samples: &[IQSample], time_snap: &TimeSnap, now: DateTime<Utc>) {
        if samples.is_empty() {
            return;
        }
        let utc_start = time_snap.utc_of_sample(start_rtp, self.sample_rate_hz);
        let mut remaining = samples;
        let mut cursor_utc = utc_start;

        while !remaining.is_empty() {
            let minute_start = minute_floor(cursor_utc);
            self.open_or_rollover(minute_start, time_snap, now);
            let offset = self.offset_into_minute(cursor_utc, minute_start).max(0) as u64;
            let acc = self.current.as_mut().expect("just opened");
            let space = SAMPLES_PER_MINUTE.saturating_sub(offset);
            let take = (remaining.len() as u64).min(space.max(1)) as usize;

            for (i, sample) in remaining[..take].iter().enumerate() {
                let pos = offset as usize + i;
                if pos < acc.samples.len() {
                    acc.samples[pos] = *sample;
                }
            }
            acc.filled += take as u64;

            remaining = &remaining[take..];
            cursor_utc += chrono::Duration::nanoseconds(take as i64 * 1_000_000_000 / self.sample_rate_hz as i64);
        }
    }

    /// Record a discontinuity, which still counts toward completeness
    /// (its samples are known to be missing, not merely unaccounted for).
    pub fn ingest_discontinuity(&mut self, discontinuity: Discontinuity, time_snap: &TimeSnap, now: DateTime<Utc>) {
        let utc_start = time_snap.utc_of_sample(discontinuity.start_rtp, self.sample_rate_hz);
        let minute_start = minute_floor(utc_start);
        self.open_or_rollover(minute_start, time_snap, now);
        if let Some(acc) = self.current.as_mut() {
            acc.filled += discontinuity.length_samples.min(SAMPLES_PER_MINUTE);
            acc.discontinuities.push(discontinuity);
        }
    }

    /// Drain minutes that are either fully filled or past their grace
    /// deadline, in order.
    pub fn poll_ready(&mut self, now: DateTime<Utc>) -> Vec<MinuteFrame> {
        if let Some(acc) = &self.current {
            let minute_end = acc.utc_minute + chrono::Duration::seconds(60);
            let deadline = minute_end + chrono::Duration::from_std(self.grace).unwrap_or_default();
            if acc.filled >= SAMPLES_PER_MINUTE || now >= deadline {
                let finished = self.current.take().unwrap();
                self.ready.push_back(finished.finalize(self.completeness_floor));
            }
        }
        self.ready.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{SnapSource, HF_SAMPLE_RATE};
    use chrono::TimeZone;

    fn snap_at(anchor: DateTime<Utc>) -> TimeSnap {
        TimeSnap {
            rtp_timestamp: 0,
            utc_timestamp: anchor,
            source: SnapSource::WwvTone,
            confidence: 0.95,
            established_at: anchor,
        }
    }

    #[test]
    fn full_minute_of_samples_is_complete() {
        let anchor = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let snap = snap_at(anchor);
        let mut sampler = MinuteSampler::new(HF_SAMPLE_RATE, Duration::from_millis(500), 0.5);
        let samples = vec![IQSample::new(1.0, 0.0); SAMPLES_PER_MINUTE as usize];
        sampler.ingest_samples(0, &samples, &snap, anchor);
        let ready = sampler.poll_ready(anchor + chrono::Duration::seconds(61));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].data_quality, DataQuality::Complete);
    }

    #[test]
    fn partial_minute_past_grace_is_tagged_minor_gaps() {
        let anchor = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let snap = snap_at(anchor);
        let mut sampler = MinuteSampler::new(HF_SAMPLE_RATE, Duration::from_millis(500), 0.5);
        let samples = vec![IQSample::new(1.0, 0.0); (SAMPLES_PER_MINUTE as usize) * 9 / 10];
        sampler.ingest_samples(0, &samples, &snap, anchor);
        let ready = sampler.poll_ready(anchor + chrono::Duration::seconds(61));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].data_quality, DataQuality::MinorGaps);
    }

    #[test]
    fn mostly_empty_minute_past_grace_is_unusable() {
        let anchor = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let snap = snap_at(anchor);
        let mut sampler = MinuteSampler::new(HF_SAMPLE_RATE, Duration::from_millis(500), 0.5);
        let samples = vec![IQSample::new(1.0, 0.0); 100];
        sampler.ingest_samples(0, &samples, &snap, anchor);
        let ready = sampler.poll_ready(anchor + chrono::Duration::seconds(61));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].data_quality, DataQuality::Unusable);
    }
}
