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

//! UTC <-> per-channel RTP clock mapping (`TimeSnap`, SPEC_FULL.md section 3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const MICROS_PER_MILLI: i64 = 1_000;

/// Canonical HF-channel sample rate in samples/second.
pub const HF_SAMPLE_RATE: u32 = 20_000;
/// Carrier-only channel sample rate.
pub const CARRIER_SAMPLE_RATE: u32 = 200;
/// Samples in exactly one UTC minute at the canonical HF sample rate.
pub const SAMPLES_PER_MINUTE: u64 = HF_SAMPLE_RATE as u64 * 60;

/// Provenance of a `TimeSnap` anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapSource {
    WwvTone,
    WwvhTone,
    ChuTone,
    Ntp,
    StartupEstimate,
}

/// Minimum confidence and SNR a detection must clear before it may establish
/// or refresh a channel's `TimeSnap` (SPEC_FULL.md section 3, invariants).
pub const MIN_SNAP_CONFIDENCE: f64 = 0.7;
pub const MIN_SNAP_SNR_DB: f64 = 15.0;

/// Anchoring pair fixing the mapping from a channel's private RTP sample
/// clock to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSnap {
    pub rtp_timestamp: u64,
    pub utc_timestamp: DateTime<Utc>,
    pub source: SnapSource,
    pub confidence: f64,
    pub established_at: DateTime<Utc>,
}

impl TimeSnap {
    pub fn startup_estimate(rtp_timestamp: u64, now: DateTime<Utc>) -> Self {
        TimeSnap {
            rtp_timestamp,
            utc_timestamp: now,
            source: SnapSource::StartupEstimate,
            confidence: 0.0,
            established_at: now,
        }
    }

    /// Only a detection this strong may replace the current snap
    /// (SPEC_FULL.md section 3: "established only from a detection whose
    /// confidence >= 0.7 and SNR >= 15 dB").
    pub fn qualifies(confidence: f64, snr_db: f64) -> bool {
        confidence >= MIN_SNAP_CONFIDENCE && snr_db >= MIN_SNAP_SNR_DB
    }

    /// `utc(sample) = utc_timestamp + (sample_rtp - rtp_timestamp) / sample_rate`.
    pub fn utc_of_sample(&self, sample_rtp: u64, sample_rate: u32) -> DateTime<Utc> {
        let delta_samples = sample_rtp as i64 - self.rtp_timestamp as i64;
        let nanos = delta_samples * 1_000_000_000 / sample_rate as i64;
        self.utc_timestamp + chrono::Duration::nanoseconds(nanos)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.established_at
    }
}

/// Sequence number on a 16-bit wrapping wire, with wraparound-aware ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrappingSeq(pub u16);

impl WrappingSeq {
    pub fn next(self) -> Self {
        WrappingSeq(self.0.wrapping_add(1))
    }

    /// Signed forward distance from `self` to `other`, accounting for 16-bit
    /// wraparound (positive means `other` is ahead).
    pub fn distance_to(self, other: Self) -> i32 {
        (other.0.wrapping_sub(self.0)) as i16 as i32
    }
}

/// Floor the given instant to the start of its UTC minute.
pub fn minute_floor(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant - chrono::Duration::seconds(instant.timestamp() % 60)
        - chrono::Duration::nanoseconds(instant.timestamp_subsec_nanos() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn utc_of_sample_matches_equation() {
        let anchor = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let snap = TimeSnap {
            rtp_timestamp: 1_000_000,
            utc_timestamp: anchor,
            source: SnapSource::WwvTone,
            confidence: 0.95,
            established_at: anchor,
        };
        let got = snap.utc_of_sample(1_020_000, HF_SAMPLE_RATE);
        assert_eq!(got, anchor + chrono::Duration::seconds(1));
    }

    #[test]
    fn utc_of_sample_handles_samples_before_anchor() {
        let anchor = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap();
        let snap = TimeSnap {
            rtp_timestamp: 20_000,
            utc_timestamp: anchor,
            source: SnapSource::ChuTone,
            confidence: 0.9,
            established_at: anchor,
        };
        let got = snap.utc_of_sample(0, HF_SAMPLE_RATE);
        assert_eq!(got, anchor - chrono::Duration::seconds(1));
    }

    #[test]
    fn qualifies_requires_both_thresholds() {
        assert!(TimeSnap::qualifies(0.95, 20.0));
        assert!(!TimeSnap::qualifies(0.5, 20.0));
        assert!(!TimeSnap::qualifies(0.95, 10.0));
    }

    #[test]
    fn wrapping_seq_distance_handles_wraparound() {
        let a = WrappingSeq(65535);
        let b = WrappingSeq(1);
        assert_eq!(a.distance_to(b), 2);
        assert_eq!(b.distance_to(a), -2);
    }

    #[test]
    fn minute_floor_truncates_seconds_and_subsecs() {
        let t = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::milliseconds(123);
        let floored = minute_floor(t);
        assert_eq!(floored, Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 0).unwrap());
    }
}
