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

//! Timing-Quality Annotator (C9): classifies how a given UTC timestamp was
//! derived, so downstream consumers of the archive and the clock-offset
//! series know how far to trust it.

use crate::time::{SnapSource, TimeSnap, MIN_SNAP_CONFIDENCE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimingQuality {
    /// Anchored by a qualifying tone detection within this minute.
    ToneLocked,
    /// No fresh tone this minute, but NTP is believed to be disciplining
    /// the host clock well enough to anchor the RTP timestamp directly.
    NtpSynced,
    /// Derived by extrapolating a stale `TimeSnap` forward using the RTP
    /// clock's own nominal rate.
    Interpolated,
    /// No usable anchor at all; this is the raw host wall clock at arrival.
    WallClock,
}

impl TimingQuality {
    /// Classify the quality of `snap` as of `now`, given whether NTP
    /// synchronization is currently believed healthy.
    pub fn classify(snap: &TimeSnap, now: chrono::DateTime<chrono::Utc>, ntp_healthy: bool) -> Self {
        let age = snap.age(now);
        let tone_sourced = matches!(snap.source, SnapSource::WwvTone | SnapSource::WwvhTone | SnapSource::ChuTone);
        match () {
            _ if tone_sourced && snap.confidence >= MIN_SNAP_CONFIDENCE && age < chrono::Duration::minutes(5) => {
                TimingQuality::ToneLocked
            }
            _ if ntp_healthy => TimingQuality::NtpSynced,
            _ if age <= chrono::Duration::hours(1) => TimingQuality::Interpolated,
            _ => TimingQuality::WallClock,
        }
    }

    pub fn trust_rank(self) -> u8 {
        match self {
            TimingQuality::ToneLocked => 3,
            TimingQuality::NtpSynced => 2,
            TimingQuality::Interpolated => 1,
            TimingQuality::WallClock => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn snap_with(source: SnapSource, confidence: f64, established_at: chrono::DateTime<Utc>) -> TimeSnap {
        TimeSnap {
            rtp_timestamp: 0,
            utc_timestamp: established_at,
            source,
            confidence,
            established_at,
        }
    }

    #[test]
    fn fresh_qualifying_tone_is_tone_locked() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 30).unwrap();
        let snap = snap_with(SnapSource::WwvTone, 0.95, now - chrono::Duration::seconds(5));
        assert_eq!(TimingQuality::classify(&snap, now, false), TimingQuality::ToneLocked);
    }

    #[test]
    fn stale_low_confidence_snap_degrades_to_wall_clock() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap();
        let snap = snap_with(SnapSource::StartupEstimate, 0.0, now - chrono::Duration::hours(2));
        assert_eq!(TimingQuality::classify(&snap, now, false), TimingQuality::WallClock);
    }

    #[test]
    fn two_minute_old_tone_snap_is_still_tone_locked() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap();
        let snap = snap_with(SnapSource::WwvTone, 0.95, now - chrono::Duration::minutes(2));
        assert_eq!(TimingQuality::classify(&snap, now, false), TimingQuality::ToneLocked);
    }

    #[test]
    fn thirty_minute_old_snap_is_interpolated_not_wall_clock() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 30, 0).unwrap();
        let snap = snap_with(SnapSource::WwvTone, 0.95, now - chrono::Duration::minutes(30));
        assert_eq!(TimingQuality::classify(&snap, now, false), TimingQuality::Interpolated);
    }

    #[test]
    fn stale_snap_with_healthy_ntp_is_ntp_synced_regardless_of_source() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 1, 0, 0).unwrap();
        let snap = snap_with(SnapSource::WwvTone, 0.95, now - chrono::Duration::minutes(30));
        assert_eq!(TimingQuality::classify(&snap, now, true), TimingQuality::NtpSynced);
    }

    #[test]
    fn trust_rank_orders_tone_above_interpolated() {
        assert!(TimingQuality::ToneLocked.trust_rank() > TimingQuality::Interpolated.trust_rank());
    }
}
