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

//! The closed set of time-signal stations this crate knows about
//! (SPEC_FULL.md section 9: "implement as a tagged sum with per-variant
//! handlers rather than open polymorphism").

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Station {
    Wwv,
    Wwvh,
    Chu,
}

impl Station {
    /// Second-mark marker tone frequency for this station.
    pub fn marker_tone_hz(self) -> f64 {
        match self {
            Station::Wwv => 1000.0,
            Station::Wwvh => 1200.0,
            Station::Chu => 1000.0,
        }
    }

    /// Coherent marker-burst duration (SPEC_FULL.md section 4.4).
    pub fn marker_duration_ms(self) -> f64 {
        match self {
            Station::Wwv | Station::Wwvh => 5.0,
            Station::Chu => 10.0,
        }
    }

    /// Geodetic location in decimal degrees, for great-circle delay.
    pub fn geodetic(self) -> GeodeticPoint {
        match self {
            Station::Wwv => GeodeticPoint { lat: 40.6781, lon: -105.0469 },
            Station::Wwvh => GeodeticPoint { lat: 21.9875, lon: -159.7652 },
            Station::Chu => GeodeticPoint { lat: 45.2969, lon: -75.7544 },
        }
    }

    /// Whether WWVH transmits at all on this carrier frequency
    /// (SPEC_FULL.md section 4.4: enabled only on 2.5/5/10/15 MHz).
    pub fn wwvh_shares(frequency_hz: u64) -> bool {
        matches!(frequency_hz, 2_500_000 | 5_000_000 | 10_000_000 | 15_000_000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeodeticPoint {
    pub lat: f64,
    pub lon: f64,
}

const EARTH_RADIUS_KM: f64 = 6371.0088;

impl GeodeticPoint {
    /// Great-circle distance via the haversine formula, in kilometers.
    pub fn distance_km(self, other: GeodeticPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_KM * c
    }
}

/// Minute-of-hour schedule for exclusive ground-truth tones
/// (SPEC_FULL.md section 4.5, 2C).
pub fn is_wwv_500hz_minute(minute_of_hour: u32) -> bool {
    matches!(minute_of_hour, 1 | 16 | 17 | 19)
}

pub fn is_wwvh_600hz_minute(minute_of_hour: u32) -> bool {
    minute_of_hour == 2 || (43..=51).contains(&minute_of_hour)
}

pub fn is_wwvh_440hz_minute(minute_of_hour: u32) -> bool {
    minute_of_hour == 1
}

pub fn is_wwv_440hz_minute(minute_of_hour: u32) -> bool {
    minute_of_hour == 2
}

pub fn is_wwv_test_signal_minute(minute_of_hour: u32) -> bool {
    minute_of_hour == 8
}

pub fn is_wwvh_test_signal_minute(minute_of_hour: u32) -> bool {
    minute_of_hour == 44
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wwvh_shares_only_listed_frequencies() {
        assert!(Station::wwvh_shares(5_000_000));
        assert!(Station::wwvh_shares(15_000_000));
        assert!(!Station::wwvh_shares(20_000_000));
        assert!(!Station::wwvh_shares(25_000_000));
    }

    #[test]
    fn ground_truth_minute_schedule_matches_spec() {
        assert!(is_wwv_500hz_minute(1));
        assert!(is_wwv_500hz_minute(19));
        assert!(!is_wwv_500hz_minute(2));
        assert!(is_wwvh_600hz_minute(2));
        assert!(is_wwvh_600hz_minute(45));
        assert!(!is_wwvh_600hz_minute(42));
    }

    #[test]
    fn wwv_wwvh_distance_is_roughly_right() {
        let d = Station::Wwv.geodetic().distance_km(Station::Wwvh.geodetic());
        // Fort Collins CO <-> Kauai HI is roughly 6200 km.
        assert!((5800.0..6600.0).contains(&d), "distance was {d}");
    }
}
