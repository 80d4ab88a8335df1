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

//! Single canonical source of every path this crate writes to or reads from.
//! SPEC_FULL.md section 9 calls mismatched path spellings between writer and
//! reader the spec's "#1 consistency hazard" because both Rust and external
//! (Python) observers consume the same files; every other module must go
//! through here rather than formatting its own paths.

use crate::config::sanitize_description;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub fn channel_dir_token(description: &str) -> String {
    sanitize_description(description)
}

pub fn raw_archive_dir(data_root: &Path, channel_description: &str) -> PathBuf {
    data_root
        .join("raw_archive")
        .join(channel_dir_token(channel_description))
}

pub fn archive_bin_path(data_root: &Path, channel_description: &str, day: NaiveDate) -> PathBuf {
    raw_archive_dir(data_root, channel_description).join(format!("{}.bin", day.format("%Y%m%d")))
}

pub fn archive_idx_path(data_root: &Path, channel_description: &str, day: NaiveDate) -> PathBuf {
    raw_archive_dir(data_root, channel_description).join(format!("{}.idx", day.format("%Y%m%d")))
}

pub fn phase2_channel_dir(data_root: &Path, channel_description: &str) -> PathBuf {
    data_root
        .join("phase2")
        .join(channel_dir_token(channel_description))
}

pub fn clock_offset_series_csv(data_root: &Path, channel_description: &str) -> PathBuf {
    phase2_channel_dir(data_root, channel_description)
        .join("clock_offset")
        .join("clock_offset_series.csv")
}

pub fn analytics_service_status_json(data_root: &Path, channel_description: &str) -> PathBuf {
    phase2_channel_dir(data_root, channel_description)
        .join("status")
        .join("analytics-service-status.json")
}

pub fn convergence_state_json(data_root: &Path, channel_description: &str) -> PathBuf {
    phase2_channel_dir(data_root, channel_description)
        .join("status")
        .join("convergence_state.json")
}

pub fn fusion_dir(data_root: &Path) -> PathBuf {
    data_root.join("phase2").join("fusion")
}

pub fn fused_d_clock_csv(data_root: &Path) -> PathBuf {
    fusion_dir(data_root).join("fused_d_clock.csv")
}

pub fn state_dir(data_root: &Path) -> PathBuf {
    data_root.join("state")
}

pub fn status_dir(data_root: &Path) -> PathBuf {
    data_root.join("status")
}

pub fn radiod_status_json(data_root: &Path) -> PathBuf {
    status_dir(data_root).join("radiod-status.json")
}

pub fn logs_dir(data_root: &Path) -> PathBuf {
    data_root.join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_paths_use_sanitized_token() {
        let root = Path::new("/data");
        assert_eq!(
            raw_archive_dir(root, "WWV 10 MHz"),
            Path::new("/data/raw_archive/WWV_10_MHz")
        );
        assert_eq!(
            clock_offset_series_csv(root, "WWV 10 MHz"),
            Path::new("/data/phase2/WWV_10_MHz/clock_offset/clock_offset_series.csv")
        );
    }

    #[test]
    fn archive_file_name_is_yyyymmdd() {
        let root = Path::new("/data");
        let day = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        assert_eq!(
            archive_bin_path(root, "CHU 7.85 MHz", day),
            Path::new("/data/raw_archive/CHU_7_85_MHz/20260730.bin")
        );
    }
}
