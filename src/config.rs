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

//! Typed configuration this crate consumes. Reading `GRAPE_CONFIG` off disk
//! is an external collaborator's job (SPEC_FULL.md section 10.5); these are
//! the structs it populates.

use crate::error::ConfigError;
use crate::stations::{GeodeticPoint, Station};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent channel identity: `(ssrc, frequency_hz, description)`
/// (SPEC_FULL.md section 3). `ssrc` is the primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub ssrc: u32,
    pub frequency_hz: u64,
    pub description: String,
    pub station: Station,
    pub multicast_group: SocketAddr,
    pub bind_address: IpAddr,
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,
    #[serde(default)]
    pub delivery_grace: DurationMs,
    #[serde(default)]
    pub completeness_floor: Option<f64>,
}

fn default_sample_rate() -> u32 {
    crate::time::HF_SAMPLE_RATE
}

/// Duration configured in milliseconds, defaulting to the 500 ms grace
/// period from SPEC_FULL.md section 4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationMs(pub u64);

impl Default for DurationMs {
    fn default() -> Self {
        DurationMs(500)
    }
}

impl From<DurationMs> for Duration {
    fn from(value: DurationMs) -> Self {
        Duration::from_millis(value.0)
    }
}

impl ChannelConfig {
    /// Directory-safe token derived from `description`. Must be computed by
    /// this single function everywhere a path is built from a channel
    /// (SPEC_FULL.md section 9, "coordinated paths").
    pub fn directory_token(&self) -> String {
        sanitize_description(&self.description)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.description.trim().is_empty() {
            return Err(ConfigError::InvalidDescription(self.description.clone()));
        }
        Ok(())
    }

    pub fn completeness_floor(&self) -> f64 {
        self.completeness_floor.unwrap_or(0.5)
    }
}

/// Replace every run of non-alphanumeric characters with an underscore and
/// trim leading/trailing underscores, so "WWV 10 MHz" -> "WWV_10_MHz"
/// identically wherever a path is derived from a channel description.
pub fn sanitize_description(description: &str) -> String {
    let mut out = String::with_capacity(description.len());
    let mut last_was_sep = false;
    for c in description.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    out.trim_matches('_').to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorConfig {
    pub data_root: PathBuf,
    pub channels: Vec<ChannelConfig>,
    pub receiver_location: GeodeticPoint,
    #[serde(default = "default_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "default_restart_window")]
    pub restart_window: DurationMs,
}

fn default_restart_attempts() -> u32 {
    5
}

fn default_restart_window() -> DurationMs {
    DurationMs(5 * 60 * 1000)
}

impl SupervisorConfig {
    pub fn ensure_data_root(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_root)
            .map_err(|_| ConfigError::DataRootUncreatable(self.data_root.clone()))
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FusionConfig {
    #[serde(default = "default_locked_agreement_ms")]
    pub locked_agreement_ms: f64,
    #[serde(default = "default_converging_agreement_ms")]
    pub converging_agreement_ms: f64,
}

fn default_locked_agreement_ms() -> f64 {
    1.0
}

fn default_converging_agreement_ms() -> f64 {
    3.0
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig {
            locked_agreement_ms: default_locked_agreement_ms(),
            converging_agreement_ms: default_converging_agreement_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_matches_spec_example() {
        assert_eq!(sanitize_description("WWV 10 MHz"), "WWV_10_MHz");
    }

    #[test]
    fn sanitize_collapses_repeated_separators() {
        assert_eq!(sanitize_description("CHU  3.33 MHz!!"), "CHU_3_33_MHz");
    }

    #[test]
    fn sanitize_trims_leading_and_trailing_separators() {
        assert_eq!(sanitize_description("  WWVH 5 MHz  "), "WWVH_5_MHz");
    }
}
