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

//! Atomic "write-temp-then-rename" publication for every status/state file
//! (SPEC_FULL.md sections 5 and 6): many readers, one writer per file.

use crate::error::StatusError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Serialize `value` as JSON and publish it atomically at `path`. The
/// temp file is created in the same directory as `path` so the final
/// rename is guaranteed to stay on one filesystem.
pub fn publish_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StatusError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "published status file");
    Ok(())
}

/// Load and deserialize a previously published JSON file, returning `None`
/// if it does not exist yet (e.g. first run for a channel).
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StatusError> {
    match fs::File::open(path) {
        Ok(file) => Ok(Some(serde_json::from_reader(file)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Append one line to a CSV file, creating it with `header` if it does not
/// yet exist. Used for the per-channel clock-offset series and the fused
/// estimate file (SPEC_FULL.md section 6), both of which are append-mostly
/// rather than atomically republished in full each minute.
pub fn append_csv_row(path: &Path, header: &str, row: &str) -> Result<(), StatusError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let is_new = !path.exists();
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    if is_new {
        writeln!(file, "{header}")?;
    }
    if let Err(e) = writeln!(file, "{row}") {
        warn!(path = %path.display(), error = %e, "failed to append csv row");
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        version: u32,
        name: String,
    }

    #[test]
    fn publish_json_is_readable_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        let value = Sample { version: 1, name: "fusion".to_owned() };
        publish_json(&path, &value).unwrap();
        let read_back: Sample =
            serde_json::from_reader(fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(read_back, value);
    }

    #[test]
    fn load_json_returns_none_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: Option<Sample> = load_json(&path).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_json_round_trips_published_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        let value = Sample { version: 2, name: "loaded".to_owned() };
        publish_json(&path, &value).unwrap();
        let loaded: Option<Sample> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(value));
    }

    #[test]
    fn append_csv_row_writes_header_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("series.csv");
        append_csv_row(&path, "a,b", "1,2").unwrap();
        append_csv_row(&path, "a,b", "3,4").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "a,b\n1,2\n3,4\n");
    }
}
