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

//! Sidecar `.idx` file: `utc_minute -> byte offset of that minute's
//! MINUTE_MARKER record` (SPEC_FULL.md section 4.2). Fixed-width 16-byte
//! entries (`i64` minute-epoch-seconds, `u64` offset), append-only and
//! sorted by construction, so downstream readers mmap it and binary-search
//! rather than scanning the whole archive for a minute boundary.

use crate::error::ArchiveError;
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

const ENTRY_LEN: usize = 16;

pub struct IndexWriter {
    file: File,
}

impl IndexWriter {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(IndexWriter { file })
    }

    pub fn append(&mut self, utc_minute_epoch_secs: i64, byte_offset: u64) -> Result<(), ArchiveError> {
        let mut entry = [0u8; ENTRY_LEN];
        entry[0..8].copy_from_slice(&utc_minute_epoch_secs.to_le_bytes());
        entry[8..16].copy_from_slice(&byte_offset.to_le_bytes());
        self.file.write_all(&entry)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<(), ArchiveError> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// Read-only memory-mapped view of an `.idx` file for random-access minute
/// lookup.
pub struct IndexReader {
    mmap: Mmap,
}

impl IndexReader {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(IndexReader { mmap })
    }

    fn len(&self) -> usize {
        self.mmap.len() / ENTRY_LEN
    }

    fn entry(&self, i: usize) -> (i64, u64) {
        let base = i * ENTRY_LEN;
        let minute = i64::from_le_bytes(self.mmap[base..base + 8].try_into().unwrap());
        let offset = u64::from_le_bytes(self.mmap[base + 8..base + 16].try_into().unwrap());
        (minute, offset)
    }

    /// Byte offset of the `MINUTE_MARKER` record for `utc_minute_epoch_secs`,
    /// or `None` if that minute was never indexed.
    pub fn lookup(&self, utc_minute_epoch_secs: i64) -> Option<u64> {
        let mut lo = 0usize;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (minute, offset) = self.entry(mid);
            match minute.cmp(&utc_minute_epoch_secs) {
                std::cmp::Ordering::Equal => return Some(offset),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lookup_finds_appended_minutes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("day.idx");
        {
            let mut w = IndexWriter::open(&path).unwrap();
            w.append(1000, 128).unwrap();
            w.append(1060, 4096).unwrap();
            w.append(1120, 9000).unwrap();
            w.sync().unwrap();
        }
        let r = IndexReader::open(&path).unwrap();
        assert_eq!(r.lookup(1060), Some(4096));
        assert_eq!(r.lookup(1000), Some(128));
        assert_eq!(r.lookup(1030), None);
    }
}
