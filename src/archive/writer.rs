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

//! Per-channel append-only archive writer (C2). Strictly-monotonic in RTP
//! sample index (SPEC_FULL.md section 8, invariant 1): a write that would
//! regress the timeline is refused rather than corrupting it.

use crate::archive::format::{
    encode_channel_identity, encode_discontinuity, encode_header, encode_minute_marker,
    encode_record, ChannelIdentity, Discontinuity, MinuteMarker, RecordKind,
};
use crate::archive::index::IndexWriter;
use crate::config::ChannelConfig;
use crate::dsp::iq::IQSample;
use crate::error::ArchiveError;
use crate::paths::{archive_bin_path, archive_idx_path};
use crate::time::TimeSnap;
use chrono::{DateTime, NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, instrument, warn};

const FSYNC_MAX_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

pub struct ArchiveWriter {
    bin_path: PathBuf,
    writer: BufWriter<File>,
    idx: IndexWriter,
    offset: u64,
    next_expected_sample: Option<u64>,
    last_fsync: Instant,
}

impl ArchiveWriter {
    /// Open (creating if absent) the archive for `channel` on `day`. A
    /// freshly created file gets its header fsync'd immediately, matching
    /// the teacher's "fsync header + first marker at file creation" policy.
    #[instrument(skip(channel))]
    pub fn create_or_open(
        data_root: &std::path::Path,
        channel: &ChannelConfig,
        day: NaiveDate,
    ) -> Result<Self, ArchiveError> {
        let bin_path = archive_bin_path(data_root, &channel.description, day);
        let idx_path = archive_idx_path(data_root, &channel.description, day);
        fs::create_dir_all(bin_path.parent().unwrap())?;

        let is_new = !bin_path.exists();
        let mut file = OpenOptions::new().create(true).append(true).read(true).open(&bin_path)?;
        let mut offset = file.metadata()?.len();

        if is_new {
            let identity = ChannelIdentity {
                ssrc: channel.ssrc,
                frequency_hz: channel.frequency_hz,
                description: channel.description.clone(),
                sample_rate_hz: channel.sample_rate_hz,
            };
            let header = encode_header(&identity);
            file.write_all(&header)?;
            file.sync_all()?;
            offset = header.len() as u64;
            debug!(path = %bin_path.display(), "created new archive file");
        }

        let idx = IndexWriter::open(&idx_path)?;

        Ok(ArchiveWriter {
            bin_path,
            writer: BufWriter::new(file),
            idx,
            offset,
            next_expected_sample: None,
            last_fsync: Instant::now(),
        })
    }

    fn write_record(&mut self, kind: RecordKind, body: &[u8]) -> Result<(), ArchiveError> {
        let framed = encode_record(kind, body);
        self.writer.write_all(&framed)?;
        self.offset += framed.len() as u64;
        Ok(())
    }

    pub fn append_samples(&mut self, start_rtp: u64, samples: &[IQSample]) -> Result<(), ArchiveError> {
        if let Some(expected) = self.next_expected_sample {
            if start_rtp < expected {
                warn!(
                    expected,
                    attempted = start_rtp,
                    path = %self.bin_path.display(),
                    "refusing archive write that would regress the timeline"
                );
                return Err(ArchiveError::TimelineRegression { expected, attempted: start_rtp });
            }
        }
        let body = crate::archive::format::encode_samples(samples);
        self.write_record(RecordKind::Samples, &body)?;
        self.next_expected_sample = Some(start_rtp + samples.len() as u64);
        Ok(())
    }

    pub fn append_discontinuity(&mut self, discontinuity: &Discontinuity) -> Result<(), ArchiveError> {
        let body = encode_discontinuity(discontinuity)?;
        self.write_record(RecordKind::Discontinuity, &body)?;
        self.next_expected_sample =
            Some(discontinuity.start_rtp + discontinuity.length_samples);
        Ok(())
    }

    pub fn append_time_snap_update(&mut self, snap: &TimeSnap) -> Result<(), ArchiveError> {
        let body = serde_json::to_vec(snap).map_err(|e| ArchiveError::CorruptHeader(e.to_string()))?;
        self.write_record(RecordKind::TimeSnapUpdate, &body)
    }

    /// Emit the `MINUTE_MARKER` for `utc_minute`, index it, and fsync: the
    /// one point in the pipeline where a bounded write-back is forced to
    /// disk (SPEC_FULL.md section 4.2).
    pub fn mark_minute_boundary(
        &mut self,
        utc_minute: DateTime<Utc>,
        time_snap_snapshot: Option<TimeSnap>,
    ) -> Result<(), ArchiveError> {
        let marker = MinuteMarker { utc_minute, sample_offset_in_file: self.offset, time_snap_snapshot };
        let body = encode_minute_marker(&marker)?;
        let marker_offset = self.offset;
        self.write_record(RecordKind::MinuteMarker, &body)?;
        self.idx.append(utc_minute.timestamp(), marker_offset)?;
        self.flush_and_sync()?;
        self.idx.sync()?;
        Ok(())
    }

    /// Flush the buffered writer and fsync if the bounded write-back window
    /// has elapsed, regardless of minute boundaries.
    pub fn maybe_periodic_sync(&mut self) -> Result<(), ArchiveError> {
        if self.last_fsync.elapsed() >= FSYNC_MAX_INTERVAL {
            self.flush_and_sync()?;
        }
        Ok(())
    }

    fn flush_and_sync(&mut self) -> Result<(), ArchiveError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.last_fsync = Instant::now();
        Ok(())
    }

    pub fn next_expected_sample(&self) -> Option<u64> {
        self.next_expected_sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stations::Station;
    use chrono::TimeZone;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use tempfile::tempdir;

    fn test_channel() -> ChannelConfig {
        ChannelConfig {
            ssrc: 1,
            frequency_hz: 10_000_000,
            description: "WWV 10 MHz".to_owned(),
            station: Station::Wwv,
            multicast_group: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 1, 1, 1)), 5004),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            sample_rate_hz: 20_000,
            delivery_grace: Default::default(),
            completeness_floor: None,
        }
    }

    #[test]
    fn rejects_regressing_writes() {
        let dir = tempdir().unwrap();
        let channel = test_channel();
        let day = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let mut writer = ArchiveWriter::create_or_open(dir.path(), &channel, day).unwrap();
        writer.append_samples(0, &[IQSample::new(0.0, 0.0); 10]).unwrap();
        let err = writer.append_samples(5, &[IQSample::new(0.0, 0.0); 10]).unwrap_err();
        assert!(matches!(err, ArchiveError::TimelineRegression { expected: 10, attempted: 5 }));
    }

    #[test]
    fn minute_marker_is_indexed() {
        let dir = tempdir().unwrap();
        let channel = test_channel();
        let day = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let mut writer = ArchiveWriter::create_or_open(dir.path(), &channel, day).unwrap();
        writer.append_samples(0, &[IQSample::new(0.0, 0.0); 10]).unwrap();
        let minute = chrono::Utc.with_ymd_and_hms(2026, 7, 30, 0, 1, 0).unwrap();
        writer.mark_minute_boundary(minute, None).unwrap();

        let idx_path = archive_idx_path(dir.path(), &channel.description, day);
        let idx = crate::archive::index::IndexReader::open(&idx_path).unwrap();
        assert!(idx.lookup(minute.timestamp()).is_some());
    }
}
