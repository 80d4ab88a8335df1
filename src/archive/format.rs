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

//! Wire layout of the archive file (SPEC_FULL.md section 6): magic, header,
//! and the `<u8 kind><u32 length><bytes[length]>` record stream. All
//! multi-byte fields are little-endian.

use crate::dsp::iq::IQSample;
use crate::error::ArchiveError;
use crate::time::TimeSnap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAGIC: &[u8; 11] = b"GRAPE-ARCV\0";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscontinuityKind {
    NetworkGap,
    Overflow,
    Underflow,
    SourceUnavailable,
    RecorderOffline,
    SyncAdjust,
}

impl DiscontinuityKind {
    pub fn to_u8(self) -> u8 {
        match self {
            DiscontinuityKind::NetworkGap => 0,
            DiscontinuityKind::Overflow => 1,
            DiscontinuityKind::Underflow => 2,
            DiscontinuityKind::SourceUnavailable => 3,
            DiscontinuityKind::RecorderOffline => 4,
            DiscontinuityKind::SyncAdjust => 5,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ArchiveError> {
        Ok(match value {
            0 => DiscontinuityKind::NetworkGap,
            1 => DiscontinuityKind::Overflow,
            2 => DiscontinuityKind::Underflow,
            3 => DiscontinuityKind::SourceUnavailable,
            4 => DiscontinuityKind::RecorderOffline,
            5 => DiscontinuityKind::SyncAdjust,
            other => return Err(ArchiveError::CorruptHeader(format!("bad discontinuity kind {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Discontinuity {
    pub start_rtp: u64,
    pub length_samples: u64,
    pub kind: DiscontinuityKind,
    pub wall_instant: DateTime<Utc>,
    pub related_to_timing_event: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteMarker {
    pub utc_minute: DateTime<Utc>,
    pub sample_offset_in_file: u64,
    pub time_snap_snapshot: Option<TimeSnap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Samples,
    Discontinuity,
    TimeSnapUpdate,
    MinuteMarker,
}

impl RecordKind {
    pub fn to_u8(self) -> u8 {
        match self {
            RecordKind::Samples => 0,
            RecordKind::Discontinuity => 1,
            RecordKind::TimeSnapUpdate => 2,
            RecordKind::MinuteMarker => 3,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ArchiveError> {
        Ok(match value {
            0 => RecordKind::Samples,
            1 => RecordKind::Discontinuity,
            2 => RecordKind::TimeSnapUpdate,
            3 => RecordKind::MinuteMarker,
            other => return Err(ArchiveError::CorruptHeader(format!("bad record kind {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    pub ssrc: u32,
    pub frequency_hz: u64,
    pub description: String,
    pub sample_rate_hz: u32,
}

/// Serialize a record body to the archive's wire format. `Samples` bodies
/// are raw interleaved `f32` I/Q; the other kinds are JSON, which keeps the
/// archive readable with ordinary tools without pulling in a binary struct
/// codec for the handful of low-frequency record kinds.
pub fn encode_samples(samples: &[IQSample]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 8);
    for s in samples {
        out.extend_from_slice(&s.re.to_le_bytes());
        out.extend_from_slice(&s.im.to_le_bytes());
    }
    out
}

pub fn decode_samples(body: &[u8]) -> Vec<IQSample> {
    body.chunks_exact(8)
        .map(|c| {
            let re = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
            let im = f32::from_le_bytes([c[4], c[5], c[6], c[7]]);
            IQSample::new(re, im)
        })
        .collect()
}

pub fn encode_channel_identity(id: &ChannelIdentity) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&id.ssrc.to_le_bytes());
    out.extend_from_slice(&id.frequency_hz.to_le_bytes());
    out.extend_from_slice(&id.sample_rate_hz.to_le_bytes());
    let desc = id.description.as_bytes();
    out.extend_from_slice(&(desc.len() as u32).to_le_bytes());
    out.extend_from_slice(desc);
    out
}

pub fn decode_channel_identity(body: &[u8]) -> Result<ChannelIdentity, ArchiveError> {
    if body.len() < 20 {
        return Err(ArchiveError::CorruptHeader("channel identity block too short".into()));
    }
    let ssrc = u32::from_le_bytes(body[0..4].try_into().unwrap());
    let frequency_hz = u64::from_le_bytes(body[4..12].try_into().unwrap());
    let sample_rate_hz = u32::from_le_bytes(body[12..16].try_into().unwrap());
    let desc_len = u32::from_le_bytes(body[16..20].try_into().unwrap()) as usize;
    let desc_bytes = body
        .get(20..20 + desc_len)
        .ok_or_else(|| ArchiveError::CorruptHeader("channel identity description truncated".into()))?;
    let description = String::from_utf8_lossy(desc_bytes).into_owned();
    Ok(ChannelIdentity { ssrc, frequency_hz, description, sample_rate_hz })
}

pub fn encode_header(id: &ChannelIdentity) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&encode_channel_identity(id));
    out
}

/// Parse the fixed header at the start of an archive file, returning the
/// identity block and the number of bytes it occupied.
pub fn decode_header(bytes: &[u8]) -> Result<(ChannelIdentity, usize), ArchiveError> {
    if bytes.len() < MAGIC.len() + 4 {
        return Err(ArchiveError::CorruptHeader("file shorter than fixed header".into()));
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(ArchiveError::CorruptHeader("magic mismatch".into()));
    }
    let version = u32::from_le_bytes(bytes[MAGIC.len()..MAGIC.len() + 4].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(ArchiveError::CorruptHeader(format!("unsupported format version {version}")));
    }
    let identity_start = MAGIC.len() + 4;
    let identity = decode_channel_identity(&bytes[identity_start..])?;
    let desc_len = identity.description.len();
    let identity_len = 4 + 8 + 4 + 4 + desc_len;
    Ok((identity, identity_start + identity_len))
}

/// Frame one record as `<u8 kind><u32 length><bytes>`.
pub fn encode_record(kind: RecordKind, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.push(kind.to_u8());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

/// Parse one record from `bytes`, returning the kind, its body slice, and
/// the total number of bytes consumed (including the 5-byte frame header).
pub fn decode_record(bytes: &[u8]) -> Result<(RecordKind, &[u8], usize), ArchiveError> {
    if bytes.len() < 5 {
        return Err(ArchiveError::CorruptHeader("record frame truncated".into()));
    }
    let kind = RecordKind::from_u8(bytes[0])?;
    let len = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
    let body = bytes
        .get(5..5 + len)
        .ok_or_else(|| ArchiveError::CorruptHeader("record body truncated".into()))?;
    Ok((kind, body, 5 + len))
}

pub fn encode_discontinuity(d: &Discontinuity) -> Result<Vec<u8>, ArchiveError> {
    serde_json::to_vec(d).map_err(|e| ArchiveError::CorruptHeader(e.to_string()))
}

pub fn decode_discontinuity(body: &[u8]) -> Result<Discontinuity, ArchiveError> {
    serde_json::from_slice(body).map_err(|e| ArchiveError::CorruptHeader(e.to_string()))
}

pub fn encode_minute_marker(m: &MinuteMarker) -> Result<Vec<u8>, ArchiveError> {
    serde_json::to_vec(m).map_err(|e| ArchiveError::CorruptHeader(e.to_string()))
}

pub fn decode_minute_marker(body: &[u8]) -> Result<MinuteMarker, ArchiveError> {
    serde_json::from_slice(body).map_err(|e| ArchiveError::CorruptHeader(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_round_trip() {
        let samples = vec![IQSample::new(0.1, -0.2), IQSample::new(-1.0, 1.0)];
        let encoded = encode_samples(&samples);
        assert_eq!(decode_samples(&encoded), samples);
    }

    #[test]
    fn channel_identity_round_trips() {
        let id = ChannelIdentity {
            ssrc: 0xdead_beef,
            frequency_hz: 10_000_000,
            description: "WWV 10 MHz".to_owned(),
            sample_rate_hz: 20_000,
        };
        let encoded = encode_channel_identity(&id);
        assert_eq!(decode_channel_identity(&encoded).unwrap(), id);
    }

    #[test]
    fn header_round_trips() {
        let id = ChannelIdentity {
            ssrc: 42,
            frequency_hz: 5_000_000,
            description: "WWV 5 MHz".to_owned(),
            sample_rate_hz: 20_000,
        };
        let header = encode_header(&id);
        let (decoded, len) = decode_header(&header).unwrap();
        assert_eq!(decoded, id);
        assert_eq!(len, header.len());
    }

    #[test]
    fn record_framing_round_trips() {
        let body = encode_samples(&[IQSample::new(1.0, 2.0)]);
        let framed = encode_record(RecordKind::Samples, &body);
        let (kind, decoded_body, consumed) = decode_record(&framed).unwrap();
        assert_eq!(kind, RecordKind::Samples);
        assert_eq!(decoded_body, body.as_slice());
        assert_eq!(consumed, framed.len());
    }

    #[test]
    fn discontinuity_kind_round_trips_every_variant() {
        for kind in [
            DiscontinuityKind::NetworkGap,
            DiscontinuityKind::Overflow,
            DiscontinuityKind::Underflow,
            DiscontinuityKind::SourceUnavailable,
            DiscontinuityKind::RecorderOffline,
            DiscontinuityKind::SyncAdjust,
        ] {
            assert_eq!(DiscontinuityKind::from_u8(kind.to_u8()).unwrap(), kind);
        }
    }
}
