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

//! Per-SSRC sequence/timestamp tracking and gap classification
//! (SPEC_FULL.md section 4.1). Sequence and RTP-timestamp clocks are
//! private to a single SSRC and must never be shared across channels; a
//! `Reassembler` is owned exclusively by one channel worker, mirroring the
//! teacher's per-`Receiver` `last_sequence_number`/`last_timestamp` fields
//! in `aes67-rs::receiver::Receiver`.

use crate::archive::format::{Discontinuity, DiscontinuityKind};
use crate::dsp::iq::IQSample;
use crate::time::WrappingSeq;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

const REORDER_WINDOW: chrono::Duration = chrono::Duration::milliseconds(50);
const SOURCE_UNAVAILABLE_AFTER: chrono::Duration = chrono::Duration::seconds(1);
const SYNC_ADJUST_FORWARD_JUMP: i64 = 10 * 20_000; // 10s at 20 kHz, in samples
const MAX_LOST_PACKETS: u16 = 15;

struct Pending {
    rtp: u64,
    samples: Vec<IQSample>,
    arrived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReassemblyOutcome {
    /// A contiguous run of samples starting at `start_rtp`, in the
    /// channel's unwrapped sample clock.
    Samples { start_rtp: u64, samples: Vec<IQSample> },
    Discontinuity(Discontinuity),
    /// Malformed or off-origin input; counted but not archived.
    Dropped(&'static str),
}

/// Reassembles one SSRC's RTP stream into an ordered sequence of sample
/// runs and discontinuities. `sample_rate_hz` converts RTP-timestamp ticks
/// (assumed one tick per sample, true for this crate's IQ payloads) to
/// wall-clock durations for the gap thresholds above.
pub struct Reassembler {
    sample_rate_hz: u32,
    expected_seq: Option<WrappingSeq>,
    expected_rtp: Option<u64>,
    rtp_wrap_offset: u64,
    last_rtp_wire: Option<u32>,
    last_wall_instant: Option<DateTime<Utc>>,
    reorder_buffer: BTreeMap<u16, Pending>,
    restart_marker_pending: bool,
}

impl Reassembler {
    pub fn new(sample_rate_hz: u32) -> Self {
        Reassembler {
            sample_rate_hz,
            expected_seq: None,
            expected_rtp: None,
            rtp_wrap_offset: 0,
            last_rtp_wire: None,
            last_wall_instant: None,
            reorder_buffer: BTreeMap::new(),
            restart_marker_pending: false,
        }
    }

    /// Mark that this worker just (re)started after a recorded outage, so
    /// the next gap resolves to `RECORDER_OFFLINE` rather than
    /// `SOURCE_UNAVAILABLE` (SPEC_FULL.md section 4.1).
    pub fn note_restart(&mut self) {
        self.restart_marker_pending = true;
    }

    /// Emit a `SOURCE_UNAVAILABLE`/`RECORDER_OFFLINE` discontinuity if more
    /// than one second has passed since the last packet. Call on a regular
    /// tick independent of packet arrival.
    pub fn check_timeout(&mut self, now: DateTime<Utc>) -> Option<ReassemblyOutcome> {
        let last = self.last_wall_instant?;
        if now - last < SOURCE_UNAVAILABLE_AFTER {
            return None;
        }
        let outage = now - last;
        let length_samples = (outage.num_milliseconds().max(0) as u64 * self.sample_rate_hz as u64) / 1000;
        let kind = if self.restart_marker_pending {
            self.restart_marker_pending = false;
            DiscontinuityKind::RecorderOffline
        } else {
            DiscontinuityKind::SourceUnavailable
        };
        self.last_wall_instant = Some(now);
        let start_rtp = self.expected_rtp.unwrap_or(0);
        self.expected_rtp = Some(start_rtp + length_samples);
        Some(ReassemblyOutcome::Discontinuity(Discontinuity {
            start_rtp,
            length_samples,
            kind,
            wall_instant: now,
            related_to_timing_event: false,
        }))
    }

    /// Unwrap the 32-bit wire timestamp against the last-seen wire value,
    /// counting wraps the same way the teacher's `calibrate_timestamp_offset`
    /// tracks `U32_WRAP` crossings.
    fn unwrap_rtp(&mut self, wire_ts: u32) -> u64 {
        if let Some(last_wire) = self.last_rtp_wire {
            if wire_ts < last_wire && (last_wire - wire_ts) > (u32::MAX / 2) {
                self.rtp_wrap_offset += 1u64 << 32;
            }
        }
        self.last_rtp_wire = Some(wire_ts);
        self.rtp_wrap_offset + wire_ts as u64
    }

    /// Feed one received RTP frame; returns zero or more outcomes (a single
    /// packet can both close a reorder gap and emit its own samples).
    pub fn ingest(
        &mut self,
        seq_wire: u16,
        rtp_ts_wire: u32,
        samples: Vec<IQSample>,
        now: DateTime<Utc>,
    ) -> Vec<ReassemblyOutcome> {
        let seq = WrappingSeq(seq_wire);
        let rtp = self.unwrap_rtp(rtp_ts_wire);
        self.last_wall_instant = Some(now);

        let (Some(expected_seq), Some(expected_rtp)) = (self.expected_seq, self.expected_rtp) else {
            self.expected_seq = Some(seq.next());
            self.expected_rtp = Some(rtp + samples.len() as u64);
            return vec![ReassemblyOutcome::Samples { start_rtp: rtp, samples }];
        };

        let rtp_delta = rtp as i64 - expected_rtp as i64;
        if rtp_delta < 0 || rtp_delta > SYNC_ADJUST_FORWARD_JUMP {
            self.reorder_buffer.clear();
            self.expected_seq = Some(seq.next());
            self.expected_rtp = Some(rtp + samples.len() as u64);
            return vec![
                ReassemblyOutcome::Discontinuity(Discontinuity {
                    start_rtp: expected_rtp,
                    length_samples: 0,
                    kind: DiscontinuityKind::SyncAdjust,
                    wall_instant: now,
                    related_to_timing_event: true,
                }),
                ReassemblyOutcome::Samples { start_rtp: rtp, samples },
            ];
        }

        let seq_delta = expected_seq.distance_to(seq);

        if seq_delta == 0 {
            self.expected_seq = Some(seq.next());
            self.expected_rtp = Some(rtp + samples.len() as u64);
            let mut out = vec![ReassemblyOutcome::Samples { start_rtp: rtp, samples }];
            out.extend(self.drain_reorder_buffer());
            return out;
        }

        if seq_delta > 0 && seq_delta <= MAX_LOST_PACKETS as i32 {
            let missing = (rtp as i64 - expected_rtp as i64).max(0) as u64;
            self.expected_seq = Some(seq.next());
            self.expected_rtp = Some(rtp + samples.len() as u64);
            let mut out = Vec::new();
            if missing > 0 {
                out.push(ReassemblyOutcome::Discontinuity(Discontinuity {
                    start_rtp: expected_rtp,
                    length_samples: missing,
                    kind: DiscontinuityKind::NetworkGap,
                    wall_instant: now,
                    related_to_timing_event: false,
                }));
            }
            out.push(ReassemblyOutcome::Samples { start_rtp: rtp, samples });
            out.extend(self.drain_reorder_buffer());
            return out;
        }

        // seq_delta < 0: arrived behind the expected cursor. Buffer it for
        // reordering unless the window has already closed.
        self.reorder_buffer.insert(seq_wire, Pending { rtp, samples, arrived_at: now });
        self.evict_stale_reorder_entries(now)
    }

    fn drain_reorder_buffer(&mut self) -> Vec<ReassemblyOutcome> {
        let mut out = Vec::new();
        loop {
            let Some(expected_seq) = self.expected_seq else { break };
            let Some(pending) = self.reorder_buffer.remove(&expected_seq.0) else { break };
            self.expected_seq = Some(expected_seq.next());
            self.expected_rtp = Some(pending.rtp + pending.samples.len() as u64);
            out.push(ReassemblyOutcome::Samples { start_rtp: pending.rtp, samples: pending.samples });
        }
        out
    }

    fn evict_stale_reorder_entries(&mut self, now: DateTime<Utc>) -> Vec<ReassemblyOutcome> {
        let stale: Vec<u16> = self
            .reorder_buffer
            .iter()
            .filter(|(_, p)| now - p.arrived_at > REORDER_WINDOW)
            .map(|(seq, _)| *seq)
            .collect();
        if stale.is_empty() {
            return Vec::new();
        }
        for seq in &stale {
            self.reorder_buffer.remove(seq);
        }
        let Some(expected_rtp) = self.expected_rtp else { return Vec::new() };
        if let Some(expected_seq) = self.expected_seq {
            self.expected_seq = Some(WrappingSeq(expected_seq.0.wrapping_add(stale.len() as u16)));
        }
        vec![ReassemblyOutcome::Discontinuity(Discontinuity {
            start_rtp: expected_rtp,
            length_samples: 0,
            kind: DiscontinuityKind::NetworkGap,
            wall_instant: now,
            related_to_timing_event: false,
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame(n: usize) -> Vec<IQSample> {
        vec![IQSample::new(0.0, 0.0); n]
    }

    #[test]
    fn in_order_packets_produce_contiguous_samples() {
        let mut r = Reassembler::new(20_000);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let out1 = r.ingest(0, 0, frame(160), t0);
        assert_eq!(out1, vec![ReassemblyOutcome::Samples { start_rtp: 0, samples: frame(160) }]);
        let out2 = r.ingest(1, 160, frame(160), t0);
        assert_eq!(out2, vec![ReassemblyOutcome::Samples { start_rtp: 160, samples: frame(160) }]);
    }

    #[test]
    fn lost_packet_emits_network_gap_then_samples() {
        let mut r = Reassembler::new(20_000);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        r.ingest(0, 0, frame(160), t0);
        // seq 1 (160 samples) is lost entirely; seq 2 arrives.
        let out = r.ingest(2, 320, frame(160), t0);
        assert!(matches!(out[0], ReassemblyOutcome::Discontinuity(Discontinuity {
            kind: DiscontinuityKind::NetworkGap,
            length_samples: 160,
            ..
        })));
        assert!(matches!(out[1], ReassemblyOutcome::Samples { start_rtp: 320, .. }));
    }

    #[test]
    fn reordered_pair_is_restored_without_discontinuity() {
        let mut r = Reassembler::new(20_000);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        r.ingest(0, 0, frame(160), t0);
        // seq 2 arrives before seq 1.
        let out_early = r.ingest(2, 320, frame(160), t0);
        assert!(out_early.is_empty(), "out-of-order packet should just buffer");
        let out_fill = r.ingest(1, 160, frame(160), t0);
        assert_eq!(
            out_fill,
            vec![
                ReassemblyOutcome::Samples { start_rtp: 160, samples: frame(160) },
                ReassemblyOutcome::Samples { start_rtp: 320, samples: frame(160) },
            ]
        );
    }

    #[test]
    fn large_forward_jump_is_sync_adjust() {
        let mut r = Reassembler::new(20_000);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        r.ingest(0, 0, frame(160), t0);
        let out = r.ingest(1, 20_000 * 20, frame(160), t0);
        assert!(matches!(
            out[0],
            ReassemblyOutcome::Discontinuity(Discontinuity { kind: DiscontinuityKind::SyncAdjust, .. })
        ));
    }

    #[test]
    fn small_backward_jump_is_sync_adjust() {
        let mut r = Reassembler::new(20_000);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        r.ingest(0, 100_000, frame(160), t0);
        // rtp_ts steps back by 2s worth of samples, well short of the 10s
        // forward-jump threshold but still a regression.
        let out = r.ingest(1, 100_000 + 160 - 40_000, frame(160), t0);
        assert!(matches!(
            out[0],
            ReassemblyOutcome::Discontinuity(Discontinuity { kind: DiscontinuityKind::SyncAdjust, .. })
        ));
    }

    #[test]
    fn no_packets_for_over_a_second_is_source_unavailable() {
        let mut r = Reassembler::new(20_000);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        r.ingest(0, 0, frame(160), t0);
        let t1 = t0 + chrono::Duration::seconds(2);
        let out = r.check_timeout(t1).unwrap();
        assert!(matches!(
            out,
            ReassemblyOutcome::Discontinuity(Discontinuity { kind: DiscontinuityKind::SourceUnavailable, .. })
        ));
    }
}
