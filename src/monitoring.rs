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

//! In-process observability bus (SPEC_FULL.md section 10.4). High-frequency
//! per-packet stats use `try_send` and are dropped under backpressure rather
//! than stalling the hot path; low-frequency lifecycle events are sent with
//! a blocking `send().await`.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::convergence::ConvergenceState;
use crate::quality::TimingQuality;

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    WorkerStarted { channel: String },
    WorkerStopped { channel: String },
    WorkerRestarted { channel: String, attempt: u32 },
    WorkerDisabled { channel: String },
}

#[derive(Debug, Clone)]
pub enum RxStat {
    PacketReceived { seq: u16, payload_len: usize },
    MalformedPacket(String),
    PacketFromWrongSender(IpAddr),
    OutOfOrderPacket { expected_seq: u16, actual_seq: u16 },
    NetworkGap { length_samples: u64 },
    SyncAdjust,
    SourceUnavailable,
}

#[derive(Debug, Clone)]
pub enum DspStat {
    ToneDetected { channel: String, snr_db: f64, timing_error_ms: f64 },
    ToneMissed { channel: String },
    ConvergenceTransition {
        channel: String,
        from: ConvergenceState,
        to: ConvergenceState,
    },
    QualityAssigned { channel: String, quality: TimingQuality },
}

#[derive(Debug, Clone)]
pub enum MonitoringEvent {
    Channel(ChannelEvent),
    Rx(RxStat),
    Dsp(DspStat),
}

/// Cheap-to-clone handle into the monitoring bus, mirroring the teacher's
/// `Monitoring` type (`aes67-rs::monitoring`): state transitions are sent
/// with a blocking `send`, high-volume stats with a non-blocking `try_send`
/// that drops and logs rather than applying backpressure to the caller.
#[derive(Debug, Clone)]
pub struct Monitoring {
    tx: mpsc::Sender<(MonitoringEvent, DateTime<Utc>)>,
}

impl Monitoring {
    pub fn new() -> (Self, mpsc::Receiver<(MonitoringEvent, DateTime<Utc>)>) {
        let (tx, rx) = mpsc::channel(4096);
        (Monitoring { tx }, rx)
    }

    pub async fn channel_event(&self, event: ChannelEvent) {
        self.tx
            .send((MonitoringEvent::Channel(event), Utc::now()))
            .await
            .ok();
    }

    pub fn rx_stat(&self, stat: RxStat) {
        if let Err(TrySendError::Full(_)) =
            self.tx.try_send((MonitoringEvent::Rx(stat), Utc::now()))
        {
            warn!("dropping rx stat, monitoring buffer is full");
        }
    }

    pub fn dsp_stat(&self, stat: DspStat) {
        if let Err(TrySendError::Full(_)) =
            self.tx.try_send((MonitoringEvent::Dsp(stat), Utc::now()))
        {
            warn!("dropping dsp stat, monitoring buffer is full");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_events_are_delivered_in_order() {
        let (mon, mut rx) = Monitoring::new();
        mon.channel_event(ChannelEvent::WorkerStarted { channel: "WWV_10_MHz".into() })
            .await;
        mon.channel_event(ChannelEvent::WorkerStopped { channel: "WWV_10_MHz".into() })
            .await;
        let (first, _) = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            MonitoringEvent::Channel(ChannelEvent::WorkerStarted { .. })
        ));
        let (second, _) = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            MonitoringEvent::Channel(ChannelEvent::WorkerStopped { .. })
        ));
    }
}
