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

//! Receiver run loop: owns the multicast socket and the `Reassembler` for
//! one channel, adapted from the teacher's `Receiver::run`
//! (`aes67-rs::receiver::mod`) select-loop shape.

use crate::config::ChannelConfig;
use crate::dsp::iq::IqEncoding;
use crate::error::{ReceiverError, ReceiverResult};
use crate::monitoring::{Monitoring, RxStat};
use crate::rtp::reassembler::{Reassembler, ReassemblyOutcome};
use crate::rtp::socket::create_multicast_socket;
use chrono::Utc;
use rtp_rs::RtpReader;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{debug, info, instrument, warn};

const TIMEOUT_TICK: Duration = Duration::from_millis(200);

/// Run the receiver for one channel until shutdown is requested. Meant to
/// be registered as a subsystem via [`crate::app::spawn_child_task`].
#[instrument(skip(subsys, monitoring, out_tx), fields(channel = %config.description))]
pub async fn run_receiver(
    subsys: &mut SubsystemHandle,
    config: ChannelConfig,
    monitoring: Monitoring,
    out_tx: mpsc::Sender<ReassemblyOutcome>,
) -> ReceiverResult<()> {
    let socket = create_multicast_socket(config.bind_address, config.multicast_group)?;
    let mut reassembler = Reassembler::new(config.sample_rate_hz);
    let mut receive_buffer = vec![0u8; 65_535];
    let mut timeout_tick = interval(TIMEOUT_TICK);
    timeout_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("receiver started");

    loop {
        tokio::select! {
            recv = socket.recv_from(&mut receive_buffer) => {
                match recv {
                    Ok((len, addr)) => {
                        if addr.ip() != config.multicast_group.ip() && addr.ip() != config.bind_address {
                            monitoring.rx_stat(RxStat::PacketFromWrongSender(addr.ip()));
                            continue;
                        }
                        handle_datagram(&receive_buffer[..len], config.ssrc, &mut reassembler, &monitoring, &out_tx).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "socket receive error");
                    }
                }
            }
            _ = timeout_tick.tick() => {
                if let Some(outcome) = reassembler.check_timeout(Utc::now()) {
                    monitoring.rx_stat(RxStat::SourceUnavailable);
                    emit(outcome, &out_tx).await;
                }
            }
            _ = subsys.on_shutdown_requested() => {
                info!("shutdown requested, stopping receiver");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_datagram(
    data: &[u8],
    expected_ssrc: u32,
    reassembler: &mut Reassembler,
    monitoring: &Monitoring,
    out_tx: &mpsc::Sender<ReassemblyOutcome>,
) {
    let rtp = match RtpReader::new(data) {
        Ok(it) => it,
        Err(e) => {
            monitoring.rx_stat(RxStat::MalformedPacket(format!("{e:?}")));
            return;
        }
    };

    if rtp.ssrc() != expected_ssrc {
        monitoring.rx_stat(RxStat::MalformedPacket(format!(
            "unexpected ssrc {} (expected {expected_ssrc})",
            rtp.ssrc()
        )));
        return;
    }

    let Some(encoding) = IqEncoding::from_payload_type(rtp.payload_type()) else {
        monitoring.rx_stat(RxStat::MalformedPacket(format!(
            "unrecognized payload type {}",
            rtp.payload_type()
        )));
        return;
    };

    let seq = u16::from(rtp.sequence_number());
    let samples = encoding.decode(rtp.payload());
    monitoring.rx_stat(RxStat::PacketReceived { seq, payload_len: rtp.payload().len() });

    let outcomes = reassembler.ingest(seq, rtp.timestamp(), samples, Utc::now());
    for outcome in outcomes {
        if matches!(outcome, ReassemblyOutcome::Discontinuity(_)) {
            monitoring.rx_stat(RxStat::NetworkGap { length_samples: 0 });
        }
        emit(outcome, out_tx).await;
    }
}

async fn emit(outcome: ReassemblyOutcome, out_tx: &mpsc::Sender<ReassemblyOutcome>) {
    if out_tx.send(outcome).await.is_err() {
        debug!("downstream archive channel closed, dropping outcome");
    }
}
