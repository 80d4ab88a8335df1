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

//! Channel Supervisor (C10): owns the per-channel registry, wires each
//! channel's full C1->C9 pipeline together, and restarts a crashed channel
//! worker up to `max_restart_attempts` within `restart_window` before
//! persisting it as DISABLED, the way `VirtualSoundCard` in the teacher's
//! `aes67-rs::vsc` owns its senders/receivers and reacts to their exits.

use crate::app::{spawn_child_task, wait_for_start};
use crate::archive::ArchiveWriter;
use crate::config::{ChannelConfig, SupervisorConfig};
use crate::convergence::{Calibrator, ConvergenceAccumulator};
use crate::dsp::{characterize, detect_tones, earliest_qualifying, solve};
use crate::error::{ChildTaskResult, ConvergenceResult};
use crate::fusion::{fuse, publish_fused_estimate, FusionInput};
use crate::monitoring::{ChannelEvent, DspStat, Monitoring, RxStat};
use crate::paths::{analytics_service_status_json, convergence_state_json};
use crate::quality::TimingQuality;
use crate::rtp::{run_receiver, ReassemblyOutcome};
use crate::sampler::{DataQuality, MinuteSampler};
use crate::stations::Station;
use crate::time::TimeSnap;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{error, info, instrument, warn};

const MINUTE_POLL_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceStatus {
    channel: String,
    lifecycle: &'static str,
    restart_attempts: u32,
}

/// Shared per-station latest estimate board the fuser reads from once per
/// minute; each channel worker writes its own slot after solving.
type SharedBoard = Arc<Mutex<HashMap<String, FusionInput>>>;

/// Run every configured channel and the cross-broadcast fuser until
/// shutdown, restarting crashed channels with backoff.
#[instrument(skip(subsys, config))]
pub async fn run_supervisor(subsys: &mut SubsystemHandle, config: SupervisorConfig) -> ChildTaskResult<()> {
    config.ensure_data_root().map_err(|e| crate::error::ChildTaskError("supervisor".into(), e.to_string()))?;

    let (monitoring, _monitoring_rx) = Monitoring::new();
    let board: SharedBoard = Arc::new(Mutex::new(HashMap::new()));
    let parent_handle = subsys.clone();

    for channel in &config.channels {
        channel
            .validate()
            .map_err(|e| crate::error::ChildTaskError(channel.description.clone(), e.to_string()))?;
        spawn_channel_watcher(
            parent_handle.clone(),
            channel.clone(),
            config.data_root.clone(),
            config.receiver_location,
            monitoring.clone(),
            board.clone(),
            config.max_restart_attempts,
            config.restart_window.into(),
        );
    }

    let data_root = config.data_root.clone();
    let fusion_config = crate::config::FusionConfig::default();
    let mut fuse_tick = interval(Duration::from_secs(60));
    fuse_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = fuse_tick.tick() => {
                let inputs: Vec<FusionInput> = board.lock().await.drain().map(|(_, v)| v).collect();
                if !inputs.is_empty() {
                    let fused = fuse(&inputs, Utc::now(), &fusion_config);
                    if let Err(e) = publish_fused_estimate(&data_root, &fused) {
                        warn!(error = %e, "failed to publish fused estimate");
                    }
                }
            }
            _ = subsys.on_shutdown_requested() => {
                info!("supervisor shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Owns one channel's restart bookkeeping: (re)spawns its worker, and on a
/// crash either restarts it (within `max_restart_attempts` inside
/// `restart_window`) or persists it as disabled and gives up.
#[allow(clippy::too_many_arguments)]
fn spawn_channel_watcher(
    parent_handle: SubsystemHandle,
    channel: ChannelConfig,
    data_root: PathBuf,
    receiver_location: crate::stations::GeodeticPoint,
    monitoring: Monitoring,
    board: SharedBoard,
    max_restart_attempts: u32,
    restart_window: Duration,
) {
    tokio::spawn(async move {
        let name = channel.directory_token();
        let mut attempts = 0u32;
        let mut window_start = Utc::now();

        loop {
            let channel = channel.clone();
            let data_root = data_root.clone();
            let monitoring_inner = monitoring.clone();
            let board = board.clone();
            let channel_name = name.clone();

            monitoring.channel_event(ChannelEvent::WorkerStarted { channel: channel_name.clone() }).await;
            let mut app = spawn_child_task(&parent_handle, format!("channel-{name}"), move |s: &mut SubsystemHandle| {
                run_channel(s, channel, data_root, receiver_location, monitoring_inner, board)
            });

            let terminal = loop {
                match app.recv().await {
                    Some(crate::app::AppState::Started) => continue,
                    Some(state) => break state,
                    None => break crate::app::AppState::TerminatedNormally,
                }
            };

            match terminal {
                crate::app::AppState::TerminatedNormally => {
                    monitoring.channel_event(ChannelEvent::WorkerStopped { channel: name.clone() }).await;
                    break;
                }
                crate::app::AppState::Crashed(message) => {
                    error!(channel = %name, error = %message, "channel worker crashed");
                    if Utc::now() - window_start > chrono::Duration::from_std(restart_window).unwrap_or_default() {
                        attempts = 0;
                        window_start = Utc::now();
                    }
                    attempts += 1;
                    if attempts > max_restart_attempts {
                        warn!(channel = %name, attempts, "exceeding restart budget, disabling channel");
                        monitoring.channel_event(ChannelEvent::WorkerDisabled { channel: name.clone() }).await;
                        let status = ServiceStatus { channel: name.clone(), lifecycle: "DISABLED", restart_attempts: attempts };
                        if let Err(e) = crate::status::publish_json(&analytics_service_status_json(&data_root, &channel.description), &status) {
                            warn!(channel = %name, error = %e, "failed to persist disabled status");
                        }
                        break;
                    }
                    monitoring.channel_event(ChannelEvent::WorkerRestarted { channel: name.clone(), attempt: attempts }).await;
                }
                crate::app::AppState::Started => unreachable!(),
            }
        }
    });
}

/// One channel's full C1->C9 pipeline: RTP ingest, archival, minute
/// sampling, tone detection, characterization, transmission-time solving,
/// convergence tracking, and status publication.
async fn run_channel(
    subsys: &mut SubsystemHandle,
    channel: ChannelConfig,
    data_root: PathBuf,
    receiver_location: crate::stations::GeodeticPoint,
    monitoring: Monitoring,
    board: SharedBoard,
) -> ChildTaskResult<()> {
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<ReassemblyOutcome>(4096);
    let receiver_monitoring = monitoring.clone();
    let receiver_channel = channel.clone();
    let mut receiver_app = spawn_child_task(subsys, format!("{}-receiver", channel.directory_token()), move |s: &mut SubsystemHandle| {
        run_receiver(s, receiver_channel.clone(), receiver_monitoring.clone(), outcome_tx.clone())
    });
    wait_for_start(format!("{}-receiver", channel.directory_token()), &mut receiver_app)
        .await
        .map_err(|e| crate::error::ChildTaskError(channel.description.clone(), e.to_string()))?;
    tokio::spawn(async move { while receiver_app.recv().await.is_some() {} });

    let today = Utc::now().date_naive();
    let mut archive_writer = ArchiveWriter::create_or_open(&data_root, &channel, today)
        .map_err(|e| crate::error::ChildTaskError(channel.description.clone(), e.to_string()))?;
    let mut sampler = MinuteSampler::new(channel.sample_rate_hz, channel.delivery_grace.into(), channel.completeness_floor());
    let mut time_snap = TimeSnap::startup_estimate(0, Utc::now());
    let mut convergence = ConvergenceAccumulator::load(&convergence_state_json(&data_root, &channel.description))
        .unwrap_or_else(|e| {
            warn!(channel = %channel.description, error = %e, "failed to reload convergence state, starting fresh");
            ConvergenceAccumulator::new()
        });
    let mut calibrator = Calibrator::new();
    let shares_with_wwvh = Station::wwvh_shares(channel.frequency_hz) && channel.station != Station::Wwvh;

    let mut tick = interval(MINUTE_POLL_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            outcome = outcome_rx.recv() => {
                let Some(outcome) = outcome else { break };
                handle_outcome(outcome, &mut archive_writer, &mut sampler, &time_snap, &channel);
            }
            _ = tick.tick() => {
                let now = Utc::now();
                for frame in sampler.poll_ready(now) {
                    process_minute(
                        frame,
                        &channel,
                        shares_with_wwvh,
                        receiver_location,
                        &mut archive_writer,
                        &mut time_snap,
                        &mut convergence,
                        &mut calibrator,
                        &monitoring,
                        &data_root,
                        &board,
                    ).await;
                }
                if let Err(e) = archive_writer.maybe_periodic_sync() {
                    warn!(channel = %channel.description, error = %e, "periodic archive sync failed");
                }
            }
            _ = subsys.on_shutdown_requested() => {
                info!(channel = %channel.description, "channel worker shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn handle_outcome(
    outcome: ReassemblyOutcome,
    archive_writer: &mut ArchiveWriter,
    sampler: &mut MinuteSampler,
    time_snap: &TimeSnap,
    channel: &ChannelConfig,
) {
    let now = Utc::now();
    match outcome {
        ReassemblyOutcome::Samples { start_rtp, samples } => {
            if let Err(e) = archive_writer.append_samples(start_rtp, &samples) {
                warn!(channel = %channel.description, error = %e, "failed to archive samples");
                return;
            }
            sampler.ingest_samples(start_rtp, &samples, time_snap, now);
        }
        ReassemblyOutcome::Discontinuity(d) => {
            if let Err(e) = archive_writer.append_discontinuity(&d) {
                warn!(channel = %channel.description, error = %e, "failed to archive discontinuity");
                return;
            }
            sampler.ingest_discontinuity(d, time_snap, now);
        }
        ReassemblyOutcome::Dropped(reason) => {
            warn!(channel = %channel.description, reason, "dropped malformed input");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_minute(
    frame: crate::sampler::MinuteFrame,
    channel: &ChannelConfig,
    shares_with_wwvh: bool,
    receiver_location: crate::stations::GeodeticPoint,
    archive_writer: &mut ArchiveWriter,
    time_snap: &mut TimeSnap,
    convergence: &mut ConvergenceAccumulator,
    calibrator: &mut Calibrator,
    monitoring: &Monitoring,
    data_root: &PathBuf,
    board: &SharedBoard,
) {
    let channel_name = channel.directory_token();

    if frame.data_quality == DataQuality::Unusable {
        if let Err(e) = archive_writer.mark_minute_boundary(frame.utc_minute, Some(time_snap.clone())) {
            warn!(channel = %channel.description, error = %e, "failed to mark minute boundary");
        }
        return;
    }

    let detections = detect_tones(&frame, channel.station, channel.sample_rate_hz, channel.frequency_hz, Some(calibrator.search_half_window_ms()));
    let qualifying = earliest_qualifying(&detections);

    if let Some(detection) = qualifying {
        calibrator.observe_qualifying_timing_error_ms(detection.timing_error_ms);
        monitoring.dsp_stat(DspStat::ToneDetected {
            channel: channel_name.clone(),
            snr_db: detection.snr_db,
            timing_error_ms: detection.timing_error_ms,
        });
        *time_snap = TimeSnap {
            rtp_timestamp: detection.onset_rtp,
            utc_timestamp: frame.utc_minute + chrono::Duration::seconds(detections.iter().position(|d| d == detection).unwrap_or(0) as i64),
            source: match channel.station {
                Station::Wwv => crate::time::SnapSource::WwvTone,
                Station::Wwvh => crate::time::SnapSource::WwvhTone,
                Station::Chu => crate::time::SnapSource::ChuTone,
            },
            confidence: detection.confidence(),
            established_at: Utc::now(),
        };
        if let Err(e) = archive_writer.append_time_snap_update(time_snap) {
            warn!(channel = %channel.description, error = %e, "failed to archive time snap update");
        }
    } else {
        monitoring.dsp_stat(DspStat::ToneMissed { channel: channel_name.clone() });
    }

    if let Err(e) = archive_writer.mark_minute_boundary(frame.utc_minute, Some(time_snap.clone())) {
        warn!(channel = %channel.description, error = %e, "failed to mark minute boundary");
    }

    let quality = TimingQuality::classify(time_snap, Utc::now(), false);
    monitoring.dsp_stat(DspStat::QualityAssigned { channel: channel_name.clone(), quality });

    let Some(detection) = qualifying else { return };
    let phase_offset_wwvh = 0.0;
    let characterization = characterize(&frame, channel.station, channel.sample_rate_hz, shares_with_wwvh, phase_offset_wwvh);
    let estimate = solve(detection, &characterization, receiver_location, characterization.chu_decode.as_ref(), 0.3);

    if let Some((from, to)) = convergence.ingest(&estimate, Utc::now()) {
        monitoring.dsp_stat(DspStat::ConvergenceTransition { channel: channel_name.clone(), from, to });
    }

    if let Err(e) = persist_convergence(convergence, data_root, &channel.description) {
        warn!(channel = %channel.description, error = %e, "failed to persist convergence state");
    }

    if let Err(e) = crate::status::publish_json(
        &analytics_service_status_json(data_root, &channel.description),
        &ServiceStatus { channel: channel_name.clone(), lifecycle: "RUNNING", restart_attempts: 0 },
    ) {
        warn!(channel = %channel.description, error = %e, "failed to publish service status");
    }

    let row = format!(
        "{},{:.6},{:.6},{:?},{:?}",
        frame.utc_minute.to_rfc3339(),
        estimate.d_clock_ms,
        estimate.uncertainty_ms,
        estimate.quality,
        estimate.dominant_mode
    );
    if let Err(e) = crate::status::append_csv_row(
        &crate::paths::clock_offset_series_csv(data_root, &channel.description),
        "utc_minute,d_clock_ms,uncertainty_ms,quality,dominant_mode",
        &row,
    ) {
        warn!(channel = %channel.description, error = %e, "failed to append clock offset row");
    }

    board.lock().await.insert(
        channel_name,
        FusionInput { channel: channel.directory_token(), estimate, snr_db: detection.snr_db },
    );
}

fn persist_convergence(convergence: &ConvergenceAccumulator, data_root: &PathBuf, channel_description: &str) -> ConvergenceResult<()> {
    convergence.publish(&convergence_state_json(data_root, channel_description))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_status_serializes_lifecycle_as_string() {
        let status = ServiceStatus { channel: "WWV_10_MHz".into(), lifecycle: "RUNNING", restart_attempts: 0 };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("RUNNING"));
    }
}
