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

//! Child-task lifecycle on the single shared multi-threaded runtime
//! (SPEC_FULL.md section 10.1). Every channel worker is a subsystem on the
//! same `Toplevel`, reported through a small `AppState` channel the same way
//! the per-process child apps report upstream, just without the dedicated
//! OS thread and nested runtime per child.

use crate::error::{ChildTaskError, ChildTaskResult};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_graceful_shutdown::{AsyncSubsysFn, SubsystemBuilder, SubsystemHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

pub enum AppState {
    Started,
    TerminatedNormally,
    Crashed(String),
}

/// Register `subsystem` as a named child of `parent`, reporting lifecycle
/// transitions on the returned channel so a supervising task can notice a
/// crash and react (restart, disable, propagate shutdown).
#[instrument(skip(parent, subsystem))]
pub fn spawn_child_task<Err, Subsys>(
    parent: &SubsystemHandle,
    name: String,
    subsystem: Subsys,
) -> mpsc::Receiver<AppState>
where
    Subsys: 'static + for<'b> AsyncSubsysFn<&'b mut SubsystemHandle, Result<(), Err>>,
    Err: std::error::Error + Send + Sync + 'static,
{
    let (state_tx, state_rx) = mpsc::channel(1);
    let n = name.clone();
    parent.start(SubsystemBuilder::new(name.clone(), move |s: &mut SubsystemHandle| {
        let tx = state_tx.clone();
        let n = n.clone();
        async move {
            info!(channel = %n, "child task starting");
            tx.send(AppState::Started).await.ok();
            let res = subsystem(s).await;
            match &res {
                Ok(()) => {
                    info!(channel = %n, "child task stopped");
                    tx.send(AppState::TerminatedNormally).await.ok();
                }
                Err(e) => {
                    error!(channel = %n, error = %e, "child task crashed");
                    tx.send(AppState::Crashed(e.to_string())).await.ok();
                }
            }
            res
        }
    }));
    state_rx
}

#[instrument(skip(app))]
pub async fn wait_for_start(name: String, app: &mut mpsc::Receiver<AppState>) -> ChildTaskResult<()> {
    match app.recv().await {
        Some(AppState::Started) => Ok(()),
        None | Some(AppState::TerminatedNormally) => Err(ChildTaskError(
            name.clone(),
            format!("{name} terminated immediately after start"),
        )),
        Some(AppState::Crashed(message)) => Err(ChildTaskError(name, message)),
    }
}

/// Cancel `shutdown_token` once the watched child reports it has stopped,
/// whether normally or by crashing, so a single channel failure does not
/// leave the rest of the process running against a half-dead pipeline.
pub fn propagate_shutdown_on_exit(mut app: mpsc::Receiver<AppState>, shutdown_token: CancellationToken) {
    spawn(async move {
        while let Some(state) = app.recv().await {
            match state {
                AppState::Started => (),
                AppState::TerminatedNormally => {
                    shutdown_token.cancel();
                    break;
                }
                AppState::Crashed(message) => {
                    error!("child task crashed with error: {message}");
                    shutdown_token.cancel();
                    break;
                }
            }
        }
    });
}
