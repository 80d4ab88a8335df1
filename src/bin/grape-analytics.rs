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

use grape_analytics_core::config::SupervisorConfig;
use grape_analytics_core::error::{ConfigError, ExitCode};
use grape_analytics_core::supervisor::run_supervisor;
use std::path::PathBuf;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "grape-analytics.json";

fn load_config() -> Result<SupervisorConfig, ConfigError> {
    let config_path = std::env::var("GRAPE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
    let contents = std::fs::read_to_string(&config_path)?;
    let mut config: SupervisorConfig = serde_json::from_str(&contents)?;
    if let Ok(data_root) = std::env::var("GRAPE_DATA_ROOT") {
        config.data_root = PathBuf::from(data_root);
    }
    Ok(config)
}

fn init_tracing() {
    let filter = std::env::var("GRAPE_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(ExitCode::FatalConfig as i32);
        }
    };

    info!(channels = config.channels.len(), data_root = %config.data_root.display(), "starting grape-analytics");

    let result = Toplevel::new(move |s: &mut SubsystemHandle| async move {
        s.start(SubsystemBuilder::new("supervisor", move |s: &mut SubsystemHandle| {
            run_supervisor(s, config)
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(10))
    .await;

    match result {
        Ok(()) => {
            info!("shut down cleanly");
            std::process::exit(ExitCode::Normal as i32);
        }
        Err(e) => {
            error!(error = %e, "shutdown reported an error");
            std::process::exit(ExitCode::Shutdown as i32);
        }
    }
}
