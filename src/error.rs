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

use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("error in child task {0}: {1}")]
pub struct ChildTaskError(pub String, pub String);

pub type ChildTaskResult<T> = Result<T, ChildTaskError>;

/// Errors from the RTP receiver / reassembler (C1).
#[derive(Error, Debug, Diagnostic)]
pub enum ReceiverError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("error in receiver task: {0}")]
    ChildTask(#[from] ChildTaskError),
}

pub type ReceiverResult<T> = Result<T, ReceiverError>;

/// Errors from the binary archive writer/reader (C2).
#[derive(Error, Debug, Diagnostic)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("archive header corrupt or unrecognized: {0}")]
    CorruptHeader(String),
    #[error(
        "write at rtp {attempted} would regress the archive timeline (next expected {expected})"
    )]
    TimelineRegression { expected: u64, attempted: u64 },
    #[error("minute {0} not found in index")]
    MinuteNotIndexed(u64),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors from Stage 2 (tone detection, characterization, solver).
#[derive(Error, Debug, Diagnostic)]
pub enum DspError {
    #[error("analysis exceeded its per-minute budget")]
    BudgetExceeded,
    #[error("insufficient samples for analysis: needed {needed}, had {had}")]
    InsufficientSamples { needed: usize, had: usize },
}

pub type DspResult<T> = Result<T, DspError>;

/// Errors from the per-station convergence accumulator (C7).
#[derive(Error, Debug, Diagnostic)]
pub enum ConvergenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("persisted accumulator state is corrupt: {0}")]
    CorruptState(String),
}

pub type ConvergenceResult<T> = Result<T, ConvergenceError>;

/// Errors from the cross-broadcast fuser (C8).
#[derive(Error, Debug, Diagnostic)]
pub enum FusionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type FusionResult<T> = Result<T, FusionError>;

/// Errors from atomic status/state file publication (C11).
#[derive(Error, Debug, Diagnostic)]
pub enum StatusError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StatusResult<T> = Result<T, StatusError>;

#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    #[error("invalid channel description: {0}")]
    InvalidDescription(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("data root {0:?} could not be created")]
    DataRootUncreatable(std::path::PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level error returned from the supervisor / binary entry point.
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] Box<ConfigError>),
    #[error("receiver error: {0}")]
    Receiver(#[from] Box<ReceiverError>),
    #[error("archive error: {0}")]
    Archive(#[from] Box<ArchiveError>),
    #[error("convergence error: {0}")]
    Convergence(#[from] Box<ConvergenceError>),
    #[error("fusion error: {0}")]
    Fusion(#[from] Box<FusionError>),
    #[error("status error: {0}")]
    Status(#[from] Box<StatusError>),
    #[error("error in child task {0}: {1}")]
    ChildTask(String, Box<dyn std::error::Error + Send + Sync>),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Process exit codes per SPEC_FULL.md section 6.
#[repr(i32)]
pub enum ExitCode {
    Normal = 0,
    FatalConfig = 1,
    FatalIo = 2,
    Shutdown = 3,
}

pub trait ToBoxed {
    fn boxed(self) -> Box<Self>;
}

impl<T> ToBoxed for T {
    fn boxed(self) -> Box<Self> {
        Box::new(self)
    }
}

pub trait ToBoxedResult<T, E: ToBoxed> {
    fn boxed(self) -> Result<T, Box<E>>;
}

impl<T, E: ToBoxed> ToBoxedResult<T, E> for std::result::Result<T, E> {
    fn boxed(self) -> Result<T, Box<E>> {
        match self {
            Ok(it) => Ok(it),
            Err(err) => Err(err.boxed()),
        }
    }
}

impl From<ConfigError> for CoreError {
    fn from(value: ConfigError) -> Self {
        CoreError::Config(value.boxed())
    }
}

impl From<ReceiverError> for CoreError {
    fn from(value: ReceiverError) -> Self {
        CoreError::Receiver(value.boxed())
    }
}

impl From<ArchiveError> for CoreError {
    fn from(value: ArchiveError) -> Self {
        CoreError::Archive(value.boxed())
    }
}

impl From<ConvergenceError> for CoreError {
    fn from(value: ConvergenceError) -> Self {
        CoreError::Convergence(value.boxed())
    }
}

impl From<FusionError> for CoreError {
    fn from(value: FusionError) -> Self {
        CoreError::Fusion(value.boxed())
    }
}

impl From<StatusError> for CoreError {
    fn from(value: StatusError) -> Self {
        CoreError::Status(value.boxed())
    }
}
