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

//! Core ingest/archive/analysis pipeline for a multi-channel HF time-signal
//! recorder. A channel worker demultiplexes an RTP/IQ multicast stream from
//! an external SDR daemon, archives it continuously, and runs the WWV/WWVH/CHU
//! timing-tone analysis (tone anchor -> channel characterization ->
//! propagation-mode solve) that yields a per-minute clock offset estimate.
//!
//! Configuration loading, the HTTP monitoring dashboard, spectrogram
//! rendering, daily packaging, CLI wrappers, and time-discipline shared
//! memory integration are external collaborators and live outside this
//! crate; see `SPEC_FULL.md` section 1.

pub mod app;
pub mod archive;
pub mod config;
pub mod convergence;
pub mod dsp;
pub mod error;
pub mod fusion;
pub mod monitoring;
pub mod paths;
pub mod quality;
pub mod rtp;
pub mod sampler;
pub mod stations;
pub mod status;
pub mod supervisor;
pub mod time;
