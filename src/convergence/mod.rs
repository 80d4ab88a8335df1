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

//! Per-station convergence tracking (C7) and the Step-1 search-window
//! calibrator (section 4.10) that narrows as a channel's timing locks in.

pub mod accumulator;
pub mod calibrator;

pub use accumulator::{ConvergenceAccumulator, ConvergenceState, PersistedConvergenceState};
pub use calibrator::{Calibrator, CalibratorPhase};
