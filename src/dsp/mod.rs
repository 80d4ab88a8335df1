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

//! DSP pipeline: Step 1 tone detection, Step 2 channel characterization,
//! Step 3 transmission-time solving, plus the shared IQ/Goertzel/CHU-FSK
//! building blocks they're built from.

pub mod characterize;
pub mod chu_fsk;
pub mod goertzel;
pub mod iq;
pub mod solver;
pub mod tone;

pub use characterize::{characterize, ChannelCharacterization};
pub use chu_fsk::{decode_chu_frame, ChuDecode};
pub use goertzel::goertzel_power;
pub use iq::{IqEncoding, IQSample};
pub use solver::{solve, PropagationMode, QualityGrade, TransmissionTimeEstimate};
pub use tone::{detect_tones, earliest_qualifying, ToneDetection};
