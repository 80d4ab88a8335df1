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

//! Binary archive writer/reader (C2): per-channel append-only typed IQ
//! archive with inline gap records and a per-minute sidecar index.

pub mod format;
pub mod index;
pub mod reader;
pub mod writer;

pub use format::{ChannelIdentity, Discontinuity, DiscontinuityKind, MinuteMarker};
pub use reader::{ArchiveReader, ArchivedSegment, MinuteRecords};
pub use writer::ArchiveWriter;
