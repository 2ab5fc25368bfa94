// EPUB Liberator - ADEPT DRM removal for EPUB books
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! ZIP container access
//!
//! EPUB files are ZIP archives. This module reads them into an index of
//! entries with their full header metadata, and writes a new archive that
//! carries that metadata over unchanged.
//!
//! # Supported Archives
//! - ZIP32 only; ZIP64 and multi-disk archives are rejected
//! - Compression methods stored (0) and deflate (8)
//! - Whole archive held in memory

pub mod deflate;
pub mod header;
pub mod index;
pub mod writer;

pub use header::{CompressionMethod, EntryHeader};
pub use index::{ContainerEntry, ContainerIndex, DrmStatus};
pub use writer::ContainerWriter;
