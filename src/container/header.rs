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


//! ZIP record layouts and per-entry header metadata
//!
//! # Record Layouts
//! ```text
//! Local file header (30 bytes + name + extra)
//!   0x00 u32 signature (PK\x03\x04)
//!   0x04 u16 version needed
//!   0x06 u16 flags
//!   0x08 u16 compression method
//!   0x0A u16 modification time (DOS)
//!   0x0C u16 modification date (DOS)
//!   0x0E u32 CRC-32
//!   0x12 u32 compressed size
//!   0x16 u32 uncompressed size
//!   0x1A u16 name length
//!   0x1C u16 extra length
//!
//! Central directory header (46 bytes + name + extra + comment)
//!   0x00 u32 signature (PK\x01\x02)
//!   0x04 u16 version made by (creator version)
//!   0x06 u16 version needed
//!   0x08 u16 flags
//!   0x0A u16 compression method
//!   0x0C u16 modification time
//!   0x0E u16 modification date
//!   0x10 u32 CRC-32
//!   0x14 u32 compressed size
//!   0x18 u32 uncompressed size
//!   0x1C u16 name length
//!   0x1E u16 extra length
//!   0x20 u16 comment length
//!   0x22 u16 disk number start
//!   0x24 u16 internal attributes
//!   0x26 u32 external attributes
//!   0x2A u32 local header offset
//!
//! End of central directory (22 bytes + comment)
//!   0x00 u32 signature (PK\x05\x06)
//!   0x04 u16 disk number
//!   0x06 u16 central directory disk
//!   0x08 u16 entries on this disk
//!   0x0A u16 total entries
//!   0x0C u32 central directory size
//!   0x10 u32 central directory offset
//!   0x14 u16 comment length
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const CENTRAL_DIR_HEADER_SIGNATURE: u32 = 0x02014b50;
pub const EOCD_SIGNATURE: u32 = 0x06054b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

pub const LOCAL_HEADER_LEN: usize = 30;
pub const CENTRAL_HEADER_LEN: usize = 46;
pub const EOCD_LEN: usize = 22;

/// Longest archive comment the EOCD can carry
pub const MAX_COMMENT_LEN: usize = u16::MAX as usize;

/// Sizes follow the data; only verbatim record copies keep this bit
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// Name and comment are UTF-8
pub const FLAG_UTF8: u16 = 1 << 11;

/// Minimum version needed to extract a deflated entry (2.0)
pub const VERSION_DEFLATE: u16 = 20;

/// Compression method declared in an entry header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    /// Method 0
    Stored,
    /// Method 8
    Deflate,
    /// Anything else, kept verbatim
    Other(u16),
}

impl CompressionMethod {
    pub fn from_raw(raw: u16) -> Self {
        match raw {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            other => CompressionMethod::Other(other),
        }
    }

    pub fn as_raw(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Other(raw) => raw,
        }
    }
}

/// Header fields carried from an input entry to its rebuilt counterpart
///
/// CRC-32 and sizes are not part of this: the writer recomputes them from
/// whatever content it is handed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Resolved entry name
    pub name: String,
    pub method: CompressionMethod,
    pub flags: u16,
    /// DOS time
    pub modified_time: u16,
    /// DOS date
    pub modified_date: u16,
    pub comment: Vec<u8>,
    pub extra: Vec<u8>,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    /// "Version made by": host system in the high byte, spec version in the low byte
    pub creator_version: u16,
    pub version_needed: u16,
}

impl EntryHeader {
    /// New header with everything but the name zeroed
    pub fn new<S: Into<String>>(name: S, method: CompressionMethod) -> Self {
        Self {
            name: name.into(),
            method,
            flags: 0,
            modified_time: 0,
            modified_date: 0,
            comment: Vec::new(),
            extra: Vec::new(),
            internal_attrs: 0,
            external_attrs: 0,
            creator_version: VERSION_DEFLATE,
            version_needed: VERSION_DEFLATE,
        }
    }

    /// Copy of this header re-declared as deflate-compressed
    ///
    /// Comment, flags, timestamps, extra field, attributes and creator
    /// version are preserved.
    pub fn as_deflated(&self) -> Self {
        Self {
            method: CompressionMethod::Deflate,
            version_needed: self.version_needed.max(VERSION_DEFLATE),
            ..self.clone()
        }
    }

    /// Modification timestamp decoded from the DOS date/time pair
    ///
    /// Returns `None` for out-of-range values (a zeroed date is common).
    pub fn modified(&self) -> Option<NaiveDateTime> {
        dos_to_datetime(self.modified_date, self.modified_time)
    }
}

/// Decode a DOS date/time pair
///
/// Date: bits 15-9 year since 1980, 8-5 month, 4-0 day.
/// Time: bits 15-11 hour, 10-5 minute, 4-0 seconds / 2.
pub fn dos_to_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    let year = ((date >> 9) & 0x7f) as i32 + 1980;
    let month = ((date >> 5) & 0x0f) as u32;
    let day = (date & 0x1f) as u32;
    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3f) as u32;
    let second = ((time & 0x1f) * 2) as u32;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

pub(crate) fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn le_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}
