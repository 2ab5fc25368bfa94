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


//! Random-access index over an in-memory EPUB container
//!
//! # Name Resolution
//! Each entry is recorded twice in a ZIP: once in its local file header and
//! once in the central directory. ADEPT tooling has been seen to disagree
//! between the two, so the local name wins and the central name is only a
//! fallback when the local name is empty. Resolving needs a second read (the
//! local header), which happens once here and is cached on the entry.
//!
//! # Lazy Payloads
//! The index keeps the input buffer and per-entry data offsets. Payload bytes
//! are only sliced (stored) or inflated (deflate) when [`ContainerIndex::read`]
//! is called for that entry.

use crate::container::deflate::inflate_raw;
use crate::container::header::{
    le_u16, le_u32, CompressionMethod, EntryHeader, CENTRAL_DIR_HEADER_SIGNATURE,
    CENTRAL_HEADER_LEN, DATA_DESCRIPTOR_SIGNATURE, EOCD_LEN, EOCD_SIGNATURE, FLAG_DATA_DESCRIPTOR,
    LOCAL_FILE_HEADER_SIGNATURE, LOCAL_HEADER_LEN, MAX_COMMENT_LEN,
};
use crate::epub::{ENCRYPTION_PATH, MIMETYPE_PATH, RIGHTS_PATH};
use crate::error::{LiberatorError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One resolved entry of the source container
#[derive(Debug, Clone)]
pub struct ContainerEntry {
    /// Header metadata; `header.name` is the resolved name
    pub header: EntryHeader,

    /// Name as recorded in the central directory
    pub central_name: String,

    /// CRC-32 of the uncompressed payload (0 if not recorded)
    pub crc32: u32,

    pub compressed_size: u64,
    pub uncompressed_size: u64,

    /// Offset of the local file header within the container
    local_offset: usize,

    /// Offset of the stored bytes within the container
    data_offset: usize,
}

impl ContainerEntry {
    /// Resolved entry name
    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn method(&self) -> CompressionMethod {
        self.header.method
    }
}

/// Presence of the two reserved ADEPT entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrmStatus {
    pub has_rights: bool,
    pub has_encryption: bool,
}

impl DrmStatus {
    /// Both reserved entries are present
    pub fn is_protected(&self) -> bool {
        self.has_rights && self.has_encryption
    }
}

/// Name-keyed arena of container entries
///
/// Built once per run and read-only afterwards, so it is shared between
/// decode workers behind an `Arc`.
#[derive(Debug)]
pub struct ContainerIndex {
    data: Arc<[u8]>,
    entries: Vec<ContainerEntry>,
    by_name: HashMap<String, usize>,
}

impl ContainerIndex {
    /// Index a complete container held in memory
    ///
    /// # Errors
    /// - InvalidContainer if no end-of-central-directory record is found,
    ///   the archive is ZIP64 or multi-disk, or a record is truncated
    pub fn open(data: impl Into<Arc<[u8]>>) -> Result<Self> {
        let data: Arc<[u8]> = data.into();
        let eocd = find_eocd(&data)?;

        let disk = le_u16(&data, eocd + 4).unwrap_or(0);
        let cd_disk = le_u16(&data, eocd + 6).unwrap_or(0);
        let total = le_u16(&data, eocd + 10).unwrap_or(0);
        let cd_size = le_u32(&data, eocd + 12).unwrap_or(0);
        let cd_offset = le_u32(&data, eocd + 16).unwrap_or(0);

        if total == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX {
            return Err(LiberatorError::invalid_container("ZIP64 archives are not supported"));
        }
        if disk != 0 || cd_disk != 0 {
            return Err(LiberatorError::invalid_container("multi-disk archives are not supported"));
        }

        let mut entries: Vec<ContainerEntry> = Vec::with_capacity(total as usize);
        let mut by_name = HashMap::with_capacity(total as usize);
        let mut pos = cd_offset as usize;

        for _ in 0..total {
            let (entry, next) = parse_central_record(&data, pos)?;
            pos = next;

            let existing = by_name.get(entry.name()).copied();
            match existing {
                Some(existing) => {
                    warn!(name = entry.name(), "Duplicate entry name, keeping the later record");
                    entries[existing] = entry;
                }
                None => {
                    by_name.insert(entry.name().to_string(), entries.len());
                    entries.push(entry);
                }
            }
        }

        debug!(entries = entries.len(), bytes = data.len(), "Indexed container");

        Ok(Self { data, entries, by_name })
    }

    /// Number of distinct resolved entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in archive order
    pub fn entries(&self) -> impl Iterator<Item = &ContainerEntry> {
        self.entries.iter()
    }

    /// Look up an entry by resolved name
    pub fn get(&self, name: &str) -> Option<&ContainerEntry> {
        self.by_name.get(name).map(|&id| &self.entries[id])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Presence of `META-INF/rights.xml` and `META-INF/encryption.xml`
    pub fn drm_status(&self) -> DrmStatus {
        DrmStatus {
            has_rights: self.contains(RIGHTS_PATH),
            has_encryption: self.contains(ENCRYPTION_PATH),
        }
    }

    /// Fail unless both reserved ADEPT entries are present
    ///
    /// # Errors
    /// - NotProtected naming the first missing reserved entry
    pub fn require_protected(&self) -> Result<()> {
        let status = self.drm_status();
        if !status.has_rights {
            return Err(LiberatorError::NotProtected { missing: RIGHTS_PATH.to_string() });
        }
        if !status.has_encryption {
            return Err(LiberatorError::NotProtected { missing: ENCRYPTION_PATH.to_string() });
        }
        Ok(())
    }

    /// Names of every entry except the identity entry and the reserved ones
    pub fn payload_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.name())
            .filter(|name| !matches!(*name, MIMETYPE_PATH | RIGHTS_PATH | ENCRYPTION_PATH))
            .map(str::to_string)
            .collect()
    }

    /// Read an entry's payload by name
    ///
    /// # Errors
    /// - CorruptEntry if the name is unknown or the payload cannot be read
    pub fn read_by_name(&self, name: &str) -> Result<Vec<u8>> {
        let entry = self
            .get(name)
            .ok_or_else(|| LiberatorError::corrupt_entry(name, "no such entry"))?;
        self.read(entry)
    }

    /// Read an entry's payload, undoing the archive's own compression
    ///
    /// Stored entries are copied, deflated entries are inflated. The CRC-32 is
    /// verified when the header carries one.
    ///
    /// # Errors
    /// - CorruptEntry for out-of-bounds data, an unsupported method, an
    ///   inflate failure, or a size/CRC mismatch
    pub fn read(&self, entry: &ContainerEntry) -> Result<Vec<u8>> {
        let name = entry.name();
        let raw = self.raw_payload(entry)?;

        let content = match entry.method() {
            CompressionMethod::Stored => raw.to_vec(),
            CompressionMethod::Deflate => inflate_raw(raw)
                .map_err(|e| LiberatorError::corrupt_entry(name, format!("inflate failed: {}", e)))?,
            CompressionMethod::Other(method) => {
                return Err(LiberatorError::corrupt_entry(
                    name,
                    format!("unsupported compression method {}", method),
                ));
            }
        };

        if content.len() as u64 != entry.uncompressed_size {
            return Err(LiberatorError::corrupt_entry(
                name,
                format!(
                    "size mismatch: header says {} bytes, read {}",
                    entry.uncompressed_size,
                    content.len()
                ),
            ));
        }

        if entry.crc32 != 0 && crc32fast::hash(&content) != entry.crc32 {
            return Err(LiberatorError::corrupt_entry(name, "CRC-32 mismatch"));
        }

        Ok(content)
    }

    /// Stored bytes of an entry, exactly as they sit in the container
    pub fn raw_payload(&self, entry: &ContainerEntry) -> Result<&[u8]> {
        let start = entry.data_offset;
        let end = usize::try_from(entry.compressed_size)
            .ok()
            .and_then(|len| start.checked_add(len))
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| LiberatorError::corrupt_entry(entry.name(), "payload extends past end of container"))?;

        Ok(&self.data[start..end])
    }

    /// The entry's whole local record: header, name, extra, data and any
    /// trailing data descriptor
    ///
    /// # Errors
    /// - CorruptEntry if the record extends past the end of the container
    pub fn raw_record(&self, entry: &ContainerEntry) -> Result<&[u8]> {
        let payload = self.raw_payload(entry)?;
        let mut end = entry.data_offset + payload.len();

        if entry.header.flags & FLAG_DATA_DESCRIPTOR != 0 {
            // crc + sizes, optionally preceded by a signature
            let len = if le_u32(&self.data, end) == Some(DATA_DESCRIPTOR_SIGNATURE) { 16 } else { 12 };
            end = end
                .checked_add(len)
                .filter(|&end| end <= self.data.len())
                .ok_or_else(|| LiberatorError::corrupt_entry(entry.name(), "data descriptor extends past end of container"))?;
        }

        Ok(&self.data[entry.local_offset..end])
    }
}

/// Scan back from the end for the end-of-central-directory signature
fn find_eocd(data: &[u8]) -> Result<usize> {
    if data.len() < EOCD_LEN {
        return Err(LiberatorError::invalid_container(format!(
            "{} bytes is too small to be a ZIP archive",
            data.len()
        )));
    }

    let last = data.len() - EOCD_LEN;
    let lowest = last.saturating_sub(MAX_COMMENT_LEN);

    (lowest..=last)
        .rev()
        .find(|&pos| le_u32(data, pos) == Some(EOCD_SIGNATURE))
        .ok_or_else(|| LiberatorError::invalid_container("end of central directory not found"))
}

/// Parse one central directory record and its local header
///
/// Returns the entry and the offset of the next central record.
fn parse_central_record(data: &[u8], pos: usize) -> Result<(ContainerEntry, usize)> {
    let truncated = || LiberatorError::invalid_container(format!("truncated central directory record at offset {}", pos));

    if le_u32(data, pos) != Some(CENTRAL_DIR_HEADER_SIGNATURE) {
        return Err(LiberatorError::invalid_container(format!(
            "bad central directory signature at offset {}",
            pos
        )));
    }

    let field16 = |off: usize| le_u16(data, pos + off).ok_or_else(truncated);
    let field32 = |off: usize| le_u32(data, pos + off).ok_or_else(truncated);

    let creator_version = field16(4)?;
    let version_needed = field16(6)?;
    let flags = field16(8)?;
    let method = CompressionMethod::from_raw(field16(10)?);
    let modified_time = field16(12)?;
    let modified_date = field16(14)?;
    let crc32 = field32(16)?;
    let compressed_size = field32(20)?;
    let uncompressed_size = field32(24)?;
    let name_len = field16(28)? as usize;
    let extra_len = field16(30)? as usize;
    let comment_len = field16(32)? as usize;
    let internal_attrs = field16(36)?;
    let external_attrs = field32(38)?;
    let local_offset = field32(42)? as usize;

    let name_start = pos + CENTRAL_HEADER_LEN;
    let extra_start = name_start + name_len;
    let comment_start = extra_start + extra_len;
    let next = comment_start + comment_len;

    let central_name = data.get(name_start..extra_start).ok_or_else(truncated)?;
    let extra = data.get(extra_start..comment_start).ok_or_else(truncated)?;
    let comment = data.get(comment_start..next).ok_or_else(truncated)?;

    let central_name = String::from_utf8_lossy(central_name).into_owned();
    let (local_name, data_offset) = read_local_header(data, local_offset, &central_name)?;

    let name = if local_name.is_empty() {
        central_name.clone()
    } else {
        local_name
    };

    let header = EntryHeader {
        name,
        method,
        flags,
        modified_time,
        modified_date,
        comment: comment.to_vec(),
        extra: extra.to_vec(),
        internal_attrs,
        external_attrs,
        creator_version,
        version_needed,
    };

    let entry = ContainerEntry {
        header,
        central_name,
        crc32,
        compressed_size: compressed_size as u64,
        uncompressed_size: uncompressed_size as u64,
        local_offset,
        data_offset,
    };

    Ok((entry, next))
}

/// Read the name from a local file header and locate the data that follows it
fn read_local_header(data: &[u8], offset: usize, central_name: &str) -> Result<(String, usize)> {
    if le_u32(data, offset) != Some(LOCAL_FILE_HEADER_SIGNATURE) {
        return Err(LiberatorError::corrupt_entry(
            central_name,
            format!("bad local header signature at offset {}", offset),
        ));
    }

    let truncated = || LiberatorError::corrupt_entry(central_name, "truncated local header");
    let name_len = le_u16(data, offset + 26).ok_or_else(truncated)? as usize;
    let extra_len = le_u16(data, offset + 28).ok_or_else(truncated)? as usize;

    let name_start = offset + LOCAL_HEADER_LEN;
    let name_end = name_start + name_len;
    let local_name = data.get(name_start..name_end).ok_or_else(truncated)?;

    Ok((String::from_utf8_lossy(local_name).into_owned(), name_end + extra_len))
}
