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


//! In-memory container writer
//!
//! Entries are appended as local header + data, and the central directory is
//! emitted by [`ContainerWriter::finish`]. Content is always held in memory, so
//! CRC-32 and sizes go straight into the local header and no data descriptors
//! are written. [`ContainerWriter::copy_entry`] is the exception: it copies a
//! source record byte for byte, descriptor included.
//!
//! Nothing is appended for an entry until it has been fully encoded and
//! checked against ZIP32 limits. The buffer only leaves the writer through a
//! successful `finish`, so a failed rebuild never hands out a partial archive.

use crate::container::deflate::deflate_raw;
use crate::container::index::{ContainerEntry, ContainerIndex};
use crate::container::header::{
    put_u16, put_u32, CompressionMethod, EntryHeader, CENTRAL_DIR_HEADER_SIGNATURE,
    CENTRAL_HEADER_LEN, EOCD_SIGNATURE, FLAG_DATA_DESCRIPTOR, FLAG_UTF8,
    LOCAL_FILE_HEADER_SIGNATURE, LOCAL_HEADER_LEN,
};
use crate::error::{LiberatorError, Result};
use flate2::Compression;

/// Central directory bookkeeping for a written entry
#[derive(Debug)]
struct WrittenEntry {
    header: EntryHeader,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    local_offset: u32,
}

/// Builds a ZIP container in memory
#[derive(Debug)]
pub struct ContainerWriter {
    buffer: Vec<u8>,
    written: Vec<WrittenEntry>,
    compression: Compression,
}

impl ContainerWriter {
    /// Create an empty writer that deflates with `compression`
    pub fn new(compression: Compression) -> Self {
        Self {
            buffer: Vec::new(),
            written: Vec::new(),
            compression,
        }
    }

    /// Number of entries written so far
    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }

    /// Append an entry
    ///
    /// `content` is the uncompressed payload; it is stored or deflated
    /// according to `header.method`.
    ///
    /// # Errors
    /// - WriteFailed for a method other than stored/deflate, a compression
    ///   failure, or any field exceeding ZIP32 limits
    pub fn write_entry(&mut self, header: &EntryHeader, content: &[u8]) -> Result<()> {
        let name = &header.name;

        if self.written.len() >= u16::MAX as usize {
            return Err(LiberatorError::write_failed("too many entries for a ZIP32 archive"));
        }

        let encoded = match header.method {
            CompressionMethod::Stored => None,
            CompressionMethod::Deflate => Some(
                deflate_raw(content, self.compression)
                    .map_err(|e| LiberatorError::write_failed(format!("deflate of '{}' failed: {}", name, e)))?,
            ),
            CompressionMethod::Other(method) => {
                return Err(LiberatorError::write_failed(format!(
                    "cannot write '{}' with compression method {}",
                    name, method
                )));
            }
        };
        let data = encoded.as_deref().unwrap_or(content);

        let name_len = to_u16(name.len(), name, "name")?;
        let extra_len = to_u16(header.extra.len(), name, "extra field")?;
        to_u16(header.comment.len(), name, "comment")?;
        let compressed_size = to_u32(data.len(), name, "compressed size")?;
        let uncompressed_size = to_u32(content.len(), name, "uncompressed size")?;
        let local_offset = to_u32(self.buffer.len(), name, "local header offset")?;

        let mut flags = header.flags & !FLAG_DATA_DESCRIPTOR;
        if !name.is_ascii() {
            flags |= FLAG_UTF8;
        }
        let written = WrittenEntry {
            header: EntryHeader { flags, ..header.clone() },
            crc32: crc32fast::hash(content),
            compressed_size,
            uncompressed_size,
            local_offset,
        };

        let buf = &mut self.buffer;
        buf.reserve(LOCAL_HEADER_LEN + name.len() + header.extra.len() + data.len());
        put_u32(buf, LOCAL_FILE_HEADER_SIGNATURE);
        put_u16(buf, written.header.version_needed);
        put_u16(buf, written.header.flags);
        put_u16(buf, written.header.method.as_raw());
        put_u16(buf, written.header.modified_time);
        put_u16(buf, written.header.modified_date);
        put_u32(buf, written.crc32);
        put_u32(buf, compressed_size);
        put_u32(buf, uncompressed_size);
        put_u16(buf, name_len);
        put_u16(buf, extra_len);
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&header.extra);
        buf.extend_from_slice(data);

        self.written.push(written);
        Ok(())
    }

    /// Append a source entry's local record verbatim
    ///
    /// The central record repeats the source's metadata, so the entry comes
    /// out byte-identical apart from its offset.
    ///
    /// # Errors
    /// - CorruptEntry if the source record is out of bounds
    /// - WriteFailed if the record does not fit ZIP32 limits
    pub fn copy_entry(&mut self, source: &ContainerIndex, entry: &ContainerEntry) -> Result<()> {
        let name = entry.name();
        if self.written.len() >= u16::MAX as usize {
            return Err(LiberatorError::write_failed("too many entries for a ZIP32 archive"));
        }

        let record = source.raw_record(entry)?;
        let written = WrittenEntry {
            header: EntryHeader {
                name: entry.central_name.clone(),
                ..entry.header.clone()
            },
            crc32: entry.crc32,
            compressed_size: to_u32(entry.compressed_size as usize, name, "compressed size")?,
            uncompressed_size: to_u32(entry.uncompressed_size as usize, name, "uncompressed size")?,
            local_offset: to_u32(self.buffer.len(), name, "local header offset")?,
        };

        self.buffer.extend_from_slice(record);
        self.written.push(written);
        Ok(())
    }

    /// Write the central directory and return the finished archive
    ///
    /// # Errors
    /// - WriteFailed if the central directory does not fit ZIP32 offsets
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let cd_offset = to_u32(self.buffer.len(), "central directory", "offset")?;

        for entry in &self.written {
            let header = &entry.header;
            let buf = &mut self.buffer;
            buf.reserve(CENTRAL_HEADER_LEN + header.name.len() + header.extra.len() + header.comment.len());
            put_u32(buf, CENTRAL_DIR_HEADER_SIGNATURE);
            put_u16(buf, header.creator_version);
            put_u16(buf, header.version_needed);
            put_u16(buf, header.flags);
            put_u16(buf, header.method.as_raw());
            put_u16(buf, header.modified_time);
            put_u16(buf, header.modified_date);
            put_u32(buf, entry.crc32);
            put_u32(buf, entry.compressed_size);
            put_u32(buf, entry.uncompressed_size);
            put_u16(buf, header.name.len() as u16);
            put_u16(buf, header.extra.len() as u16);
            put_u16(buf, header.comment.len() as u16);
            put_u16(buf, 0); // disk number start
            put_u16(buf, header.internal_attrs);
            put_u32(buf, header.external_attrs);
            put_u32(buf, entry.local_offset);
            buf.extend_from_slice(header.name.as_bytes());
            buf.extend_from_slice(&header.extra);
            buf.extend_from_slice(&header.comment);
        }

        let cd_size = to_u32(self.buffer.len() - cd_offset as usize, "central directory", "size")?;
        let count = self.written.len() as u16;

        let buf = &mut self.buffer;
        put_u32(buf, EOCD_SIGNATURE);
        put_u16(buf, 0); // this disk
        put_u16(buf, 0); // central directory disk
        put_u16(buf, count);
        put_u16(buf, count);
        put_u32(buf, cd_size);
        put_u32(buf, cd_offset);
        put_u16(buf, 0); // comment length

        Ok(self.buffer)
    }
}

fn to_u16(value: usize, name: &str, field: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        LiberatorError::write_failed(format!("{} of '{}' is too long ({} bytes)", field, name, value))
    })
}

fn to_u32(value: usize, name: &str, field: &str) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|&v| v != u32::MAX)
        .ok_or_else(|| {
            LiberatorError::write_failed(format!("{} of '{}' exceeds ZIP32 limits ({})", field, name, value))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::header::DATA_DESCRIPTOR_SIGNATURE;

    #[test]
    fn test_round_trip_through_index() {
        let mut header = EntryHeader::new("OEBPS/ch1.xhtml", CompressionMethod::Deflate);
        header.comment = b"first chapter".to_vec();
        header.extra = vec![0xca, 0xfe, 0x00, 0x00];
        header.external_attrs = 0o100644 << 16;
        header.modified_date = 0x5a21;
        header.modified_time = 0x6000;

        let body = b"<p>It was a dark and stormy night.</p>".repeat(40);

        let mut writer = ContainerWriter::new(Compression::best());
        writer
            .write_entry(&EntryHeader::new("mimetype", CompressionMethod::Stored), b"application/epub+zip")
            .unwrap();
        writer.write_entry(&header, &body).unwrap();
        assert_eq!(writer.len(), 2);
        let data = writer.finish().unwrap();

        // mimetype must be readable at a fixed offset
        assert_eq!(&data[30..38], b"mimetype");
        assert_eq!(&data[38..58], b"application/epub+zip");

        let index = ContainerIndex::open(data).unwrap();
        let entry = index.get("OEBPS/ch1.xhtml").unwrap();
        assert_eq!(entry.header, header);
        assert!(entry.compressed_size < entry.uncompressed_size);
        assert_eq!(index.read(entry).unwrap(), body);
    }

    #[test]
    fn test_clears_data_descriptor_flag() {
        let mut header = EntryHeader::new("a.txt", CompressionMethod::Stored);
        header.flags = FLAG_DATA_DESCRIPTOR | 0x0002;

        let mut writer = ContainerWriter::new(Compression::default());
        writer.write_entry(&header, b"abc").unwrap();
        let index = ContainerIndex::open(writer.finish().unwrap()).unwrap();

        assert_eq!(index.get("a.txt").unwrap().header.flags, 0x0002);
    }

    /// Stored `mimetype` written with a data descriptor, as streaming zippers do
    fn streamed_mimetype_archive() -> Vec<u8> {
        let content = b"application/epub+zip";
        let crc = crc32fast::hash(content);
        let mut buf = Vec::new();

        put_u32(&mut buf, LOCAL_FILE_HEADER_SIGNATURE);
        put_u16(&mut buf, 10);
        put_u16(&mut buf, FLAG_DATA_DESCRIPTOR);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0x6a4b);
        put_u16(&mut buf, 0x5a21);
        put_u32(&mut buf, 0);
        put_u32(&mut buf, 0);
        put_u32(&mut buf, 0);
        put_u16(&mut buf, 8);
        put_u16(&mut buf, 0);
        buf.extend_from_slice(b"mimetype");
        buf.extend_from_slice(content);
        put_u32(&mut buf, DATA_DESCRIPTOR_SIGNATURE);
        put_u32(&mut buf, crc);
        put_u32(&mut buf, content.len() as u32);
        put_u32(&mut buf, content.len() as u32);

        let cd_offset = buf.len();
        put_u32(&mut buf, CENTRAL_DIR_HEADER_SIGNATURE);
        put_u16(&mut buf, 0x0314);
        put_u16(&mut buf, 10);
        put_u16(&mut buf, FLAG_DATA_DESCRIPTOR);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0x6a4b);
        put_u16(&mut buf, 0x5a21);
        put_u32(&mut buf, crc);
        put_u32(&mut buf, content.len() as u32);
        put_u32(&mut buf, content.len() as u32);
        put_u16(&mut buf, 8);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u32(&mut buf, 0o100444 << 16);
        put_u32(&mut buf, 0);
        buf.extend_from_slice(b"mimetype");
        let cd_size = buf.len() - cd_offset;

        put_u32(&mut buf, EOCD_SIGNATURE);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 0);
        put_u16(&mut buf, 1);
        put_u16(&mut buf, 1);
        put_u32(&mut buf, cd_size as u32);
        put_u32(&mut buf, cd_offset as u32);
        put_u16(&mut buf, 0);
        buf
    }

    #[test]
    fn test_copy_entry_keeps_record_verbatim() {
        let source = streamed_mimetype_archive();
        let record_len = 30 + 8 + 20 + 16;
        let index = ContainerIndex::open(source.clone()).unwrap();
        let entry = index.get("mimetype").unwrap();
        assert_eq!(index.raw_record(entry).unwrap(), &source[..record_len]);

        let mut writer = ContainerWriter::new(Compression::default());
        writer.copy_entry(&index, entry).unwrap();
        writer
            .write_entry(&EntryHeader::new("OEBPS/ch1.xhtml", CompressionMethod::Deflate), b"<p/>")
            .unwrap();
        let output = writer.finish().unwrap();

        assert_eq!(&output[..record_len], &source[..record_len]);
        let rebuilt = ContainerIndex::open(output).unwrap();
        let copied = rebuilt.get("mimetype").unwrap();
        assert_eq!(copied.header, entry.header);
        assert_eq!(copied.crc32, entry.crc32);
        assert_eq!(rebuilt.read(copied).unwrap(), b"application/epub+zip");
        assert_eq!(rebuilt.read_by_name("OEBPS/ch1.xhtml").unwrap(), b"<p/>");
    }

    #[test]
    fn test_sets_utf8_flag_for_non_ascii_names() {
        let mut writer = ContainerWriter::new(Compression::default());
        writer
            .write_entry(&EntryHeader::new("OEBPS/café.xhtml", CompressionMethod::Deflate), b"x")
            .unwrap();
        let index = ContainerIndex::open(writer.finish().unwrap()).unwrap();

        assert_eq!(index.get("OEBPS/café.xhtml").unwrap().header.flags & FLAG_UTF8, FLAG_UTF8);
    }

    #[test]
    fn test_rejects_unknown_method() {
        let mut writer = ContainerWriter::new(Compression::default());
        let err = writer
            .write_entry(&EntryHeader::new("a.bin", CompressionMethod::Other(14)), b"x")
            .unwrap_err();
        assert!(matches!(err, LiberatorError::WriteFailed(_)));
        assert!(writer.is_empty());
    }

    #[test]
    fn test_empty_archive() {
        let data = ContainerWriter::new(Compression::default()).finish().unwrap();
        assert_eq!(data.len(), 22);
        assert!(ContainerIndex::open(data).unwrap().is_empty());
    }
}
