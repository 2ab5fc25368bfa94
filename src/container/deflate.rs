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


//! Raw (headerless) deflate streams
//!
//! Both ZIP method 8 payloads and the plaintext inside ADEPT-encrypted
//! entries are raw deflate with no zlib header or trailer.

use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::{self, Write};

const GROW_BY: usize = 32 * 1024;

/// Inflate a complete raw deflate stream
///
/// Unlike a plain `read_to_end` over `flate2::read::DeflateDecoder`, this
/// fails when the input runs out before the final block.
///
/// # Errors
/// - `InvalidData` for a corrupt stream
/// - `UnexpectedEof` for a truncated stream
pub fn inflate_raw(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut inflater = Decompress::new(false);
    let mut out = Vec::with_capacity(data.len().saturating_mul(3).max(64));

    loop {
        if out.len() == out.capacity() {
            out.reserve(GROW_BY);
        }

        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out();
        let status = inflater
            .decompress_vec(&data[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if status == Status::StreamEnd {
            return Ok(out);
        }

        let stalled = inflater.total_in() as usize == consumed && inflater.total_out() == produced;
        if stalled && out.len() < out.capacity() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated deflate stream",
            ));
        }
    }
}

/// Compress `data` into a raw deflate stream
pub fn deflate_raw(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2 + 64), level);
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inflate_recovers_deflated_text() {
        let text = b"<html><body>".repeat(500);
        let packed = deflate_raw(&text, Compression::best()).unwrap();
        assert!(packed.len() < text.len());
        assert_eq!(inflate_raw(&packed).unwrap(), text);
    }

    #[test]
    fn test_inflate_empty_stream() {
        let packed = deflate_raw(b"", Compression::default()).unwrap();
        assert_eq!(inflate_raw(&packed).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_inflate_rejects_truncated_stream() {
        let text: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 251) as u8).collect();
        let packed = deflate_raw(&text, Compression::default()).unwrap();
        let truncated = &packed[..packed.len() / 2];

        let err = inflate_raw(truncated).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_inflate_rejects_garbage() {
        // Block type 3 is reserved
        assert!(inflate_raw(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_inflate_rejects_empty_input() {
        assert!(inflate_raw(&[]).is_err());
    }
}
