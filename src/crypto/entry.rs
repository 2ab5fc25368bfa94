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


//! Encrypted entry decoding
//!
//! # Payload Layout
//! ```text
//! [ IV (16) | AES-128-CBC ciphertext (n * 16) ]
//! ```
//! The plaintext is a raw deflate stream followed by padding. The last
//! plaintext byte gives the number of padding bytes to drop.

use crate::container::deflate::inflate_raw;
use crate::crypto::key::BookKey;
use crate::error::{LiberatorError, Result};
use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use cbc::Decryptor;

type Aes128CbcDec = Decryptor<Aes128>;

const BLOCK_LEN: usize = 16;

/// Decrypts and inflates entries listed in the encryption manifest
#[derive(Debug, Clone)]
pub struct EntryDecoder {
    key: BookKey,
    strict_padding: bool,
}

impl EntryDecoder {
    /// Create a decoder with strict padding checks
    pub fn new(key: BookKey) -> Self {
        Self {
            key,
            strict_padding: true,
        }
    }

    /// Choose the padding policy
    ///
    /// Lenient mode trusts the pad byte as-is (including 0) and only fails
    /// when it exceeds the plaintext length.
    pub fn with_strict_padding(mut self, strict: bool) -> Self {
        self.strict_padding = strict;
        self
    }

    pub fn key(&self) -> &BookKey {
        &self.key
    }

    /// Recover the original content of entry `name` from its stored payload
    ///
    /// # Errors
    /// - DecodeFailed for any framing, cipher, padding or inflate failure
    pub fn decode(&self, name: &str, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < BLOCK_LEN {
            return Err(LiberatorError::decode_failed(
                name,
                format!("payload of {} bytes is shorter than the IV", payload.len()),
            ));
        }

        let (iv, ciphertext) = payload.split_at(BLOCK_LEN);
        if ciphertext.is_empty() {
            return Err(LiberatorError::decode_failed(name, "no ciphertext after the IV"));
        }
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(LiberatorError::decode_failed(
                name,
                format!("ciphertext length {} is not a multiple of {}", ciphertext.len(), BLOCK_LEN),
            ));
        }

        let cipher = Aes128CbcDec::new_from_slices(self.key.as_bytes(), iv)
            .map_err(|e| LiberatorError::decode_failed(name, format!("cipher setup: {}", e)))?;

        let mut buffer = ciphertext.to_vec();
        let plaintext = cipher
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|e| LiberatorError::decode_failed(name, format!("decryption: {}", e)))?;

        let unpadded = self.strip_padding(name, plaintext)?;

        inflate_raw(unpadded).map_err(|e| LiberatorError::decode_failed(name, format!("inflate: {}", e)))
    }

    fn strip_padding<'a>(&self, name: &str, plaintext: &'a [u8]) -> Result<&'a [u8]> {
        // Non-empty: ciphertext is at least one block
        let pad = plaintext.last().copied().unwrap_or(0) as usize;

        if self.strict_padding && (pad == 0 || pad > BLOCK_LEN) {
            return Err(LiberatorError::decode_failed(name, format!("invalid padding length {}", pad)));
        }
        if pad > plaintext.len() {
            return Err(LiberatorError::decode_failed(
                name,
                format!("padding length {} exceeds plaintext length {}", pad, plaintext.len()),
            ));
        }

        Ok(&plaintext[..plaintext.len() - pad])
    }
}
