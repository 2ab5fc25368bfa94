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


//! Cryptography for ADEPT-protected books
//!
//! # Key Hierarchy
//! - **Private key**: the reader's RSA-1024 key tied to an Adobe ID
//! - **Book key**: 16-byte AES key, RSA-wrapped inside the rights token
//! - **Entries**: each encrypted entry is AES-128-CBC over raw deflate
//!
//! Recovering the book key needs the private key; decoding entries only needs
//! the book key.

pub mod entry;
pub mod key;

pub use entry::EntryDecoder;
pub use key::{load_private_key, recover_book_key, unwrap_book_key, BookKey, BOOK_KEY_LEN};
