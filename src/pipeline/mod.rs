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


//! Decryption pipeline
//!
//! # Flow
//! 1. [`ContainerIndex`](crate::container::ContainerIndex) indexes the source
//!    archive and checks for the reserved ADEPT entries
//! 2. The book key is recovered from the rights token
//! 3. [`DecodePipeline`] decodes every payload entry on a worker pool
//! 4. [`EpubLiberator`] writes the identity entry and then each result, as it
//!    arrives, into a new archive

pub mod decode;
pub mod liberator;

pub use decode::{DecodePipeline, DecodeResult, EntryKind};
pub use liberator::{
    decrypt_epub, decrypt_epub_blocking, decrypt_epub_with_config, inspect, is_protected,
    ContainerReport, EntryReport, EpubLiberator,
};
