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


//! EPUB/OCF documents that carry ADEPT DRM
//!
//! # Reserved Entries
//! - `mimetype` - identity entry, stored uncompressed, always first
//! - `META-INF/rights.xml` - rights token with the RSA-wrapped book key
//! - `META-INF/encryption.xml` - manifest of encrypted entries
//!
//! Both XML documents are read with small streaming decoders that pick out
//! the few leaf values needed and ignore everything else.

pub mod manifest;
pub mod rights;

pub use manifest::{CipherReference, EncryptionManifest};
pub use rights::RightsToken;

/// Identity entry asserting the container's media type
pub const MIMETYPE_PATH: &str = "mimetype";

/// Rights token entry
pub const RIGHTS_PATH: &str = "META-INF/rights.xml";

/// Encryption manifest entry
pub const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";

use quick_xml::events::BytesStart;

/// Local name of an element as a string, namespace prefix dropped
pub(crate) fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}
