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


//! Encryption manifest (`META-INF/encryption.xml`)
//!
//! Each `EncryptedData` names one encrypted container entry:
//! ```xml
//! <encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container"
//!             xmlns:enc="http://www.w3.org/2001/04/xmlenc#">
//!   <enc:EncryptedData>
//!     <enc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
//!     <enc:KeyInfo>...</enc:KeyInfo>
//!     <enc:CipherData>
//!       <enc:CipherReference URI="OEBPS/chapter1.xhtml"/>
//!     </enc:CipherData>
//!   </enc:EncryptedData>
//! </encryption>
//! ```

use crate::epub::local_name;
use crate::error::{LiberatorError, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use tracing::warn;

/// The only algorithm ADEPT uses for entry payloads
pub const AES128_CBC_ALGORITHM: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";

/// One encrypted entry named by the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherReference {
    /// Entry path as written in the `URI` attribute
    pub uri: String,
    /// `EncryptionMethod@Algorithm`, if present
    pub algorithm: Option<String>,
}

/// Set of entries that must be decrypted
#[derive(Debug, Clone, Default)]
pub struct EncryptionManifest {
    references: Vec<CipherReference>,
    paths: HashSet<String>,
}

/// Per-`EncryptedData` accumulator
#[derive(Default)]
struct Pending {
    uri: Option<String>,
    algorithm: Option<String>,
}

impl EncryptionManifest {
    /// Parse the manifest
    ///
    /// `EncryptedData` blocks without a non-empty `CipherReference@URI` are
    /// skipped. An algorithm other than AES-128-CBC is logged and the entry
    /// is still treated as encrypted.
    ///
    /// # Errors
    /// - MalformedManifest for invalid XML or a root element other than `encryption`
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();
        let mut root_seen = false;
        let mut pending: Option<Pending> = None;
        let mut manifest = Self::default();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = local_name(&e);
                    if path.is_empty() {
                        check_root(&name, root_seen)?;
                        root_seen = true;
                    }
                    visit_element(&path, &name, &e, &mut pending)?;
                    path.push(name);
                }
                Ok(Event::Empty(e)) => {
                    let name = local_name(&e);
                    if path.is_empty() {
                        check_root(&name, root_seen)?;
                        root_seen = true;
                    }
                    visit_element(&path, &name, &e, &mut pending)?;
                    if path.len() == 1 && name == "EncryptedData" {
                        manifest.close_block(pending.take());
                    }
                }
                Ok(Event::End(_)) => {
                    if path.len() == 2 && path[1] == "EncryptedData" {
                        manifest.close_block(pending.take());
                    }
                    path.pop();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(LiberatorError::MalformedManifest(format!(
                        "at byte {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
                _ => {}
            }
            buf.clear();
        }

        if !root_seen {
            return Err(LiberatorError::MalformedManifest("document has no root element".to_string()));
        }
        if !path.is_empty() {
            return Err(LiberatorError::MalformedManifest(format!(
                "unexpected end of document inside <{}>",
                path.join("/")
            )));
        }

        Ok(manifest)
    }

    fn close_block(&mut self, block: Option<Pending>) {
        let Some(Pending { uri: Some(uri), algorithm }) = block else {
            return;
        };
        if uri.is_empty() {
            return;
        }

        if let Some(algorithm) = algorithm.as_deref() {
            if algorithm != AES128_CBC_ALGORITHM {
                warn!(uri = %uri, algorithm, "unexpected encryption algorithm, assuming AES-128-CBC");
            }
        }

        self.paths.insert(uri.clone());
        if let Ok(decoded) = urlencoding::decode(&uri) {
            if decoded != uri.as_str() {
                self.paths.insert(decoded.into_owned());
            }
        }
        self.references.push(CipherReference { uri, algorithm });
    }

    /// All references in document order
    pub fn references(&self) -> &[CipherReference] {
        &self.references
    }

    /// Whether the container entry `name` is listed as encrypted
    ///
    /// Matches the URI verbatim or in its percent-decoded form.
    pub fn is_encrypted(&self, name: &str) -> bool {
        self.paths.contains(name)
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

fn check_root(name: &str, root_seen: bool) -> Result<()> {
    if root_seen {
        return Err(LiberatorError::MalformedManifest("multiple root elements".to_string()));
    }
    if name != "encryption" {
        return Err(LiberatorError::MalformedManifest(format!(
            "expected <encryption> root element, found <{}>",
            name
        )));
    }
    Ok(())
}

/// Handle an opening (or empty) element whose parent chain is `path`
fn visit_element(path: &[String], name: &str, element: &BytesStart<'_>, pending: &mut Option<Pending>) -> Result<()> {
    match (path.len(), name) {
        (1, "EncryptedData") => *pending = Some(Pending::default()),
        (2, "EncryptionMethod") if path[1] == "EncryptedData" => {
            if let Some(block) = pending.as_mut() {
                block.algorithm = attribute(element, b"Algorithm")?;
            }
        }
        (3, "CipherReference") if path[1] == "EncryptedData" && path[2] == "CipherData" => {
            if let Some(block) = pending.as_mut() {
                block.uri = attribute(element, b"URI")?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| LiberatorError::MalformedManifest(e.to_string()))?;
        if attr.key.local_name().as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|e| LiberatorError::MalformedManifest(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
