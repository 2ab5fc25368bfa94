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


//! ADEPT rights token (`META-INF/rights.xml`)
//!
//! # Document Shape
//! ```xml
//! <adept:rights xmlns:adept="http://ns.adobe.com/adept">
//!   <adept:licenseToken>
//!     <adept:user>urn:uuid:...</adept:user>
//!     <adept:resource>urn:uuid:...</adept:resource>
//!     <adept:encryptedKey keyInfo="...">BASE64 (172 chars)</adept:encryptedKey>
//!     ...
//!   </adept:licenseToken>
//! </adept:rights>
//! ```
//!
//! Only `rights/licenseToken/encryptedKey` is read. Elements are matched by
//! local name so any namespace prefix is accepted.

use crate::epub::local_name;
use crate::error::{LiberatorError, Result};
use base64::{engine::general_purpose, Engine as _};
use quick_xml::events::Event;
use quick_xml::Reader;

/// Encoded length of a 1024-bit RSA ciphertext in base64
pub const ENCRYPTED_KEY_LEN: usize = 172;

const KEY_PATH: [&str; 3] = ["rights", "licenseToken", "encryptedKey"];

/// Parsed rights token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RightsToken {
    encrypted_key: String,
}

impl RightsToken {
    /// Parse the rights document
    ///
    /// A document without an `encryptedKey` parses to an empty key, which
    /// then fails the length check in [`RightsToken::wrapped_key`].
    ///
    /// # Errors
    /// - MalformedRights for invalid XML or a root element other than `rights`
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let mut reader = Reader::from_reader(xml);
        let mut buf = Vec::new();
        let mut path: Vec<String> = Vec::new();
        let mut root_seen = false;
        let mut encrypted_key = String::new();
        let mut key_done = false;

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = local_name(&e);
                    if path.is_empty() {
                        check_root(&name, root_seen)?;
                        root_seen = true;
                    }
                    path.push(name);
                }
                Ok(Event::Empty(e)) => {
                    if path.is_empty() {
                        check_root(&local_name(&e), root_seen)?;
                        root_seen = true;
                    }
                }
                Ok(Event::End(_)) => {
                    if is_key_path(&path) {
                        key_done = true;
                    }
                    path.pop();
                }
                Ok(Event::Text(text)) if is_key_path(&path) && !key_done => {
                    let text = text
                        .unescape()
                        .map_err(|e| LiberatorError::MalformedRights(e.to_string()))?;
                    encrypted_key.push_str(&text);
                }
                Ok(Event::CData(data)) if is_key_path(&path) && !key_done => {
                    encrypted_key.push_str(&String::from_utf8_lossy(&data));
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(LiberatorError::MalformedRights(format!(
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
            return Err(LiberatorError::MalformedRights("document has no root element".to_string()));
        }
        if !path.is_empty() {
            return Err(LiberatorError::MalformedRights(format!(
                "unexpected end of document inside <{}>",
                path.join("/")
            )));
        }

        Ok(Self {
            encrypted_key: encrypted_key.trim().to_string(),
        })
    }

    /// The base64 text of `encryptedKey`, whitespace trimmed
    pub fn encrypted_key(&self) -> &str {
        &self.encrypted_key
    }

    /// Decode the RSA-wrapped book key
    ///
    /// # Errors
    /// - NotSupportedScheme unless the encoded key is exactly 172 characters
    /// - MalformedRights if it is not valid base64
    pub fn wrapped_key(&self) -> Result<Vec<u8>> {
        let length = self.encrypted_key.chars().count();
        if length != ENCRYPTED_KEY_LEN {
            return Err(LiberatorError::NotSupportedScheme {
                length,
                expected: ENCRYPTED_KEY_LEN,
            });
        }

        general_purpose::STANDARD
            .decode(&self.encrypted_key)
            .map_err(|e| LiberatorError::MalformedRights(format!("encrypted key is not valid base64: {}", e)))
    }
}

fn check_root(name: &str, root_seen: bool) -> Result<()> {
    if root_seen {
        return Err(LiberatorError::MalformedRights("multiple root elements".to_string()));
    }
    if name != KEY_PATH[0] {
        return Err(LiberatorError::MalformedRights(format!(
            "expected <rights> root element, found <{}>",
            name
        )));
    }
    Ok(())
}

fn is_key_path(path: &[String]) -> bool {
    path.len() == KEY_PATH.len() && path.iter().zip(KEY_PATH).all(|(a, b)| a == b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rights_xml(key: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<adept:rights xmlns:adept="http://ns.adobe.com/adept">
  <adept:licenseToken>
    <adept:user>urn:uuid:00000000-0000-0000-0000-000000000000</adept:user>
    <adept:resource>urn:uuid:11111111-1111-1111-1111-111111111111</adept:resource>
    <adept:encryptedKey keyInfo="pkcs1">{}</adept:encryptedKey>
    <adept:permissions><adept:display/></adept:permissions>
  </adept:licenseToken>
</adept:rights>"#,
            key
        )
    }

    #[test]
    fn test_parses_encrypted_key() {
        let key = general_purpose::STANDARD.encode([0x5a; 128]);
        assert_eq!(key.len(), ENCRYPTED_KEY_LEN);

        let token = RightsToken::parse(rights_xml(&key).as_bytes()).unwrap();
        assert_eq!(token.encrypted_key(), key);
        assert_eq!(token.wrapped_key().unwrap(), vec![0x5a; 128]);
    }

    #[test]
    fn test_unprefixed_elements() {
        let key = general_purpose::STANDARD.encode([1u8; 128]);
        let xml = format!("<rights><licenseToken><encryptedKey>\n  {}\n</encryptedKey></licenseToken></rights>", key);
        let token = RightsToken::parse(xml.as_bytes()).unwrap();
        assert_eq!(token.encrypted_key(), key);
    }

    #[test]
    fn test_wrong_length_is_not_supported() {
        // 256-byte ciphertext from a 2048-bit key
        let key = general_purpose::STANDARD.encode([7u8; 256]);
        let token = RightsToken::parse(rights_xml(&key).as_bytes()).unwrap();
        assert!(matches!(
            token.wrapped_key(),
            Err(LiberatorError::NotSupportedScheme { length: 344, expected: 172 })
        ));

        let token = RightsToken::parse(rights_xml("short").as_bytes()).unwrap();
        assert!(matches!(token.wrapped_key(), Err(LiberatorError::NotSupportedScheme { length: 5, .. })));
    }

    #[test]
    fn test_missing_key_is_not_supported() {
        let token = RightsToken::parse(b"<rights><licenseToken/></rights>").unwrap();
        assert_eq!(token.encrypted_key(), "");
        assert!(matches!(token.wrapped_key(), Err(LiberatorError::NotSupportedScheme { length: 0, .. })));
    }

    #[test]
    fn test_key_outside_license_token_is_ignored() {
        let key = general_purpose::STANDARD.encode([3u8; 128]);
        let xml = format!("<rights><encryptedKey>{}</encryptedKey></rights>", key);
        let token = RightsToken::parse(xml.as_bytes()).unwrap();
        assert_eq!(token.encrypted_key(), "");
    }

    #[test]
    fn test_invalid_base64_of_right_length() {
        let bogus = "!".repeat(ENCRYPTED_KEY_LEN);
        let token = RightsToken::parse(rights_xml(&bogus).as_bytes()).unwrap();
        assert!(matches!(token.wrapped_key(), Err(LiberatorError::MalformedRights(_))));
    }

    #[test]
    fn test_rejects_wrong_root() {
        assert!(matches!(
            RightsToken::parse(b"<encryption/>"),
            Err(LiberatorError::MalformedRights(_))
        ));
    }

    #[test]
    fn test_rejects_broken_xml() {
        assert!(RightsToken::parse(b"<rights><licenseToken></rights>").is_err());
        assert!(RightsToken::parse(b"<rights><licenseToken>").is_err());
        assert!(RightsToken::parse(b"").is_err());
    }
}
