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


//! Book-level decryption
//!
//! [`EpubLiberator`] owns a private key and a [`DecryptConfig`] and turns a
//! protected EPUB into a DRM-free one:
//! 1. Index the container and require `rights.xml` and `encryption.xml`
//! 2. Recover the book key from the rights token
//! 3. Parse the encryption manifest
//! 4. Copy the `mimetype` record first, byte for byte
//! 5. Decode every other payload entry and write it deflated, as results arrive
//!
//! The reserved ADEPT entries are not carried into the output.
//!
//! # Example
//! ```no_run
//! use epub_liberator::{DecryptConfig, EpubLiberator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let key = std::fs::read("adeptkey.der")?;
//! let book = std::fs::read("book.epub")?;
//!
//! let liberator = EpubLiberator::from_key_bytes(&key, DecryptConfig::default())?;
//! let plain = liberator.decrypt(&book).await?;
//! std::fs::write("book.drm-free.epub", plain)?;
//! # Ok(())
//! # }
//! ```

use crate::config::DecryptConfig;
use crate::container::{CompressionMethod, ContainerIndex, ContainerWriter};
use crate::crypto::{load_private_key, recover_book_key, EntryDecoder};
use crate::epub::{EncryptionManifest, ENCRYPTION_PATH, MIMETYPE_PATH, RIGHTS_PATH};
use crate::error::{LiberatorError, Result};
use crate::pipeline::decode::DecodePipeline;
use chrono::NaiveDateTime;
use rsa::RsaPrivateKey;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Removes ADEPT DRM from EPUB containers
#[derive(Debug, Clone)]
pub struct EpubLiberator {
    private_key: RsaPrivateKey,
    config: DecryptConfig,
}

impl EpubLiberator {
    /// Create a liberator from a loaded private key
    ///
    /// # Errors
    /// - InvalidConfiguration if `config` fails validation
    pub fn new(private_key: RsaPrivateKey, config: DecryptConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { private_key, config })
    }

    /// Create a liberator from DER or PEM key bytes
    ///
    /// # Errors
    /// - InvalidPrivateKey or InvalidConfiguration
    pub fn from_key_bytes(private_key: &[u8], config: DecryptConfig) -> Result<Self> {
        Self::new(load_private_key(private_key)?, config)
    }

    pub fn config(&self) -> &DecryptConfig {
        &self.config
    }

    /// Decrypt a protected EPUB held in memory
    ///
    /// # Errors
    /// - NotProtected if either reserved ADEPT entry is missing
    /// - MalformedRights, NotSupportedScheme or WrongKey from key recovery
    /// - MalformedManifest for an unreadable encryption manifest
    /// - InvalidContainer, CorruptEntry, DecodeFailed or WriteFailed
    pub async fn decrypt(&self, epub: &[u8]) -> Result<Vec<u8>> {
        let index = Arc::new(ContainerIndex::open(epub.to_vec())?);
        index.require_protected()?;

        let mimetype = index
            .get(MIMETYPE_PATH)
            .ok_or_else(|| LiberatorError::invalid_container("container has no mimetype entry"))?;

        let book_key = recover_book_key(&self.private_key, &index.read_by_name(RIGHTS_PATH)?)?;
        let manifest = Arc::new(EncryptionManifest::parse(&index.read_by_name(ENCRYPTION_PATH)?)?);
        info!(
            entries = index.len(),
            encrypted = manifest.len(),
            key = %book_key.fingerprint(),
            "Decrypting book"
        );

        let decoder = Arc::new(EntryDecoder::new(book_key).with_strict_padding(self.config.strict_padding));

        let mut writer = ContainerWriter::new(self.config.compression());
        index.read(mimetype)?;
        writer.copy_entry(&index, mimetype)?;

        let pipeline = DecodePipeline::new(self.config.workers);
        let written = pipeline
            .run(Arc::clone(&index), manifest, decoder, |result| {
                writer.write_entry(&result.header, &result.content)
            })
            .await?;

        let output = writer.finish()?;
        info!(entries = written + 1, bytes = output.len(), "Book decrypted");
        Ok(output)
    }

    /// Decrypt on a private tokio runtime
    ///
    /// Must not be called from within an async context.
    ///
    /// # Errors
    /// - InternalError if the runtime cannot be built
    /// - Anything [`EpubLiberator::decrypt`] returns
    pub fn decrypt_blocking(&self, epub: &[u8]) -> Result<Vec<u8>> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.workers.max(1))
            .thread_name("epub-liberator")
            .build()
            .map_err(|e| LiberatorError::internal(format!("failed to build runtime: {}", e)))?;

        runtime.block_on(self.decrypt(epub))
    }
}

/// Decrypt with the default configuration
pub async fn decrypt_epub(private_key: &[u8], epub: &[u8]) -> Result<Vec<u8>> {
    decrypt_epub_with_config(private_key, epub, &DecryptConfig::default()).await
}

/// Decrypt with an explicit configuration
pub async fn decrypt_epub_with_config(private_key: &[u8], epub: &[u8], config: &DecryptConfig) -> Result<Vec<u8>> {
    EpubLiberator::from_key_bytes(private_key, config.clone())?
        .decrypt(epub)
        .await
}

/// Decrypt without an async caller; builds its own runtime
pub fn decrypt_epub_blocking(private_key: &[u8], epub: &[u8], config: &DecryptConfig) -> Result<Vec<u8>> {
    EpubLiberator::from_key_bytes(private_key, config.clone())?.decrypt_blocking(epub)
}

/// Whether `epub` carries both reserved ADEPT entries
///
/// # Errors
/// - InvalidContainer if `epub` is not a readable archive
pub fn is_protected(epub: &[u8]) -> Result<bool> {
    let index = ContainerIndex::open(epub.to_vec())?;
    Ok(index.drm_status().is_protected())
}

/// Summary of a container and its entries
#[derive(Debug, Clone, Serialize)]
pub struct ContainerReport {
    pub protected: bool,
    pub has_rights: bool,
    pub has_encryption: bool,
    pub entries: Vec<EntryReport>,
}

impl ContainerReport {
    pub fn encrypted_count(&self) -> usize {
        self.entries.iter().filter(|e| e.encrypted).count()
    }
}

/// One entry in a [`ContainerReport`]
#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub name: String,
    pub method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub modified: Option<NaiveDateTime>,
    /// Listed in the encryption manifest
    pub encrypted: bool,
}

/// Describe a container without decrypting anything
///
/// # Errors
/// - InvalidContainer if `epub` is not a readable archive
/// - CorruptEntry or MalformedManifest if the encryption manifest cannot be read
pub fn inspect(epub: &[u8]) -> Result<ContainerReport> {
    let index = ContainerIndex::open(epub.to_vec())?;
    let status = index.drm_status();

    let manifest = match index.get(ENCRYPTION_PATH) {
        Some(entry) => EncryptionManifest::parse(&index.read(entry)?)?,
        None => EncryptionManifest::default(),
    };
    debug!(entries = index.len(), encrypted = manifest.len(), "Inspecting container");

    let entries = index
        .entries()
        .map(|entry| EntryReport {
            name: entry.name().to_string(),
            method: entry.method(),
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            modified: entry.header.modified(),
            encrypted: manifest.is_encrypted(entry.name()),
        })
        .collect();

    Ok(ContainerReport {
        protected: status.is_protected(),
        has_rights: status.has_rights,
        has_encryption: status.has_encryption,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::EntryHeader;
    use flate2::Compression;

    fn archive(names: &[&str]) -> Vec<u8> {
        let mut writer = ContainerWriter::new(Compression::default());
        for name in names {
            let method = if *name == MIMETYPE_PATH {
                CompressionMethod::Stored
            } else {
                CompressionMethod::Deflate
            };
            let content: &[u8] = match *name {
                MIMETYPE_PATH => b"application/epub+zip",
                ENCRYPTION_PATH => br#"<encryption><EncryptedData><CipherData><CipherReference URI="OEBPS/ch1.xhtml"/></CipherData></EncryptedData></encryption>"#,
                RIGHTS_PATH => b"<rights/>",
                _ => b"<html/>",
            };
            writer.write_entry(&EntryHeader::new(*name, method), content).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_is_protected() {
        let protected = archive(&[MIMETYPE_PATH, RIGHTS_PATH, ENCRYPTION_PATH, "OEBPS/ch1.xhtml"]);
        assert!(is_protected(&protected).unwrap());

        let free = archive(&[MIMETYPE_PATH, "OEBPS/ch1.xhtml"]);
        assert!(!is_protected(&free).unwrap());

        assert!(matches!(is_protected(b"PK"), Err(LiberatorError::InvalidContainer(_))));
    }

    #[test]
    fn test_inspect_reports_entries() {
        let data = archive(&[MIMETYPE_PATH, RIGHTS_PATH, ENCRYPTION_PATH, "OEBPS/ch1.xhtml", "OEBPS/ch2.xhtml"]);
        let report = inspect(&data).unwrap();

        assert!(report.protected);
        assert_eq!(report.entries.len(), 5);
        assert_eq!(report.encrypted_count(), 1);
        assert_eq!(report.entries[0].name, MIMETYPE_PATH);
        assert_eq!(report.entries[0].method, CompressionMethod::Stored);
        assert!(report.entries.iter().any(|e| e.name == "OEBPS/ch1.xhtml" && e.encrypted));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["protected"], true);
        assert_eq!(json["entries"][1]["method"], "deflate");
    }

    #[tokio::test]
    async fn test_decrypt_rejects_unprotected_book() {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 512).unwrap();
        let liberator = EpubLiberator::new(key, DecryptConfig::default()).unwrap();

        let err = liberator
            .decrypt(&archive(&[MIMETYPE_PATH, ENCRYPTION_PATH, "OEBPS/ch1.xhtml"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LiberatorError::NotProtected { ref missing } if missing == RIGHTS_PATH));
    }

    #[tokio::test]
    async fn test_decrypt_requires_mimetype() {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 512).unwrap();
        let liberator = EpubLiberator::new(key, DecryptConfig::default()).unwrap();

        let err = liberator
            .decrypt(&archive(&[RIGHTS_PATH, ENCRYPTION_PATH, "OEBPS/ch1.xhtml"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LiberatorError::InvalidContainer(_)));
    }

    #[test]
    fn test_new_validates_config() {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 512).unwrap();
        let result = EpubLiberator::new(key, DecryptConfig::default().with_workers(0));
        assert!(matches!(result, Err(LiberatorError::InvalidConfiguration(_))));
    }
}
