//! Fixture books for integration tests
//!
//! Builds ADEPT-style EPUBs in memory: a 1024-bit test key wraps a random book
//! key into `rights.xml`, and listed entries are deflated, padded and
//! AES-128-CBC encrypted behind a random IV.

#![allow(dead_code)]

use aes::Aes128;
use base64::{engine::general_purpose, Engine as _};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use epub_liberator::container::deflate::deflate_raw;
use epub_liberator::container::{CompressionMethod, ContainerWriter, EntryHeader};
use flate2::Compression;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPrivateKey};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::OnceLock;

pub const MIMETYPE: &[u8] = b"application/epub+zip";

pub const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;

/// Shared 1024-bit key; generating one per test is slow
pub fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("key generation"))
}

/// The test key as PKCS#1 DER, the usual `adeptkey.der` format
pub fn key_der() -> Vec<u8> {
    test_key().to_pkcs1_der().expect("encode key").as_bytes().to_vec()
}

/// Base64 RSA wrap of `book_key`, 172 characters
pub fn wrap_book_key(book_key: &[u8; 16]) -> String {
    let wrapped = test_key()
        .to_public_key()
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, book_key)
        .expect("wrap");
    general_purpose::STANDARD.encode(wrapped)
}

/// A 172-character token whose unwrapped plaintext has a non-zero sentinel
pub fn token_without_sentinel() -> String {
    let key = test_key();
    let raw = BigUint::from_bytes_be(&[0x01; 128]).modpow(key.e(), key.n()).to_bytes_be();
    let mut wrapped = vec![0u8; 128 - raw.len()];
    wrapped.extend(raw);
    general_purpose::STANDARD.encode(wrapped)
}

pub fn rights_xml(token: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<adept:rights xmlns:adept="http://ns.adobe.com/adept">
  <adept:licenseToken>
    <adept:user>urn:uuid:6f2c1a44-0000-4000-8000-000000000001</adept:user>
    <adept:resource>urn:uuid:6f2c1a44-0000-4000-8000-000000000002</adept:resource>
    <adept:encryptedKey keyInfo="user">{}</adept:encryptedKey>
  </adept:licenseToken>
</adept:rights>"#,
        token
    )
}

pub fn encryption_xml(uris: &[String]) -> String {
    let blocks: String = uris
        .iter()
        .map(|uri| {
            format!(
                r#"
  <enc:EncryptedData>
    <enc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/>
    <enc:KeyInfo><resource xmlns="http://ns.adobe.com/adept">urn:uuid:6f2c1a44-0000-4000-8000-000000000002</resource></enc:KeyInfo>
    <enc:CipherData><enc:CipherReference URI="{}"/></enc:CipherData>
  </enc:EncryptedData>"#,
                uri
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<encryption xmlns="urn:oasis:names:tc:opendocument:xmlns:container" xmlns:enc="http://www.w3.org/2001/04/xmlenc#">{}
</encryption>"#,
        blocks
    )
}

/// Padding written after the deflate stream before encryption
#[derive(Debug, Clone, Copy)]
pub enum Padding {
    /// Fill with the fill count, as ADEPT does
    Standard,
    /// Fill with a fixed byte value
    Byte(u8),
}

pub fn encrypt_entry(book_key: &[u8; 16], content: &[u8], padding: Padding) -> Vec<u8> {
    let mut buffer = deflate_raw(content, Compression::default()).expect("deflate");
    let fill = 16 - buffer.len() % 16;
    let value = match padding {
        Padding::Standard => fill as u8,
        Padding::Byte(value) => value,
    };
    buffer.extend(std::iter::repeat(value).take(fill));
    let len = buffer.len();

    let iv: [u8; 16] = rand::random();
    let encrypted = cbc::Encryptor::<Aes128>::new_from_slices(book_key, &iv)
        .expect("cipher")
        .encrypt_padded_mut::<NoPadding>(&mut buffer, len)
        .expect("encrypt")
        .to_vec();

    [iv.to_vec(), encrypted].concat()
}

/// In-memory ADEPT book
pub struct EpubBuilder {
    pub book_key: [u8; 16],
    entries: Vec<(EntryHeader, Vec<u8>)>,
    uris: Vec<String>,
    rights: Option<String>,
    manifest: bool,
    mimetype: Option<EntryHeader>,
}

impl EpubBuilder {
    pub fn new() -> Self {
        let book_key: [u8; 16] = rand::random();
        Self {
            book_key,
            entries: Vec::new(),
            uris: Vec::new(),
            rights: Some(rights_xml(&wrap_book_key(&book_key))),
            manifest: true,
            mimetype: Some(EntryHeader::new("mimetype", CompressionMethod::Stored)),
        }
    }

    /// Add an entry that is encrypted and listed in the manifest
    pub fn encrypted(self, name: &str, content: &[u8]) -> Self {
        let payload = encrypt_entry(&self.book_key, content, Padding::Standard);
        self.encrypted_payload(name, name, payload)
    }

    /// Add an already-encrypted payload listed under `uri`
    pub fn encrypted_payload(mut self, name: &str, uri: &str, payload: Vec<u8>) -> Self {
        self.entries.push((EntryHeader::new(name, CompressionMethod::Stored), payload));
        self.uris.push(uri.to_string());
        self
    }

    /// Add an entry that is not encrypted
    pub fn plain(self, name: &str, content: &[u8], method: CompressionMethod) -> Self {
        self.plain_with_header(EntryHeader::new(name, method), content)
    }

    pub fn plain_with_header(mut self, header: EntryHeader, content: &[u8]) -> Self {
        self.entries.push((header, content.to_vec()));
        self
    }

    pub fn rights(mut self, xml: Option<String>) -> Self {
        self.rights = xml;
        self
    }

    pub fn without_manifest(mut self) -> Self {
        self.manifest = false;
        self
    }

    pub fn without_mimetype(mut self) -> Self {
        self.mimetype = None;
        self
    }

    /// Write `mimetype` with a custom header
    pub fn mimetype_header(mut self, header: EntryHeader) -> Self {
        self.mimetype = Some(header);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut writer = ContainerWriter::new(Compression::default());
        if let Some(header) = &self.mimetype {
            writer.write_entry(header, MIMETYPE).expect("mimetype");
        }
        writer
            .write_entry(
                &EntryHeader::new("META-INF/container.xml", CompressionMethod::Deflate),
                CONTAINER_XML.as_bytes(),
            )
            .expect("container.xml");
        if let Some(rights) = &self.rights {
            writer
                .write_entry(
                    &EntryHeader::new("META-INF/rights.xml", CompressionMethod::Deflate),
                    rights.as_bytes(),
                )
                .expect("rights.xml");
        }
        if self.manifest {
            writer
                .write_entry(
                    &EntryHeader::new("META-INF/encryption.xml", CompressionMethod::Deflate),
                    encryption_xml(&self.uris).as_bytes(),
                )
                .expect("encryption.xml");
        }
        for (header, content) in &self.entries {
            writer.write_entry(header, content).expect("entry");
        }
        writer.finish().expect("finish")
    }
}

/// Read an archive with the `zip` crate: name -> (method, content), plus names in order
pub fn read_with_zip_crate(data: &[u8]) -> (Vec<String>, BTreeMap<String, (zip::CompressionMethod, Vec<u8>)>) {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data)).expect("zip crate rejects archive");
    let mut order = Vec::new();
    let mut entries = BTreeMap::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).expect("entry");
        let mut content = Vec::new();
        file.read_to_end(&mut content).expect("read entry");
        order.push(file.name().to_string());
        entries.insert(file.name().to_string(), (file.compression(), content));
    }

    (order, entries)
}
