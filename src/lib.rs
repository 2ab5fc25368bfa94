//! Removes Adobe ADEPT DRM from EPUB books.
//!
//! Given the reader's RSA private key, the book key is unwrapped from
//! `META-INF/rights.xml`, every entry listed in `META-INF/encryption.xml` is
//! decrypted and inflated, and a DRM-free EPUB is written back out.
//!
//! Everything happens in memory; callers supply the key and book bytes and
//! get the new book's bytes back.

pub mod config;
pub mod container;
pub mod crypto;
pub mod epub;
pub mod error;
pub mod pipeline;

pub use config::DecryptConfig;
pub use error::{LiberatorError, Result};
pub use pipeline::{
    decrypt_epub, decrypt_epub_blocking, decrypt_epub_with_config, inspect, is_protected,
    ContainerReport, EntryReport, EpubLiberator,
};
