//! Error types for EPUB Liberator
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by the stage of the run that produces them (container,
//! rights/key recovery, entry decoding, rebuilding) so callers can tell a
//! book without DRM apart from a wrong key or a damaged file.
//!
//! Every failure is terminal for a run. Nothing here is retryable: running the
//! same cryptographic computation over the same bytes cannot change the outcome.

use thiserror::Error;

/// Result type alias using our LiberatorError type
pub type Result<T> = std::result::Result<T, LiberatorError>;

/// Main error type for EPUB Liberator
///
/// A run produces either a complete output buffer or exactly one of these,
/// carrying the offending entry name where one applies.
#[derive(Error, Debug)]
pub enum LiberatorError {
    // ===== DRM Detection =====

    /// `META-INF/rights.xml` or `META-INF/encryption.xml` is missing
    #[error("Container is not ADEPT protected (missing {missing})")]
    NotProtected {
        /// Reserved entry that was not found
        missing: String,
    },

    /// Rights token has an unexpected encoded length
    #[error("Not a supported ADEPT book: encrypted key is {length} characters, expected {expected}")]
    NotSupportedScheme {
        length: usize,
        expected: usize,
    },

    // ===== Key Recovery =====

    /// RSA-recovered blob failed the sentinel check
    #[error("Could not decrypt book key: wrong private key")]
    WrongKey,

    /// Private key blob is not a recognised RSA encoding
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// `META-INF/rights.xml` could not be parsed
    #[error("Malformed rights token: {0}")]
    MalformedRights(String),

    /// `META-INF/encryption.xml` could not be parsed
    #[error("Malformed encryption manifest: {0}")]
    MalformedManifest(String),

    // ===== Entry Decoding =====

    /// Cipher, padding or inflate failure on a single entry
    #[error("Failed to decode '{entry_name}': {cause}")]
    DecodeFailed {
        entry_name: String,
        cause: String,
    },

    // ===== Container Errors =====

    /// Source is not a readable archive
    #[error("Invalid container: {0}")]
    InvalidContainer(String),

    /// A single entry's stored payload could not be read
    #[error("Corrupt entry '{entry_name}': {reason}")]
    CorruptEntry {
        entry_name: String,
        reason: String,
    },

    /// Output archive could not be constructed
    #[error("Failed to write output container: {0}")]
    WriteFailed(String),

    // ===== Configuration =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ===== General Errors =====

    /// A worker observed the cancellation signal
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<rsa::pkcs1::Error> for LiberatorError {
    fn from(err: rsa::pkcs1::Error) -> Self {
        LiberatorError::InvalidPrivateKey(format!("PKCS#1: {}", err))
    }
}

impl From<pkcs8::Error> for LiberatorError {
    fn from(err: pkcs8::Error) -> Self {
        LiberatorError::InvalidPrivateKey(format!("PKCS#8: {}", err))
    }
}

// Helper methods for creating common errors
impl LiberatorError {
    /// Create a DecodeFailed error for an entry
    pub fn decode_failed<N: Into<String>, C: std::fmt::Display>(entry_name: N, cause: C) -> Self {
        LiberatorError::DecodeFailed {
            entry_name: entry_name.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a CorruptEntry error for an entry
    pub fn corrupt_entry<N: Into<String>, R: Into<String>>(entry_name: N, reason: R) -> Self {
        LiberatorError::CorruptEntry {
            entry_name: entry_name.into(),
            reason: reason.into(),
        }
    }

    /// Create a WriteFailed error with a message
    pub fn write_failed<S: Into<String>>(message: S) -> Self {
        LiberatorError::WriteFailed(message.into())
    }

    /// Create an InvalidContainer error with a message
    pub fn invalid_container<S: Into<String>>(message: S) -> Self {
        LiberatorError::InvalidContainer(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        LiberatorError::InternalError(message.into())
    }

    /// Check if error is related to DRM/crypto operations
    pub fn is_crypto_error(&self) -> bool {
        matches!(
            self,
            LiberatorError::NotSupportedScheme { .. }
                | LiberatorError::WrongKey
                | LiberatorError::InvalidPrivateKey(_)
                | LiberatorError::MalformedRights(_)
                | LiberatorError::MalformedManifest(_)
                | LiberatorError::DecodeFailed { .. }
        )
    }

    /// Check if error is related to reading or writing the archive itself
    pub fn is_container_error(&self) -> bool {
        matches!(
            self,
            LiberatorError::InvalidContainer(_)
                | LiberatorError::CorruptEntry { .. }
                | LiberatorError::WriteFailed(_)
        )
    }

    /// Name of the entry the error is about, if any
    pub fn entry_name(&self) -> Option<&str> {
        match self {
            LiberatorError::DecodeFailed { entry_name, .. }
            | LiberatorError::CorruptEntry { entry_name, .. } => Some(entry_name),
            _ => None,
        }
    }

    /// Get user-friendly error message suitable for display
    ///
    /// This returns actionable error messages that can be shown to end users,
    /// with technical details omitted where appropriate.
    pub fn user_message(&self) -> String {
        match self {
            LiberatorError::NotProtected { .. } => {
                "This book is DRM-free, there is nothing to remove.".to_string()
            }
            LiberatorError::NotSupportedScheme { .. } => {
                "This book is not protected with Adobe ADEPT and cannot be decrypted.".to_string()
            }
            LiberatorError::WrongKey => {
                "The supplied key does not unlock this book. Make sure the key belongs to the Adobe ID the book was downloaded with.".to_string()
            }
            LiberatorError::InvalidPrivateKey(_) => {
                "The key file could not be read. Expected an RSA private key (.der or .pem).".to_string()
            }
            LiberatorError::DecodeFailed { entry_name, .. } => {
                format!("The book is damaged: '{}' could not be decrypted.", entry_name)
            }
            _ => self.to_string(),
        }
    }
}
