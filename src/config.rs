//! Run configuration
//!
//! # Settings
//! - `workers`: number of concurrent decode workers (default: 1)
//! - `compression_level`: deflate level 0-9 for rebuilt entries (default: flate2's default)
//! - `strict_padding`: reject padding bytes outside 1..=16 (default: true)

use crate::error::{LiberatorError, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on decode workers
pub const MAX_WORKERS: usize = 64;

/// Highest deflate level accepted
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Decryption configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecryptConfig {
    /// Concurrent decode workers
    pub workers: usize,

    /// Deflate level for rebuilt entries, `None` for the library default
    pub compression_level: Option<u32>,

    /// Reject a padding byte of 0 or greater than the block size
    pub strict_padding: bool,
}

impl Default for DecryptConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            compression_level: None,
            strict_padding: true,
        }
    }
}

impl DecryptConfig {
    /// Set the number of decode workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the deflate level used when rebuilding entries
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = Some(level);
        self
    }

    /// Trust the padding byte as-is, as older tooling did
    pub fn with_lenient_padding(mut self) -> Self {
        self.strict_padding = false;
        self
    }

    /// Check that every setting is within range
    ///
    /// # Errors
    /// - InvalidConfiguration if `workers` is 0 or above [`MAX_WORKERS`]
    /// - InvalidConfiguration if `compression_level` is above 9
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(LiberatorError::InvalidConfiguration(format!(
                "workers must be between 1 and {}, got {}",
                MAX_WORKERS, self.workers
            )));
        }

        if let Some(level) = self.compression_level {
            if level > MAX_COMPRESSION_LEVEL {
                return Err(LiberatorError::InvalidConfiguration(format!(
                    "compression level must be between 0 and {}, got {}",
                    MAX_COMPRESSION_LEVEL, level
                )));
            }
        }

        Ok(())
    }

    /// Deflate level as a flate2 setting
    pub fn compression(&self) -> flate2::Compression {
        match self.compression_level {
            Some(level) => flate2::Compression::new(level),
            None => flate2::Compression::default(),
        }
    }
}
