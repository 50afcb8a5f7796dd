//! Error types for rkimage

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, RkImageError>;

/// Errors raised while packing or unpacking an image
#[derive(Debug, Error)]
pub enum RkImageError {
    /// I/O failure on a named file
    #[error("{}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure on an in-memory reader or writer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing required component: {0}")]
    MissingComponent(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("chip type not supported: {0}")]
    UnsupportedChip(String),

    #[error("too many components: {count} (max {max})")]
    TooManyComponents { count: usize, max: usize },

    #[error("{name} too large: {size} bytes (max {max})")]
    ComponentTooLarge { name: String, size: u64, max: u64 },

    #[error("image too large: {size} bytes (max {max})")]
    ImageTooLarge { size: u64, max: u64 },

    #[error("scratch buffer too small: need {needed} bytes, have {capacity}")]
    ScratchTooSmall { needed: usize, capacity: usize },

    #[error("invalid magic: expected {expected}, found {found}")]
    InvalidMagic { expected: String, found: String },

    #[error("truncated {what}: need {needed} bytes, got {got}")]
    Truncated {
        what: String,
        needed: u64,
        got: u64,
    },

    #[error("unsupported ELF file {}: {reason}", path.display())]
    UnsupportedElf { path: PathBuf, reason: String },

    #[error("CRC mismatch: stored 0x{stored:08x}, calculated 0x{calculated:08x}")]
    CrcMismatch { stored: u32, calculated: u32 },

    #[error("hash mismatch: stored {stored}, calculated {calculated}")]
    HashMismatch { stored: String, calculated: String },

    #[error("invalid image data: {0}")]
    InvalidImageData(String),

    #[error("failed to parse config: {0}")]
    Config(#[from] toml::de::Error),
}

impl RkImageError {
    /// Wrap an I/O error with the path it happened on
    pub fn file(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::File {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid_magic(expected: impl AsRef<[u8]>, found: impl AsRef<[u8]>) -> Self {
        Self::InvalidMagic {
            expected: String::from_utf8_lossy(expected.as_ref()).into_owned(),
            found: String::from_utf8_lossy(found.as_ref()).into_owned(),
        }
    }

    pub fn truncated(what: impl Into<String>, needed: u64, got: u64) -> Self {
        Self::Truncated {
            what: what.into(),
            needed,
            got,
        }
    }

    pub fn unsupported_elf(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::UnsupportedElf {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn invalid_image_data(msg: impl Into<String>) -> Self {
        Self::InvalidImageData(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn crc_mismatch(stored: u32, calculated: u32) -> Self {
        Self::CrcMismatch { stored, calculated }
    }

    pub fn hash_mismatch(stored: &[u8], calculated: &[u8]) -> Self {
        Self::HashMismatch {
            stored: hex::encode(stored),
            calculated: hex::encode(calculated),
        }
    }
}

/// Attach a path to `std::io::Result` values
pub trait IoResultExt<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| RkImageError::file(path, e))
    }
}
