//! Media Vault - Error Types

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    // ═══════════════════════════════════════════════════════════════
    // CRYPTO ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Unknown encryption method: {0}")]
    UnknownMethod(u16),

    // ═══════════════════════════════════════════════════════════════
    // FORMAT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Block {index} out of bounds (block count: {count})")]
    BlockOutOfBounds { index: u64, count: u64 },

    #[error("Seek position {pos} out of bounds (size: {size})")]
    SeekOutOfBounds { pos: i128, size: u64 },

    #[error("Stream size exceeded: declared {declared} bytes")]
    StreamOverflow { declared: u64 },

    #[error("Stream incomplete: declared {declared} bytes, written {written}")]
    StreamIncomplete { declared: u64, written: u64 },

    // ═══════════════════════════════════════════════════════════════
    // VAULT ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Vault already in use by another process: {0}")]
    VaultInUse(String),

    #[error("Invalid tag name: {0:?}")]
    InvalidTagName(String),

    #[error("Index corrupted: {0}")]
    IndexCorrupted(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // ═══════════════════════════════════════════════════════════════
    // SERIALIZATION ERRORS
    // ═══════════════════════════════════════════════════════════════

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl VaultError {
    /// Check if this error comes from malformed persisted data
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            VaultError::InvalidFormat(_)
                | VaultError::UnknownMethod(_)
                | VaultError::DecryptionFailed(_)
                | VaultError::BlockOutOfBounds { .. }
                | VaultError::IndexCorrupted(_)
        )
    }

    /// Check if this is a disk I/O failure
    pub fn is_io(&self) -> bool {
        matches!(self, VaultError::IoError(_))
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::SerializationError(e.to_string())
    }
}

impl From<VaultError> for std::io::Error {
    fn from(e: VaultError) -> Self {
        use std::io::ErrorKind;

        match e {
            VaultError::IoError(inner) => inner,
            VaultError::SeekOutOfBounds { .. } => {
                std::io::Error::new(ErrorKind::InvalidInput, e.to_string())
            }
            other => std::io::Error::new(ErrorKind::InvalidData, other.to_string()),
        }
    }
}
