//! Error types for the PageLog core.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// Why an address could not be resolved to a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockNotFoundKind {
    /// The address is below the oldest block of the log.
    Underflow,
    /// The address is at or above the high address of the log.
    Overflow,
    /// The address falls into a block that was removed.
    Missing,
}

impl fmt::Display for BlockNotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Underflow => f.write_str("underflow"),
            Self::Overflow => f.write_str("overflow"),
            Self::Missing => f.write_str("missing"),
        }
    }
}

/// Errors that can occur in log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Block storage error.
    #[error("storage error: {0}")]
    Storage(#[from] pagelog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Stored bytes failed validation.
    #[error("data corruption: {message}")]
    DataCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// An address could not be resolved to a block.
    #[error("block not found for address {address} ({kind})")]
    BlockNotFound {
        /// The requested address.
        address: u64,
        /// Why the lookup failed.
        kind: BlockNotFoundKind,
    },

    /// A record does not fit into an empty file.
    #[error("loggable of {length} bytes exceeds the usable file size of {max} bytes")]
    TooBigLoggable {
        /// Encoded length of the record.
        length: u64,
        /// Usable bytes of an empty file.
        max: u64,
    },

    /// Configuration disagrees with persisted or shared state.
    #[error("configuration mismatch: {message}")]
    ConfigMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// Configuration is invalid on its own.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A background page write failed; the writer refuses further work.
    #[error("writer poisoned by failed page write: {reason}")]
    WriterPoisoned {
        /// The first failure observed.
        reason: String,
    },

    /// The log was switched to read-only after detecting corruption.
    #[error("log is read-only")]
    ReadOnly,

    /// The log was closed.
    #[error("log is closed")]
    Closed,

    /// Argument rejected by the log.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The directory held data although a clean one was expected.
    #[error("log directory is not clean: {location}")]
    DirectoryNotClean {
        /// Location of the block store.
        location: String,
    },

    /// Encryption is not enabled.
    #[error("encryption feature not enabled")]
    EncryptionNotEnabled,

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },

    /// The background flush runtime failed.
    #[error("flush runtime error: {message}")]
    Runtime {
        /// Description of the failure.
        message: String,
    },
}

impl LogError {
    /// Creates a data corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::DataCorruption {
            message: message.into(),
        }
    }

    /// Creates a block not found error.
    pub fn block_not_found(address: u64, kind: BlockNotFoundKind) -> Self {
        Self::BlockNotFound { address, kind }
    }

    /// Creates a configuration mismatch error.
    pub fn config_mismatch(message: impl Into<String>) -> Self {
        Self::ConfigMismatch {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a writer poisoned error.
    pub fn writer_poisoned(reason: impl Into<String>) -> Self {
        Self::WriterPoisoned {
            reason: reason.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an encryption not enabled error.
    pub fn encryption_not_enabled() -> Self {
        Self::EncryptionNotEnabled
    }

    /// Creates an invalid key size error.
    pub fn invalid_key_size(actual: usize, expected: usize) -> Self {
        Self::InvalidKeySize { expected, actual }
    }

    /// Creates a flush runtime error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Returns `true` if this error reports corrupted bytes.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::DataCorruption { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_block_not_found() {
        let err = LogError::block_not_found(4096, BlockNotFoundKind::Underflow);
        assert_eq!(
            err.to_string(),
            "block not found for address 4096 (underflow)"
        );
    }

    #[test]
    fn storage_error_converts() {
        let err: LogError = pagelog_storage::StorageError::Closed.into();
        assert!(matches!(err, LogError::Storage(_)));
        assert!(!err.is_corruption());
    }

    #[test]
    fn corruption_helper() {
        let err = LogError::corruption("bad page hash");
        assert!(err.is_corruption());
        assert_eq!(err.to_string(), "data corruption: bad page hash");
    }
}
