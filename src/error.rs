use thiserror_no_std::Error;

use crate::storage::Address;

/// Error types for storage layout and configuration
///
/// Only configuration problems are errors. Checksum mismatches are reported as
/// a flag on [`Readback`](crate::endurance::Readback) and policy rejections in
/// the time series are a plain `false`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested structure does not fit in the store
    #[error("Insufficient memory: {required} bytes at {base} exceed store size {available}")]
    InsufficientMemory {
        /// First address of the structure
        base: Address,
        /// Bytes needed by the structure
        required: u32,
        /// Total size of the store
        available: u16,
    },

    /// A structure parameter is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Record is larger than the scratch buffers used for I/O
    #[error("Record of {size} bytes exceeds the {max} byte limit")]
    RecordTooLarge {
        /// Size of the record type
        size: usize,
        /// Largest supported record
        max: usize,
    },

    /// Stored checksum does not match the data read back
    #[error("Checksum mismatch, stored data is corrupted")]
    Corrupted,

    /// Configuration blob could not be decoded
    #[error("Config decode failed: {0}")]
    Config(postcard::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
