//! Errors raised below the wallet API, by the slots and the platform primitives.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failure reading or writing a credential slot.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
pub enum StorageError {
    /// The platform blob store failed to read, write or delete.
    #[error("blob store error: {0}")]
    BlobStore(String),

    /// Sealing, opening or PIN hashing failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A slot value could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The blob is not a slot envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// The blob was written by a newer version of the store.
    #[error("envelope version {found} is not supported (expected {supported})")]
    UnsupportedEnvelopeVersion {
        /// Version found in the blob.
        found: u32,
        /// Version this build reads.
        supported: u32,
    },

    /// The slot opened but does not hold a valid record.
    #[error("corrupted {slot} slot: {reason}")]
    CorruptedSlot {
        /// Name of the slot.
        slot: String,
        /// What failed validation.
        reason: String,
    },

    /// A host callback failed in a way the bindings could not map.
    #[cfg(feature = "ffi")]
    #[error("unexpected uniffi callback error: {0}")]
    UnexpectedUniFFICallbackError(String),
}

#[cfg(feature = "ffi")]
impl From<uniffi::UnexpectedUniFFICallbackError> for StorageError {
    fn from(error: uniffi::UnexpectedUniFFICallbackError) -> Self {
        Self::UnexpectedUniFFICallbackError(error.reason)
    }
}
