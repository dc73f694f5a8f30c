//! Primitives the host platform supplies to the credential store.
//!
//! On iOS these map to the Secure Enclave / Keychain, a file in the app container
//! and `LocalAuthentication`; on Android to the Keystore, app-private files and
//! `BiometricPrompt`.

use async_trait::async_trait;

use super::error::StorageResult;
use super::types::{AuthenticationOutcome, BiometricStatus};

/// Seals slot values under a key that never leaves the device.
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait DeviceKeystore: Send + Sync {
    /// Encrypts `plaintext`, binding it to `associated_data`.
    ///
    /// # Errors
    /// `Crypto` when the key is unavailable or sealing fails.
    fn seal(&self, associated_data: Vec<u8>, plaintext: Vec<u8>) -> StorageResult<Vec<u8>>;

    /// Decrypts a value produced by [`DeviceKeystore::seal`].
    ///
    /// Opening with different associated data, or after the device key was reset, must fail.
    ///
    /// # Errors
    /// `Crypto` when the value does not authenticate.
    fn open_sealed(&self, associated_data: Vec<u8>, ciphertext: Vec<u8>) -> StorageResult<Vec<u8>>;
}

/// Holds one blob per slot path.
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait AtomicBlobStore: Send + Sync {
    /// The blob at `path`, `None` when nothing was written there.
    ///
    /// # Errors
    /// `BlobStore` on I/O failure.
    fn read(&self, path: String) -> StorageResult<Option<Vec<u8>>>;

    /// Replaces the blob at `path`. A reader sees the old or the new bytes, never a mix.
    ///
    /// # Errors
    /// `BlobStore` on I/O failure.
    fn write_atomic(&self, path: String, bytes: Vec<u8>) -> StorageResult<()>;

    /// Removes the blob at `path`; removing a missing blob succeeds.
    ///
    /// # Errors
    /// `BlobStore` on I/O failure.
    fn delete(&self, path: String) -> StorageResult<()>;
}

/// User-presence check: biometrics with the device passcode as fallback.
#[async_trait]
pub trait DeviceAuthenticator: Send + Sync {
    /// Whether biometric hardware exists and has an enrolled identity. Missing hardware
    /// is `available: false`, not an error.
    async fn biometric_status(&self) -> BiometricStatus;

    /// Shows the platform prompt with `reason` and waits for the user.
    async fn authenticate(&self, reason: &str) -> AuthenticationOutcome;
}
