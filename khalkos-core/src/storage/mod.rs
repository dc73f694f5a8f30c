//! Secure credential store: sealed slots for the wallet, the PIN hash and the
//! security settings, on top of platform keystore and blob store primitives.

mod credential_store;
pub(crate) mod envelope;
pub mod error;
pub mod pin;
pub mod traits;
pub mod types;

pub use credential_store::SecureCredentialStore;
pub use envelope::{PIN_SLOT, SETTINGS_SLOT, WALLET_SLOT};
pub use error::{StorageError, StorageResult};
pub use pin::{validate_pin_format, PinHashCost, PIN_LENGTH};
pub use traits::{AtomicBlobStore, DeviceAuthenticator, DeviceKeystore};
pub use types::{AuthenticationOutcome, BiometricStatus, SecuritySettings, StoredWallet};

pub(crate) use credential_store::now_millis;

#[cfg(test)]
pub(crate) mod test_support;
