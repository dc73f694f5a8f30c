//! Sealed slot persistence for the wallet, the PIN hash and the security settings.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use zeroize::Zeroizing;

use super::{
    envelope::{self, Slot},
    error::{StorageError, StorageResult},
    pin::{validate_pin_format, PinHashCost, PinHasher},
    traits::{AtomicBlobStore, DeviceAuthenticator, DeviceKeystore},
    types::{AuthenticationOutcome, BiometricStatus, SecuritySettings, StoredWallet, WalletRecord},
};
use crate::{derivation::KeyMaterial, error::WalletError};

const WALLET_READ_REASON: &str = "Authenticate to access your wallet";

/// Device-bound persistence of the wallet secrets.
///
/// Each slot is serialized, sealed by the [`DeviceKeystore`] under slot specific
/// associated data, wrapped in a versioned envelope and written through the
/// [`AtomicBlobStore`]. A sealed value copied into another slot fails to open.
pub struct SecureCredentialStore {
    keystore: Arc<dyn DeviceKeystore>,
    blob_store: Arc<dyn AtomicBlobStore>,
    authenticator: Arc<dyn DeviceAuthenticator>,
    pin_hasher: PinHasher,
}

impl std::fmt::Debug for SecureCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureCredentialStore").finish_non_exhaustive()
    }
}

impl SecureCredentialStore {
    /// Creates a store over the platform primitives.
    #[must_use]
    pub fn new(
        keystore: Arc<dyn DeviceKeystore>,
        blob_store: Arc<dyn AtomicBlobStore>,
        authenticator: Arc<dyn DeviceAuthenticator>,
    ) -> Self {
        Self {
            keystore,
            blob_store,
            authenticator,
            pin_hasher: PinHasher::default(),
        }
    }

    /// Overrides the Argon2 cost used for new PIN hashes.
    #[must_use]
    pub fn with_pin_cost(mut self, cost: PinHashCost) -> Self {
        self.pin_hasher = PinHasher::new(cost);
        self
    }

    /// Persists a wallet, replacing any previous one.
    ///
    /// # Errors
    /// Returns `Persistence` if sealing or writing fails.
    pub fn store_wallet(
        &self,
        key_material: &KeyMaterial,
        subject_id: &str,
        email: &str,
    ) -> Result<StoredWallet, WalletError> {
        let now = now_millis();
        let wallet = StoredWallet {
            key_material: key_material.clone(),
            subject_id: subject_id.to_string(),
            email: email.to_string(),
            created_at: now,
            last_accessed_at: now,
        };
        self.write_wallet(&wallet)?;
        log::info!("stored wallet {}", wallet.address());
        Ok(wallet)
    }

    /// Reads the stored wallet.
    ///
    /// With `require_device_auth` the read is gated behind the platform prompt, and a
    /// successful read bumps `last_accessed_at`.
    ///
    /// # Errors
    /// Returns `Authentication` if the prompt is dismissed or fails, `Persistence` if the
    /// slot cannot be read, opened or validated.
    pub async fn get_stored_wallet(
        &self,
        require_device_auth: bool,
    ) -> Result<Option<StoredWallet>, WalletError> {
        if require_device_auth && !self.blob_exists(Slot::Wallet)? {
            return Ok(None);
        }

        if require_device_auth {
            match self.authenticator.authenticate(WALLET_READ_REASON).await {
                AuthenticationOutcome::Success => {}
                AuthenticationOutcome::Cancelled => {
                    return Err(WalletError::Authentication {
                        reason: "device authentication cancelled".to_string(),
                    })
                }
                AuthenticationOutcome::Failed { reason } => {
                    return Err(WalletError::Authentication { reason })
                }
            }
        }

        let Some(plaintext) = self.read_slot(Slot::Wallet)? else {
            return Ok(None);
        };
        let record: WalletRecord = serde_json::from_slice(&plaintext)
            .map_err(|err| Slot::Wallet.corrupted(err.to_string()))?;
        let mut wallet = record.to_wallet()?;

        if require_device_auth {
            wallet.last_accessed_at = now_millis();
            if let Err(err) = self.write_wallet(&wallet) {
                log::warn!("failed to update wallet access time: {err}");
            }
        }

        Ok(Some(wallet))
    }

    /// Whether a wallet slot exists. Does not open it.
    ///
    /// # Errors
    /// Returns `Persistence` if the blob store cannot be read.
    pub fn has_wallet(&self) -> Result<bool, WalletError> {
        Ok(self.blob_exists(Slot::Wallet)?)
    }

    /// Hashes and stores a PIN, replacing any previous one.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the PIN is not six digits, `Persistence` if hashing or
    /// writing fails.
    pub fn store_pin(&self, pin: &str) -> Result<(), WalletError> {
        validate_pin_format(pin)?;
        let hash = Zeroizing::new(self.pin_hasher.hash(pin)?);
        self.write_slot(Slot::Pin, hash.as_bytes())?;
        log::info!("stored pin");
        Ok(())
    }

    /// Checks `pin` against the stored hash. `false` when no PIN is set.
    ///
    /// # Errors
    /// Returns `Persistence` if the PIN slot cannot be read or is corrupted.
    pub fn verify_pin(&self, pin: &str) -> Result<bool, WalletError> {
        let Some(hash) = self.read_slot(Slot::Pin)? else {
            return Ok(false);
        };
        let hash =
            std::str::from_utf8(&hash).map_err(|err| Slot::Pin.corrupted(err.to_string()))?;
        Ok(self.pin_hasher.verify(pin, hash)?)
    }

    /// Whether a PIN hash is stored.
    ///
    /// # Errors
    /// Returns `Persistence` if the blob store cannot be read.
    pub fn has_pin_set(&self) -> Result<bool, WalletError> {
        Ok(self.blob_exists(Slot::Pin)?)
    }

    /// Persists the security settings.
    ///
    /// # Errors
    /// Returns `Persistence` if sealing or writing fails.
    pub fn store_security_settings(&self, settings: SecuritySettings) -> Result<(), WalletError> {
        let json = serde_json::to_vec(&settings)?;
        self.write_slot(Slot::Settings, &json)?;
        Ok(())
    }

    /// Reads the security settings, falling back to the defaults when the slot is absent
    /// or unreadable.
    #[must_use]
    pub fn security_settings(&self) -> SecuritySettings {
        match self.read_slot(Slot::Settings) {
            Ok(Some(json)) => serde_json::from_slice(&json).unwrap_or_else(|err| {
                log::warn!("ignoring unreadable security settings: {err}");
                SecuritySettings::default()
            }),
            Ok(None) => SecuritySettings::default(),
            Err(err) => {
                log::warn!("failed to read security settings: {err}");
                SecuritySettings::default()
            }
        }
    }

    /// Deletes every slot. Failures are logged and do not stop the remaining deletes.
    pub fn clear_all(&self) {
        for slot in Slot::ALL {
            if let Err(err) = self.blob_store.delete(slot.path().to_string()) {
                log::warn!("failed to clear the {} slot: {err}", slot.label());
            }
        }
        log::info!("cleared credential store");
    }

    /// Biometric capabilities of the device.
    pub async fn biometric_status(&self) -> BiometricStatus {
        self.authenticator.biometric_status().await
    }

    /// Prompts for biometrics. `false` when biometrics are unusable or the prompt fails.
    pub async fn authenticate_user(&self, reason: &str) -> bool {
        if !self.authenticator.biometric_status().await.is_usable() {
            return false;
        }
        match self.authenticator.authenticate(reason).await {
            AuthenticationOutcome::Success => true,
            AuthenticationOutcome::Cancelled => false,
            AuthenticationOutcome::Failed { reason } => {
                log::warn!("device authentication failed: {reason}");
                false
            }
        }
    }

    /// Prompts through the platform authenticator without the biometric precondition.
    pub(crate) async fn require_device_auth(&self, reason: &str) -> Result<(), WalletError> {
        match self.authenticator.authenticate(reason).await {
            AuthenticationOutcome::Success => Ok(()),
            AuthenticationOutcome::Cancelled => Err(WalletError::Authentication {
                reason: "device authentication cancelled".to_string(),
            }),
            AuthenticationOutcome::Failed { reason } => Err(WalletError::Authentication { reason }),
        }
    }

    fn write_wallet(&self, wallet: &StoredWallet) -> StorageResult<()> {
        let json = Zeroizing::new(
            serde_json::to_vec(&WalletRecord::from_wallet(wallet))
                .map_err(|err| StorageError::Encoding(err.to_string()))?,
        );
        self.write_slot(Slot::Wallet, &json)
    }

    fn blob_exists(&self, slot: Slot) -> StorageResult<bool> {
        Ok(self.blob_store.read(slot.path().to_string())?.is_some())
    }

    fn write_slot(&self, slot: Slot, plaintext: &[u8]) -> StorageResult<()> {
        let sealed = self
            .keystore
            .seal(slot.associated_data().to_vec(), plaintext.to_vec())?;
        let bytes = envelope::encode(slot, sealed, now_millis())?;
        self.blob_store.write_atomic(slot.path().to_string(), bytes)
    }

    fn read_slot(&self, slot: Slot) -> StorageResult<Option<Zeroizing<Vec<u8>>>> {
        let Some(bytes) = self.blob_store.read(slot.path().to_string())? else {
            return Ok(None);
        };
        let sealed = envelope::decode(slot, &bytes)?;
        let plaintext = self
            .keystore
            .open_sealed(slot.associated_data().to_vec(), sealed)?;
        Ok(Some(Zeroizing::new(plaintext)))
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PIN_SLOT, SETTINGS_SLOT};
    use crate::{
        derivation::{derive_private_key, key_material_from_private_key},
        storage::test_support::{InMemoryBlobStore, InMemoryKeystore, ScriptedAuthenticator},
    };
    use secrecy::SecretString;
    use starknet_core::types::Felt;

    use crate::storage::pin::TEST_PIN_COST;

    struct Fixture {
        store: SecureCredentialStore,
        keystore: Arc<InMemoryKeystore>,
        blobs: Arc<InMemoryBlobStore>,
        authenticator: Arc<ScriptedAuthenticator>,
    }

    fn fixture() -> Fixture {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let authenticator = Arc::new(ScriptedAuthenticator::new());
        let keystore = Arc::new(InMemoryKeystore::new());
        let store = SecureCredentialStore::new(keystore.clone(), blobs.clone(), authenticator.clone())
            .with_pin_cost(TEST_PIN_COST);
        Fixture {
            store,
            keystore,
            blobs,
            authenticator,
        }
    }

    fn key_material() -> KeyMaterial {
        let key = derive_private_key("1001", &SecretString::from("salt"));
        key_material_from_private_key(key, Felt::from(7_u64))
    }

    #[tokio::test]
    async fn test_wallet_round_trip_without_auth() {
        let f = fixture();
        assert!(f.store.get_stored_wallet(false).await.unwrap().is_none());
        assert!(!f.store.has_wallet().unwrap());

        let stored = f.store.store_wallet(&key_material(), "1001", "a@example.com").unwrap();
        let read = f.store.get_stored_wallet(false).await.unwrap().unwrap();
        assert_eq!(read, stored);
        assert_eq!(f.authenticator.prompts(), 0);
    }

    #[tokio::test]
    async fn test_gated_read_prompts_and_bumps_access_time() {
        let f = fixture();
        let stored = f.store.store_wallet(&key_material(), "1001", "a@example.com").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));

        let read = f.store.get_stored_wallet(true).await.unwrap().unwrap();
        assert_eq!(f.authenticator.prompts(), 1);
        assert!(read.last_accessed_at > stored.last_accessed_at);
        assert_eq!(read.created_at, stored.created_at);

        let persisted = f.store.get_stored_wallet(false).await.unwrap().unwrap();
        assert_eq!(persisted.last_accessed_at, read.last_accessed_at);
    }

    #[tokio::test]
    async fn test_gated_read_surfaces_dismissal() {
        let f = fixture();
        f.store.store_wallet(&key_material(), "1001", "a@example.com").unwrap();
        f.authenticator.push(AuthenticationOutcome::Cancelled);
        let err = f.store.get_stored_wallet(true).await.unwrap_err();
        assert!(matches!(err, WalletError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_gated_read_of_missing_wallet_does_not_prompt() {
        let f = fixture();
        assert!(f.store.get_stored_wallet(true).await.unwrap().is_none());
        assert_eq!(f.authenticator.prompts(), 0);
    }

    #[test]
    fn test_pin_is_never_persisted_in_clear() {
        let f = fixture();
        assert!(!f.store.has_pin_set().unwrap());
        assert!(!f.store.verify_pin("123456").unwrap());

        f.store.store_pin("123456").unwrap();
        assert!(f.store.has_pin_set().unwrap());

        let raw = f.blobs.raw(PIN_SLOT).unwrap();
        assert!(!raw.windows(6).any(|w| w == b"123456"));

        assert!(f.store.verify_pin("123456").unwrap());
        assert!(!f.store.verify_pin("654321").unwrap());
    }

    #[test]
    fn test_store_pin_rejects_bad_format() {
        let f = fixture();
        assert!(matches!(
            f.store.store_pin("12ab56"),
            Err(WalletError::InvalidInput { .. })
        ));
        assert!(!f.store.has_pin_set().unwrap());
    }

    #[test]
    fn test_sealed_values_are_bound_to_their_slot() {
        let f = fixture();
        f.store.store_pin("123456").unwrap();
        let pin_blob = f.blobs.raw(PIN_SLOT).unwrap();
        f.blobs.insert(SETTINGS_SLOT, pin_blob);
        // fails to open, so defaults are returned
        assert_eq!(f.store.security_settings(), SecuritySettings::default());
    }

    #[tokio::test]
    async fn test_reset_device_key_leaves_unreadable_slots() {
        let f = fixture();
        f.store.store_wallet(&key_material(), "1001", "a@example.com").unwrap();
        f.store.store_pin("123456").unwrap();

        f.keystore.reset();

        assert!(f.store.has_wallet().unwrap());
        assert!(matches!(
            f.store.get_stored_wallet(false).await,
            Err(WalletError::Persistence(StorageError::Crypto(_)))
        ));
        assert!(f.store.verify_pin("123456").is_err());
    }

    #[test]
    fn test_security_settings_round_trip() {
        let f = fixture();
        assert_eq!(f.store.security_settings(), SecuritySettings::default());
        let settings = SecuritySettings {
            biometric_enabled: false,
            pin_enabled: true,
        };
        f.store.store_security_settings(settings).unwrap();
        assert_eq!(f.store.security_settings(), settings);
    }

    #[tokio::test]
    async fn test_clear_all_is_best_effort() {
        let f = fixture();
        f.store.store_wallet(&key_material(), "1001", "a@example.com").unwrap();
        f.store.store_pin("123456").unwrap();
        f.blobs.fail_deletes_for(PIN_SLOT);

        f.store.clear_all();

        assert!(!f.store.has_wallet().unwrap());
        assert!(f.store.has_pin_set().unwrap());
    }

    #[tokio::test]
    async fn test_authenticate_user_requires_usable_biometrics() {
        let f = fixture();
        f.authenticator.set_status(BiometricStatus {
            available: true,
            enrolled: false,
        });
        assert!(!f.store.authenticate_user("test").await);
        assert_eq!(f.authenticator.prompts(), 0);

        f.authenticator.set_status(BiometricStatus {
            available: true,
            enrolled: true,
        });
        assert!(f.store.authenticate_user("test").await);
        f.authenticator.push(AuthenticationOutcome::Failed {
            reason: "lockout".to_string(),
        });
        assert!(!f.store.authenticate_user("test").await);
    }
}
