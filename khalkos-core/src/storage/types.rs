//! Records persisted in the credential store slots.

use serde::{Deserialize, Serialize};
use starknet_core::types::Felt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{envelope::Slot, error::StorageResult};
use crate::{
    address::felt_to_hex,
    derivation::{KeyMaterial, PrivateKey},
};

/// A wallet as persisted on the device: key material plus identity metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredWallet {
    /// Keys and address of the account.
    pub key_material: KeyMaterial,
    /// Identity subject the keys were derived from.
    pub subject_id: String,
    /// Email of the identity at creation time.
    pub email: String,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds of the last device-authenticated read.
    pub last_accessed_at: u64,
}

impl StoredWallet {
    /// Canonical padded address.
    #[must_use]
    pub fn address(&self) -> String {
        self.key_material.address_hex()
    }
}

/// JSON shape of the wallet slot. Wiped from memory on drop.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WalletRecord {
    private_key: String,
    public_key: String,
    address: String,
    #[serde(default)]
    constructor_calldata: Vec<String>,
    subject_id: String,
    email: String,
    created_at: u64,
    last_accessed_at: u64,
}

impl WalletRecord {
    pub(crate) fn from_wallet(wallet: &StoredWallet) -> Self {
        let material = &wallet.key_material;
        Self {
            private_key: material.private_key.to_hex().to_string(),
            public_key: felt_to_hex(&material.public_key),
            address: felt_to_hex(&material.address),
            constructor_calldata: material.constructor_calldata.iter().map(felt_to_hex).collect(),
            subject_id: wallet.subject_id.clone(),
            email: wallet.email.clone(),
            created_at: wallet.created_at,
            last_accessed_at: wallet.last_accessed_at,
        }
    }

    /// Validates the record and rebuilds the wallet.
    ///
    /// Every string must be present, keys and address must be `0x` hex, and the public
    /// key must match the private key.
    pub(crate) fn to_wallet(&self) -> StorageResult<StoredWallet> {
        let corrupted = |reason: &str| Slot::Wallet.corrupted(reason);

        for (field, value) in [
            ("subjectId", &self.subject_id),
            ("email", &self.email),
            ("privateKey", &self.private_key),
            ("publicKey", &self.public_key),
            ("address", &self.address),
        ] {
            if value.trim().is_empty() {
                return Err(corrupted(&format!("missing {field}")));
            }
        }

        let private_key =
            PrivateKey::from_hex(&self.private_key).map_err(|_| corrupted("invalid privateKey"))?;
        let public_key = hex_felt(&self.public_key).ok_or_else(|| corrupted("invalid publicKey"))?;
        let address = hex_felt(&self.address).ok_or_else(|| corrupted("invalid address"))?;
        let constructor_calldata = if self.constructor_calldata.is_empty() {
            vec![public_key]
        } else {
            self.constructor_calldata
                .iter()
                .map(|value| hex_felt(value))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| corrupted("invalid constructorCalldata"))?
        };

        if starknet_crypto::get_public_key(&private_key.to_felt()) != public_key {
            return Err(corrupted("publicKey does not match privateKey"));
        }

        Ok(StoredWallet {
            key_material: KeyMaterial {
                private_key,
                public_key,
                address,
                constructor_calldata,
            },
            subject_id: self.subject_id.clone(),
            email: self.email.clone(),
            created_at: self.created_at,
            last_accessed_at: self.last_accessed_at,
        })
    }
}

fn hex_felt(value: &str) -> Option<Felt> {
    value
        .starts_with("0x")
        .then(|| Felt::from_hex(value).ok())
        .flatten()
}

/// User-chosen gating policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct SecuritySettings {
    /// Offer the biometric prompt on unlock.
    pub biometric_enabled: bool,
    /// Require the PIN on unlock.
    pub pin_enabled: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            biometric_enabled: true,
            pin_enabled: true,
        }
    }
}

/// Biometric capabilities of the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct BiometricStatus {
    /// Biometric hardware is present.
    pub available: bool,
    /// At least one biometric is enrolled.
    pub enrolled: bool,
}

impl BiometricStatus {
    /// Whether a biometric prompt can be shown.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.available && self.enrolled
    }
}

/// Result of a platform authentication prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    /// The user authenticated.
    Success,
    /// The user dismissed the prompt.
    Cancelled,
    /// The platform rejected the attempt or could not show the prompt.
    Failed {
        /// Platform-provided reason.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use crate::derivation::{derive_private_key, key_material_from_private_key};
    use secrecy::SecretString;

    fn wallet() -> StoredWallet {
        let key = derive_private_key("1001", &SecretString::from("salt"));
        StoredWallet {
            key_material: key_material_from_private_key(key, Felt::from(7_u64)),
            subject_id: "1001".to_string(),
            email: "a@example.com".to_string(),
            created_at: 1_700_000_000_000,
            last_accessed_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_record_round_trip_preserves_wallet() {
        let wallet = wallet();
        let json = serde_json::to_vec(&WalletRecord::from_wallet(&wallet)).unwrap();
        let record: WalletRecord = serde_json::from_slice(&json).unwrap();
        assert_eq!(record.to_wallet().unwrap(), wallet);
    }

    #[test]
    fn test_record_uses_camel_case_keys() {
        let json = serde_json::to_value(WalletRecord::from_wallet(&wallet())).unwrap();
        for key in ["privateKey", "publicKey", "address", "subjectId", "createdAt", "lastAccessedAt"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_record_rejects_unprefixed_address() {
        let mut json = serde_json::to_value(WalletRecord::from_wallet(&wallet())).unwrap();
        json["address"] = serde_json::Value::String("1234".to_string());
        let record: WalletRecord = serde_json::from_value(json).unwrap();
        assert!(matches!(record.to_wallet(), Err(StorageError::CorruptedSlot { .. })));
    }

    #[test]
    fn test_record_rejects_mismatched_public_key() {
        let mut json = serde_json::to_value(WalletRecord::from_wallet(&wallet())).unwrap();
        json["publicKey"] = serde_json::Value::String("0x1".to_string());
        let record: WalletRecord = serde_json::from_value(json).unwrap();
        assert!(record.to_wallet().is_err());
    }

    #[test]
    fn test_security_settings_default_to_enabled() {
        let settings = SecuritySettings::default();
        assert!(settings.biometric_enabled && settings.pin_enabled);
    }
}
