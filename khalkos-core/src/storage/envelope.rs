//! Slot layout and the CBOR envelope written to each slot blob.

use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};

/// Blob path of the wallet slot.
pub const WALLET_SLOT: &str = "khalkos_starknet_wallet_data";
/// Blob path of the PIN slot.
pub const PIN_SLOT: &str = "khalkos_user_pin";
/// Blob path of the security settings slot.
pub const SETTINGS_SLOT: &str = "khalkos_security_settings";

const ENVELOPE_VERSION: u32 = 1;

/// One of the persisted slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Wallet,
    Pin,
    Settings,
}

impl Slot {
    pub(crate) const ALL: [Self; 3] = [Self::Wallet, Self::Pin, Self::Settings];

    pub(crate) const fn path(self) -> &'static str {
        match self {
            Self::Wallet => WALLET_SLOT,
            Self::Pin => PIN_SLOT,
            Self::Settings => SETTINGS_SLOT,
        }
    }

    pub(crate) const fn label(self) -> &'static str {
        match self {
            Self::Wallet => "wallet",
            Self::Pin => "pin",
            Self::Settings => "settings",
        }
    }

    /// Associated data the keystore binds this slot's ciphertext to.
    pub(crate) const fn associated_data(self) -> &'static [u8] {
        match self {
            Self::Wallet => b"khalkos:slot:wallet",
            Self::Pin => b"khalkos:slot:pin",
            Self::Settings => b"khalkos:slot:settings",
        }
    }

    pub(crate) fn corrupted(self, reason: impl Into<String>) -> StorageError {
        StorageError::CorruptedSlot {
            slot: self.label().to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SlotEnvelope {
    version: u32,
    slot: String,
    sealed: Vec<u8>,
    written_at: u64,
}

/// Wraps keystore output for `slot`.
pub(crate) fn encode(slot: Slot, sealed: Vec<u8>, written_at: u64) -> StorageResult<Vec<u8>> {
    let envelope = SlotEnvelope {
        version: ENVELOPE_VERSION,
        slot: slot.label().to_string(),
        sealed,
        written_at,
    };
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(&envelope, &mut bytes)
        .map_err(|err| StorageError::Encoding(err.to_string()))?;
    Ok(bytes)
}

/// Returns the keystore output of a blob read from `slot`.
///
/// A blob written for another slot is reported as corrupted before the keystore is
/// ever asked to open it.
pub(crate) fn decode(slot: Slot, bytes: &[u8]) -> StorageResult<Vec<u8>> {
    let envelope: SlotEnvelope = ciborium::de::from_reader(bytes)
        .map_err(|err| StorageError::InvalidEnvelope(err.to_string()))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(StorageError::UnsupportedEnvelopeVersion {
            found: envelope.version,
            supported: ENVELOPE_VERSION,
        });
    }
    if envelope.slot != slot.label() {
        return Err(slot.corrupted(format!("holds the {} slot", envelope.slot)));
    }
    Ok(envelope.sealed)
}
