//! PIN hashing.
//!
//! PINs are hashed with Argon2id under a random per-PIN salt and a fixed application
//! pepper, and stored as a PHC string. Verification recomputes the hash with the stored
//! parameters and compares the full output.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::{rngs::OsRng, RngCore};

use super::{
    envelope::Slot,
    error::{StorageError, StorageResult},
};
use crate::error::WalletError;

/// Number of digits of a PIN.
pub const PIN_LENGTH: usize = 6;

const PIN_PEPPER: &[u8] = b"khalkos:pin-pepper:v1";

/// Argon2 cost parameters used for new PIN hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinHashCost {
    /// Memory in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for PinHashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Checks that `pin` is exactly six ASCII digits.
///
/// # Errors
/// Returns `InvalidInput` otherwise.
pub fn validate_pin_format(pin: &str) -> Result<(), WalletError> {
    if pin.len() == PIN_LENGTH && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(WalletError::invalid_input(
            "pin",
            format!("expected {PIN_LENGTH} digits"),
        ))
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PinHasher {
    cost: PinHashCost,
}

impl PinHasher {
    pub(crate) const fn new(cost: PinHashCost) -> Self {
        Self { cost }
    }

    fn argon2(&self) -> StorageResult<Argon2<'static>> {
        let params = Params::new(
            self.cost.memory_kib,
            self.cost.iterations,
            self.cost.parallelism,
            None,
        )
        .map_err(|err| StorageError::Crypto(err.to_string()))?;
        Argon2::new_with_secret(PIN_PEPPER, Algorithm::Argon2id, Version::V0x13, params)
            .map_err(|err| StorageError::Crypto(err.to_string()))
    }

    /// Hashes `pin` into a PHC string.
    pub(crate) fn hash(&self, pin: &str) -> StorageResult<String> {
        let mut salt_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        let hash = self
            .argon2()?
            .hash_password(pin.as_bytes(), &salt)
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        Ok(hash.to_string())
    }

    /// Verifies `pin` against a stored PHC string.
    ///
    /// A stored value that does not parse is an error, a mismatch is `Ok(false)`.
    pub(crate) fn verify(&self, pin: &str, stored: &str) -> StorageResult<bool> {
        let parsed = PasswordHash::new(stored).map_err(|err| Slot::Pin.corrupted(err.to_string()))?;
        match self.argon2()?.verify_password(pin.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(StorageError::Crypto(err.to_string())),
        }
    }
}

#[cfg(test)]
pub(crate) const TEST_PIN_COST: PinHashCost = PinHashCost {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};
