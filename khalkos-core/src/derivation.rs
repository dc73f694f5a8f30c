//! Deterministic key derivation for identity-bound Starknet accounts.
//!
//! Signing in with the same identity always yields the same account: there is no seed
//! phrase, the identity login *is* the recovery path. Everything in this module is a
//! pure function of the identity subject, the application salt and the account class
//! hash.
//!
//! ```text
//! digest      = SHA256(sub || "-" || app_salt)
//! private_key = (digest mod (n - 1)) + 1          n = STARK curve order
//! public_key  = stark_key(private_key · G)
//! address     = contract_address(salt = public_key, class_hash,
//!                                calldata = [public_key], deployer = 0)
//! ```

use ruint::{aliases::U256, uint};
use secrecy::{ExposeSecret, SecretBox, SecretString};
use sha2::{Digest, Sha256};
use starknet_core::{types::Felt, utils::get_contract_address};
use zeroize::Zeroizing;

use crate::{address::felt_to_hex, error::WalletError, identity::IdentityClaims};

/// Order of the STARK curve generator.
pub const STARK_CURVE_ORDER: U256 =
    uint!(0x0800000000000010ffffffffffffffffb781126dcae7b2321e66a241adc64d2f_U256);

/// A Starknet private key. The scalar is always in `[1, n - 1]`.
pub struct PrivateKey(SecretBox<[u8; 32]>);

impl PrivateKey {
    /// Builds a private key from big-endian bytes.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the scalar is zero or not below the curve order.
    pub fn from_bytes_be(bytes: [u8; 32]) -> Result<Self, WalletError> {
        let scalar = U256::from_be_bytes(bytes);
        if scalar.is_zero() || scalar >= STARK_CURVE_ORDER {
            return Err(WalletError::invalid_input(
                "private_key",
                "scalar outside of [1, n - 1]",
            ));
        }
        Ok(Self(SecretBox::new(Box::new(bytes))))
    }

    /// Parses a `0x`-prefixed hex private key, as persisted in the wallet slot.
    ///
    /// # Errors
    /// Returns `InvalidInput` for malformed hex or an out-of-range scalar.
    pub fn from_hex(value: &str) -> Result<Self, WalletError> {
        let digits = value
            .trim()
            .strip_prefix("0x")
            .ok_or_else(|| WalletError::invalid_input("private_key", "missing 0x prefix"))?;
        if digits.is_empty() || digits.len() > 64 {
            return Err(WalletError::invalid_input("private_key", "expected 1..=64 hex digits"));
        }
        let padded = Zeroizing::new(format!("{digits:0>64}"));
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(padded.as_str(), &mut bytes)
            .map_err(|e| WalletError::invalid_input("private_key", e.to_string()))?;
        Self::from_bytes_be(bytes)
    }

    /// Returns the scalar as a field element. Treat the result as sensitive.
    #[must_use]
    pub fn to_felt(&self) -> Felt {
        Felt::from_bytes_be(self.0.expose_secret())
    }

    /// Returns the padded hex rendering. Treat the result as sensitive.
    #[must_use]
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("0x{}", hex::encode(self.0.expose_secret())))
    }

    pub(crate) fn scalar(&self) -> U256 {
        U256::from_be_bytes(*self.0.expose_secret())
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self(SecretBox::new(Box::new(*self.0.expose_secret())))
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

impl PartialEq for PrivateKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.expose_secret() == other.0.expose_secret()
    }
}

impl Eq for PrivateKey {}

/// Keypair and counterfactual account address for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Account signing key.
    pub private_key: PrivateKey,
    /// Stark public key (x coordinate of `private_key · G`).
    pub public_key: Felt,
    /// Deterministic account contract address. It is known before the contract is deployed.
    pub address: Felt,
    /// Constructor calldata of the account contract, `[public_key]`.
    pub constructor_calldata: Vec<Felt>,
}

impl KeyMaterial {
    /// Canonical padded address.
    #[must_use]
    pub fn address_hex(&self) -> String {
        felt_to_hex(&self.address)
    }
}

/// Fixed inputs of the derivation besides the identity itself.
#[derive(Debug, Clone)]
pub struct DerivationParams {
    /// Application salt mixed into the seed. Never leaves the device.
    pub app_salt: SecretString,
    /// Class hash of the account contract the address is computed for.
    pub account_class_hash: Felt,
}

/// Result of deriving a wallet from an identity token.
#[derive(Debug, Clone)]
pub struct DerivedWallet {
    /// Claims read from the token.
    pub claims: IdentityClaims,
    /// Derived keys and address.
    pub key_material: KeyMaterial,
}

/// Derives the wallet for the identity in `identity_token`.
///
/// # Errors
/// Returns `MalformedIdentity` if the token lacks `sub` or `email`.
pub fn derive_wallet(
    identity_token: &str,
    params: &DerivationParams,
) -> Result<DerivedWallet, WalletError> {
    let claims = IdentityClaims::from_token(identity_token)?;
    let private_key = derive_private_key(&claims.subject_id, &params.app_salt);
    let key_material = key_material_from_private_key(private_key, params.account_class_hash);
    Ok(DerivedWallet {
        claims,
        key_material,
    })
}

/// Derives the key material for `identity_token`, discarding the claims.
///
/// # Errors
/// Returns `MalformedIdentity` if the token lacks `sub` or `email`.
pub fn derive(identity_token: &str, params: &DerivationParams) -> Result<KeyMaterial, WalletError> {
    derive_wallet(identity_token, params).map(|wallet| wallet.key_material)
}

/// Derives the private key for an identity subject.
#[must_use]
pub fn derive_private_key(subject_id: &str, app_salt: &SecretString) -> PrivateKey {
    let seed = Zeroizing::new(format!("{subject_id}-{}", app_salt.expose_secret()));
    let digest: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
    let scalar = reduce_to_scalar(U256::from_be_bytes(digest));
    PrivateKey(SecretBox::new(Box::new(scalar.to_be_bytes::<32>())))
}

/// Computes the public key and account address for `private_key`.
#[must_use]
pub fn key_material_from_private_key(private_key: PrivateKey, account_class_hash: Felt) -> KeyMaterial {
    let public_key = starknet_crypto::get_public_key(&private_key.to_felt());
    let constructor_calldata = vec![public_key];
    let address = get_contract_address(
        public_key,
        account_class_hash,
        &constructor_calldata,
        Felt::ZERO,
    );
    KeyMaterial {
        private_key,
        public_key,
        address,
        constructor_calldata,
    }
}

/// Maps any 256-bit value into `[1, n - 1]`.
pub(crate) fn reduce_to_scalar(value: U256) -> U256 {
    value % (STARK_CURVE_ORDER - U256::from(1)) + U256::from(1)
}
