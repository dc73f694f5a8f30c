//! Canonical hex representation of Starknet addresses and field elements.
//!
//! Addresses are field elements. On the wire and at rest they SHOULD be represented as
//! `0x`-prefixed, lowercase hex strings left-padded to 32 bytes (66 characters in total),
//! so two renderings of the same address always compare equal as strings.

use starknet_core::types::Felt;

use crate::error::WalletError;

/// Length of a canonical address string, `0x` plus 64 hex digits.
pub const CANONICAL_ADDRESS_LEN: usize = 66;

/// Returns `true` for `0x` followed by 1 to 64 hex digits.
#[must_use]
pub fn is_valid_starknet_address(address: &str) -> bool {
    address.strip_prefix("0x").is_some_and(|digits| {
        !digits.is_empty()
            && digits.len() <= 64
            && digits.chars().all(|c| c.is_ascii_hexdigit())
    })
}

/// Left-pads an address to the canonical 66-character form. Idempotent.
///
/// # Errors
/// Returns `InvalidInput` if the input is not a `0x`-prefixed hex string of at most 64 digits.
pub fn pad_address(address: &str) -> Result<String, WalletError> {
    let address = address.trim();
    if !is_valid_starknet_address(address) {
        return Err(WalletError::invalid_input(
            "address",
            format!("not a starknet address: {address}"),
        ));
    }
    let digits = &address[2..];
    Ok(format!("0x{:0>64}", digits.to_ascii_lowercase()))
}

/// Renders a field element in the canonical padded form.
#[must_use]
pub fn felt_to_hex(felt: &Felt) -> String {
    format!("0x{}", hex::encode(felt.to_bytes_be()))
}

/// Parses a `0x`-prefixed hex string into a field element.
///
/// # Errors
/// Returns `InvalidInput` if the value is not valid hex or exceeds the field modulus.
pub fn parse_felt(attribute: &str, value: &str) -> Result<Felt, WalletError> {
    let value = value.trim();
    if !is_valid_starknet_address(value) {
        return Err(WalletError::invalid_input(
            attribute,
            format!("expected 0x-prefixed hex, got {value}"),
        ));
    }
    Felt::from_hex(value)
        .map_err(|e| WalletError::invalid_input(attribute, format!("{value}: {e}")))
}

/// Parses a felt rendered either as `0x` hex or as a decimal string.
pub(crate) fn parse_felt_lenient(value: &str) -> Option<Felt> {
    let value = value.trim();
    if value.starts_with("0x") {
        Felt::from_hex(value).ok()
    } else if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        Felt::from_dec_str(value).ok()
    } else {
        None
    }
}
