//! Integer token amounts.
//!
//! On-chain balances are unsigned integers. They travel as decimal strings so that no
//! precision is lost for tokens with 18 decimals, and are only turned into a human
//! readable decimal with integer arithmetic.

use ruint::aliases::U256;
use starknet_core::types::Felt;

use crate::error::WalletError;

/// Maximum number of fractional digits shown for a token amount.
pub const DISPLAY_FRACTION_DIGITS: usize = 6;

/// Largest `decimals` whose scale `10^decimals` fits in 256 bits.
pub const MAX_DECIMALS: u8 = 77;

/// Parses an unsigned integer given either as a decimal string or as `0x` hex.
///
/// # Errors
/// Returns `InvalidInput` if the value is empty, negative, or does not fit in 256 bits.
pub fn parse_raw_amount(raw: &str) -> Result<U256, WalletError> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0x" {
        return Err(WalletError::invalid_input("amount", "empty amount"));
    }
    let parsed = raw.strip_prefix("0x").map_or_else(
        || U256::from_str_radix(raw, 10),
        |hex_digits| U256::from_str_radix(hex_digits, 16),
    );
    parsed.map_err(|_| {
        WalletError::invalid_input("amount", format!("not an unsigned integer: {raw}"))
    })
}

/// Formats a raw on-chain integer as a decimal with `decimals` places.
///
/// The fractional part is truncated (never rounded) to six digits and trailing zeros
/// are stripped, so the result never shows more value than is actually held.
///
/// ```rust
/// use khalkos_core::amount::format_token_balance;
///
/// assert_eq!(format_token_balance("1500000000000000000", 18).unwrap(), "1.5");
/// assert_eq!(format_token_balance("1000000000000000000", 18).unwrap(), "1");
/// assert_eq!(format_token_balance("0", 18).unwrap(), "0");
/// ```
///
/// # Errors
/// Returns `InvalidInput` if `raw_balance` is not an unsigned integer or `decimals`
/// exceeds [`MAX_DECIMALS`].
pub fn format_token_balance(raw_balance: &str, decimals: u8) -> Result<String, WalletError> {
    format_units(parse_raw_amount(raw_balance)?, decimals)
}

/// Formats an already parsed amount. See [`format_token_balance`].
///
/// # Errors
/// Returns `InvalidInput` if `decimals` exceeds [`MAX_DECIMALS`].
pub fn format_units(amount: U256, decimals: u8) -> Result<String, WalletError> {
    let divisor = U256::from(10_u64)
        .checked_pow(U256::from(decimals))
        .ok_or_else(|| {
            WalletError::invalid_input(
                "decimals",
                format!("{decimals} exceeds the maximum of {MAX_DECIMALS}"),
            )
        })?;
    let whole = amount / divisor;
    let fractional = amount % divisor;

    if decimals == 0 || fractional.is_zero() {
        return Ok(whole.to_string());
    }

    let padded = format!("{:0>width$}", fractional.to_string(), width = usize::from(decimals));
    let truncated: String = padded.chars().take(DISPLAY_FRACTION_DIGITS).collect();
    let trimmed = truncated.trim_end_matches('0');

    if trimmed.is_empty() {
        Ok(whole.to_string())
    } else {
        Ok(format!("{whole}.{trimmed}"))
    }
}

/// Combines a Cairo `u256` returned as `(low, high)` felts.
#[must_use]
pub fn u256_from_felts(low: &Felt, high: &Felt) -> U256 {
    let low = U256::from_be_bytes(low.to_bytes_be());
    let high = U256::from_be_bytes(high.to_bytes_be());
    (high << 128) | low
}

/// Converts a single felt to an integer.
#[must_use]
pub fn u256_from_felt(value: &Felt) -> U256 {
    U256::from_be_bytes(value.to_bytes_be())
}
