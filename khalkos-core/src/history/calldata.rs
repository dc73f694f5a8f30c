//! Best-effort decoding of account `__execute__` calldata.

use ruint::aliases::U256;
use starknet_core::{types::Felt, utils::get_selector_from_name};

use crate::amount::{u256_from_felt, u256_from_felts};

/// A token transfer recovered from calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    /// ERC-20 contract that was called.
    pub token: Felt,
    /// Recipient of the transfer.
    pub recipient: Felt,
    /// Raw amount.
    pub amount: U256,
}

/// Recovers a transfer from transaction calldata when the indexer did not report one.
pub trait CalldataDecoder: Send + Sync {
    /// Returns the first outgoing ERC-20 transfer found in `calldata`.
    fn decode_transfer(&self, calldata: &[Felt]) -> Option<DecodedTransfer>;
}

/// Decodes `transfer(recipient, amount: u256)` calls from multicall calldata.
///
/// Understands the Cairo 1 account layout
/// `[n, (to, selector, len, data[len]) * n]` and falls back to the legacy Cairo 0
/// layout `[n, (to, selector, offset, len) * n, total_len, data[total_len]]`.
#[derive(Debug, Clone)]
pub struct HeuristicTransferDecoder {
    transfer_selector: Felt,
}

impl Default for HeuristicTransferDecoder {
    fn default() -> Self {
        Self {
            transfer_selector: get_selector_from_name("transfer").unwrap_or(Felt::ZERO),
        }
    }
}

struct Call<'a> {
    to: Felt,
    selector: Felt,
    data: &'a [Felt],
}

impl HeuristicTransferDecoder {
    fn transfer_of(&self, call: &Call<'_>) -> Option<DecodedTransfer> {
        if call.selector != self.transfer_selector {
            return None;
        }
        let amount = match call.data {
            [_, low, high] => u256_from_felts(low, high),
            [_, amount] => u256_from_felt(amount),
            _ => return None,
        };
        Some(DecodedTransfer {
            token: call.to,
            recipient: call.data[0],
            amount,
        })
    }
}

impl CalldataDecoder for HeuristicTransferDecoder {
    fn decode_transfer(&self, calldata: &[Felt]) -> Option<DecodedTransfer> {
        let from_calls = |calls: Vec<Call<'_>>| calls.iter().find_map(|call| self.transfer_of(call));
        cairo1_calls(calldata)
            .and_then(from_calls)
            .or_else(|| legacy_calls(calldata).and_then(from_calls))
    }
}

fn as_index(felt: &Felt) -> Option<usize> {
    let value = u256_from_felt(felt);
    usize::try_from(value).ok()
}

fn cairo1_calls(calldata: &[Felt]) -> Option<Vec<Call<'_>>> {
    let (count, mut rest) = calldata.split_first()?;
    let count = as_index(count)?;
    let mut calls = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        let [to, selector, len, tail @ ..] = rest else {
            return None;
        };
        let len = as_index(len)?;
        if tail.len() < len {
            return None;
        }
        let (data, remaining) = tail.split_at(len);
        calls.push(Call {
            to: *to,
            selector: *selector,
            data,
        });
        rest = remaining;
    }
    rest.is_empty().then_some(calls)
}

fn legacy_calls(calldata: &[Felt]) -> Option<Vec<Call<'_>>> {
    let (count, rest) = calldata.split_first()?;
    let count = as_index(count)?;
    let headers_len = count.checked_mul(4)?;
    if rest.len() < headers_len + 1 {
        return None;
    }
    let (headers, rest) = rest.split_at(headers_len);
    let (total_len, data) = rest.split_first()?;
    if as_index(total_len)? != data.len() {
        return None;
    }

    headers
        .chunks_exact(4)
        .map(|header| {
            let offset = as_index(&header[2])?;
            let len = as_index(&header[3])?;
            let data = data.get(offset..offset.checked_add(len)?)?;
            Some(Call {
                to: header[0],
                selector: header[1],
                data,
            })
        })
        .collect()
}
