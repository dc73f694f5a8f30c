//! Normalized transaction records.

use serde::Serialize;

/// Direction or nature of a transaction, from the wallet's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransactionKind {
    /// Tokens left the wallet.
    Send,
    /// Tokens arrived in the wallet.
    Receive,
    /// The wallet exchanged one token for another.
    Swap,
    /// The account contract was deployed.
    Deploy,
}

/// Execution outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TransactionStatus {
    /// Not executed yet, or no status information.
    Pending,
    /// Executed successfully.
    Success,
    /// Reverted or rejected.
    Failed,
}

impl TransactionStatus {
    /// Maps an indexer status string, case-insensitively.
    ///
    /// Anything containing `succeed` is a success, anything containing `fail`, `reject`
    /// or `revert` is a failure, everything else is pending.
    #[must_use]
    pub fn from_indexer(status: &str) -> Self {
        let status = status.to_ascii_lowercase();
        if status.contains("succeed") {
            Self::Success
        } else if ["fail", "reject", "revert"]
            .iter()
            .any(|marker| status.contains(marker))
        {
            Self::Failed
        } else {
            Self::Pending
        }
    }
}

/// A transaction in the wallet's canonical shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction hash.
    pub hash: String,
    /// What the transaction did for the wallet.
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Human readable amount, `"0"` when no token moved and empty when the indexer
    /// reported a token scale that cannot be applied.
    pub amount: String,
    /// Token symbol, empty when no token moved.
    pub token: String,
    /// Unix milliseconds, 0 when unknown.
    pub timestamp_ms: u64,
    /// Execution outcome.
    pub status: TransactionStatus,
    /// Sender of the movement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Recipient of the movement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Block the transaction was included in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Gas consumed, as reported by the indexer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    /// Fee paid, as a decimal integer in the fee token's base unit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_fee: Option<String>,
}
