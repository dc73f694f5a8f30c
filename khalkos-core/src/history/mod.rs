//! Transaction history for an account, normalized into a wallet-centric shape.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;

use crate::{address::parse_felt, tokens::TokenInfo};

mod calldata;
mod indexer;
mod normalize;
mod types;

pub use calldata::{CalldataDecoder, DecodedTransfer, HeuristicTransferDecoder};
pub use indexer::{TransactionIndexer, VoyagerIndexer};
pub use types::{Transaction, TransactionKind, TransactionStatus};

use normalize::{has_transfer_data, is_deploy_record, is_detailed, Normalizer};

#[cfg(test)]
pub(crate) mod test_support;

/// Default page size.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest page size the indexer is asked for.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Fetches and normalizes the transactions of an account.
pub struct TransactionHistory {
    indexer: Arc<dyn TransactionIndexer>,
    decoder: Box<dyn CalldataDecoder>,
    tokens: Vec<TokenInfo>,
    explorer_url: String,
}

impl std::fmt::Debug for TransactionHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHistory")
            .field("tokens", &self.tokens.len())
            .field("explorer_url", &self.explorer_url)
            .finish_non_exhaustive()
    }
}

impl TransactionHistory {
    /// Creates a history reader using the [`HeuristicTransferDecoder`].
    #[must_use]
    pub fn new(
        indexer: Arc<dyn TransactionIndexer>,
        tokens: Vec<TokenInfo>,
        explorer_url: impl Into<String>,
    ) -> Self {
        Self {
            indexer,
            decoder: Box::new(HeuristicTransferDecoder::default()),
            tokens,
            explorer_url: explorer_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Replaces the calldata decoder used when a record carries no transfers.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Box<dyn CalldataDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// One page of transactions for `address`, newest first.
    ///
    /// `page` starts at 1 and `limit` is clamped to `1..=100`. Never fails: an
    /// unreachable indexer or an invalid address yields an empty list, and records that
    /// cannot be read are skipped.
    pub async fn history(&self, address: &str, page: u32, limit: u32) -> Vec<Transaction> {
        let wallet = match parse_felt("address", address) {
            Ok(wallet) => wallet,
            Err(err) => {
                log::warn!("not fetching history: {err}");
                return Vec::new();
            }
        };
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);

        let records = match self.indexer.list_transactions(address, page, limit).await {
            Ok(records) => records,
            Err(err) => {
                log::warn!("transaction history unavailable: {err}");
                return Vec::new();
            }
        };

        let records = join_all(records.into_iter().map(|record| self.enrich(record))).await;

        let normalizer = Normalizer {
            wallet,
            tokens: &self.tokens,
            decoder: self.decoder.as_ref(),
        };
        records
            .iter()
            .filter_map(|record| {
                let tx = normalizer.normalize(record);
                if tx.is_none() {
                    log::debug!("skipping unreadable indexer record");
                }
                tx
            })
            .collect()
    }

    /// Explorer page of a transaction.
    #[must_use]
    pub fn explorer_url(&self, hash: &str) -> String {
        format!("{}/tx/{hash}", self.explorer_url)
    }

    /// Replaces a summary that says nothing about token movements with its detailed
    /// receipt. Falls back to the summary when the detail cannot be fetched.
    async fn enrich(&self, record: Value) -> Value {
        if is_detailed(&record) || has_transfer_data(&record) || is_deploy_record(&record) {
            return record;
        }
        let Some(hash) = record_hash(&record) else {
            return record;
        };
        match self.indexer.transaction_detail(hash).await {
            Ok(detail) if is_detailed(&detail) => detail,
            Ok(_) => {
                log::debug!("detail for {hash} is not a receipt, keeping summary");
                record
            }
            Err(err) => {
                log::debug!("detail for {hash} unavailable: {err}");
                record
            }
        }
    }
}

fn record_hash(record: &Value) -> Option<&str> {
    ["hash", "transaction_hash", "transactionHash", "txHash"]
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_str))
}
