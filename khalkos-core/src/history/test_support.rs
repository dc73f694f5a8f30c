//! Scriptable [`TransactionIndexer`] for unit tests.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::TransactionIndexer;
use crate::error::WalletError;

pub struct FakeIndexer {
    records: Mutex<Vec<Value>>,
    details: Mutex<HashMap<String, Value>>,
    list_fails: Mutex<bool>,
    list_calls: Mutex<Vec<(String, u32, u32)>>,
    detail_calls: Mutex<Vec<String>>,
}

impl FakeIndexer {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            details: Mutex::new(HashMap::new()),
            list_fails: Mutex::new(false),
            list_calls: Mutex::new(Vec::new()),
            detail_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, record: Value) {
        self.records.lock().unwrap().push(record);
    }

    pub fn set_detail(&self, hash: &str, detail: Value) {
        self.details.lock().unwrap().insert(hash.to_string(), detail);
    }

    pub fn fail_listing(&self) {
        *self.list_fails.lock().unwrap() = true;
    }

    pub fn list_calls(&self) -> Vec<(String, u32, u32)> {
        self.list_calls.lock().unwrap().clone()
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionIndexer for FakeIndexer {
    async fn list_transactions(
        &self,
        address: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Value>, WalletError> {
        self.list_calls
            .lock()
            .unwrap()
            .push((address.to_string(), page, limit));
        if *self.list_fails.lock().unwrap() {
            return Err(WalletError::NetworkError {
                url: "fake://txns".to_string(),
                status: Some(503),
                error: "indexer unavailable".to_string(),
            });
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn transaction_detail(&self, hash: &str) -> Result<Value, WalletError> {
        self.detail_calls.lock().unwrap().push(hash.to_string());
        self.details
            .lock()
            .unwrap()
            .get(hash)
            .cloned()
            .ok_or_else(|| WalletError::NetworkError {
                url: format!("fake://txn/{hash}"),
                status: Some(404),
                error: "unknown transaction".to_string(),
            })
    }
}
