//! Voyager-style indexer client.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use crate::{
    error::WalletError,
    http_request::{HttpClient, RetryPolicy},
};

/// Source of raw transaction records for an address.
#[async_trait]
pub trait TransactionIndexer: Send + Sync {
    /// Lists the raw records touching `address`, newest first. `page` starts at 1.
    ///
    /// # Errors
    /// Returns `NetworkError` or `SerializationError` when the indexer cannot be read.
    async fn list_transactions(
        &self,
        address: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Value>, WalletError>;

    /// Fetches the detailed receipt of one transaction.
    ///
    /// # Errors
    /// Returns `NetworkError` or `SerializationError` when the indexer cannot be read.
    async fn transaction_detail(&self, hash: &str) -> Result<Value, WalletError>;
}

/// Voyager explorer API client.
#[derive(Debug)]
pub struct VoyagerIndexer {
    base_url: String,
    api_key: Option<SecretString>,
    http: HttpClient,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Items { items: Vec<Value> },
    Data { data: Vec<Value> },
    Bare(Vec<Value>),
}

impl ListResponse {
    fn into_records(self) -> Vec<Value> {
        match self {
            Self::Items { items: records } | Self::Data { data: records } | Self::Bare(records) => {
                records
            }
        }
    }
}

impl VoyagerIndexer {
    /// Creates a client for the API at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http: HttpClient::new(RetryPolicy::STANDARD),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, WalletError> {
        let url = format!("{}/{path}", self.base_url);
        let mut builder = self.http.get(&url)?.query(query);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key.expose_secret());
        }
        self.http.fetch_json(builder).await
    }
}

#[async_trait]
impl TransactionIndexer for VoyagerIndexer {
    async fn list_transactions(
        &self,
        address: &str,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Value>, WalletError> {
        let query = [
            ("to", address.to_string()),
            ("ps", limit.to_string()),
            ("p", page.to_string()),
        ];
        let list: ListResponse = self.get_json("txns", &query).await?;
        Ok(list.into_records())
    }

    async fn transaction_detail(&self, hash: &str) -> Result<Value, WalletError> {
        self.get_json(&format!("txn/{hash}"), &[]).await
    }
}
