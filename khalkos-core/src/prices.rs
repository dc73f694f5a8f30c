//! USD spot prices.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    error::WalletError,
    http_request::{HttpClient, RetryPolicy},
};

/// Source of USD prices keyed by price feed id.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetches the USD price of every id. Ids the feed does not know are omitted.
    ///
    /// # Errors
    /// Returns `NetworkError` or `SerializationError` when the feed cannot be read.
    async fn usd_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>, WalletError>;
}

/// `CoinGecko` `/simple/price` client.
#[derive(Debug, Clone)]
pub struct CoinGeckoPriceFeed {
    base_url: String,
    http: HttpClient,
}

#[derive(Deserialize)]
struct Quote {
    usd: Option<f64>,
}

impl CoinGeckoPriceFeed {
    /// Creates a client for the API at `base_url` (e.g. `https://api.coingecko.com/api/v3`).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            // polled every few seconds, a failed pass is simply retried on the next tick
            http: HttpClient::new(RetryPolicy::NONE),
        }
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoPriceFeed {
    async fn usd_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>, WalletError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/simple/price", self.base_url);
        let builder = self
            .http
            .get(&url)?
            .query(&[("ids", ids.join(",")), ("vs_currencies", "usd".to_string())]);
        let quotes: HashMap<String, Quote> = self.http.fetch_json(builder).await?;
        Ok(quotes
            .into_iter()
            .filter_map(|(id, quote)| quote.usd.map(|usd| (id, usd)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    #[tokio::test]
    async fn test_parses_simple_price_response() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/price")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("ids".into(), "ethereum,starknet".into()),
                Matcher::UrlEncoded("vs_currencies".into(), "usd".into()),
            ]))
            .with_body(r#"{"ethereum":{"usd":3120.55},"starknet":{"usd":0.42},"tether":{}}"#)
            .create_async()
            .await;

        let feed = CoinGeckoPriceFeed::new(server.url());
        let prices = feed
            .usd_prices(&["ethereum".to_string(), "starknet".to_string()])
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(prices.get("ethereum"), Some(&3120.55));
        assert_eq!(prices.get("starknet"), Some(&0.42));
        assert!(!prices.contains_key("tether"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_an_error_without_retry() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/simple/price")
            .match_query(Matcher::Any)
            .with_status(429)
            .expect(1)
            .create_async()
            .await;

        let feed = CoinGeckoPriceFeed::new(server.url());
        let err = feed.usd_prices(&["ethereum".to_string()]).await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, WalletError::NetworkError { status: Some(429), .. }));
    }

    #[tokio::test]
    async fn test_no_ids_skips_the_request() {
        let feed = CoinGeckoPriceFeed::new("http://127.0.0.1:9");
        assert!(feed.usd_prices(&[]).await.unwrap().is_empty());
    }
}
