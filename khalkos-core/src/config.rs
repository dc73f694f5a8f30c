use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use starknet_core::types::Felt;

use crate::{
    address::parse_felt,
    amount::MAX_DECIMALS,
    error::WalletError,
    tokens::{mainnet_tokens, sepolia_tokens, TokenInfo},
    Environment,
};

/// `OpenZeppelin` account contract class hash used to compute account addresses.
pub const OZ_ACCOUNT_CLASS_HASH: &str =
    "0x061dac032f228abef9c6626f995015233097ae253a7f72d68552db02f2971b8f";

/// Default balance polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const PRICE_FEED_URL: &str = "https://api.coingecko.com/api/v3";

/// Endpoints, contracts and secrets the wallet core runs against.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Network this configuration targets.
    pub environment: Environment,
    /// Starknet JSON-RPC endpoint.
    pub rpc_url: String,
    /// SNIP-29 paymaster endpoint used for sponsored deployments.
    pub paymaster_url: String,
    /// Paymaster API key, sent as `x-paymaster-api-key`.
    pub paymaster_api_key: Option<SecretString>,
    /// Block explorer API used for transaction history.
    pub indexer_url: String,
    /// Indexer API key, sent as `x-api-key`.
    pub indexer_api_key: Option<SecretString>,
    /// Price feed API base URL.
    pub price_feed_url: String,
    /// Block explorer web UI, for transaction links.
    pub explorer_url: String,
    /// Account contract class hash.
    pub account_class_hash: Felt,
    /// Application salt mixed into key derivation.
    pub app_salt: SecretString,
    /// Supported tokens, in display order.
    pub tokens: Vec<TokenInfo>,
    /// Balance polling interval.
    pub poll_interval: Duration,
}

impl WalletConfig {
    /// Returns the defaults for `environment`. `rpc_url` overrides the public RPC endpoint.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `rpc_url` is not an http(s) URL.
    pub fn from_environment(
        environment: Environment,
        rpc_url: Option<String>,
        app_salt: SecretString,
    ) -> Result<Self, WalletError> {
        if let Some(url) = &rpc_url {
            if !url.starts_with("http") {
                return Err(WalletError::invalid_input(
                    "rpc_url",
                    format!("not an http(s) url: {url}"),
                ));
            }
        }

        let account_class_hash = parse_felt("account_class_hash", OZ_ACCOUNT_CLASS_HASH)?;

        let config = match environment {
            Environment::Sepolia => Self {
                environment,
                rpc_url: rpc_url.unwrap_or_else(|| {
                    "https://starknet-sepolia.public.blastapi.io/rpc/v0_7".to_string()
                }),
                paymaster_url: "https://sepolia.paymaster.avnu.fi".to_string(),
                paymaster_api_key: None,
                indexer_url: "https://sepolia-api.voyager.online/beta".to_string(),
                indexer_api_key: None,
                price_feed_url: PRICE_FEED_URL.to_string(),
                explorer_url: "https://sepolia.voyager.online".to_string(),
                account_class_hash,
                app_salt,
                tokens: sepolia_tokens(),
                poll_interval: DEFAULT_POLL_INTERVAL,
            },
            Environment::Mainnet => Self {
                environment,
                rpc_url: rpc_url.unwrap_or_else(|| {
                    "https://starknet-mainnet.public.blastapi.io/rpc/v0_7".to_string()
                }),
                paymaster_url: "https://starknet.paymaster.avnu.fi".to_string(),
                paymaster_api_key: None,
                indexer_url: "https://api.voyager.online/beta".to_string(),
                indexer_api_key: None,
                price_feed_url: PRICE_FEED_URL.to_string(),
                explorer_url: "https://voyager.online".to_string(),
                account_class_hash,
                app_salt,
                tokens: mainnet_tokens(),
                poll_interval: DEFAULT_POLL_INTERVAL,
            },
        };
        Ok(config)
    }

    /// Builds a configuration from JSON. Only `environment` and `appSalt` are required;
    /// every other key overrides the environment default.
    ///
    /// # Errors
    /// Returns `SerializationError` for malformed JSON and `InvalidInput` for invalid
    /// values.
    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let mut config = Self::from_environment(
            raw.environment,
            raw.rpc_url,
            SecretString::from(raw.app_salt),
        )?;

        if let Some(url) = raw.paymaster_url {
            config.paymaster_url = url;
        }
        if let Some(url) = raw.indexer_url {
            config.indexer_url = url;
        }
        if let Some(url) = raw.price_feed_url {
            config.price_feed_url = url;
        }
        if let Some(url) = raw.explorer_url {
            config.explorer_url = url;
        }
        config.paymaster_api_key = raw.paymaster_api_key.map(SecretString::from);
        config.indexer_api_key = raw.indexer_api_key.map(SecretString::from);
        if let Some(class_hash) = raw.account_class_hash {
            config.account_class_hash = parse_felt("account_class_hash", &class_hash)?;
        }
        if let Some(tokens) = raw.tokens {
            for token in &tokens {
                parse_felt("contract_address", &token.contract_address)?;
                if token.decimals > MAX_DECIMALS {
                    return Err(WalletError::invalid_input(
                        "decimals",
                        format!(
                            "{} has {} decimals, at most {MAX_DECIMALS} are supported",
                            token.symbol, token.decimals
                        ),
                    ));
                }
            }
            config.tokens = tokens;
        }
        if let Some(secs) = raw.poll_interval_secs {
            if secs == 0 {
                return Err(WalletError::invalid_input(
                    "poll_interval_secs",
                    "must be positive",
                ));
            }
            config.poll_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    environment: Environment,
    app_salt: String,
    rpc_url: Option<String>,
    paymaster_url: Option<String>,
    paymaster_api_key: Option<String>,
    indexer_url: Option<String>,
    indexer_api_key: Option<String>,
    price_feed_url: Option<String>,
    explorer_url: Option<String>,
    account_class_hash: Option<String>,
    tokens: Option<Vec<TokenInfo>>,
    poll_interval_secs: Option<u64>,
}
