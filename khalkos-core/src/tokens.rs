//! Token registry and balance snapshots.

use serde::{Deserialize, Serialize};

/// Static descriptor of a supported ERC-20 token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    /// Ticker, e.g. `ETH`. Used as the key for prices and change detection.
    pub symbol: String,
    /// Human readable name.
    pub name: String,
    /// Number of decimals of the on-chain integer representation.
    pub decimals: u8,
    /// Padded `0x`-prefixed contract address.
    pub contract_address: String,
    /// Identifier of this token on the price feed (`CoinGecko` id).
    pub price_feed_id: String,
}

impl TokenInfo {
    pub(crate) fn new(
        symbol: &str,
        name: &str,
        decimals: u8,
        contract_address: &str,
        price_feed_id: &str,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: name.to_string(),
            decimals,
            contract_address: contract_address.to_string(),
            price_feed_id: price_feed_id.to_string(),
        }
    }
}

/// Balance of one token at the time of a reconciliation pass. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    /// The token this balance belongs to.
    pub token: TokenInfo,
    /// Unsigned on-chain integer as a decimal string.
    pub raw_balance: String,
    /// `raw_balance / 10^decimals`, truncated to 6 fractional digits.
    pub formatted_balance: String,
    /// Spot price in USD, when a price pass ran.
    pub usd_price: Option<f64>,
    /// `formatted_balance × usd_price`, when a price pass ran.
    pub usd_value: Option<f64>,
}

impl TokenBalance {
    /// A zero balance, used when the chain call for a token failed.
    #[must_use]
    pub fn zero(token: TokenInfo) -> Self {
        Self {
            token,
            raw_balance: "0".to_string(),
            formatted_balance: "0".to_string(),
            usd_price: None,
            usd_value: None,
        }
    }
}

/// Token balances joined with prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    /// One entry per registered token, in registry order.
    pub balances: Vec<TokenBalance>,
    /// Sum of every `usd_value`.
    #[serde(rename = "totalUSD")]
    pub total_usd: f64,
    /// `true` when every price came back as exactly zero.
    pub price_data_failed: bool,
}

const ETH_ADDRESS: &str =
    "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7";
const STRK_ADDRESS: &str =
    "0x04718f5a0fc34cc1af16a1cdee98ffb20c31f5cd61d6ab07201858f4287c938d";

/// Tokens supported on Starknet mainnet.
#[must_use]
pub fn mainnet_tokens() -> Vec<TokenInfo> {
    vec![
        TokenInfo::new("ETH", "Ethereum", 18, ETH_ADDRESS, "ethereum"),
        TokenInfo::new("STRK", "Starknet Token", 18, STRK_ADDRESS, "starknet"),
        TokenInfo::new(
            "USDT",
            "Tether USD",
            6,
            "0x068f5c6a61780768455de69077e07e89787839bf8166decfbf92b645209c0fb8",
            "tether",
        ),
        TokenInfo::new(
            "USDC",
            "USD Coin",
            6,
            "0x053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8",
            "usd-coin",
        ),
        TokenInfo::new(
            "WBTC",
            "Wrapped Bitcoin",
            8,
            "0x03fe2b97c1fd336e750087d68b9b867997fd64a2661ff3ca5a7c771641e8e7ac",
            "wrapped-bitcoin",
        ),
    ]
}

/// Tokens supported on Starknet Sepolia. Stablecoin and WBTC deployments differ
/// per test deployment; override them through [`crate::WalletConfig::from_json`].
#[must_use]
pub fn sepolia_tokens() -> Vec<TokenInfo> {
    vec![
        TokenInfo::new("ETH", "Ethereum", 18, ETH_ADDRESS, "ethereum"),
        TokenInfo::new("STRK", "Starknet Token", 18, STRK_ADDRESS, "starknet"),
        TokenInfo::new(
            "USDT",
            "Tether USD",
            6,
            "0x02ab8758891e84b968ff11361789070c6b1af2df618d6d2f4a78b0757573c6eb",
            "tether",
        ),
        TokenInfo::new(
            "USDC",
            "USD Coin",
            6,
            "0x053b40a647cedfca6ca84f542a0fe36736031905a9639a7f19a3c1e66bfd5080",
            "usd-coin",
        ),
        TokenInfo::new(
            "WBTC",
            "Wrapped Bitcoin",
            8,
            "0x00452bd5c0512a61df7c7be8cfea5e4f893cb40e126bdc40aee6054db955129e",
            "wrapped-bitcoin",
        ),
    ]
}

/// Case-insensitive lookup by symbol.
#[must_use]
pub fn find_by_symbol<'a>(tokens: &'a [TokenInfo], symbol: &str) -> Option<&'a TokenInfo> {
    tokens
        .iter()
        .find(|token| token.symbol.eq_ignore_ascii_case(symbol))
}

/// Lookup by contract address, tolerant of padding and case.
#[must_use]
pub fn find_by_address<'a>(tokens: &'a [TokenInfo], address: &str) -> Option<&'a TokenInfo> {
    let wanted = crate::address::pad_address(address).ok()?;
    tokens.iter().find(|token| {
        crate::address::pad_address(&token.contract_address).is_ok_and(|a| a == wanted)
    })
}
