#![deny(clippy::all, clippy::pedantic, clippy::nursery)]
//! Core of the Khalkos non-custodial Starknet wallet.
//!
//! An identity token from the sign-in provider deterministically yields a Stark key and
//! an account address. The key is sealed on the device by [`storage`], and a
//! [`WalletSession`] drives onboarding, unlock, deployment, balances and history.

use serde::Deserialize;
use strum::{Display, EnumString};

/// Starknet network the wallet talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Sepolia testnet.
    Sepolia,
    /// Starknet mainnet.
    Mainnet,
}

pub mod address;
pub mod amount;
pub mod balance;
pub mod chain;
pub mod config;
pub mod derivation;
pub mod history;
pub mod identity;
pub mod logger;
pub mod prices;
pub mod session;
pub mod storage;
pub mod tokens;

mod error;
pub use error::*;

pub use config::WalletConfig;
pub use session::{Route, SessionState, WalletInfo, WalletSession};

// private modules
mod http_request;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("khalkos_core");
