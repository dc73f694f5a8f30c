//! Starknet node and paymaster access.

use async_trait::async_trait;
use serde::Serialize;
use starknet_core::types::Felt;

use crate::error::WalletError;

mod account;
mod rpc;

pub use account::{AccountHandle, DeploymentStatus};
pub use rpc::StarknetRpcClient;

#[cfg(test)]
pub(crate) mod test_support;

/// JSON-RPC error code returned by Starknet nodes for an address without a contract.
pub const CONTRACT_NOT_FOUND: i64 = 20;

/// A read-only contract invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// Target contract.
    pub contract_address: Felt,
    /// Cairo entrypoint name, e.g. `balanceOf`.
    pub entry_point: String,
    /// Serialized arguments.
    pub calldata: Vec<Felt>,
}

/// Everything a paymaster needs to deploy an account contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentDescriptor {
    /// Counterfactual address the contract will land at.
    #[serde(serialize_with = "serialize_felt")]
    pub address: Felt,
    /// Account class hash.
    #[serde(serialize_with = "serialize_felt")]
    pub class_hash: Felt,
    /// Address salt, the account public key.
    #[serde(serialize_with = "serialize_felt")]
    pub salt: Felt,
    /// Constructor calldata.
    #[serde(serialize_with = "serialize_felts")]
    pub calldata: Vec<Felt>,
    /// Deployment data version.
    pub version: u8,
}

/// Result of a submitted deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentReceipt {
    /// Hash of the deployment transaction.
    pub transaction_hash: Felt,
    /// Address of the deployed account.
    pub contract_address: Felt,
}

/// Minimal chain surface the wallet needs.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Executes `starknet_call` against the latest block.
    ///
    /// # Errors
    /// Returns `ChainRpc` when the node answers with an error (the code is kept) and
    /// `NetworkError` when the node cannot be reached.
    async fn call_contract(&self, call: &ContractCall) -> Result<Vec<Felt>, WalletError>;

    /// Submits a gasless account deployment through the paymaster.
    ///
    /// # Errors
    /// Returns `ChainRpc` when the paymaster rejects the deployment.
    async fn execute_sponsored_deployment(
        &self,
        deployment: &DeploymentDescriptor,
    ) -> Result<DeploymentReceipt, WalletError>;
}

pub(crate) fn felt_rpc_hex(felt: &Felt) -> String {
    format!("{felt:#x}")
}

fn serialize_felt<S: serde::Serializer>(felt: &Felt, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&felt_rpc_hex(felt))
}

fn serialize_felts<S: serde::Serializer>(
    felts: &[Felt],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(felts.iter().map(felt_rpc_hex))
}
