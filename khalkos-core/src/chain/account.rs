use std::sync::Arc;

use ruint::aliases::U256;
use starknet_core::types::Felt;

use super::{ChainClient, ContractCall, DeploymentDescriptor, DeploymentReceipt, CONTRACT_NOT_FOUND};
use crate::{
    address::felt_to_hex,
    amount::{u256_from_felt, u256_from_felts},
    derivation::KeyMaterial,
    error::WalletError,
};

/// On-chain state of the account contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum DeploymentStatus {
    /// The account contract answers calls.
    Deployed,
    /// The node reported that no contract lives at the address.
    NotDeployed,
    /// The probe failed for another reason (network, node error).
    Unknown,
}

/// An unlocked account bound to a chain client.
#[derive(Clone)]
pub struct AccountHandle {
    key_material: KeyMaterial,
    account_class_hash: Felt,
    chain: Arc<dyn ChainClient>,
}

impl std::fmt::Debug for AccountHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountHandle")
            .field("address", &self.address_hex())
            .finish_non_exhaustive()
    }
}

impl AccountHandle {
    pub(crate) fn new(
        key_material: KeyMaterial,
        account_class_hash: Felt,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            key_material,
            account_class_hash,
            chain,
        }
    }

    /// Account contract address.
    #[must_use]
    pub const fn address(&self) -> Felt {
        self.key_material.address
    }

    /// Canonical padded address.
    #[must_use]
    pub fn address_hex(&self) -> String {
        felt_to_hex(&self.key_material.address)
    }

    /// Stark public key.
    #[must_use]
    pub const fn public_key(&self) -> Felt {
        self.key_material.public_key
    }

    pub(crate) const fn key_material(&self) -> &KeyMaterial {
        &self.key_material
    }

    /// Probes the account with `get_public_key`.
    ///
    /// A structured "contract not found" answer is `NotDeployed`; every other failure is
    /// `Unknown`.
    pub async fn deployment_status(&self) -> DeploymentStatus {
        let call = ContractCall {
            contract_address: self.key_material.address,
            entry_point: "get_public_key".to_string(),
            calldata: vec![],
        };
        match self.chain.call_contract(&call).await {
            Ok(result) if !result.is_empty() => DeploymentStatus::Deployed,
            Ok(_) => DeploymentStatus::Unknown,
            Err(WalletError::ChainRpc {
                code: Some(CONTRACT_NOT_FOUND),
                ..
            }) => DeploymentStatus::NotDeployed,
            Err(err) => {
                log::warn!("deployment probe for {} failed: {err}", self.address_hex());
                DeploymentStatus::Unknown
            }
        }
    }

    /// Paymaster deployment payload for this account.
    #[must_use]
    pub fn deployment_descriptor(&self) -> DeploymentDescriptor {
        DeploymentDescriptor {
            address: self.key_material.address,
            class_hash: self.account_class_hash,
            salt: self.key_material.public_key,
            calldata: self.key_material.constructor_calldata.clone(),
            version: 1,
        }
    }

    pub(crate) async fn deploy(&self) -> Result<DeploymentReceipt, WalletError> {
        self.chain
            .execute_sponsored_deployment(&self.deployment_descriptor())
            .await
    }

    /// Reads the ERC-20 balance of this account on `token`.
    ///
    /// # Errors
    /// Propagates chain errors; an empty result is a `ChainRpc` error.
    pub async fn balance_of(&self, token: Felt) -> Result<U256, WalletError> {
        let call = ContractCall {
            contract_address: token,
            entry_point: "balanceOf".to_string(),
            calldata: vec![self.key_material.address],
        };
        let result = self.chain.call_contract(&call).await?;
        match result.as_slice() {
            [low, high, ..] => Ok(u256_from_felts(low, high)),
            [single] => Ok(u256_from_felt(single)),
            [] => Err(WalletError::ChainRpc {
                method: "balanceOf".to_string(),
                code: None,
                message: "empty result".to_string(),
            }),
        }
    }
}
