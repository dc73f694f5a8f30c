//! Scriptable [`ChainClient`] for unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use starknet_core::types::Felt;

use super::{ChainClient, ContractCall, DeploymentDescriptor, DeploymentReceipt, CONTRACT_NOT_FOUND};
use crate::error::WalletError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Deployed,
    NotFound,
    Unreachable,
}

pub struct FakeChain {
    balances: Mutex<HashMap<Felt, u128>>,
    failing_tokens: Mutex<HashSet<Felt>>,
    probe: Mutex<Probe>,
    deploy_delay: Mutex<Duration>,
    deploy_fails: Mutex<bool>,
    deployments: Mutex<Vec<DeploymentDescriptor>>,
    balance_calls: Mutex<usize>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            failing_tokens: Mutex::new(HashSet::new()),
            probe: Mutex::new(Probe::NotFound),
            deploy_delay: Mutex::new(Duration::ZERO),
            deploy_fails: Mutex::new(false),
            deployments: Mutex::new(Vec::new()),
            balance_calls: Mutex::new(0),
        }
    }

    pub fn set_balance(&self, token: &str, raw: u128) {
        let token = Felt::from_hex(token).unwrap();
        self.balances.lock().unwrap().insert(token, raw);
    }

    pub fn fail_token(&self, token: &str) {
        let token = Felt::from_hex(token).unwrap();
        self.failing_tokens.lock().unwrap().insert(token);
    }

    pub fn set_probe(&self, probe: Probe) {
        *self.probe.lock().unwrap() = probe;
    }

    pub fn set_deploy_delay(&self, delay: Duration) {
        *self.deploy_delay.lock().unwrap() = delay;
    }

    pub fn fail_deployments(&self) {
        *self.deploy_fails.lock().unwrap() = true;
    }

    pub fn deployments(&self) -> Vec<DeploymentDescriptor> {
        self.deployments.lock().unwrap().clone()
    }

    pub fn balance_calls(&self) -> usize {
        *self.balance_calls.lock().unwrap()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn call_contract(&self, call: &ContractCall) -> Result<Vec<Felt>, WalletError> {
        match call.entry_point.as_str() {
            "get_public_key" => match *self.probe.lock().unwrap() {
                Probe::Deployed => Ok(vec![Felt::from(42_u64)]),
                Probe::NotFound => Err(WalletError::ChainRpc {
                    method: "starknet_call".to_string(),
                    code: Some(CONTRACT_NOT_FOUND),
                    message: "Contract not found".to_string(),
                }),
                Probe::Unreachable => Err(WalletError::NetworkError {
                    url: "fake".to_string(),
                    status: None,
                    error: "connection refused".to_string(),
                }),
            },
            "balanceOf" => {
                *self.balance_calls.lock().unwrap() += 1;
                if self.failing_tokens.lock().unwrap().contains(&call.contract_address) {
                    return Err(WalletError::ChainRpc {
                        method: "starknet_call".to_string(),
                        code: Some(40),
                        message: "execution reverted".to_string(),
                    });
                }
                let raw = self
                    .balances
                    .lock()
                    .unwrap()
                    .get(&call.contract_address)
                    .copied()
                    .unwrap_or(0);
                Ok(vec![Felt::from(raw), Felt::ZERO])
            }
            other => panic!("unexpected entrypoint {other}"),
        }
    }

    async fn execute_sponsored_deployment(
        &self,
        deployment: &DeploymentDescriptor,
    ) -> Result<DeploymentReceipt, WalletError> {
        let delay = *self.deploy_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.deploy_fails.lock().unwrap() {
            return Err(WalletError::ChainRpc {
                method: "paymaster_executeTransaction".to_string(),
                code: Some(163),
                message: "paymaster rejected the deployment".to_string(),
            });
        }
        self.deployments.lock().unwrap().push(deployment.clone());
        *self.probe.lock().unwrap() = Probe::Deployed;
        Ok(DeploymentReceipt {
            transaction_hash: Felt::from(0xdead_u64),
            contract_address: deployment.address,
        })
    }
}
