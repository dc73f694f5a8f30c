use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use starknet_core::{types::Felt, utils::get_selector_from_name};

use super::{felt_rpc_hex, ChainClient, ContractCall, DeploymentDescriptor, DeploymentReceipt};
use crate::{
    error::WalletError,
    http_request::{HttpClient, RetryPolicy},
};

/// [`ChainClient`] over Starknet JSON-RPC and a SNIP-29 paymaster.
#[derive(Debug)]
pub struct StarknetRpcClient {
    rpc_url: String,
    paymaster_url: String,
    paymaster_api_key: Option<SecretString>,
    http: HttpClient,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct ExecuteResult {
    transaction_hash: String,
}

impl StarknetRpcClient {
    /// Creates a client for the given node and paymaster.
    #[must_use]
    pub fn new(
        rpc_url: impl Into<String>,
        paymaster_url: impl Into<String>,
        paymaster_api_key: Option<SecretString>,
    ) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            paymaster_url: paymaster_url.into(),
            paymaster_api_key,
            http: HttpClient::new(RetryPolicy::STANDARD),
            next_id: AtomicU64::new(1),
        }
    }

    async fn rpc(
        &self,
        url: &str,
        method: &str,
        params: Value,
        api_key: Option<&SecretString>,
    ) -> Result<Value, WalletError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let mut builder = self.http.post(url)?.json(&body);
        if let Some(key) = api_key {
            builder = builder.header("x-paymaster-api-key", key.expose_secret());
        }

        let response = self.http.send(builder).await?;
        let status = response.status();
        let text = response.text().await?;

        // Nodes answer JSON-RPC errors with 200 or 4xx depending on the provider.
        let parsed: RpcResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(err) if status.is_success() => return Err(err.into()),
            Err(_) => {
                return Err(WalletError::NetworkError {
                    url: url.to_string(),
                    status: Some(status.as_u16()),
                    error: text,
                })
            }
        };

        if let Some(error) = parsed.error {
            let message = error.data.map_or_else(
                || error.message.clone(),
                |data| format!("{}: {data}", error.message),
            );
            log::debug!("{method} failed with code {}: {message}", error.code);
            return Err(WalletError::ChainRpc {
                method: method.to_string(),
                code: Some(error.code),
                message,
            });
        }

        parsed.result.ok_or_else(|| WalletError::ChainRpc {
            method: method.to_string(),
            code: None,
            message: "response carries neither result nor error".to_string(),
        })
    }
}

#[async_trait]
impl ChainClient for StarknetRpcClient {
    async fn call_contract(&self, call: &ContractCall) -> Result<Vec<Felt>, WalletError> {
        let selector = get_selector_from_name(&call.entry_point)
            .map_err(|e| WalletError::invalid_input("entry_point", e.to_string()))?;
        let params = json!({
            "request": {
                "contract_address": felt_rpc_hex(&call.contract_address),
                "entry_point_selector": felt_rpc_hex(&selector),
                "calldata": call.calldata.iter().map(felt_rpc_hex).collect::<Vec<_>>(),
            },
            "block_id": "latest",
        });

        let result = self.rpc(&self.rpc_url, "starknet_call", params, None).await?;
        let values: Vec<String> = serde_json::from_value(result)?;
        values
            .iter()
            .map(|value| {
                Felt::from_hex(value).map_err(|e| WalletError::ChainRpc {
                    method: "starknet_call".to_string(),
                    code: None,
                    message: format!("invalid felt {value}: {e}"),
                })
            })
            .collect()
    }

    async fn execute_sponsored_deployment(
        &self,
        deployment: &DeploymentDescriptor,
    ) -> Result<DeploymentReceipt, WalletError> {
        let params = json!({
            "transaction": {
                "type": "deploy",
                "deployment": deployment,
            },
            "parameters": {
                "version": "0x1",
                "fee_mode": { "mode": "sponsored" },
            },
        });

        let result = self
            .rpc(
                &self.paymaster_url,
                "paymaster_executeTransaction",
                params,
                self.paymaster_api_key.as_ref(),
            )
            .await?;
        let result: ExecuteResult = serde_json::from_value(result)?;
        let transaction_hash =
            Felt::from_hex(&result.transaction_hash).map_err(|e| WalletError::ChainRpc {
                method: "paymaster_executeTransaction".to_string(),
                code: None,
                message: format!("invalid transaction hash: {e}"),
            })?;

        log::info!(
            "sponsored deployment of {} submitted in {}",
            felt_rpc_hex(&deployment.address),
            felt_rpc_hex(&transaction_hash)
        );

        Ok(DeploymentReceipt {
            transaction_hash,
            contract_address: deployment.address,
        })
    }
}
