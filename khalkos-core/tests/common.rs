//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng, Payload},
    ChaCha20Poly1305, Nonce,
};
use khalkos_core::{
    chain::{
        ChainClient, ContractCall, DeploymentDescriptor, DeploymentReceipt, CONTRACT_NOT_FOUND,
    },
    history::TransactionIndexer,
    prices::PriceFeed,
    storage::{
        AtomicBlobStore, AuthenticationOutcome, BiometricStatus, DeviceAuthenticator,
        DeviceKeystore, PinHashCost, SecureCredentialStore, StorageError,
    },
    Environment, WalletConfig, WalletError, WalletSession,
};
use secrecy::SecretString;
use serde_json::Value;
use starknet_core::types::Felt;

pub const APP_SALT: &str = "integration-salt";

/// Cheapest Argon2 cost that still exercises the real hashing path.
pub const FAST_PIN_COST: PinHashCost = PinHashCost {
    memory_kib: 64,
    iterations: 1,
    parallelism: 1,
};

/// Device keystore with a random ChaCha20-Poly1305 key per device.
pub struct InMemoryKeystore {
    cipher: ChaCha20Poly1305,
    sealed: AtomicU64,
}

impl InMemoryKeystore {
    pub fn new() -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(&ChaCha20Poly1305::generate_key(&mut OsRng)),
            sealed: AtomicU64::new(0),
        }
    }
}

impl DeviceKeystore for InMemoryKeystore {
    fn seal(&self, associated_data: Vec<u8>, plaintext: Vec<u8>) -> Result<Vec<u8>, StorageError> {
        let mut nonce = [0u8; 12];
        nonce[4..].copy_from_slice(&self.sealed.fetch_add(1, Ordering::Relaxed).to_be_bytes());
        let body = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))?;
        Ok([nonce.as_slice(), &body].concat())
    }

    fn open_sealed(
        &self,
        associated_data: Vec<u8>,
        ciphertext: Vec<u8>,
    ) -> Result<Vec<u8>, StorageError> {
        let (nonce, body) = ciphertext
            .split_at_checked(12)
            .ok_or_else(|| StorageError::Crypto("sealed value truncated".to_string()))?;
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: body,
                    aad: &associated_data,
                },
            )
            .map_err(|err| StorageError::Crypto(err.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(path)
    }

    pub fn raw(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(path).cloned()
    }
}

impl AtomicBlobStore for InMemoryBlobStore {
    fn read(&self, path: String) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.lock().unwrap().get(&path).cloned())
    }

    fn write_atomic(&self, path: String, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.blobs.lock().unwrap().insert(path, bytes);
        Ok(())
    }

    fn delete(&self, path: String) -> Result<(), StorageError> {
        self.blobs.lock().unwrap().remove(&path);
        Ok(())
    }
}

/// Answers prompts from a queue, `Success` once the queue is drained.
pub struct ScriptedAuthenticator {
    outcomes: Mutex<VecDeque<AuthenticationOutcome>>,
    prompts: Mutex<usize>,
}

impl ScriptedAuthenticator {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(0),
        }
    }

    pub fn push(&self, outcome: AuthenticationOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn prompts(&self) -> usize {
        *self.prompts.lock().unwrap()
    }
}

#[async_trait]
impl DeviceAuthenticator for ScriptedAuthenticator {
    async fn biometric_status(&self) -> BiometricStatus {
        BiometricStatus {
            available: true,
            enrolled: true,
        }
    }

    async fn authenticate(&self, _reason: &str) -> AuthenticationOutcome {
        *self.prompts.lock().unwrap() += 1;
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(AuthenticationOutcome::Success)
    }
}

/// Chain with an in-memory ERC-20 ledger and a sponsoring paymaster.
pub struct FakeChain {
    deployed: Mutex<bool>,
    balances: Mutex<HashMap<Felt, u128>>,
    deploy_delay: Duration,
    deployments: Mutex<Vec<DeploymentDescriptor>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::with_deploy_delay(Duration::ZERO)
    }

    pub fn with_deploy_delay(deploy_delay: Duration) -> Self {
        Self {
            deployed: Mutex::new(false),
            balances: Mutex::new(HashMap::new()),
            deploy_delay,
            deployments: Mutex::new(Vec::new()),
        }
    }

    pub fn set_balance(&self, token: &str, raw: u128) {
        self.balances
            .lock()
            .unwrap()
            .insert(Felt::from_hex(token).unwrap(), raw);
    }

    pub fn deployments(&self) -> Vec<DeploymentDescriptor> {
        self.deployments.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn call_contract(&self, call: &ContractCall) -> Result<Vec<Felt>, WalletError> {
        match call.entry_point.as_str() {
            "get_public_key" if *self.deployed.lock().unwrap() => Ok(vec![Felt::ONE]),
            "get_public_key" => Err(WalletError::ChainRpc {
                method: "starknet_call".to_string(),
                code: Some(CONTRACT_NOT_FOUND),
                message: "Contract not found".to_string(),
            }),
            "balanceOf" => {
                let raw = self
                    .balances
                    .lock()
                    .unwrap()
                    .get(&call.contract_address)
                    .copied()
                    .unwrap_or(0);
                Ok(vec![Felt::from(raw), Felt::ZERO])
            }
            other => Err(WalletError::ChainRpc {
                method: "starknet_call".to_string(),
                code: Some(21),
                message: format!("entrypoint {other} not found"),
            }),
        }
    }

    async fn execute_sponsored_deployment(
        &self,
        deployment: &DeploymentDescriptor,
    ) -> Result<DeploymentReceipt, WalletError> {
        if !self.deploy_delay.is_zero() {
            tokio::time::sleep(self.deploy_delay).await;
        }
        self.deployments.lock().unwrap().push(deployment.clone());
        *self.deployed.lock().unwrap() = true;
        Ok(DeploymentReceipt {
            transaction_hash: Felt::from(0xbeef_u64),
            contract_address: deployment.address,
        })
    }
}

/// Fixed USD prices; an empty map behaves like an unreachable feed.
pub struct FixedPrices(pub HashMap<String, f64>);

#[async_trait]
impl PriceFeed for FixedPrices {
    async fn usd_prices(&self, ids: &[String]) -> Result<HashMap<String, f64>, WalletError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.0.get(id).map(|price| (id.clone(), *price)))
            .collect())
    }
}

/// Indexer serving a fixed page.
pub struct StaticIndexer(pub Vec<Value>);

#[async_trait]
impl TransactionIndexer for StaticIndexer {
    async fn list_transactions(
        &self,
        _address: &str,
        _page: u32,
        _limit: u32,
    ) -> Result<Vec<Value>, WalletError> {
        Ok(self.0.clone())
    }

    async fn transaction_detail(&self, hash: &str) -> Result<Value, WalletError> {
        Err(WalletError::NetworkError {
            url: format!("static://txn/{hash}"),
            status: Some(404),
            error: "not indexed".to_string(),
        })
    }
}

/// Builds an unsigned JWT carrying `sub` and `email`.
pub fn identity_token(sub: &str, email: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = serde_json::json!({ "sub": sub, "email": email });
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.c2lnbmF0dXJl")
}

pub fn sepolia_config() -> WalletConfig {
    WalletConfig::from_environment(Environment::Sepolia, None, SecretString::from(APP_SALT))
        .expect("sepolia config")
}

/// A device: its storage primitives outlive any one session.
pub struct Device {
    pub keystore: Arc<InMemoryKeystore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub authenticator: Arc<ScriptedAuthenticator>,
}

impl Device {
    pub fn new() -> Self {
        Self {
            keystore: Arc::new(InMemoryKeystore::new()),
            blobs: Arc::new(InMemoryBlobStore::new()),
            authenticator: Arc::new(ScriptedAuthenticator::new()),
        }
    }

    pub fn store(&self) -> SecureCredentialStore {
        SecureCredentialStore::new(
            self.keystore.clone(),
            self.blobs.clone(),
            self.authenticator.clone(),
        )
        .with_pin_cost(FAST_PIN_COST)
    }

    pub fn session(
        &self,
        config: WalletConfig,
        chain: Arc<FakeChain>,
        prices: Arc<dyn PriceFeed>,
        indexer: Arc<dyn TransactionIndexer>,
    ) -> WalletSession {
        WalletSession::new(config, self.store(), chain, prices, indexer)
    }
}
