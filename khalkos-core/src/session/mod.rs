//! The wallet session: onboarding, unlock, deployment and the data APIs of an unlocked
//! account.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use zeroize::Zeroizing;

use crate::{
    balance::{BalanceListener, BalanceReconciler, ListenerId},
    chain::{AccountHandle, ChainClient, DeploymentReceipt, DeploymentStatus, StarknetRpcClient},
    config::WalletConfig,
    derivation::{derive_wallet, DerivationParams},
    error::WalletError,
    history::{Transaction, TransactionHistory, TransactionIndexer, VoyagerIndexer},
    prices::{CoinGeckoPriceFeed, PriceFeed},
    storage::{
        AtomicBlobStore, BiometricStatus, DeviceAuthenticator, DeviceKeystore,
        SecureCredentialStore, SecuritySettings, StorageError, StoredWallet,
    },
    tokens::{PortfolioSnapshot, TokenBalance, TokenInfo},
};

mod state;

pub use state::{Route, SessionState, WalletInfo};

/// Consecutive failed PIN verifications that abort the session.
pub const MAX_PIN_ATTEMPTS: u32 = 5;

const EXPORT_REASON: &str = "Authenticate to export your private key";

/// Orchestrates one wallet on one device.
///
/// The session is an explicit object: the host constructs it with its collaborators and
/// keeps it for the lifetime of the app. Methods take `&self` and never hold the internal
/// lock across an `.await`, so a session can be shared behind an `Arc`.
pub struct WalletSession {
    config: WalletConfig,
    store: SecureCredentialStore,
    chain: Arc<dyn ChainClient>,
    prices: Arc<dyn PriceFeed>,
    history: TransactionHistory,
    inner: Mutex<Inner>,
    deploying: AtomicBool,
}

struct Inner {
    state: SessionState,
    active: Option<ActiveWallet>,
    failed_pin_attempts: u32,
    locked_out: bool,
}

struct ActiveWallet {
    wallet: StoredWallet,
    account: AccountHandle,
    reconciler: Arc<BalanceReconciler>,
}

impl std::fmt::Debug for WalletSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSession")
            .field("environment", &self.config.environment)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight flag when the deployment future completes or is dropped.
struct DeploymentGuard<'a>(&'a AtomicBool);

impl<'a> DeploymentGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, WalletError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| WalletError::DeploymentInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for DeploymentGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl WalletSession {
    /// Creates a session over explicit collaborators.
    #[must_use]
    pub fn new(
        config: WalletConfig,
        store: SecureCredentialStore,
        chain: Arc<dyn ChainClient>,
        prices: Arc<dyn PriceFeed>,
        indexer: Arc<dyn TransactionIndexer>,
    ) -> Self {
        let history =
            TransactionHistory::new(indexer, config.tokens.clone(), config.explorer_url.clone());
        Self {
            config,
            store,
            chain,
            prices,
            history,
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                active: None,
                failed_pin_attempts: 0,
                locked_out: false,
            }),
            deploying: AtomicBool::new(false),
        }
    }

    /// Creates a session talking to the public endpoints of `config`, with the platform
    /// storage primitives supplied by the host.
    #[must_use]
    pub fn from_config(
        config: WalletConfig,
        keystore: Arc<dyn DeviceKeystore>,
        blob_store: Arc<dyn AtomicBlobStore>,
        authenticator: Arc<dyn DeviceAuthenticator>,
    ) -> Self {
        let chain = Arc::new(StarknetRpcClient::new(
            config.rpc_url.clone(),
            config.paymaster_url.clone(),
            config.paymaster_api_key.clone(),
        ));
        let prices = Arc::new(CoinGeckoPriceFeed::new(config.price_feed_url.clone()));
        let indexer = Arc::new(VoyagerIndexer::new(
            config.indexer_url.clone(),
            config.indexer_api_key.clone(),
        ));
        let store = SecureCredentialStore::new(keystore, blob_store, authenticator);
        Self::new(config, store, chain, prices, indexer)
    }

    /// Configuration the session was built with.
    #[must_use]
    pub const fn config(&self) -> &WalletConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Screen the host should show.
    ///
    /// An unlocked session routes to PIN setup while PIN unlock is enabled in the
    /// security settings and no PIN is stored yet.
    #[must_use]
    pub fn route(&self) -> Route {
        let state = self.state();
        let pin_required = state == SessionState::Unlocked
            && self.store.security_settings().pin_enabled
            && !self.store.has_pin_set().unwrap_or_else(|err| {
                log::warn!("failed to check pin slot: {err}");
                false
            });
        state.route(pin_required)
    }

    /// Probes the device for a stored wallet without prompting.
    ///
    /// A wallet slot that cannot be opened or fails validation counts as no wallet; it is
    /// overwritten by the next [`create_from_identity`](Self::create_from_identity). Any
    /// previously unlocked account is dropped and a PIN lockout is lifted.
    ///
    /// # Errors
    /// Returns `Persistence` if the blob store itself cannot be read.
    pub async fn initialize(&self) -> Result<SessionState, WalletError> {
        let has_wallet = match self.store.get_stored_wallet(false).await {
            Ok(wallet) => wallet.is_some(),
            Err(WalletError::Persistence(err @ StorageError::BlobStore(_))) => {
                return Err(err.into())
            }
            Err(err) => {
                log::warn!("stored wallet is unusable: {err}");
                false
            }
        };

        let state = SessionState::Initialized { has_wallet };
        let previous = {
            let mut inner = self.lock();
            inner.state = state;
            inner.failed_pin_attempts = 0;
            inner.locked_out = false;
            inner.active.take()
        };
        if let Some(previous) = previous {
            previous.reconciler.shutdown();
        }
        log::info!("session initialized, wallet stored: {has_wallet}");
        Ok(state)
    }

    /// Onboards the identity in `identity_token`.
    ///
    /// Derives the keys, persists the wallet, unlocks the session and deploys the account
    /// when the node reports that it does not exist yet. If the probe is inconclusive the
    /// deployment is skipped; [`deploy_wallet`](Self::deploy_wallet) can be retried later.
    ///
    /// # Errors
    /// Returns `MalformedIdentity` for an unusable token and `Persistence` if the wallet
    /// cannot be stored. A failed deployment is returned as `ChainRpc` or `NetworkError`
    /// while the wallet stays stored and the session stays unlocked.
    pub async fn create_from_identity(
        &self,
        identity_token: &str,
    ) -> Result<WalletInfo, WalletError> {
        let params = DerivationParams {
            app_salt: self.config.app_salt.clone(),
            account_class_hash: self.config.account_class_hash,
        };
        let derived = derive_wallet(identity_token, &params)?;
        let wallet = self.store.store_wallet(
            &derived.key_material,
            &derived.claims.subject_id,
            &derived.claims.email,
        )?;
        let info = WalletInfo::from(&wallet);
        let (account, reconciler) = self.activate(wallet);
        reconciler.initialize_baseline().await;

        match account.deployment_status().await {
            DeploymentStatus::NotDeployed => {
                log::info!("deploying account {}", account.address_hex());
                self.deploy_wallet().await?;
            }
            DeploymentStatus::Deployed => {
                log::debug!("account {} already deployed", account.address_hex());
            }
            DeploymentStatus::Unknown => {
                log::warn!(
                    "deployment state of {} unknown, not deploying",
                    account.address_hex()
                );
            }
        }

        Ok(info)
    }

    /// Unlocks the stored wallet behind the device authentication prompt.
    ///
    /// # Errors
    /// Returns `NoWallet` if nothing is stored, `Authentication` if the prompt is
    /// dismissed or fails, and `Persistence` if the slot cannot be read.
    pub async fn authenticate_and_unlock(&self) -> Result<WalletInfo, WalletError> {
        let wallet = self
            .store
            .get_stored_wallet(true)
            .await?
            .ok_or(WalletError::NoWallet)?;
        Ok(self.unlock(wallet).await)
    }

    /// Unlocks the stored wallet with the PIN instead of the device prompt.
    ///
    /// A wrong PIN counts towards the lockout like [`verify_pin`](Self::verify_pin).
    ///
    /// # Errors
    /// Returns `Authentication` for a wrong PIN or when PIN unlock is disabled,
    /// `PinLockedOut` once the attempts are exhausted, and `NoWallet` if nothing is stored.
    pub async fn unlock_with_pin(&self, pin: &str) -> Result<WalletInfo, WalletError> {
        if !self.store.security_settings().pin_enabled {
            return Err(WalletError::Authentication {
                reason: "pin unlock is disabled".to_string(),
            });
        }
        if !self.verify_pin(pin)? {
            return Err(WalletError::Authentication {
                reason: "incorrect pin".to_string(),
            });
        }
        let wallet = self
            .store
            .get_stored_wallet(false)
            .await?
            .ok_or(WalletError::NoWallet)?;
        Ok(self.unlock(wallet).await)
    }

    /// Clears every slot, stops polling and drops the unlocked account.
    pub fn logout(&self) {
        self.store.clear_all();
        let previous = {
            let mut inner = self.lock();
            inner.state = SessionState::LoggedOut;
            inner.failed_pin_attempts = 0;
            inner.locked_out = false;
            inner.active.take()
        };
        if let Some(previous) = previous {
            previous.reconciler.shutdown();
        }
        log::info!("logged out");
    }

    /// Whether the account contract exists. Any probe failure reads as `false`.
    ///
    /// # Errors
    /// Returns `NotUnlocked` when no wallet is unlocked.
    pub async fn is_wallet_deployed(&self) -> Result<bool, WalletError> {
        Ok(self.deployment_status().await? == DeploymentStatus::Deployed)
    }

    /// Deployment state of the account, distinguishing an absent contract from a failed
    /// probe.
    ///
    /// # Errors
    /// Returns `NotUnlocked` when no wallet is unlocked.
    pub async fn deployment_status(&self) -> Result<DeploymentStatus, WalletError> {
        let account = self.account()?;
        Ok(account.deployment_status().await)
    }

    /// Deploys the account through the sponsoring paymaster.
    ///
    /// # Errors
    /// Returns `NotUnlocked` when no wallet is unlocked, `DeploymentInProgress` if a
    /// deployment is already running, and the chain error if the paymaster rejects it.
    pub async fn deploy_wallet(&self) -> Result<DeploymentReceipt, WalletError> {
        let account = self.account()?;
        let _guard = DeploymentGuard::acquire(&self.deploying)?;
        match account.deploy().await {
            Ok(receipt) => {
                log::info!(
                    "deployment of {} submitted: {:#x}",
                    account.address_hex(),
                    receipt.transaction_hash
                );
                Ok(receipt)
            }
            Err(err) => {
                log::error!("deployment of {} failed: {err}", account.address_hex());
                Err(err)
            }
        }
    }

    /// Balances of every supported token.
    ///
    /// # Errors
    /// Returns `NotUnlocked` when no wallet is unlocked.
    pub async fn balances(&self) -> Result<Vec<TokenBalance>, WalletError> {
        Ok(self.reconciler()?.balances().await)
    }

    /// Balances with USD prices and the portfolio total.
    ///
    /// # Errors
    /// Returns `NotUnlocked` when no wallet is unlocked.
    pub async fn balances_with_prices(&self) -> Result<PortfolioSnapshot, WalletError> {
        Ok(self.reconciler()?.balances_with_prices().await)
    }

    /// Balance of one token by symbol.
    ///
    /// # Errors
    /// Returns `NotUnlocked`, `InvalidInput` for an unsupported symbol, or the chain error.
    pub async fn token_balance(&self, symbol: &str) -> Result<TokenBalance, WalletError> {
        self.reconciler()?.token_balance(symbol).await
    }

    /// Registers a balance change listener. The first listener starts polling.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns `NotUnlocked` when no wallet is unlocked.
    pub fn add_balance_listener(
        &self,
        listener: Arc<dyn BalanceListener>,
    ) -> Result<ListenerId, WalletError> {
        Ok(self.reconciler()?.add_listener(listener))
    }

    /// Removes a listener. Returns `false` if it was not registered or the session is
    /// not unlocked.
    pub fn remove_balance_listener(&self, id: ListenerId) -> bool {
        self.reconciler()
            .is_ok_and(|reconciler| reconciler.remove_listener(id))
    }

    /// Whether balance polling is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.reconciler()
            .is_ok_and(|reconciler| reconciler.is_polling())
    }

    /// One page of the account's transactions. `page` starts at 1.
    ///
    /// # Errors
    /// Returns `NotUnlocked` when no wallet is unlocked. Indexer failures yield an empty
    /// page.
    pub async fn history(&self, page: u32, limit: u32) -> Result<Vec<Transaction>, WalletError> {
        let address = self.account()?.address_hex();
        Ok(self.history.history(&address, page, limit).await)
    }

    /// Explorer page of a transaction.
    #[must_use]
    pub fn explorer_url(&self, hash: &str) -> String {
        self.history.explorer_url(hash)
    }

    /// Public details of the unlocked wallet.
    ///
    /// # Errors
    /// Returns `NotUnlocked` when no wallet is unlocked.
    pub fn wallet_info(&self) -> Result<WalletInfo, WalletError> {
        self.lock()
            .active
            .as_ref()
            .map(|active| WalletInfo::from(&active.wallet))
            .ok_or(WalletError::NotUnlocked)
    }

    /// Hex private key of the unlocked wallet, after a fresh device authentication.
    ///
    /// # Errors
    /// Returns `NotUnlocked` when no wallet is unlocked and `Authentication` if the
    /// prompt is dismissed or fails.
    pub async fn export_private_key(&self) -> Result<Zeroizing<String>, WalletError> {
        self.account()?;
        self.store.require_device_auth(EXPORT_REASON).await?;
        log::info!("private key exported");
        let inner = self.lock();
        let active = inner.active.as_ref().ok_or(WalletError::NotUnlocked)?;
        Ok(active.wallet.key_material.private_key.to_hex())
    }

    /// Stores the unlock PIN of the unlocked wallet.
    ///
    /// # Errors
    /// Returns `NotUnlocked`, `InvalidInput` for a PIN that is not six digits, or
    /// `Persistence`.
    pub fn setup_pin(&self, pin: &str) -> Result<(), WalletError> {
        self.account()?;
        self.store.store_pin(pin)?;
        self.lock().failed_pin_attempts = 0;
        Ok(())
    }

    /// Verifies a PIN.
    ///
    /// Returns `Ok(false)` for a wrong PIN and when no PIN is set. After
    /// [`MAX_PIN_ATTEMPTS`] consecutive wrong PINs the session is aborted: the account is
    /// dropped, polling stops and every further attempt fails until
    /// [`initialize`](Self::initialize) runs again.
    ///
    /// # Errors
    /// Returns `PinLockedOut` on the attempt that triggers the lockout and on every
    /// attempt after it, `Persistence` if the PIN slot cannot be read.
    pub fn verify_pin(&self, pin: &str) -> Result<bool, WalletError> {
        if self.lock().locked_out {
            return Err(WalletError::PinLockedOut {
                attempts: MAX_PIN_ATTEMPTS,
            });
        }
        if !self.store.has_pin_set()? {
            return Ok(false);
        }

        let valid = self.store.verify_pin(pin)?;

        let aborted = {
            let mut inner = self.lock();
            if valid {
                inner.failed_pin_attempts = 0;
                return Ok(true);
            }
            inner.failed_pin_attempts += 1;
            log::warn!(
                "incorrect pin, attempt {} of {MAX_PIN_ATTEMPTS}",
                inner.failed_pin_attempts
            );
            if inner.failed_pin_attempts < MAX_PIN_ATTEMPTS {
                return Ok(false);
            }
            inner.locked_out = true;
            inner.state = SessionState::Uninitialized;
            inner.active.take()
        };

        if let Some(active) = aborted {
            active.reconciler.shutdown();
        }
        log::error!("pin locked out after {MAX_PIN_ATTEMPTS} failed attempts");
        Err(WalletError::PinLockedOut {
            attempts: MAX_PIN_ATTEMPTS,
        })
    }

    /// Replaces the PIN after verifying the current one.
    ///
    /// # Errors
    /// Returns `InvalidInput` if `new_pin` is not six digits, `Authentication` if
    /// `current_pin` is wrong, `PinLockedOut` once the attempts are exhausted.
    pub fn change_pin(&self, current_pin: &str, new_pin: &str) -> Result<(), WalletError> {
        crate::storage::validate_pin_format(new_pin)?;
        if !self.verify_pin(current_pin)? {
            return Err(WalletError::Authentication {
                reason: "incorrect pin".to_string(),
            });
        }
        self.store.store_pin(new_pin)
    }

    /// Whether a PIN is stored.
    ///
    /// # Errors
    /// Returns `Persistence` if the blob store cannot be read.
    pub fn has_pin(&self) -> Result<bool, WalletError> {
        self.store.has_pin_set()
    }

    /// Current security settings, defaults when none are stored.
    #[must_use]
    pub fn security_settings(&self) -> SecuritySettings {
        self.store.security_settings()
    }

    /// Persists the security settings.
    ///
    /// # Errors
    /// Returns `Persistence` if the settings cannot be stored.
    pub fn update_security_settings(&self, settings: SecuritySettings) -> Result<(), WalletError> {
        self.store.store_security_settings(settings)
    }

    /// Biometric capabilities of the device.
    pub async fn biometric_status(&self) -> BiometricStatus {
        self.store.biometric_status().await
    }

    /// Tokens the wallet tracks.
    #[must_use]
    pub fn supported_tokens(&self) -> &[TokenInfo] {
        &self.config.tokens
    }

    async fn unlock(&self, wallet: StoredWallet) -> WalletInfo {
        let info = WalletInfo::from(&wallet);
        let (_, reconciler) = self.activate(wallet);
        reconciler.initialize_baseline().await;
        log::info!("unlocked wallet {}", info.address);
        info
    }

    /// Binds `wallet` to the chain and makes it the unlocked account.
    fn activate(&self, wallet: StoredWallet) -> (AccountHandle, Arc<BalanceReconciler>) {
        let account = AccountHandle::new(
            wallet.key_material.clone(),
            self.config.account_class_hash,
            Arc::clone(&self.chain),
        );
        let reconciler = Arc::new(BalanceReconciler::new(
            account.clone(),
            self.config.tokens.clone(),
            Arc::clone(&self.prices),
            self.config.poll_interval,
        ));

        let previous = {
            let mut inner = self.lock();
            inner.state = SessionState::Unlocked;
            inner.active.replace(ActiveWallet {
                wallet,
                account: account.clone(),
                reconciler: Arc::clone(&reconciler),
            })
        };
        if let Some(previous) = previous {
            previous.reconciler.shutdown();
        }
        (account, reconciler)
    }

    fn account(&self) -> Result<AccountHandle, WalletError> {
        self.lock()
            .active
            .as_ref()
            .map(|active| active.account.clone())
            .ok_or(WalletError::NotUnlocked)
    }

    fn reconciler(&self) -> Result<Arc<BalanceReconciler>, WalletError> {
        self.lock()
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.reconciler))
            .ok_or(WalletError::NotUnlocked)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
