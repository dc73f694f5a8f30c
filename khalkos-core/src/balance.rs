//! Token balances, USD valuation and change polling for an unlocked account.

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use futures::future::join_all;
use ruint::aliases::U256;
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::{
    address::parse_felt,
    amount::format_units,
    chain::AccountHandle,
    error::WalletError,
    prices::PriceFeed,
    tokens::{find_by_symbol, PortfolioSnapshot, TokenBalance, TokenInfo},
};

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// One token whose raw balance moved between two polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDelta {
    /// Token symbol.
    pub symbol: String,
    /// Last known raw balance, `None` when the token had no baseline yet.
    pub previous: Option<String>,
    /// Newly observed raw balance.
    pub current: String,
}

/// Notification sent to listeners when at least one balance changed.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceChange {
    /// The tokens that changed.
    pub deltas: Vec<BalanceDelta>,
    /// Every balance observed in the same pass.
    pub balances: Vec<TokenBalance>,
}

/// Receives balance change notifications.
///
/// Called synchronously from the polling task; implementations must not block.
pub trait BalanceListener: Send + Sync {
    /// Called once per polling pass that observed a change.
    fn on_balance_change(&self, change: &BalanceChange);
}

impl<F> BalanceListener for F
where
    F: Fn(&BalanceChange) + Send + Sync,
{
    fn on_balance_change(&self, change: &BalanceChange) {
        self(change);
    }
}

/// Reads balances for the token registry, joins them with prices and polls for changes.
///
/// Polling runs as a tokio task while at least one listener is registered. The task
/// only holds a weak reference to the reconciler and is aborted when the last listener
/// is removed, on [`shutdown`](Self::shutdown) and on drop.
pub struct BalanceReconciler {
    inner: Arc<Inner>,
}

struct Inner {
    account: AccountHandle,
    tokens: Vec<TokenInfo>,
    prices: Arc<dyn PriceFeed>,
    poll_interval: Duration,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_known: HashMap<String, String>,
    listeners: Vec<(ListenerId, Arc<dyn BalanceListener>)>,
    next_listener_id: u64,
    poller: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for BalanceReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceReconciler")
            .field("account", &self.inner.account)
            .field("tokens", &self.inner.tokens.len())
            .field("polling", &self.is_polling())
            .finish_non_exhaustive()
    }
}

impl BalanceReconciler {
    /// Creates a reconciler for `account` over `tokens`.
    #[must_use]
    pub fn new(
        account: AccountHandle,
        tokens: Vec<TokenInfo>,
        prices: Arc<dyn PriceFeed>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                account,
                tokens,
                prices,
                poll_interval,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Supported tokens, in display order.
    #[must_use]
    pub fn tokens(&self) -> &[TokenInfo] {
        &self.inner.tokens
    }

    /// Balances of every token. A token whose read fails is reported as zero.
    pub async fn balances(&self) -> Vec<TokenBalance> {
        self.inner
            .fetch_balances()
            .await
            .into_iter()
            .map(|(token, raw)| raw.map_or_else(|| TokenBalance::zero(token.clone()), |raw| balance(token, raw)))
            .collect()
    }

    /// Balance of one token, looked up by symbol (case-insensitive).
    ///
    /// # Errors
    /// Returns `InvalidInput` for an unsupported symbol and propagates chain errors.
    pub async fn token_balance(&self, symbol: &str) -> Result<TokenBalance, WalletError> {
        let token = find_by_symbol(&self.inner.tokens, symbol).ok_or_else(|| {
            WalletError::invalid_input("symbol", format!("token {symbol} is not supported"))
        })?;
        let contract = parse_felt("contract_address", &token.contract_address)?;
        let raw = self.inner.account.balance_of(contract).await?;
        Ok(balance(token, raw))
    }

    /// Balances joined with USD prices.
    ///
    /// Balances and prices are fetched concurrently. A failing price feed degrades to
    /// zero prices and sets `price_data_failed`; balances are returned either way.
    pub async fn balances_with_prices(&self) -> PortfolioSnapshot {
        let (balances, prices) = futures::join!(self.balances(), self.inner.fetch_prices());

        let mut total_usd = 0.0;
        let balances: Vec<TokenBalance> = balances
            .into_iter()
            .map(|mut balance| {
                let price = prices
                    .get(&balance.token.price_feed_id)
                    .copied()
                    .unwrap_or(0.0);
                let amount = balance.formatted_balance.parse::<f64>().unwrap_or(0.0);
                let value = amount * price;
                total_usd += value;
                balance.usd_price = Some(price);
                balance.usd_value = Some(value);
                balance
            })
            .collect();

        #[allow(clippy::float_cmp)]
        let price_data_failed =
            !balances.is_empty() && balances.iter().all(|b| b.usd_price == Some(0.0));
        if price_data_failed {
            log::warn!("price feed returned no usable prices");
        }

        PortfolioSnapshot {
            balances,
            total_usd,
            price_data_failed,
        }
    }

    /// Records the current balances as the change detection baseline.
    pub async fn initialize_baseline(&self) {
        let observed = self.inner.fetch_balances().await;
        let mut state = self.inner.lock_state();
        for (token, raw) in observed {
            if let Some(raw) = raw {
                state.last_known.insert(token.symbol.clone(), raw.to_string());
            }
        }
        log::debug!("balance baseline set for {} tokens", state.last_known.len());
    }

    /// Runs one polling pass and notifies listeners when a balance changed.
    ///
    /// Returns `true` if a change was observed.
    pub async fn check_for_changes(&self) -> bool {
        self.inner.check_for_changes().await
    }

    /// Registers a listener. The first listener starts polling.
    pub fn add_listener(&self, listener: Arc<dyn BalanceListener>) -> ListenerId {
        let mut state = self.inner.lock_state();
        let id = ListenerId(state.next_listener_id);
        state.next_listener_id += 1;
        state.listeners.push((id, listener));
        if state.listeners.len() == 1 {
            start_polling(&self.inner, &mut state);
        }
        id
    }

    /// Removes a listener. Removing the last one stops polling.
    ///
    /// Returns `false` if the id was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.inner.lock_state();
        let before = state.listeners.len();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
        let removed = state.listeners.len() != before;
        if removed && state.listeners.is_empty() {
            stop_polling(&mut state);
        }
        removed
    }

    /// Whether the polling task is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner
            .lock_state()
            .poller
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.lock_state().listeners.len()
    }

    /// Stops polling and forgets listeners and the baseline.
    pub fn shutdown(&self) {
        let mut state = self.inner.lock_state();
        stop_polling(&mut state);
        state.listeners.clear();
        state.last_known.clear();
    }
}

impl Drop for BalanceReconciler {
    fn drop(&mut self) {
        stop_polling(&mut self.inner.lock_state());
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn fetch_balances(&self) -> Vec<(&TokenInfo, Option<U256>)> {
        let reads = self.tokens.iter().map(|token| async move {
            let raw = match parse_felt("contract_address", &token.contract_address) {
                Ok(contract) => self.account.balance_of(contract).await,
                Err(err) => Err(err),
            };
            match raw {
                Ok(raw) => (token, Some(raw)),
                Err(err) => {
                    log::warn!("failed to read {} balance: {err}", token.symbol);
                    (token, None)
                }
            }
        });
        join_all(reads).await
    }

    async fn fetch_prices(&self) -> HashMap<String, f64> {
        let ids: Vec<String> = self
            .tokens
            .iter()
            .map(|token| token.price_feed_id.clone())
            .collect();
        match self.prices.usd_prices(&ids).await {
            Ok(prices) => prices,
            Err(err) => {
                log::warn!("price feed unavailable: {err}");
                HashMap::new()
            }
        }
    }

    async fn check_for_changes(&self) -> bool {
        let observed = self.fetch_balances().await;

        let (change, listeners) = {
            let mut state = self.lock_state();
            let mut deltas = Vec::new();
            for (token, raw) in &observed {
                let Some(raw) = raw else { continue };
                let current = raw.to_string();
                let previous = state.last_known.get(&token.symbol).cloned();
                if previous.as_deref() != Some(current.as_str()) {
                    state.last_known.insert(token.symbol.clone(), current.clone());
                    deltas.push(BalanceDelta {
                        symbol: token.symbol.clone(),
                        previous,
                        current,
                    });
                }
            }
            if deltas.is_empty() {
                return false;
            }
            let balances = observed
                .into_iter()
                .map(|(token, raw)| {
                    raw.map_or_else(|| TokenBalance::zero(token.clone()), |raw| balance(token, raw))
                })
                .collect();
            let listeners: Vec<_> = state
                .listeners
                .iter()
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            (BalanceChange { deltas, balances }, listeners)
        };

        for delta in &change.deltas {
            log::info!(
                "balance change for {}: {} -> {}",
                delta.symbol,
                delta.previous.as_deref().unwrap_or("unknown"),
                delta.current
            );
        }

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_balance_change(&change))).is_err() {
                log::error!("balance listener panicked");
            }
        }
        true
    }
}

fn balance(token: &TokenInfo, raw: U256) -> TokenBalance {
    let formatted_balance = format_units(raw, token.decimals).unwrap_or_else(|err| {
        log::warn!("cannot format {} balance: {err}", token.symbol);
        raw.to_string()
    });
    TokenBalance {
        token: token.clone(),
        raw_balance: raw.to_string(),
        formatted_balance,
        usd_price: None,
        usd_value: None,
    }
}

fn start_polling(inner: &Arc<Inner>, state: &mut State) {
    if state.poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        log::warn!("no tokio runtime, balance polling disabled");
        return;
    };

    let weak: Weak<Inner> = Arc::downgrade(inner);
    let period = inner.poll_interval;
    log::debug!("starting balance polling every {period:?}");

    state.poller = Some(runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.check_for_changes().await;
        }
    }));
}

fn stop_polling(state: &mut State) {
    if let Some(handle) = state.poller.take() {
        handle.abort();
        log::debug!("stopped balance polling");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use secrecy::SecretString;
    use starknet_core::types::Felt;

    use super::*;
    use crate::{
        chain::test_support::FakeChain,
        derivation::{derive_private_key, key_material_from_private_key},
        tokens::mainnet_tokens,
    };

    struct FixedPrices(Option<HashMap<String, f64>>);

    #[async_trait]
    impl PriceFeed for FixedPrices {
        async fn usd_prices(&self, _ids: &[String]) -> Result<HashMap<String, f64>, WalletError> {
            self.0.clone().ok_or_else(|| WalletError::NetworkError {
                url: "prices".to_string(),
                status: Some(429),
                error: "rate limited".to_string(),
            })
        }
    }

    fn prices(entries: &[(&str, f64)]) -> Arc<FixedPrices> {
        Arc::new(FixedPrices(Some(
            entries
                .iter()
                .map(|(id, price)| ((*id).to_string(), *price))
                .collect(),
        )))
    }

    fn reconciler(chain: Arc<FakeChain>, feed: Arc<dyn PriceFeed>) -> BalanceReconciler {
        let key = derive_private_key("1001", &SecretString::from("salt"));
        let account = AccountHandle::new(
            key_material_from_private_key(key, Felt::from(7_u64)),
            Felt::from(7_u64),
            chain,
        );
        BalanceReconciler::new(account, mainnet_tokens(), feed, Duration::from_secs(10))
    }

    fn address_of(symbol: &str) -> String {
        find_by_symbol(&mainnet_tokens(), symbol)
            .unwrap()
            .contract_address
            .clone()
    }

    #[tokio::test]
    async fn test_balances_with_prices_values_portfolio() {
        let chain = Arc::new(FakeChain::new());
        chain.set_balance(&address_of("ETH"), 1_500_000_000_000_000_000);
        chain.set_balance(&address_of("USDC"), 2_500_000);
        let reconciler = reconciler(chain, prices(&[("ethereum", 2000.0), ("usd-coin", 1.0)]));

        let snapshot = reconciler.balances_with_prices().await;

        assert!(!snapshot.price_data_failed);
        assert_eq!(snapshot.balances.len(), 5);
        let eth = &snapshot.balances[0];
        assert_eq!(eth.formatted_balance, "1.5");
        assert_eq!(eth.usd_value, Some(3000.0));
        assert!((snapshot.total_usd - 3002.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_all_zero_prices_flag_price_failure() {
        let chain = Arc::new(FakeChain::new());
        chain.set_balance(&address_of("ETH"), 1_000_000_000_000_000_000);
        let reconciler = reconciler(chain, Arc::new(FixedPrices(None)));

        let snapshot = reconciler.balances_with_prices().await;

        assert!(snapshot.price_data_failed);
        assert!(snapshot.balances.iter().all(|b| b.usd_value == Some(0.0)));
        assert_eq!(snapshot.total_usd, 0.0);
        assert_eq!(snapshot.balances[0].raw_balance, "1000000000000000000");
        assert_eq!(snapshot.balances[0].formatted_balance, "1");
    }

    #[tokio::test]
    async fn test_failing_token_degrades_to_zero() {
        let chain = Arc::new(FakeChain::new());
        chain.set_balance(&address_of("ETH"), 5);
        chain.fail_token(&address_of("STRK"));
        let reconciler = reconciler(chain, prices(&[]));

        let balances = reconciler.balances().await;

        assert_eq!(balances[0].raw_balance, "5");
        assert_eq!(balances[1].raw_balance, "0");
        assert_eq!(balances[1].formatted_balance, "0");
    }

    #[tokio::test]
    async fn test_token_balance_by_symbol() {
        let chain = Arc::new(FakeChain::new());
        chain.set_balance(&address_of("WBTC"), 12_345_678);
        let reconciler = reconciler(chain, prices(&[]));

        let wbtc = reconciler.token_balance("wbtc").await.unwrap();
        assert_eq!(wbtc.formatted_balance, "0.123456");
        assert!(matches!(
            reconciler.token_balance("DOGE").await,
            Err(WalletError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_change_fires_nothing_and_change_fires_once() {
        let chain = Arc::new(FakeChain::new());
        chain.set_balance(&address_of("ETH"), 1);
        let reconciler = reconciler(chain.clone(), prices(&[]));
        reconciler.initialize_baseline().await;

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let (a, b) = (first.clone(), second.clone());
        reconciler.add_listener(Arc::new(move |_: &BalanceChange| {
            a.fetch_add(1, Ordering::SeqCst);
        }));
        reconciler.add_listener(Arc::new(move |change: &BalanceChange| {
            assert_eq!(change.deltas.len(), 1);
            assert_eq!(change.deltas[0].symbol, "ETH");
            assert_eq!(change.deltas[0].previous.as_deref(), Some("1"));
            b.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(!reconciler.check_for_changes().await);
        assert_eq!(first.load(Ordering::SeqCst), 0);

        chain.set_balance(&address_of("ETH"), 2);
        assert!(reconciler.check_for_changes().await);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        assert!(!reconciler.check_for_changes().await);
        assert_eq!(first.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_reads_are_not_changes() {
        let chain = Arc::new(FakeChain::new());
        chain.set_balance(&address_of("STRK"), 9);
        let reconciler = reconciler(chain.clone(), prices(&[]));
        reconciler.initialize_baseline().await;

        chain.fail_token(&address_of("STRK"));
        assert!(!reconciler.check_for_changes().await);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_starve_others() {
        let chain = Arc::new(FakeChain::new());
        let reconciler = reconciler(chain.clone(), prices(&[]));
        reconciler.initialize_baseline().await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        reconciler.add_listener(Arc::new(|_: &BalanceChange| panic!("listener bug")));
        reconciler.add_listener(Arc::new(move |_: &BalanceChange| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        chain.set_balance(&address_of("ETH"), 3);
        assert!(reconciler.check_for_changes().await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_follows_listener_count() {
        let chain = Arc::new(FakeChain::new());
        let reconciler = reconciler(chain.clone(), prices(&[]));
        let tokens = reconciler.tokens().len();
        assert!(!reconciler.is_polling());

        let first = reconciler.add_listener(Arc::new(|_: &BalanceChange| {}));
        let second = reconciler.add_listener(Arc::new(|_: &BalanceChange| {}));
        assert!(reconciler.is_polling());

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(chain.balance_calls(), tokens);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(chain.balance_calls(), tokens * 2);

        assert!(reconciler.remove_listener(first));
        assert!(reconciler.is_polling());
        assert!(reconciler.remove_listener(second));
        assert!(!reconciler.is_polling());
        assert!(!reconciler.remove_listener(second));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(chain.balance_calls(), tokens * 2);

        let again = reconciler.add_listener(Arc::new(|_: &BalanceChange| {}));
        assert!(reconciler.is_polling());
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(chain.balance_calls(), tokens * 3);
        reconciler.remove_listener(again);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_polling() {
        let chain = Arc::new(FakeChain::new());
        let reconciler = reconciler(chain.clone(), prices(&[]));
        reconciler.add_listener(Arc::new(|_: &BalanceChange| {}));
        reconciler.shutdown();

        assert!(!reconciler.is_polling());
        assert_eq!(reconciler.listener_count(), 0);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(chain.balance_calls(), 0);
    }
}
