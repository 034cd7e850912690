//! Reconciler end-to-end scenarios
//!
//! Drives the full state machine against an in-memory store and scripted
//! chain state: happy path over the attested bridge, the tunnel path with a
//! delayed output root and a simulated challenge clock, crash-resume with
//! no duplicated transactions, L1 swap failover between providers, and the
//! no-opportunity case.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use eyre::{eyre, Result};
use tokio::sync::RwLock;

use evmkit_rs::registry::{BridgeRoute, TokenInfo, TokenRegistry};
use evmkit_rs::withdrawal::{withdrawal_hash, WithdrawalEnvelope};
use vcred_keeper::bridges::{BridgeDirection, BridgeError, BridgeProvider, BridgeSend};
use vcred_keeper::config::{KeeperConfig, TradingConfig};
use vcred_keeper::db::Store;
use vcred_keeper::gateway::{ChainGateway, PreparedTx, TxOutcome};
use vcred_keeper::health::ProviderHealth;
use vcred_keeper::logsink::LogSinks;
use vcred_keeper::notify::Notifier;
use vcred_keeper::planner::Planner;
use vcred_keeper::reconciler::{ControlState, Reconciler, SharedControl};
use vcred_keeper::swaps::{SwapProvider, SwapQuote, SwapRequest};
use vcred_keeper::types::{CycleState, StepKind};

const L1: u64 = 1;
const L2: u64 = 1135;

fn wallet() -> Address {
    Address::repeat_byte(0x77)
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// Tick times 30 seconds apart, like the production interval.
fn tick_time(n: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(30 * n)
}

// ============ Mock chain gateway ============

/// Mock swaps encode their effect in calldata: tag byte, token_in,
/// token_out, amount_in, amount_out. The gateway applies the balance
/// movement when the "receipt" lands.
const MOCK_SWAP_TAG: u8 = 0xAB;

fn encode_mock_swap(
    token_in: Address,
    token_out: Address,
    amount_in: U256,
    amount_out: U256,
) -> Bytes {
    let mut data = vec![MOCK_SWAP_TAG];
    data.extend_from_slice(token_in.as_slice());
    data.extend_from_slice(token_out.as_slice());
    data.extend_from_slice(&amount_in.to_be_bytes::<32>());
    data.extend_from_slice(&amount_out.to_be_bytes::<32>());
    Bytes::from(data)
}

struct MockGateway {
    balances: Mutex<HashMap<(u64, Address), U256>>,
    allowances: Mutex<HashMap<(u64, Address, Address), U256>>,
    /// Simulation reverts for any tx targeting these addresses
    revert_simulation_for: Mutex<HashSet<Address>>,
    /// Swap effects not yet applied, by tx hash
    pending: Mutex<HashMap<B256, (u64, Bytes)>>,
    hash_counter: AtomicU64,
    sends: AtomicU32,
}

impl MockGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            balances: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            revert_simulation_for: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
            hash_counter: AtomicU64::new(1),
            sends: AtomicU32::new(0),
        })
    }

    fn set_balance(&self, chain: u64, token: Address, amount: U256) {
        self.balances.lock().unwrap().insert((chain, token), amount);
    }

    fn balance(&self, chain: u64, token: Address) -> U256 {
        *self
            .balances
            .lock()
            .unwrap()
            .get(&(chain, token))
            .unwrap_or(&U256::ZERO)
    }

    fn credit(&self, chain: u64, token: Address, amount: U256) {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry((chain, token)).or_insert(U256::ZERO);
        *entry += amount;
    }

    fn debit(&self, chain: u64, token: Address, amount: U256) {
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry((chain, token)).or_insert(U256::ZERO);
        *entry = entry.saturating_sub(amount);
    }

    fn revert_simulations_for(&self, target: Address) {
        self.revert_simulation_for.lock().unwrap().insert(target);
    }

    fn next_hash(&self) -> B256 {
        let n = self.hash_counter.fetch_add(1, Ordering::SeqCst);
        keccak256(n.to_be_bytes())
    }

    fn fake_outcome(&self) -> TxOutcome {
        TxOutcome {
            tx_hash: self.next_hash(),
            success: true,
            gas_used: 50_000,
            effective_gas_price: 1_000_000_000,
        }
    }

    fn send_count(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    fn apply_mock_swap(&self, chain: u64, data: &[u8]) {
        if data.first() != Some(&MOCK_SWAP_TAG) || data.len() != 1 + 20 + 20 + 32 + 32 {
            return;
        }
        let token_in = Address::from_slice(&data[1..21]);
        let token_out = Address::from_slice(&data[21..41]);
        let amount_in = U256::from_be_slice(&data[41..73]);
        let amount_out = U256::from_be_slice(&data[73..105]);
        self.debit(chain, token_in, amount_in);
        self.credit(chain, token_out, amount_out);
    }
}

#[async_trait]
impl ChainGateway for MockGateway {
    fn wallet_address(&self) -> Address {
        wallet()
    }

    async fn native_balance(&self, _chain_id: u64) -> Result<U256> {
        Ok(U256::from(10u64).pow(U256::from(18u64)))
    }

    async fn token_balance(&self, chain_id: u64, token: Address) -> Result<U256> {
        Ok(self.balance(chain_id, token))
    }

    async fn token_allowance(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
    ) -> Result<U256> {
        Ok(*self
            .allowances
            .lock()
            .unwrap()
            .get(&(chain_id, token, spender))
            .unwrap_or(&U256::ZERO))
    }

    async fn approve(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxOutcome> {
        self.allowances
            .lock()
            .unwrap()
            .insert((chain_id, token, spender), amount);
        Ok(self.fake_outcome())
    }

    async fn simulate(&self, _chain_id: u64, tx: &PreparedTx) -> Result<()> {
        if self.revert_simulation_for.lock().unwrap().contains(&tx.to) {
            return Err(eyre!("simulation failed: execution reverted"));
        }
        Ok(())
    }

    async fn send(&self, chain_id: u64, tx: &PreparedTx) -> Result<B256> {
        let hash = self.next_hash();
        self.pending
            .lock()
            .unwrap()
            .insert(hash, (chain_id, tx.data.clone()));
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(hash)
    }

    async fn wait_for_receipt(&self, _chain_id: u64, tx_hash: B256) -> Result<TxOutcome> {
        if let Some((chain, data)) = self.pending.lock().unwrap().remove(&tx_hash) {
            self.apply_mock_swap(chain, &data);
        }
        Ok(TxOutcome {
            tx_hash,
            success: true,
            gas_used: 50_000,
            effective_gas_price: 1_000_000_000,
        })
    }

    async fn get_receipt(&self, chain_id: u64, tx_hash: &str) -> Result<Option<TxOutcome>> {
        let hash: B256 = tx_hash.parse()?;
        Ok(Some(self.wait_for_receipt(chain_id, hash).await?))
    }

    async fn reset_nonce(&self, _chain_id: u64) {}

    async fn block_number(&self, _chain_id: u64) -> Result<u64> {
        Ok(1_000)
    }
}

// ============ Mock swap provider ============

struct MockSwapProvider {
    provider_name: &'static str,
    chains: Vec<u64>,
    router: Address,
    /// (chain, token_in, token_out) -> (numerator, denominator)
    rates: Mutex<HashMap<(u64, Address, Address), (U256, U256)>>,
    /// Quotes start failing after this many successful calls
    fail_quotes_after: Option<u32>,
    quote_calls: AtomicU32,
}

impl MockSwapProvider {
    fn new(provider_name: &'static str, chains: Vec<u64>, router_byte: u8) -> Arc<Self> {
        Arc::new(Self {
            provider_name,
            chains,
            router: Address::repeat_byte(router_byte),
            rates: Mutex::new(HashMap::new()),
            fail_quotes_after: None,
            quote_calls: AtomicU32::new(0),
        })
    }

    fn new_flaky(
        provider_name: &'static str,
        chains: Vec<u64>,
        router_byte: u8,
        fail_after: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider_name,
            chains,
            router: Address::repeat_byte(router_byte),
            rates: Mutex::new(HashMap::new()),
            fail_quotes_after: Some(fail_after),
            quote_calls: AtomicU32::new(0),
        })
    }

    fn set_rate(&self, chain: u64, token_in: Address, token_out: Address, num: u64, den: u64) {
        self.rates
            .lock()
            .unwrap()
            .insert((chain, token_in, token_out), (U256::from(num), U256::from(den)));
    }
}

#[async_trait]
impl SwapProvider for MockSwapProvider {
    fn name(&self) -> &'static str {
        self.provider_name
    }

    fn supports_chain(&self, chain_id: u64) -> bool {
        self.chains.contains(&chain_id)
    }

    async fn quote(&self, request: &SwapRequest) -> Result<SwapQuote> {
        let calls = self.quote_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.fail_quotes_after {
            if calls > limit {
                return Err(eyre!("502"));
            }
        }

        let rates = self.rates.lock().unwrap();
        let (num, den) = rates
            .get(&(request.chain_id, request.token_in, request.token_out))
            .ok_or_else(|| eyre!("no route configured for pair"))?;
        let amount_out = request.amount_in * num / den;

        Ok(SwapQuote {
            provider: self.provider_name,
            chain_id: request.chain_id,
            token_in: request.token_in,
            token_out: request.token_out,
            amount_in: request.amount_in,
            amount_out,
            tx: PreparedTx {
                to: self.router,
                data: encode_mock_swap(
                    request.token_in,
                    request.token_out,
                    request.amount_in,
                    amount_out,
                ),
                value: U256::ZERO,
            },
            spender: self.router,
            quoted_at: Utc::now(),
            price_impact_bps: None,
            order_uid: None,
        })
    }

    async fn check_health(&self) -> ProviderHealth {
        ProviderHealth::ok(10)
    }
}

// ============ Mock bridge ============

struct MockBridge {
    bridge_name: &'static str,
    bridge_route: BridgeRoute,
    gateway: Arc<MockGateway>,
    registry: Arc<TokenRegistry>,
    /// Attested: whether the destination is credited at send time
    credit_on_send: bool,
    /// Tunnel: whether the L2 output root has been published
    output_ready: AtomicBool,
    proved: AtomicBool,
    /// Amount and destination awaiting finalize (tunnel) or a manual credit
    in_flight: Mutex<Option<(u64, Address, U256)>>,
    send_calls: AtomicU32,
}

impl MockBridge {
    fn attested(
        gateway: Arc<MockGateway>,
        registry: Arc<TokenRegistry>,
        credit_on_send: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            bridge_name: "mock-attested",
            bridge_route: BridgeRoute::Attested,
            gateway,
            registry,
            credit_on_send,
            output_ready: AtomicBool::new(false),
            proved: AtomicBool::new(false),
            in_flight: Mutex::new(None),
            send_calls: AtomicU32::new(0),
        })
    }

    fn tunnel(gateway: Arc<MockGateway>, registry: Arc<TokenRegistry>) -> Arc<Self> {
        Arc::new(Self {
            bridge_name: "mock-tunnel",
            bridge_route: BridgeRoute::Tunnel,
            gateway,
            registry,
            credit_on_send: false,
            output_ready: AtomicBool::new(false),
            proved: AtomicBool::new(false),
            in_flight: Mutex::new(None),
            send_calls: AtomicU32::new(0),
        })
    }

    fn publish_output_root(&self) {
        self.output_ready.store(true, Ordering::SeqCst);
    }

    fn send_count(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Deliver an in-flight transfer to its destination (attested bridges
    /// complete off-keeper; tests trigger it explicitly).
    fn deliver(&self) {
        if let Some((chain, token, amount)) = self.in_flight.lock().unwrap().take() {
            self.gateway.credit(chain, token, amount);
        }
    }
}

#[async_trait]
impl BridgeProvider for MockBridge {
    fn name(&self) -> &'static str {
        self.bridge_name
    }

    fn route(&self) -> BridgeRoute {
        self.bridge_route
    }

    async fn estimate_fee(
        &self,
        _token: &TokenInfo,
        _amount: U256,
        _direction: BridgeDirection,
    ) -> std::result::Result<U256, BridgeError> {
        Ok(U256::ZERO)
    }

    async fn send(
        &self,
        token: &TokenInfo,
        amount: U256,
        direction: BridgeDirection,
    ) -> std::result::Result<BridgeSend, BridgeError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);

        let (src_chain, dest_chain) = match direction {
            BridgeDirection::L2ToL1 => (L2, L1),
            BridgeDirection::L1ToL2 => (L1, L2),
        };
        let src = self
            .registry
            .address_on(token, src_chain)
            .map_err(BridgeError::other)?;
        let dest = self
            .registry
            .address_on(token, dest_chain)
            .map_err(BridgeError::other)?;

        self.gateway.debit(src_chain, src, amount);
        if self.credit_on_send {
            self.gateway.credit(dest_chain, dest, amount);
        } else {
            *self.in_flight.lock().unwrap() = Some((dest_chain, dest, amount));
        }

        let outcome = self.gateway.fake_outcome();
        match self.bridge_route {
            BridgeRoute::Attested => Ok(BridgeSend {
                outcome,
                message_guid: Some(B256::repeat_byte(0x09)),
                withdrawal_hash: None,
                envelope: None,
            }),
            BridgeRoute::Tunnel => {
                let envelope = WithdrawalEnvelope {
                    nonce: U256::from(1u64),
                    sender: wallet(),
                    target: wallet(),
                    value: U256::ZERO,
                    gas_limit: U256::from(200_000u64),
                    data: Bytes::default(),
                    l2_block_number: 500,
                };
                let hash = withdrawal_hash(&envelope);
                Ok(BridgeSend {
                    outcome,
                    message_guid: None,
                    withdrawal_hash: Some(hash),
                    envelope: Some(envelope),
                })
            }
        }
    }

    async fn prove(
        &self,
        _envelope: &WithdrawalEnvelope,
    ) -> std::result::Result<TxOutcome, BridgeError> {
        if !self.output_ready.load(Ordering::SeqCst) {
            return Err(BridgeError::OutputNotReady);
        }
        self.proved.store(true, Ordering::SeqCst);
        Ok(self.gateway.fake_outcome())
    }

    async fn finalize(
        &self,
        _envelope: &WithdrawalEnvelope,
    ) -> std::result::Result<TxOutcome, BridgeError> {
        if !self.proved.load(Ordering::SeqCst) {
            return Err(BridgeError::NotProven);
        }
        self.deliver();
        Ok(self.gateway.fake_outcome())
    }

    async fn is_proven(
        &self,
        _envelope: &WithdrawalEnvelope,
    ) -> std::result::Result<bool, BridgeError> {
        Ok(self.proved.load(Ordering::SeqCst))
    }

    async fn detect_arrival(
        &self,
        token: &TokenInfo,
        dest_chain_id: u64,
        min_expected: U256,
    ) -> std::result::Result<bool, BridgeError> {
        let address = self
            .registry
            .address_on(token, dest_chain_id)
            .map_err(BridgeError::other)?;
        Ok(self.gateway.balance(dest_chain_id, address) >= min_expected)
    }

    async fn check_health(&self) -> ProviderHealth {
        ProviderHealth::ok(10)
    }
}

// ============ Harness ============

struct Harness {
    store: Store,
    registry: Arc<TokenRegistry>,
    attested: Arc<MockBridge>,
    tunnel: Arc<MockBridge>,
    control: SharedControl,
    reconciler: Reconciler,
}

fn trading_config() -> TradingConfig {
    TradingConfig {
        min_swap_input: U256::from(10_000_000u64),
        max_swap_input_cap: U256::from(10_000_000_000u64),
        min_profit: U256::from(10_000u64),
        quotes_ttl_ms: 30_000,
        max_quote_calls: 15,
        max_active_cycles: 1,
    }
}

fn keeper_config() -> KeeperConfig {
    KeeperConfig {
        reconcile_interval_ms: 30_000,
        actions_per_tick: 3,
        receipt_timeout_ms: 120_000,
        challenge_period_secs: 86_400,
        bridge_arrival_tolerance_bps: 200,
    }
}

async fn build_harness(
    store: Store,
    gateway: Arc<MockGateway>,
    providers: Vec<Arc<MockSwapProvider>>,
    reference: Arc<MockSwapProvider>,
    attested_credit_on_send: bool,
) -> Harness {
    let registry = Arc::new(TokenRegistry::mainnet());
    let gateway_dyn: Arc<dyn ChainGateway> = gateway.clone();

    let attested = MockBridge::attested(gateway.clone(), registry.clone(), attested_credit_on_send);
    let tunnel = MockBridge::tunnel(gateway.clone(), registry.clone());

    let swap_providers: Vec<Arc<dyn SwapProvider>> = providers
        .iter()
        .map(|p| p.clone() as Arc<dyn SwapProvider>)
        .collect();

    let planner = Planner::new(
        swap_providers.clone(),
        reference as Arc<dyn SwapProvider>,
        registry.clone(),
        wallet(),
        50,
    );

    let sinks_dir = std::env::temp_dir().join(format!(
        "keeper-test-{}-{}",
        std::process::id(),
        rand_suffix()
    ));
    let sinks = Arc::new(LogSinks::open(&sinks_dir).unwrap());
    let control: SharedControl = Arc::new(RwLock::new(ControlState::default()));

    let reconciler = Reconciler::new(
        store.clone(),
        gateway_dyn,
        swap_providers,
        attested.clone() as Arc<dyn BridgeProvider>,
        tunnel.clone() as Arc<dyn BridgeProvider>,
        planner,
        registry.clone(),
        Arc::new(Notifier::new(None)),
        sinks,
        control.clone(),
        trading_config(),
        keeper_config(),
    );

    Harness {
        store,
        registry,
        attested,
        tunnel,
        control,
        reconciler,
    }
}

fn rand_suffix() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos() as u64
}

fn vcred(registry: &TokenRegistry) -> Address {
    registry.source_token().l2_address
}

fn usdc_l1(registry: &TokenRegistry) -> Address {
    registry.usdc().l1_address
}

fn usdc_l2(registry: &TokenRegistry) -> Address {
    registry.usdc().l2_address
}

/// Configure the happy-path WETH market: L2 beats the L1 reference by
/// 125 bps, the L1 swap realizes the edge, and the close swap is 1:1.
fn set_weth_market(agg: &MockSwapProvider, reference: &MockSwapProvider, registry: &TokenRegistry) {
    let weth = registry.get("WETH").unwrap();
    // 10 VCRED -> 0.00405 WETH on L2
    agg.set_rate(L2, vcred(registry), weth.l2_address, 405_000_000, 1);
    // 10 USDC -> 0.004 WETH reference on L1
    reference.set_rate(L1, usdc_l1(registry), weth.l1_address, 400_000_000, 1);
    // 0.00405 WETH -> 10.1 USDC on L1
    agg.set_rate(L1, weth.l1_address, usdc_l1(registry), 101, 40_500_000_000);
    // USDC -> VCRED closes 1:1
    agg.set_rate(L2, usdc_l2(registry), vcred(registry), 1, 1);
}

/// Make WETH unattractive so only WBTC qualifies, with a 101 bps edge.
fn set_wbtc_market(agg: &MockSwapProvider, reference: &MockSwapProvider, registry: &TokenRegistry) {
    let weth = registry.get("WETH").unwrap();
    let wbtc = registry.get("WBTC").unwrap();

    agg.set_rate(L2, vcred(registry), weth.l2_address, 395_000_000, 1);
    reference.set_rate(L1, usdc_l1(registry), weth.l1_address, 400_000_000, 1);

    // 10 VCRED -> 10_000 sats on L2; reference 9_900 sats
    agg.set_rate(L2, vcred(registry), wbtc.l2_address, 1, 1000);
    reference.set_rate(L1, usdc_l1(registry), wbtc.l1_address, 99, 100_000);
    // 10_000 sats -> 10.05 USDC on L1
    agg.set_rate(L1, wbtc.l1_address, usdc_l1(registry), 1005, 1);
    agg.set_rate(L2, usdc_l2(registry), vcred(registry), 1, 1);
}

async fn cycle_state(store: &Store, id: i64) -> CycleState {
    store.get_cycle(id).await.unwrap().unwrap().state().unwrap()
}

// ============ Scenario 1: happy path, attested bridge ============

#[tokio::test]
async fn test_happy_path_attested_bridge() {
    let store = Store::open_in_memory().await.unwrap();
    let gateway = MockGateway::new();
    let agg = MockSwapProvider::new("agg", vec![L1, L2], 0x10);
    let reference = MockSwapProvider::new("refq", vec![L1], 0x11);

    let harness = build_harness(store, gateway.clone(), vec![agg.clone()], reference.clone(), true).await;
    set_weth_market(&agg, &reference, &harness.registry);

    // Seed: 10 VCRED on L2
    gateway.set_balance(L2, vcred(&harness.registry), U256::from(10_000_000u64));

    // Tick 1: opportunity detected, cycle opened, L2 swap confirmed
    let report = harness.reconciler.tick(tick_time(1)).await;
    let cycle_id = report.opened_cycle.expect("cycle should open");
    let cycle = harness.store.get_cycle(cycle_id).await.unwrap().unwrap();
    assert_eq!(cycle.input_amount, "10000000");
    assert_eq!(cycle.token, "WETH");
    assert_eq!(cycle.state().unwrap(), CycleState::L2SwapDone);
    assert_eq!(cycle.x_out.as_deref(), Some("4050000000000000"));

    // Ticks walk the attested path to completion
    let expected = [
        CycleState::BridgeOutSent,
        CycleState::OnL1,
        CycleState::L1SwapDone,
        CycleState::UsdcBridgeBackSent,
        CycleState::OnL2Usdc,
        CycleState::L2CloseSwapDone,
        CycleState::Completed,
    ];
    for (i, want) in expected.iter().enumerate() {
        harness.reconciler.tick(tick_time(2 + i as i64)).await;
        assert_eq!(
            cycle_state(&harness.store, cycle_id).await,
            *want,
            "after tick {}",
            2 + i
        );
    }

    let cycle = harness.store.get_cycle(cycle_id).await.unwrap().unwrap();
    assert_eq!(cycle.usdc_out.as_deref(), Some("10100000"));
    // vcredOut > input: the cycle closed at a profit
    assert_eq!(cycle.vcred_out.as_deref(), Some("10100000"));

    // One confirmed step of each money-moving kind
    let steps = harness.store.get_steps_for_cycle(cycle_id).await.unwrap();
    for kind in [
        StepKind::L2Swap,
        StepKind::BridgeOut,
        StepKind::L1Swap,
        StepKind::BridgeBack,
        StepKind::CloseSwap,
    ] {
        let matching: Vec<_> = steps
            .iter()
            .filter(|s| s.kind == kind.as_str() && s.is_confirmed())
            .collect();
        assert_eq!(matching.len(), 1, "expected one confirmed {} step", kind);
        assert!(matching[0].tx_hash.is_some());
    }

    // Gas ledger carries one entry per confirmed step
    let ledger = harness.store.get_ledger_for_cycle(cycle_id).await.unwrap();
    assert!(ledger.len() >= 5, "expected >= 5 gas entries, got {}", ledger.len());
}

// ============ Scenario 2: tunnel bridge path ============

#[tokio::test]
async fn test_tunnel_bridge_path() {
    let store = Store::open_in_memory().await.unwrap();
    let gateway = MockGateway::new();
    let agg = MockSwapProvider::new("agg", vec![L1, L2], 0x10);
    let reference = MockSwapProvider::new("refq", vec![L1], 0x11);

    let harness = build_harness(store, gateway.clone(), vec![agg.clone()], reference.clone(), true).await;
    set_wbtc_market(&agg, &reference, &harness.registry);

    gateway.set_balance(L2, vcred(&harness.registry), U256::from(10_000_000u64));

    // Tick 1: WBTC wins (WETH discount is negative), L2 swap done
    let report = harness.reconciler.tick(tick_time(1)).await;
    let cycle_id = report.opened_cycle.expect("cycle should open");
    let cycle = harness.store.get_cycle(cycle_id).await.unwrap().unwrap();
    assert_eq!(cycle.token, "WBTC");
    assert_eq!(cycle.x_out.as_deref(), Some("10000"));

    // Tick 2: tunnel withdraw submitted; prove now required
    harness.reconciler.tick(tick_time(2)).await;
    assert_eq!(
        cycle_state(&harness.store, cycle_id).await,
        CycleState::BridgeOutProveRequired
    );
    let bridge_out = harness
        .store
        .find_active_step(cycle_id, StepKind::BridgeOut)
        .await
        .unwrap()
        .unwrap();
    assert!(bridge_out.withdrawal_hash.is_some());
    assert!(bridge_out.withdrawal_envelope.is_some());

    // Tick 3: output root not yet published; OUTPUT_NOT_READY consumes
    // nothing and the state holds
    let report = harness.reconciler.tick(tick_time(3)).await;
    assert_eq!(report.actions, 0);
    assert_eq!(
        cycle_state(&harness.store, cycle_id).await,
        CycleState::BridgeOutProveRequired
    );

    // Tick 4: root published; prove lands
    harness.tunnel.publish_output_root();
    harness.reconciler.tick(tick_time(4)).await;
    assert_eq!(
        cycle_state(&harness.store, cycle_id).await,
        CycleState::BridgeOutProved
    );

    // Tick 5: challenge period still running
    harness.reconciler.tick(tick_time(5)).await;
    assert_eq!(
        cycle_state(&harness.store, cycle_id).await,
        CycleState::BridgeOutProved
    );

    // One simulated day later: finalize becomes required, then lands and
    // the funds arrive on L1
    let after_challenge = tick_time(5) + Duration::days(1) + Duration::seconds(30);
    harness.reconciler.tick(after_challenge).await;
    assert_eq!(
        cycle_state(&harness.store, cycle_id).await,
        CycleState::BridgeOutFinalizeRequired
    );
    harness
        .reconciler
        .tick(after_challenge + Duration::seconds(30))
        .await;
    assert_eq!(cycle_state(&harness.store, cycle_id).await, CycleState::OnL1);

    // The rest of the loop closes as usual
    let mut now = after_challenge + Duration::seconds(60);
    for _ in 0..6 {
        harness.reconciler.tick(now).await;
        now += Duration::seconds(30);
    }
    assert_eq!(
        cycle_state(&harness.store, cycle_id).await,
        CycleState::Completed
    );

    // Tunnel cycles additionally carry confirmed prove + finalize steps
    let steps = harness.store.get_steps_for_cycle(cycle_id).await.unwrap();
    for kind in [StepKind::BridgeProve, StepKind::BridgeFinalize] {
        assert!(
            steps.iter().any(|s| s.kind == kind.as_str() && s.is_confirmed()),
            "missing confirmed {} step",
            kind
        );
    }
}

// ============ Scenario 3: crash mid-bridge, restart, no duplicates ============

#[tokio::test]
async fn test_crash_mid_bridge_resumes_without_duplicates() {
    let store = Store::open_in_memory().await.unwrap();
    let gateway = MockGateway::new();
    let agg = MockSwapProvider::new("agg", vec![L1, L2], 0x10);
    let reference = MockSwapProvider::new("refq", vec![L1], 0x11);

    // Attested bridge does NOT deliver at send time here: the transfer is
    // in flight when the "crash" happens
    let harness =
        build_harness(store.clone(), gateway.clone(), vec![agg.clone()], reference.clone(), false)
            .await;
    set_weth_market(&agg, &reference, &harness.registry);
    gateway.set_balance(L2, vcred(&harness.registry), U256::from(10_000_000u64));

    harness.reconciler.tick(tick_time(1)).await;
    harness.reconciler.tick(tick_time(2)).await;
    let cycle_id = harness.store.get_recent_cycles(1).await.unwrap()[0].id;
    assert_eq!(
        cycle_state(&harness.store, cycle_id).await,
        CycleState::BridgeOutSent
    );
    let attested_before_crash = harness.attested.clone();

    // "Crash": drop the reconciler, keep the store and chain state; the
    // restarted instance has fresh bridges with zeroed counters
    drop(harness);
    let agg2 = MockSwapProvider::new("agg", vec![L1, L2], 0x10);
    let reference2 = MockSwapProvider::new("refq", vec![L1], 0x11);
    let restarted =
        build_harness(store.clone(), gateway.clone(), vec![agg2.clone()], reference2.clone(), false)
            .await;
    set_weth_market(&agg2, &reference2, &restarted.registry);

    // First tick after restart: transfer still in flight; nothing re-sent
    restarted.reconciler.tick(tick_time(3)).await;
    assert_eq!(
        cycle_state(&restarted.store, cycle_id).await,
        CycleState::BridgeOutSent
    );
    assert_eq!(restarted.attested.send_count(), 0, "bridge tx must not be re-sent");

    // The original transfer lands; the restarted keeper observes it
    attested_before_crash.deliver();
    restarted.reconciler.tick(tick_time(4)).await;
    assert_eq!(cycle_state(&restarted.store, cycle_id).await, CycleState::OnL1);

    // Exactly one BRIDGE_OUT step ever existed
    let steps = restarted.store.get_steps_for_cycle(cycle_id).await.unwrap();
    let bridge_steps: Vec<_> = steps
        .iter()
        .filter(|s| s.kind == StepKind::BridgeOut.as_str())
        .collect();
    assert_eq!(bridge_steps.len(), 1);
}

// ============ Scenario 4: L1 swap revert, failover to second provider ============

#[tokio::test]
async fn test_l1_swap_failover_between_providers() {
    let store = Store::open_in_memory().await.unwrap();
    let gateway = MockGateway::new();
    let registry = TokenRegistry::mainnet();
    let weth = registry.get("WETH").unwrap().clone();

    // Alpha quotes best but its router reverts in simulation, and its
    // second quote call errors; beta is slightly worse and healthy
    let alpha = MockSwapProvider::new_flaky("alpha", vec![L1], 0x20, 1);
    let beta = MockSwapProvider::new("beta", vec![L1], 0x21);
    alpha.set_rate(L1, weth.l1_address, usdc_l1(&registry), 101, 40_500_000_000);
    beta.set_rate(L1, weth.l1_address, usdc_l1(&registry), 100, 40_500_000_000);
    gateway.revert_simulations_for(Address::repeat_byte(0x20));

    let reference = MockSwapProvider::new("refq", vec![L1], 0x11);
    let harness = build_harness(
        store.clone(),
        gateway.clone(),
        vec![alpha.clone(), beta.clone()],
        reference,
        true,
    )
    .await;

    // Seed a cycle already sitting on L1 with bridged WETH
    let cycle_id = store
        .create_cycle(
            &vcred_keeper::db::models::NewCycle {
                token: "WETH".into(),
                input_amount: "10000000".into(),
            },
            tick_time(0),
        )
        .await
        .unwrap();
    store
        .update_cycle_amounts(cycle_id, Some("4050000000000000"), None, None, tick_time(0))
        .await
        .unwrap();
    store
        .update_cycle_state(cycle_id, CycleState::OnL1, tick_time(0))
        .await
        .unwrap();
    gateway.set_balance(L1, weth.l1_address, U256::from(4_050_000_000_000_000u64));

    // Tick 1: alpha wins and reverts in simulation; transient, state holds
    harness.reconciler.tick(tick_time(1)).await;
    assert_eq!(cycle_state(&store, cycle_id).await, CycleState::OnL1);

    // Tick 2: alpha's quote fails, beta executes
    harness.reconciler.tick(tick_time(2)).await;
    assert_eq!(cycle_state(&store, cycle_id).await, CycleState::L1SwapDone);

    let steps = store.get_steps_for_cycle(cycle_id).await.unwrap();
    let l1_swaps: Vec<_> = steps
        .iter()
        .filter(|s| s.kind == StepKind::L1Swap.as_str())
        .collect();
    let failed = l1_swaps.iter().filter(|s| s.status == "failed").count();
    let confirmed = l1_swaps.iter().filter(|s| s.is_confirmed()).count();
    assert_eq!(failed, 1, "one failed attempt from the reverting provider");
    assert_eq!(confirmed, 1, "one confirmed attempt from the fallback");

    // Beta's (worse) rate produced the output: 4.05e15 * 100 / 4.05e10
    let cycle = store.get_cycle(cycle_id).await.unwrap().unwrap();
    assert_eq!(cycle.usdc_out.as_deref(), Some("10000000"));
}

// ============ Scenario 5: no profitable size, no cycle ============

#[tokio::test]
async fn test_no_opportunity_creates_no_cycle() {
    let store = Store::open_in_memory().await.unwrap();
    let gateway = MockGateway::new();
    let agg = MockSwapProvider::new("agg", vec![L1, L2], 0x10);
    let reference = MockSwapProvider::new("refq", vec![L1], 0x11);

    let harness = build_harness(store, gateway.clone(), vec![agg.clone()], reference.clone(), true).await;
    let registry = &harness.registry;

    // Reference beats L2 on every token at every size
    let weth = registry.get("WETH").unwrap();
    let wbtc = registry.get("WBTC").unwrap();
    agg.set_rate(L2, vcred(registry), weth.l2_address, 395_000_000, 1);
    reference.set_rate(L1, usdc_l1(registry), weth.l1_address, 400_000_000, 1);
    agg.set_rate(L2, vcred(registry), wbtc.l2_address, 98, 100_000);
    reference.set_rate(L1, usdc_l1(registry), wbtc.l1_address, 99, 100_000);

    gateway.set_balance(L2, vcred(registry), U256::from(10_000_000u64));

    for n in 1..=3 {
        let report = harness.reconciler.tick(tick_time(n)).await;
        assert_eq!(report.opened_cycle, None);
        assert_eq!(report.actions, 0);
    }
    assert_eq!(harness.store.get_recent_cycles(10).await.unwrap().len(), 0);
    assert_eq!(gateway.send_count(), 0);
}

// ============ Pause semantics ============

#[tokio::test]
async fn test_pause_flag_stops_the_keeper() {
    let store = Store::open_in_memory().await.unwrap();
    let gateway = MockGateway::new();
    let agg = MockSwapProvider::new("agg", vec![L1, L2], 0x10);
    let reference = MockSwapProvider::new("refq", vec![L1], 0x11);

    let harness = build_harness(store, gateway.clone(), vec![agg.clone()], reference.clone(), true).await;
    set_weth_market(&agg, &reference, &harness.registry);
    gateway.set_balance(L2, vcred(&harness.registry), U256::from(10_000_000u64));

    harness.control.write().await.paused = true;
    let report = harness.reconciler.tick(tick_time(1)).await;
    assert!(report.paused);
    assert_eq!(harness.store.get_recent_cycles(10).await.unwrap().len(), 0);

    // Resume and the same tick input opens a cycle
    harness.control.write().await.paused = false;
    let report = harness.reconciler.tick(tick_time(2)).await;
    assert!(report.opened_cycle.is_some());
    // last_run is tracked for the dashboard either way
    assert_eq!(
        harness.control.read().await.last_run,
        Some(tick_time(2))
    );
}

#[tokio::test]
async fn test_paused_token_blocks_that_token_only() {
    let store = Store::open_in_memory().await.unwrap();
    let gateway = MockGateway::new();
    let agg = MockSwapProvider::new("agg", vec![L1, L2], 0x10);
    let reference = MockSwapProvider::new("refq", vec![L1], 0x11);

    let harness = build_harness(store, gateway.clone(), vec![agg.clone()], reference.clone(), true).await;
    set_weth_market(&agg, &reference, &harness.registry);
    gateway.set_balance(L2, vcred(&harness.registry), U256::from(10_000_000u64));

    harness
        .control
        .write()
        .await
        .paused_tokens
        .insert("WETH".to_string());

    let report = harness.reconciler.tick(tick_time(1)).await;
    // The only qualifying token is paused: nothing opens
    assert_eq!(report.opened_cycle, None);
}
