#![allow(dead_code)]

use alloy::primitives::U256;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use evmkit_rs::client::parse_rpc_urls;

/// Main configuration for the keeper
#[derive(Debug, Clone)]
pub struct Config {
    pub chains: ChainsConfig,
    pub wallet: WalletConfig,
    pub dashboard: DashboardConfig,
    pub trading: TradingConfig,
    pub keeper: KeeperConfig,
    pub storage: StorageConfig,
}

/// RPC endpoints for the chain pair
#[derive(Debug, Clone)]
pub struct ChainsConfig {
    pub l1_rpc_url: String,
    /// Additional L1 RPC URLs for fallback (tried in order when primary fails)
    pub l1_rpc_fallback_urls: Vec<String>,
    pub l2_rpc_url: String,
    pub l2_rpc_fallback_urls: Vec<String>,
}

impl ChainsConfig {
    /// All L1 RPC URLs: primary followed by fallbacks.
    pub fn all_l1_rpc_urls(&self) -> Vec<String> {
        let mut urls = vec![self.l1_rpc_url.clone()];
        urls.extend(self.l1_rpc_fallback_urls.iter().cloned());
        urls
    }

    /// All L2 RPC URLs: primary followed by fallbacks.
    pub fn all_l2_rpc_urls(&self) -> Vec<String> {
        let mut urls = vec![self.l2_rpc_url.clone()];
        urls.extend(self.l2_rpc_fallback_urls.iter().cloned());
        urls
    }
}

/// Operator wallet configuration
#[derive(Clone)]
pub struct WalletConfig {
    pub private_key: String,
}

/// Custom Debug that redacts the private key to prevent accidental log leakage.
impl fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Dashboard API + webhook configuration
#[derive(Clone)]
pub struct DashboardConfig {
    pub port: u16,
    pub password: String,
    pub webhook_url: Option<String>,
}

/// Custom Debug that redacts the dashboard password.
impl fmt::Debug for DashboardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashboardConfig")
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("webhook_url", &self.webhook_url)
            .finish()
    }
}

/// Trade sizing and quoting bounds
#[derive(Debug, Clone)]
pub struct TradingConfig {
    /// Lower size bound per cycle (source-token minor units)
    pub min_swap_input: U256,
    /// Hard cap per cycle (source-token minor units)
    pub max_swap_input_cap: U256,
    /// Required net profit per cycle (source-token minor units)
    pub min_profit: U256,
    /// Max quote age before a re-quote is required
    pub quotes_ttl_ms: u64,
    /// Pair-quote budget for the sizing search
    pub max_quote_calls: u32,
    /// Cycles allowed in flight at once
    pub max_active_cycles: u32,
}

/// Reconciler cadence and chain-interaction bounds
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// Tick period
    pub reconcile_interval_ms: u64,
    /// Wallet transactions allowed per tick
    pub actions_per_tick: u32,
    /// Bound on tx receipt waits
    pub receipt_timeout_ms: u64,
    /// Tunnel challenge period between prove and finalize
    pub challenge_period_secs: u64,
    /// Bridge arrival balance tolerance in basis points
    pub bridge_arrival_tolerance_bps: u64,
}

/// Persistence locations
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("keeper.db")
    }
}

/// Default functions
fn default_dashboard_port() -> u16 {
    7120
}

fn default_reconcile_interval_ms() -> u64 {
    30_000
}

fn default_quotes_ttl_ms() -> u64 {
    30_000
}

fn default_actions_per_tick() -> u32 {
    3
}

fn default_receipt_timeout_ms() -> u64 {
    120_000
}

fn default_challenge_period_secs() -> u64 {
    86_400
}

fn default_bridge_arrival_tolerance_bps() -> u64 {
    200
}

fn default_max_quote_calls() -> u32 {
    15
}

fn default_max_active_cycles() -> u32 {
    1
}

fn default_min_swap_input() -> U256 {
    // 10 VCRED
    U256::from(10_000_000u64)
}

fn default_max_swap_input_cap() -> U256 {
    // 10,000 VCRED
    U256::from(10_000_000_000u64)
}

fn default_min_profit() -> U256 {
    // 1 VCRED
    U256::from(1_000_000u64)
}

/// Read a secret: prefer a mounted file named by `{key}_FILE`, fall back
/// to the plain environment variable.
fn read_secret(key: &str) -> Result<String> {
    let file_key = format!("{}_FILE", key);
    if let Ok(path) = env::var(&file_key) {
        let value = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read secret file {} ({})", path, file_key))?;
        return Ok(value.trim().to_string());
    }
    env::var(key).map_err(|_| eyre!("{} (or {}) is required", key, file_key))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_parse_u256(key: &str, default: U256) -> Result<U256> {
    match env::var(key) {
        Ok(v) => U256::from_str(&v).map_err(|_| eyre!("{} must be an integer amount", key)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    /// Loads .env file if present, then reads from environment.
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let l1_raw =
            env::var("L1_RPC_URL").map_err(|_| eyre!("L1_RPC_URL environment variable is required"))?;
        let l1_urls = parse_rpc_urls(&l1_raw);
        if l1_urls.is_empty() {
            return Err(eyre!("L1_RPC_URL cannot be empty"));
        }

        let l2_raw =
            env::var("L2_RPC_URL").map_err(|_| eyre!("L2_RPC_URL environment variable is required"))?;
        let l2_urls = parse_rpc_urls(&l2_raw);
        if l2_urls.is_empty() {
            return Err(eyre!("L2_RPC_URL cannot be empty"));
        }

        let chains = ChainsConfig {
            l1_rpc_url: l1_urls[0].clone(),
            l1_rpc_fallback_urls: l1_urls[1..].to_vec(),
            l2_rpc_url: l2_urls[0].clone(),
            l2_rpc_fallback_urls: l2_urls[1..].to_vec(),
        };

        let wallet = WalletConfig {
            private_key: read_secret("ARBITRAGE_PRIVATE_KEY")?,
        };

        let dashboard = DashboardConfig {
            port: env_parse("DASHBOARD_PORT", default_dashboard_port()),
            password: read_secret("DASHBOARD_PASSWORD")?,
            webhook_url: env::var("WEBHOOK_URL").ok().filter(|v| !v.is_empty()),
        };

        let trading = TradingConfig {
            min_swap_input: env_parse_u256("MIN_SWAP_INPUT", default_min_swap_input())?,
            max_swap_input_cap: env_parse_u256("MAX_SWAP_INPUT_CAP", default_max_swap_input_cap())?,
            min_profit: env_parse_u256("MIN_PROFIT", default_min_profit())?,
            quotes_ttl_ms: env_parse("QUOTES_TTL_MS", default_quotes_ttl_ms()),
            max_quote_calls: env_parse("MAX_QUOTE_CALLS", default_max_quote_calls()),
            max_active_cycles: env_parse("MAX_ACTIVE_CYCLES", default_max_active_cycles()),
        };

        let keeper = KeeperConfig {
            reconcile_interval_ms: env_parse("RECONCILE_INTERVAL_MS", default_reconcile_interval_ms()),
            actions_per_tick: env_parse("ACTIONS_PER_TICK", default_actions_per_tick()),
            receipt_timeout_ms: env_parse("RECEIPT_TIMEOUT_MS", default_receipt_timeout_ms()),
            challenge_period_secs: env_parse("CHALLENGE_PERIOD_SECS", default_challenge_period_secs()),
            bridge_arrival_tolerance_bps: env_parse(
                "BRIDGE_ARRIVAL_TOLERANCE_BPS",
                default_bridge_arrival_tolerance_bps(),
            ),
        };

        let storage = StorageConfig {
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string())),
            logs_dir: PathBuf::from(env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string())),
        };

        let config = Config {
            chains,
            wallet,
            dashboard,
            trading,
            keeper,
            storage,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chains.l1_rpc_url.is_empty() {
            return Err(eyre!("chains.l1_rpc_url cannot be empty"));
        }
        if self.chains.l2_rpc_url.is_empty() {
            return Err(eyre!("chains.l2_rpc_url cannot be empty"));
        }

        if self.wallet.private_key.len() != 66 || !self.wallet.private_key.starts_with("0x") {
            return Err(eyre!(
                "wallet.private_key must be 66 chars (0x + 64 hex chars)"
            ));
        }

        if self.dashboard.password.is_empty() {
            return Err(eyre!("dashboard.password cannot be empty"));
        }

        if self.trading.min_swap_input.is_zero() {
            return Err(eyre!("trading.min_swap_input must be positive"));
        }
        if self.trading.min_swap_input > self.trading.max_swap_input_cap {
            return Err(eyre!(
                "trading.min_swap_input cannot exceed trading.max_swap_input_cap"
            ));
        }
        if self.trading.max_quote_calls == 0 {
            return Err(eyre!("trading.max_quote_calls must be at least 1"));
        }

        if self.keeper.actions_per_tick == 0 {
            return Err(eyre!("keeper.actions_per_tick must be at least 1"));
        }
        if self.keeper.bridge_arrival_tolerance_bps >= 10_000 {
            return Err(eyre!(
                "keeper.bridge_arrival_tolerance_bps must be below 10000"
            ));
        }

        Ok(())
    }
}
