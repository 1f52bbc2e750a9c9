//! Application configuration loaded from environment variables.
//!
//! Two layers: [`Config`] is the flat environment snapshot (credentials,
//! endpoints, server settings) and [`EngineConfig`] is the runtime-tunable
//! trading configuration carved out of it. The engine only ever sees an
//! `Arc<EngineConfig>` cloned at the top of a scan cycle, so a control-surface
//! update never lands mid-cycle.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Exchange Credentials ===
    /// Optional pre-generated API key.
    #[serde(default)]
    pub exchange_api_key: Option<String>,

    /// Optional API secret.
    #[serde(default)]
    pub exchange_api_secret: Option<String>,

    /// Optional API passphrase.
    #[serde(default)]
    pub exchange_api_passphrase: Option<String>,

    /// Funder/wallet address used by the exchange client for merges.
    #[serde(default)]
    pub funder_address: Option<String>,

    // === Endpoints ===
    /// CLOB API base URL.
    #[serde(default = "default_clob_url")]
    pub clob_url: String,

    /// Gamma (market catalog) API base URL.
    #[serde(default = "default_gamma_url")]
    pub gamma_url: String,

    // === Trading Parameters ===
    /// Maximum combined cost to trigger arbitrage (e.g., 0.99).
    #[serde(default = "default_target_cost")]
    pub target_pair_cost: Decimal,

    /// Number of shares per trade.
    #[serde(default = "default_order_size")]
    pub order_size: Decimal,

    /// Minimum top-of-book depth required on both sides.
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: Decimal,

    /// Minimum seconds before market expiry to still trade.
    #[serde(default = "default_min_time_remaining")]
    pub min_time_remaining_seconds: i64,

    /// Maximum trades per market per run.
    #[serde(default = "default_max_trades_per_market")]
    pub max_trades_per_market: u32,

    /// Minimum seconds between trades on the same market.
    #[serde(default = "default_trade_cooldown")]
    pub trade_cooldown_seconds: u64,

    /// Seconds between scan cycles.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_seconds: u64,

    /// Comma-separated symbol whitelist (e.g., "btc,eth,sol").
    #[serde(default = "default_symbols")]
    pub symbols: String,

    // === Operation Modes ===
    /// Simulation mode (no real orders).
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Run merge_all automatically on the scan cadence.
    #[serde(default = "default_true")]
    pub auto_merge: bool,

    /// Minimum share pairs to bother merging.
    #[serde(default = "default_min_merge_amount")]
    pub min_merge_amount: Decimal,

    // === Bargain Accumulator ===
    /// Enable the bargain accumulation strategy.
    #[serde(default = "default_true")]
    pub bargain_enabled: bool,

    /// Open a holding when one side's ask drops below this.
    #[serde(default = "default_bargain_price_threshold")]
    pub bargain_price_threshold: Decimal,

    /// Pair a holding when combined cost falls below this.
    #[serde(default = "default_bargain_pair_threshold")]
    pub bargain_pair_threshold: Decimal,

    /// Arm the stop-loss once the ask drops this far below the buy price.
    #[serde(default = "default_bargain_stop_loss_cents")]
    pub bargain_stop_loss_cents: Decimal,

    /// Seconds between arming the stop and actually selling.
    #[serde(default = "default_bargain_stop_delay")]
    pub bargain_stop_delay_seconds: u64,

    /// Pause on new bargain opens after a stop-loss fires.
    #[serde(default = "default_bargain_stop_cooldown")]
    pub bargain_stop_cooldown_seconds: u64,

    /// Floor below which a side is considered dead/settled, not a bargain.
    #[serde(default = "default_bargain_min_price")]
    pub bargain_min_price: Decimal,

    /// Maximum concurrent accumulation rounds per market.
    #[serde(default = "default_bargain_max_rounds")]
    pub bargain_max_rounds: u32,

    // === HTTP Client ===
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Connection pool size per host.
    #[serde(default = "default_http_pool_size")]
    pub http_pool_size: usize,

    // === Server Configuration ===
    /// HTTP server port for the control surface.
    #[serde(default = "default_port")]
    pub port: u16,

    /// State file path for persisted histories.
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

fn default_clob_url() -> String {
    "https://clob.polymarket.com".to_string()
}

fn default_gamma_url() -> String {
    "https://gamma-api.polymarket.com".to_string()
}

fn default_target_cost() -> Decimal {
    Decimal::new(99, 2) // 0.99
}

fn default_order_size() -> Decimal {
    Decimal::new(50, 0) // 50 shares
}

fn default_min_liquidity() -> Decimal {
    Decimal::new(100, 0)
}

fn default_min_time_remaining() -> i64 {
    120
}

fn default_max_trades_per_market() -> u32 {
    10
}

fn default_trade_cooldown() -> u64 {
    60
}

fn default_scan_interval() -> u64 {
    5
}

fn default_symbols() -> String {
    "btc,eth,sol".to_string()
}

fn default_true() -> bool {
    true
}

fn default_min_merge_amount() -> Decimal {
    Decimal::ONE
}

fn default_bargain_price_threshold() -> Decimal {
    Decimal::new(49, 2) // 0.49
}

fn default_bargain_pair_threshold() -> Decimal {
    Decimal::new(99, 2) // 0.99
}

fn default_bargain_stop_loss_cents() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_bargain_stop_delay() -> u64 {
    90
}

fn default_bargain_stop_cooldown() -> u64 {
    180
}

fn default_bargain_min_price() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_bargain_max_rounds() -> u32 {
    8
}

fn default_http_timeout_ms() -> u64 {
    5000
}

fn default_http_pool_size() -> usize {
    10
}

fn default_port() -> u16 {
    8080
}

fn default_state_file() -> String {
    "pair_arb_state.json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Symbol whitelist as a normalized list.
    pub fn symbol_list(&self) -> Vec<String> {
        self.symbols
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Carve out the runtime-tunable engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            target_pair_cost: self.target_pair_cost,
            order_size: self.order_size,
            min_liquidity: self.min_liquidity,
            min_time_remaining_seconds: self.min_time_remaining_seconds,
            max_trades_per_market: self.max_trades_per_market,
            trade_cooldown_seconds: self.trade_cooldown_seconds,
            scan_interval_seconds: self.scan_interval_seconds,
            dry_run: self.dry_run,
            auto_merge: self.auto_merge,
            min_merge_amount: self.min_merge_amount,
            bargain_enabled: self.bargain_enabled,
            bargain_price_threshold: self.bargain_price_threshold,
            bargain_pair_threshold: self.bargain_pair_threshold,
            bargain_stop_loss_cents: self.bargain_stop_loss_cents,
            bargain_stop_delay_seconds: self.bargain_stop_delay_seconds,
            bargain_stop_cooldown_seconds: self.bargain_stop_cooldown_seconds,
            bargain_min_price: self.bargain_min_price,
            bargain_max_rounds: self.bargain_max_rounds,
        }
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), String> {
        if self.symbol_list().is_empty() {
            return Err("SYMBOLS must list at least one symbol".to_string());
        }
        self.engine_config().validate()
    }
}

/// Runtime-tunable trading configuration.
///
/// A value object: updates from the control surface build a fresh instance,
/// validate it, and swap the shared `Arc` in one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum combined cost to trigger arbitrage.
    pub target_pair_cost: Decimal,
    /// Number of shares per trade.
    pub order_size: Decimal,
    /// Minimum top-of-book depth required on both sides.
    pub min_liquidity: Decimal,
    /// Minimum seconds before expiry to still trade.
    pub min_time_remaining_seconds: i64,
    /// Maximum trades per market.
    pub max_trades_per_market: u32,
    /// Minimum seconds between trades on the same market.
    pub trade_cooldown_seconds: u64,
    /// Seconds between scan cycles.
    pub scan_interval_seconds: u64,
    /// Simulation mode.
    pub dry_run: bool,
    /// Run merge_all on the scan cadence.
    pub auto_merge: bool,
    /// Minimum share pairs to merge.
    pub min_merge_amount: Decimal,
    /// Enable the bargain strategy.
    pub bargain_enabled: bool,
    /// Bargain open threshold.
    pub bargain_price_threshold: Decimal,
    /// Bargain pairing threshold on combined cost.
    pub bargain_pair_threshold: Decimal,
    /// Stop-loss arming distance below buy price.
    pub bargain_stop_loss_cents: Decimal,
    /// Deferral between arming and selling.
    pub bargain_stop_delay_seconds: u64,
    /// Pause on new opens after a stop fires.
    pub bargain_stop_cooldown_seconds: u64,
    /// Dead-market price floor.
    pub bargain_min_price: Decimal,
    /// Maximum rounds per market.
    pub bargain_max_rounds: u32,
}

impl EngineConfig {
    /// Validate threshold sanity. Rejected configs are never applied.
    pub fn validate(&self) -> Result<(), String> {
        if self.order_size <= Decimal::ZERO {
            return Err("order_size must be positive".to_string());
        }
        if self.target_pair_cost <= Decimal::ZERO || self.target_pair_cost >= Decimal::ONE {
            return Err("target_pair_cost must be in (0, 1)".to_string());
        }
        if self.min_liquidity < Decimal::ZERO {
            return Err("min_liquidity must be non-negative".to_string());
        }
        if self.min_time_remaining_seconds < 0 {
            return Err("min_time_remaining_seconds must be non-negative".to_string());
        }
        if self.max_trades_per_market == 0 {
            return Err("max_trades_per_market must be at least 1".to_string());
        }
        if self.scan_interval_seconds == 0 {
            return Err("scan_interval_seconds must be at least 1".to_string());
        }
        if self.min_merge_amount <= Decimal::ZERO {
            return Err("min_merge_amount must be positive".to_string());
        }
        if self.bargain_price_threshold <= self.bargain_min_price {
            return Err("bargain_price_threshold must exceed bargain_min_price".to_string());
        }
        if self.bargain_pair_threshold <= Decimal::ZERO
            || self.bargain_pair_threshold >= Decimal::ONE
        {
            return Err("bargain_pair_threshold must be in (0, 1)".to_string());
        }
        if self.bargain_stop_loss_cents <= Decimal::ZERO {
            return Err("bargain_stop_loss_cents must be positive".to_string());
        }
        if self.bargain_max_rounds == 0 {
            return Err("bargain_max_rounds must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Partial engine-config update from the control surface.
///
/// Every field optional; `apply` builds the candidate config that then goes
/// through [`EngineConfig::validate`] before being swapped in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfigPatch {
    pub target_pair_cost: Option<Decimal>,
    pub order_size: Option<Decimal>,
    pub min_liquidity: Option<Decimal>,
    pub min_time_remaining_seconds: Option<i64>,
    pub max_trades_per_market: Option<u32>,
    pub trade_cooldown_seconds: Option<u64>,
    pub scan_interval_seconds: Option<u64>,
    pub dry_run: Option<bool>,
    pub auto_merge: Option<bool>,
    pub min_merge_amount: Option<Decimal>,
    pub bargain_enabled: Option<bool>,
    pub bargain_price_threshold: Option<Decimal>,
    pub bargain_pair_threshold: Option<Decimal>,
    pub bargain_stop_loss_cents: Option<Decimal>,
    pub bargain_stop_delay_seconds: Option<u64>,
    pub bargain_stop_cooldown_seconds: Option<u64>,
    pub bargain_min_price: Option<Decimal>,
    pub bargain_max_rounds: Option<u32>,
}

impl EngineConfigPatch {
    /// Build the updated config, leaving unset fields at their current value.
    pub fn apply(&self, current: &EngineConfig) -> EngineConfig {
        EngineConfig {
            target_pair_cost: self.target_pair_cost.unwrap_or(current.target_pair_cost),
            order_size: self.order_size.unwrap_or(current.order_size),
            min_liquidity: self.min_liquidity.unwrap_or(current.min_liquidity),
            min_time_remaining_seconds: self
                .min_time_remaining_seconds
                .unwrap_or(current.min_time_remaining_seconds),
            max_trades_per_market: self
                .max_trades_per_market
                .unwrap_or(current.max_trades_per_market),
            trade_cooldown_seconds: self
                .trade_cooldown_seconds
                .unwrap_or(current.trade_cooldown_seconds),
            scan_interval_seconds: self
                .scan_interval_seconds
                .unwrap_or(current.scan_interval_seconds),
            dry_run: self.dry_run.unwrap_or(current.dry_run),
            auto_merge: self.auto_merge.unwrap_or(current.auto_merge),
            min_merge_amount: self.min_merge_amount.unwrap_or(current.min_merge_amount),
            bargain_enabled: self.bargain_enabled.unwrap_or(current.bargain_enabled),
            bargain_price_threshold: self
                .bargain_price_threshold
                .unwrap_or(current.bargain_price_threshold),
            bargain_pair_threshold: self
                .bargain_pair_threshold
                .unwrap_or(current.bargain_pair_threshold),
            bargain_stop_loss_cents: self
                .bargain_stop_loss_cents
                .unwrap_or(current.bargain_stop_loss_cents),
            bargain_stop_delay_seconds: self
                .bargain_stop_delay_seconds
                .unwrap_or(current.bargain_stop_delay_seconds),
            bargain_stop_cooldown_seconds: self
                .bargain_stop_cooldown_seconds
                .unwrap_or(current.bargain_stop_cooldown_seconds),
            bargain_min_price: self.bargain_min_price.unwrap_or(current.bargain_min_price),
            bargain_max_rounds: self
                .bargain_max_rounds
                .unwrap_or(current.bargain_max_rounds),
        }
    }
}

/// Full config with defaults and a unique temp state file, for tests.
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    use std::sync::atomic::{AtomicU32, Ordering};
    static SEQ: AtomicU32 = AtomicU32::new(0);

    let mut state_file = std::env::temp_dir();
    state_file.push(format!(
        "pair_arb_cfg_test_{}_{}.json",
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    Config {
        exchange_api_key: None,
        exchange_api_secret: None,
        exchange_api_passphrase: None,
        funder_address: None,
        clob_url: default_clob_url(),
        gamma_url: default_gamma_url(),
        target_pair_cost: default_target_cost(),
        order_size: default_order_size(),
        min_liquidity: default_min_liquidity(),
        min_time_remaining_seconds: default_min_time_remaining(),
        max_trades_per_market: default_max_trades_per_market(),
        trade_cooldown_seconds: default_trade_cooldown(),
        scan_interval_seconds: default_scan_interval(),
        symbols: default_symbols(),
        dry_run: true,
        auto_merge: true,
        min_merge_amount: default_min_merge_amount(),
        bargain_enabled: true,
        bargain_price_threshold: default_bargain_price_threshold(),
        bargain_pair_threshold: default_bargain_pair_threshold(),
        bargain_stop_loss_cents: default_bargain_stop_loss_cents(),
        bargain_stop_delay_seconds: default_bargain_stop_delay(),
        bargain_stop_cooldown_seconds: default_bargain_stop_cooldown(),
        bargain_min_price: default_bargain_min_price(),
        bargain_max_rounds: default_bargain_max_rounds(),
        http_timeout_ms: default_http_timeout_ms(),
        http_pool_size: default_http_pool_size(),
        port: default_port(),
        state_file: state_file.to_string_lossy().to_string(),
        rust_log: default_log_level(),
    }
}

/// Engine config with the default knobs, for unit tests across the crate.
#[cfg(test)]
pub(crate) fn test_engine_config() -> EngineConfig {
    use rust_decimal_macros::dec;

    EngineConfig {
        target_pair_cost: dec!(0.99),
        order_size: dec!(50),
        min_liquidity: dec!(100),
        min_time_remaining_seconds: 120,
        max_trades_per_market: 10,
        trade_cooldown_seconds: 60,
        scan_interval_seconds: 5,
        dry_run: true,
        auto_merge: true,
        min_merge_amount: dec!(1),
        bargain_enabled: true,
        bargain_price_threshold: dec!(0.49),
        bargain_pair_threshold: dec!(0.99),
        bargain_stop_loss_cents: dec!(0.02),
        bargain_stop_delay_seconds: 90,
        bargain_stop_cooldown_seconds: 180,
        bargain_min_price: dec!(0.10),
        bargain_max_rounds: 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_values_are_sensible() {
        assert_eq!(default_target_cost(), dec!(0.99));
        assert_eq!(default_order_size(), dec!(50));
        assert_eq!(default_bargain_price_threshold(), dec!(0.49));
        assert!(default_true());
    }

    #[test]
    fn engine_config_validates() {
        assert!(test_engine_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_negative_size() {
        let mut config = test_engine_config();
        config.order_size = dec!(-5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_target_at_or_above_one() {
        let mut config = test_engine_config();
        config.target_pair_cost = dec!(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_bargain_thresholds() {
        let mut config = test_engine_config();
        config.bargain_min_price = dec!(0.60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn patch_applies_only_set_fields() {
        let current = test_engine_config();
        let patch = EngineConfigPatch {
            order_size: Some(dec!(25)),
            dry_run: Some(false),
            ..Default::default()
        };

        let updated = patch.apply(&current);
        assert_eq!(updated.order_size, dec!(25));
        assert!(!updated.dry_run);
        assert_eq!(updated.target_pair_cost, current.target_pair_cost);
        assert_eq!(updated.bargain_max_rounds, current.bargain_max_rounds);
    }

    #[test]
    fn symbol_list_normalizes() {
        let mut config = test_config();
        config.symbols = " BTC, eth ,sol,".to_string();

        assert_eq!(config.symbol_list(), vec!["btc", "eth", "sol"]);
    }
}
