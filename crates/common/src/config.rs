//! Bot configuration types.

use serde::{Deserialize, Serialize};

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Forecast API key.
    #[serde(default)]
    pub forecast_api_key: String,

    /// Forecast API base URL.
    #[serde(default = "default_forecast_base_url")]
    pub forecast_base_url: String,

    /// DEX read API base URL.
    #[serde(default = "default_dex_base_url")]
    pub dex_base_url: String,

    /// Wallet address whose positions are tracked.
    #[serde(default)]
    pub account: String,

    /// Assets to track bounds and volatility for.
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,

    /// Per-resource cache TTLs.
    #[serde(default)]
    pub cache: CacheTtlConfig,

    /// Minimum spacing between forecast API dispatches (ms).
    #[serde(default = "default_cooldown_ms")]
    pub forecast_cooldown_ms: u64,

    /// Snapshot store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Loop timing parameters (seconds).
    #[serde(default)]
    pub timing: TimingConfig,

    /// Volatility derivation settings.
    #[serde(default)]
    pub volatility: VolatilityConfig,

    /// Analytics gating settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// TTL per cached resource class, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_markets_ttl")]
    pub markets_secs: u64,
    #[serde(default = "default_tokens_ttl")]
    pub tokens_secs: u64,
    #[serde(default = "default_positions_ttl")]
    pub positions_secs: u64,
    #[serde(default = "default_positions_ttl")]
    pub position_info_secs: u64,
    #[serde(default = "default_volatility_ttl")]
    pub volatility_secs: u64,
    #[serde(default = "default_bounds_ttl")]
    pub bounds_secs: u64,
}

/// Snapshot store location and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,
}

/// Loop intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_market_refresh_secs")]
    pub market_refresh_secs: u64,
    #[serde(default = "default_bounds_poll_secs")]
    pub bounds_poll_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

/// Candle request shape for the volatility resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    #[serde(default = "default_candle_period")]
    pub candle_period: String,
    #[serde(default = "default_candle_limit")]
    pub candle_limit: u32,
    /// Annualization factor for the candle period (8760 for 1h candles).
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

/// Minimum observation window before analytics are trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_min_snapshots")]
    pub min_snapshots: usize,
    #[serde(default = "default_min_history_hours")]
    pub min_history_hours: f64,
}

fn default_forecast_base_url() -> String {
    "https://api.rangebounds.io/v1".to_string()
}

fn default_dex_base_url() -> String {
    "https://api.dex-reader.io/v1".to_string()
}

fn default_assets() -> Vec<String> {
    vec!["BTC".to_string(), "ETH".to_string()]
}

fn default_cooldown_ms() -> u64 {
    5_000
}

fn default_markets_ttl() -> u64 {
    30
}

fn default_tokens_ttl() -> u64 {
    30
}

fn default_positions_ttl() -> u64 {
    15
}

fn default_volatility_ttl() -> u64 {
    300
}

fn default_bounds_ttl() -> u64 {
    600
}

fn default_store_path() -> String {
    "data/bounds-history.json".to_string()
}

fn default_retention_hours() -> i64 {
    48
}

fn default_market_refresh_secs() -> u64 {
    30
}

fn default_bounds_poll_secs() -> u64 {
    600
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_candle_period() -> String {
    "1h".to_string()
}

fn default_candle_limit() -> u32 {
    168
}

fn default_periods_per_year() -> f64 {
    8_760.0
}

fn default_min_snapshots() -> usize {
    3
}

fn default_min_history_hours() -> f64 {
    6.0
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            forecast_api_key: String::new(),
            forecast_base_url: default_forecast_base_url(),
            dex_base_url: default_dex_base_url(),
            account: String::new(),
            assets: default_assets(),
            cache: CacheTtlConfig::default(),
            forecast_cooldown_ms: default_cooldown_ms(),
            store: StoreConfig::default(),
            timing: TimingConfig::default(),
            volatility: VolatilityConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            markets_secs: default_markets_ttl(),
            tokens_secs: default_tokens_ttl(),
            positions_secs: default_positions_ttl(),
            position_info_secs: default_positions_ttl(),
            volatility_secs: default_volatility_ttl(),
            bounds_secs: default_bounds_ttl(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            market_refresh_secs: default_market_refresh_secs(),
            bounds_poll_secs: default_bounds_poll_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            candle_period: default_candle_period(),
            candle_limit: default_candle_limit(),
            periods_per_year: default_periods_per_year(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_snapshots: default_min_snapshots(),
            min_history_hours: default_min_history_hours(),
        }
    }
}
