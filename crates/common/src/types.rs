//! Domain types shared across the bot.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ── DEX Market Types ──────────────────────────────────────────────────

/// A token as returned by GET /tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub decimals: u8,
    /// Latest oracle price in USD.
    #[serde(default)]
    pub price_usd: f64,
}

/// A market as returned by GET /markets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub name: String,
    #[serde(default)]
    pub market_token: String,
    #[serde(default)]
    pub index_token: String,
    #[serde(default)]
    pub long_token: String,
    #[serde(default)]
    pub short_token: String,
    #[serde(default)]
    pub is_listed: bool,
}

/// Markets endpoint payload: markets plus the token set they reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketsPayload {
    pub markets: Vec<MarketInfo>,
    #[serde(default)]
    pub tokens: Vec<TokenInfo>,
}

/// An open position as returned by GET /positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub market: String,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub is_long: bool,
    #[serde(default)]
    pub size_usd: f64,
    #[serde(default)]
    pub collateral_usd: f64,
    #[serde(default)]
    pub entry_price: f64,
}

/// A position enriched with mark-price-dependent fields
/// (GET /positions/info).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionDetail {
    pub market: String,
    #[serde(default)]
    pub is_long: bool,
    #[serde(default)]
    pub size_usd: f64,
    #[serde(default)]
    pub collateral_usd: f64,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub mark_price: f64,
    #[serde(default)]
    pub pnl_usd: f64,
    #[serde(default)]
    pub leverage: f64,
    #[serde(default)]
    pub liquidation_price: Option<f64>,
}

/// One OHLCV candle. Timestamps are ms since epoch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

// ── Forecast Bounds Types ─────────────────────────────────────────────

/// One price level of a 24h forecast distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundLevel {
    pub price: f64,
    pub probability_above: f64,
    pub probability_below: f64,
}

/// A 24h-horizon probability distribution over price levels,
/// sorted ascending by price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProbabilityBounds {
    pub levels: Vec<BoundLevel>,
}

/// One timestamped capture of a forecast distribution for an asset.
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundsSnapshot {
    /// ms since epoch.
    pub timestamp: i64,
    pub bounds: ProbabilityBounds,
}

impl BoundsSnapshot {
    /// Age in fractional hours at `now_ms`.
    pub fn age_hours(&self, now_ms: i64) -> f64 {
        (now_ms - self.timestamp) as f64 / 3_600_000.0
    }

    pub fn taken_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}
