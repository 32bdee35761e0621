//! Market-data facade: one component owning every cached resource.
//!
//! Constructed once at startup and handed to consumers by reference.
//! Each resource class gets its own `FreshCache` with an independent TTL;
//! per-asset resources (volatility, bounds) key by asset symbol. A
//! successful bounds fetch is recorded into the snapshot store before the
//! value is cached.

use std::time::Duration;

use tracing::debug;

use common::config::{BotConfig, VolatilityConfig};
use common::{MarketsPayload, Position, PositionDetail, ProbabilityBounds, TokenInfo};
use dex_client::{volatility::realized_volatility, DexClient};
use forecast_client::ForecastClient;

use crate::cache::{EntryStatus, FreshCache, SharedError};
use crate::snapshots::SnapshotStore;

/// Key used by resources with a single value per class.
const SINGLETON_KEY: &str = "all";

/// The cached resource classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedResource {
    Markets,
    Tokens,
    Positions,
    PositionInfo,
    Volatility,
    Bounds,
}

impl CachedResource {
    pub const ALL: [CachedResource; 6] = [
        CachedResource::Markets,
        CachedResource::Tokens,
        CachedResource::Positions,
        CachedResource::PositionInfo,
        CachedResource::Volatility,
        CachedResource::Bounds,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CachedResource::Markets => "markets",
            CachedResource::Tokens => "tokens",
            CachedResource::Positions => "positions",
            CachedResource::PositionInfo => "position-info",
            CachedResource::Volatility => "volatility",
            CachedResource::Bounds => "bounds",
        }
    }
}

/// Freshness of one cached resource, labeled with its class.
#[derive(Debug, Clone)]
pub struct ResourceStatus {
    /// "markets", or "bounds:BTC" for keyed resources.
    pub resource: String,
    /// `true` iff an entry exists and is within its TTL.
    pub fresh: bool,
    /// Entry age; `None` when nothing is cached yet.
    pub age: Option<Duration>,
}

enum ClassStatus {
    Singleton { fresh: bool, age: Option<Duration> },
    Keyed(Vec<EntryStatus>),
}

fn singleton_status<T: Clone + Send + Sync + 'static>(cache: &FreshCache<T>) -> ClassStatus {
    ClassStatus::Singleton {
        fresh: cache.is_fresh(SINGLETON_KEY),
        age: cache.age(SINGLETON_KEY),
    }
}

/// Bounded-staleness view over the DEX and forecast APIs.
pub struct MarketData {
    dex: DexClient,
    forecast: ForecastClient,
    store: SnapshotStore,
    account: String,
    vol_cfg: VolatilityConfig,

    markets: FreshCache<MarketsPayload>,
    tokens: FreshCache<Vec<TokenInfo>>,
    positions: FreshCache<Vec<Position>>,
    position_info: FreshCache<Vec<PositionDetail>>,
    volatility: FreshCache<f64>,
    bounds: FreshCache<ProbabilityBounds>,
}

impl MarketData {
    pub fn new(
        dex: DexClient,
        forecast: ForecastClient,
        store: SnapshotStore,
        cfg: &BotConfig,
    ) -> Self {
        let ttl = &cfg.cache;
        Self {
            dex,
            forecast,
            store,
            account: cfg.account.clone(),
            vol_cfg: cfg.volatility.clone(),
            markets: FreshCache::new("markets", Duration::from_secs(ttl.markets_secs)),
            tokens: FreshCache::new("tokens", Duration::from_secs(ttl.tokens_secs)),
            positions: FreshCache::new("positions", Duration::from_secs(ttl.positions_secs)),
            position_info: FreshCache::new(
                "position-info",
                Duration::from_secs(ttl.position_info_secs),
            ),
            volatility: FreshCache::new("volatility", Duration::from_secs(ttl.volatility_secs)),
            bounds: FreshCache::new("bounds", Duration::from_secs(ttl.bounds_secs)),
        }
    }

    /// The snapshot store backing percentile analytics.
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    // ── Cached getters ────────────────────────────────────────────────

    pub async fn get_markets(&self, force: bool) -> Result<MarketsPayload, SharedError> {
        let dex = self.dex.clone();
        self.markets
            .get_with(SINGLETON_KEY, force, move || async move {
                dex.get_markets().await
            })
            .await
    }

    pub async fn get_tokens(&self, force: bool) -> Result<Vec<TokenInfo>, SharedError> {
        let dex = self.dex.clone();
        self.tokens
            .get_with(SINGLETON_KEY, force, move || async move {
                dex.get_tokens().await
            })
            .await
    }

    pub async fn get_positions(&self, force: bool) -> Result<Vec<Position>, SharedError> {
        let dex = self.dex.clone();
        let account = self.account.clone();
        self.positions
            .get_with(SINGLETON_KEY, force, move || async move {
                dex.get_positions(&account).await
            })
            .await
    }

    pub async fn get_positions_info(&self, force: bool) -> Result<Vec<PositionDetail>, SharedError> {
        let dex = self.dex.clone();
        let account = self.account.clone();
        self.position_info
            .get_with(SINGLETON_KEY, force, move || async move {
                dex.get_positions_info(&account).await
            })
            .await
    }

    /// Realized volatility for `asset`, derived from recent candles.
    pub async fn get_volatility(&self, asset: &str, force: bool) -> Result<f64, SharedError> {
        let dex = self.dex.clone();
        let cfg = self.vol_cfg.clone();
        let owned_asset = asset.to_string();
        self.volatility
            .get_with(asset, force, move || async move {
                let candles = dex
                    .get_candles(&owned_asset, &cfg.candle_period, cfg.candle_limit)
                    .await?;
                Ok(realized_volatility(&candles, cfg.periods_per_year))
            })
            .await
    }

    /// 24h probability bounds for `asset`. Every successful upstream
    /// fetch is appended to the snapshot store.
    pub async fn get_bounds(&self, asset: &str, force: bool) -> Result<ProbabilityBounds, SharedError> {
        let forecast = self.forecast.clone();
        let store = self.store.clone();
        let owned_asset = asset.to_string();
        self.bounds
            .get_with(asset, force, move || async move {
                let bounds = forecast.fetch_bounds(&owned_asset).await?;
                store.append(&owned_asset, bounds.clone());
                Ok(bounds)
            })
            .await
    }

    // ── Invalidation & introspection ──────────────────────────────────

    /// Drop every cached entry of one resource class. In-flight fetches
    /// are left to complete.
    pub fn invalidate(&self, resource: CachedResource) {
        debug!("Invalidating {} cache", resource.label());
        match resource {
            CachedResource::Markets => self.markets.invalidate_all(),
            CachedResource::Tokens => self.tokens.invalidate_all(),
            CachedResource::Positions => self.positions.invalidate_all(),
            CachedResource::PositionInfo => self.position_info.invalidate_all(),
            CachedResource::Volatility => self.volatility.invalidate_all(),
            CachedResource::Bounds => self.bounds.invalidate_all(),
        }
    }

    /// Drop every cached entry of every resource class.
    pub fn invalidate_all(&self) {
        for resource in CachedResource::ALL {
            self.invalidate(resource);
        }
    }

    /// Freshness of every resource class. Singleton resources always get
    /// a row (`fresh: false`, `age: None` before the first fetch); keyed
    /// resources get one row per cached key. Non-blocking, no side
    /// effects.
    pub fn cache_status(&self) -> Vec<ResourceStatus> {
        let mut out = Vec::new();
        for resource in CachedResource::ALL {
            match self.class_status(resource) {
                ClassStatus::Singleton { fresh, age } => out.push(ResourceStatus {
                    resource: resource.label().to_string(),
                    fresh,
                    age,
                }),
                ClassStatus::Keyed(entries) => {
                    for entry in entries {
                        out.push(ResourceStatus {
                            resource: format!("{}:{}", resource.label(), entry.key),
                            fresh: entry.fresh,
                            age: Some(entry.age),
                        });
                    }
                }
            }
        }
        out
    }

    /// Ages of the entries that exist, derived from the same snapshot as
    /// [`cache_status`].
    pub fn cache_ages(&self) -> Vec<(String, Duration)> {
        self.cache_status()
            .into_iter()
            .filter_map(|s| s.age.map(|age| (s.resource, age)))
            .collect()
    }

    fn class_status(&self, resource: CachedResource) -> ClassStatus {
        match resource {
            CachedResource::Markets => singleton_status(&self.markets),
            CachedResource::Tokens => singleton_status(&self.tokens),
            CachedResource::Positions => singleton_status(&self.positions),
            CachedResource::PositionInfo => singleton_status(&self.position_info),
            CachedResource::Volatility => ClassStatus::Keyed(self.volatility.status()),
            CachedResource::Bounds => ClassStatus::Keyed(self.bounds.status()),
        }
    }
}
