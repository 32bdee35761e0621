//! Range-bot: bounded-staleness market data for LP range management.
//!
//! Single-binary Tokio application that:
//! 1. Serves DEX market/token/position data through TTL caches
//! 2. Polls per-asset 24h probability bounds behind a cooldown gate
//! 3. Records every bounds fetch into a durable snapshot history
//! 4. Derives percentile/trend analytics from that history

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::time::sleep;
use tracing::{error, info, warn};

use datastore::{analyze, MarketData, SnapshotStore};
use dex_client::DexClient;
use forecast_client::ForecastClient;

/// Bounded-staleness market data daemon
#[derive(Parser)]
#[command(name = "range-bot", about = "LP range market-data daemon")]
struct Cli {
    /// Print cache and snapshot-store status, then exit.
    #[arg(long)]
    status: bool,

    /// Refresh every resource once, print analytics, and exit.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "range_bot=info,dex_client=info,forecast_client=info,datastore=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("📈 Range Bot starting up...");

    // Load configuration.
    let cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!("Assets: {:?}", cfg.assets);
    info!(
        "Cache TTLs: markets={}s tokens={}s positions={}s info={}s vol={}s bounds={}s",
        cfg.cache.markets_secs,
        cfg.cache.tokens_secs,
        cfg.cache.positions_secs,
        cfg.cache.position_info_secs,
        cfg.cache.volatility_secs,
        cfg.cache.bounds_secs,
    );
    info!(
        "Store: path={} retention={}h, forecast cooldown={}ms",
        cfg.store.path, cfg.store.retention_hours, cfg.forecast_cooldown_ms,
    );

    // ── Components ───────────────────────────────────────────────────
    let dex = DexClient::new(&cfg.dex_base_url);
    let forecast = ForecastClient::new(
        &cfg.forecast_base_url,
        &cfg.forecast_api_key,
        cfg.forecast_cooldown_ms,
    );
    let store = SnapshotStore::load(&cfg.store.path, cfg.store.retention_hours);
    let data = Arc::new(MarketData::new(dex, forecast, store.clone(), &cfg));

    // ── Status mode ──────────────────────────────────────────────────
    if cli.status {
        print_status(&data, &store, &cfg);
        return;
    }

    // ── Dry-run mode ─────────────────────────────────────────────────
    if cli.dry_run {
        info!("Running single refresh of every resource...");
        refresh_market_resources(&data).await;
        for asset in &cfg.assets {
            refresh_asset_resources(&data, asset).await;
        }
        print_status(&data, &store, &cfg);
        if let Err(e) = store.flush() {
            warn!("Final store flush failed: {}", e);
        }
        return;
    }

    // ── Spawn tasks ──────────────────────────────────────────────────
    info!("Spawning tasks...");

    // Task 1: market/token/position refresh
    let market_data = data.clone();
    let market_interval = cfg.timing.market_refresh_secs;
    let market_handle = tokio::spawn(async move {
        loop {
            refresh_market_resources(&market_data).await;
            sleep(Duration::from_secs(market_interval)).await;
        }
    });

    // Task 2: per-asset bounds + volatility + analytics
    let asset_data = data.clone();
    let asset_cfg = cfg.clone();
    let bounds_handle = tokio::spawn(async move {
        loop {
            for asset in &asset_cfg.assets {
                refresh_asset_resources(&asset_data, asset).await;
            }
            sleep(Duration::from_secs(asset_cfg.timing.bounds_poll_secs)).await;
        }
    });

    // Task 3: heartbeat
    let hb_data = data.clone();
    let hb_store = store.clone();
    let hb_cfg = cfg.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(hb_cfg.timing.heartbeat_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let status = hb_data.cache_status();
            let fresh = status.iter().filter(|s| s.fresh).count();
            let depth: usize = hb_cfg
                .assets
                .iter()
                .map(|a| hb_store.snapshot_count(a))
                .sum();
            info!(
                "HEARTBEAT: cache {}/{} fresh, {} snapshots stored",
                fresh,
                status.len(),
                depth
            );
            if let Some(err) = hb_store.persistence_health() {
                warn!("Snapshot persistence degraded: {}", err);
            }
        }
    });

    // ── Wait for shutdown ────────────────────────────────────────────
    info!("🚀 Range Bot is running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
        r = market_handle => {
            error!("Market refresh task exited: {:?}", r);
        }
        r = bounds_handle => {
            error!("Bounds task exited: {:?}", r);
        }
        r = heartbeat_handle => {
            error!("Heartbeat task exited: {:?}", r);
        }
    }

    // Persist whatever the background writer has not flushed yet.
    if let Err(e) = store.flush() {
        warn!("Final store flush failed: {}", e);
    }
    info!("Range Bot shut down.");
}

// ── Task implementations ────────────────────────────────────────────

async fn refresh_market_resources(data: &MarketData) {
    match data.get_markets(false).await {
        Ok(payload) => info!(
            "Markets: {} markets, {} tokens",
            payload.markets.len(),
            payload.tokens.len()
        ),
        Err(e) => warn!("Market refresh failed: {}", e),
    }
    if let Err(e) = data.get_tokens(false).await {
        warn!("Token refresh failed: {}", e);
    }
    match data.get_positions(false).await {
        Ok(positions) => info!("Positions: {} open", positions.len()),
        Err(e) => warn!("Position refresh failed: {}", e),
    }
    if let Err(e) = data.get_positions_info(false).await {
        warn!("Position-info refresh failed: {}", e);
    }
}

async fn refresh_asset_resources(data: &MarketData, asset: &str) {
    match data.get_volatility(asset, false).await {
        Ok(vol) => info!("{}: realized volatility {:.2}%", asset, vol * 100.0),
        Err(e) => warn!("{}: volatility refresh failed: {}", asset, e),
    }

    match data.get_bounds(asset, false).await {
        Ok(bounds) => {
            info!("{}: bounds refreshed ({} levels)", asset, bounds.levels.len());
            // Prefer the oracle price; the ladder midpoint stands in until
            // token data is available.
            let price = match token_price(data, asset).await {
                Some(p) => Some(p),
                None => mid_price(&bounds),
            };
            if let Some(price) = price {
                let analysis = analyze(data.store(), asset, price);
                info!(
                    "{}: percentile {:.0} (min={:.0} max={:.0} median={:.0}), trend {} (R²={:.2}) over {} points",
                    asset,
                    analysis.current_percentile,
                    analysis.min,
                    analysis.max,
                    analysis.median,
                    analysis.trend,
                    analysis.trend_strength,
                    analysis.data_points.len(),
                );
            }
        }
        Err(e) => warn!("{}: bounds refresh failed: {}", asset, e),
    }
}

async fn token_price(data: &MarketData, asset: &str) -> Option<f64> {
    data.get_tokens(false)
        .await
        .ok()?
        .iter()
        .find(|t| t.symbol == asset)
        .map(|t| t.price_usd)
        .filter(|p| *p > 0.0)
}

fn mid_price(bounds: &common::ProbabilityBounds) -> Option<f64> {
    let first = bounds.levels.first()?;
    let last = bounds.levels.last()?;
    Some((first.price + last.price) / 2.0)
}

fn print_status(data: &MarketData, store: &SnapshotStore, cfg: &common::BotConfig) {
    let status = data.cache_status();
    for entry in status {
        match entry.age {
            Some(age) => info!(
                "Cache {}: {} (age {:.1}s)",
                entry.resource,
                if entry.fresh { "fresh" } else { "stale" },
                age.as_secs_f64(),
            ),
            None => info!("Cache {}: empty", entry.resource),
        }
    }
    for asset in &cfg.assets {
        let count = store.snapshot_count(asset);
        let sufficient = store.sufficiency(
            asset,
            cfg.analysis.min_snapshots,
            cfg.analysis.min_history_hours,
        );
        info!(
            "Store {}: {} snapshots, analytics {}",
            asset,
            count,
            if sufficient { "ready" } else { "warming up" },
        );
    }
    match store.persistence_health() {
        Some(err) => warn!("Persistence: degraded ({})", err),
        None => info!("Persistence: ok"),
    }
}
