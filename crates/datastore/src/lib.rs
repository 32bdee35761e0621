//! Freshness, storage, and analytics layer for range-bot.
//!
//! Turns slow, rate-limited upstream APIs into a small set of
//! always-available, bounded-staleness values, and a rolling history of
//! forecast snapshots into percentile/trend statistics.

pub mod cache;
pub mod market_data;
pub mod percentile;
pub mod snapshots;

pub use cache::{EntryStatus, FreshCache, SharedError};
pub use market_data::{CachedResource, MarketData, ResourceStatus};
pub use percentile::{analyze, PercentileAnalysis, PercentilePoint, Trend};
pub use snapshots::SnapshotStore;
