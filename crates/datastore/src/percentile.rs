//! Percentile and trend analytics over the snapshot history.
//!
//! Each stored forecast distribution is evaluated at the current price to
//! get a percentile (where the price sits in that forecast, 0–100). The
//! series of percentiles over the analysis window then yields summary
//! statistics and a regression-based trend classification.

use serde::Serialize;
use tracing::debug;

use common::{BoundsSnapshot, ProbabilityBounds};

use crate::snapshots::SnapshotStore;

/// Snapshots younger than this are excluded as too noisy.
pub const WINDOW_MIN_HOURS: f64 = 3.0;
/// Snapshots older than this are stale for the 24h forecast horizon.
pub const WINDOW_MAX_HOURS: f64 = 24.0;

/// Slopes inside ±this (percentile points per hour) classify as stable.
const STABLE_SLOPE_THRESHOLD: f64 = 0.5;

// ── Public Types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Rising => write!(f, "rising"),
            Trend::Falling => write!(f, "falling"),
            Trend::Stable => write!(f, "stable"),
        }
    }
}

/// One snapshot's percentile evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PercentilePoint {
    /// Snapshot time, ms since epoch.
    pub timestamp: i64,
    pub percentile: f64,
    pub hours_ago: f64,
}

/// Summary of where the current price has sat in recent forecasts.
/// Derived on demand, never cached.
#[derive(Debug, Clone, Serialize)]
pub struct PercentileAnalysis {
    pub asset: String,
    pub current_price: f64,
    /// Ascending by timestamp (oldest first).
    pub data_points: Vec<PercentilePoint>,
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub median: f64,
    pub trend: Trend,
    /// R² of the trend regression, 0 with fewer than 2 points.
    pub trend_strength: f64,
    /// Percentile of the most recent snapshot in the window.
    pub current_percentile: f64,
    pub range: f64,
}

impl PercentileAnalysis {
    /// The defined fallback when the analysis window is empty.
    fn neutral(asset: &str, current_price: f64) -> Self {
        Self {
            asset: asset.to_string(),
            current_price,
            data_points: Vec::new(),
            min: 50.0,
            max: 50.0,
            average: 50.0,
            median: 50.0,
            trend: Trend::Stable,
            trend_strength: 0.0,
            current_percentile: 50.0,
            range: 0.0,
        }
    }
}

// ── Main API ──────────────────────────────────────────────────────────

/// Analyze `asset` at `current_price` against its snapshot history.
///
/// Uses snapshots strictly between 3 and 24 hours old. Never fails: an
/// empty window returns the neutral default.
pub fn analyze(store: &SnapshotStore, asset: &str, current_price: f64) -> PercentileAnalysis {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let selected = store.query(asset, |ts| {
        let age_hours = (now_ms - ts) as f64 / 3_600_000.0;
        age_hours > WINDOW_MIN_HOURS && age_hours < WINDOW_MAX_HOURS
    });
    analyze_points(&selected, asset, current_price, now_ms)
}

fn analyze_points(
    selected: &[BoundsSnapshot],
    asset: &str,
    current_price: f64,
    now_ms: i64,
) -> PercentileAnalysis {
    if selected.is_empty() {
        debug!("{}: no snapshots in analysis window, neutral default", asset);
        return PercentileAnalysis::neutral(asset, current_price);
    }

    let mut points: Vec<PercentilePoint> = selected
        .iter()
        .map(|s| PercentilePoint {
            timestamp: s.timestamp,
            percentile: price_percentile(&s.bounds, current_price),
            hours_ago: s.age_hours(now_ms),
        })
        .collect();
    points.sort_by_key(|p| p.timestamp);

    let values: Vec<f64> = points.iter().map(|p| p.percentile).collect();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let average = values.iter().sum::<f64>() / values.len() as f64;
    let median = median_of(&values);
    let current_percentile = *values.last().unwrap();

    // Regress percentile against hours elapsed since the earliest point.
    let earliest_hours_ago = points.first().unwrap().hours_ago;
    let xs: Vec<f64> = points
        .iter()
        .map(|p| earliest_hours_ago - p.hours_ago)
        .collect();
    let (slope, r_squared) = linear_regression(&xs, &values);

    let trend = if slope.abs() < STABLE_SLOPE_THRESHOLD {
        Trend::Stable
    } else if slope > 0.0 {
        Trend::Rising
    } else {
        Trend::Falling
    };
    let trend_strength = if points.len() < 2 { 0.0 } else { r_squared };

    PercentileAnalysis {
        asset: asset.to_string(),
        current_price,
        data_points: points,
        min,
        max,
        average,
        median,
        trend,
        trend_strength,
        current_percentile,
        range: max - min,
    }
}

/// Where `price` sits in a forecast distribution, as a percentile 0–100.
///
/// Linear interpolation of `probability_below` across the sorted levels,
/// clamped to the endpoint values outside the ladder. An empty
/// distribution reads as the 50th percentile.
pub fn price_percentile(bounds: &ProbabilityBounds, price: f64) -> f64 {
    let levels = &bounds.levels;
    let Some(first) = levels.first() else {
        return 50.0;
    };
    let last = levels.last().unwrap();

    if price <= first.price {
        return (first.probability_below * 100.0).clamp(0.0, 100.0);
    }
    if price >= last.price {
        return (last.probability_below * 100.0).clamp(0.0, 100.0);
    }

    for pair in levels.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        if price >= lo.price && price <= hi.price {
            let span = hi.price - lo.price;
            let t = if span > 0.0 {
                (price - lo.price) / span
            } else {
                0.0
            };
            let below = lo.probability_below + t * (hi.probability_below - lo.probability_below);
            return (below * 100.0).clamp(0.0, 100.0);
        }
    }

    // Unreachable with sorted levels; fall back to neutral.
    50.0
}

// ── Internal Helpers ──────────────────────────────────────────────────

/// Standard even/odd-count median.
fn median_of(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Least-squares fit of y against x. Returns `(slope, r_squared)`,
/// `(0, 0)` when fewer than 2 points or x has no variance.
fn linear_regression(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len();
    if n < 2 {
        return (0.0, 0.0);
    }
    let n_f = n as f64;
    let mean_x = xs.iter().sum::<f64>() / n_f;
    let mean_y = ys.iter().sum::<f64>() / n_f;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mean_x) * (y - mean_y);
        var_x += (x - mean_x).powi(2);
        var_y += (y - mean_y).powi(2);
    }

    if var_x == 0.0 {
        return (0.0, 0.0);
    }
    let slope = cov / var_x;
    let r_squared = if var_y == 0.0 {
        0.0
    } else {
        (cov * cov) / (var_x * var_y)
    };
    (slope, r_squared)
}
