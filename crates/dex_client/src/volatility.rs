//! Candle-to-volatility conversion.
//!
//! Annualized realized volatility from close-to-close log returns.
//! The scalar feeds range-width sizing downstream; it is cached and
//! consumed opaquely, so only the derivation lives here.

use common::Candle;

/// Annualized realized volatility of a candle series.
///
/// # Arguments
/// * `candles` — OHLCV bars in chronological order
/// * `periods_per_year` — annualization factor for the bar period
///   (8760 for 1h bars, 365 for 1d bars)
///
/// Returns 0.0 when fewer than two usable closes exist. Bars with a
/// non-positive close are skipped; the return is taken between the
/// surviving neighbors.
pub fn realized_volatility(candles: &[Candle], periods_per_year: f64) -> f64 {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).filter(|c| *c > 0.0).collect();
    if closes.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    if returns.len() < 2 {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean).powi(2))
        .sum::<f64>()
        / (returns.len() - 1) as f64;

    variance.sqrt() * periods_per_year.sqrt()
}
