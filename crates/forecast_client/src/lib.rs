//! Client for the probability-bounds forecast API.
//!
//! Fetches per-asset 24h price distributions (probability above/below a
//! ladder of price levels). The endpoint is metered per call, so every
//! dispatch goes through a [`cooldown::CooldownGate`].

pub mod cooldown;

use common::{BoundLevel, Error, ProbabilityBounds};
use serde::Deserialize;
use tracing::debug;

use crate::cooldown::CooldownGate;

/// Forecast horizon requested from the API, in hours.
const HORIZON_HOURS: u32 = 24;

/// Async client for the bounds API.
#[derive(Debug, Clone)]
pub struct ForecastClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    gate: CooldownGate,
}

// ── Response types ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BoundsResponse {
    #[serde(default)]
    asset: String,
    #[serde(default)]
    horizon_hours: Option<u32>,
    levels: Vec<BoundLevel>,
}

// ── Implementation ────────────────────────────────────────────────────

impl ForecastClient {
    pub fn new(base_url: &str, api_key: &str, cooldown_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build forecast HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            gate: CooldownGate::from_millis(cooldown_ms),
        }
    }

    /// Fetch the 24h probability distribution for an asset.
    ///
    /// Dispatched through the cooldown gate; concurrent callers queue and
    /// land at least the configured interval apart.
    pub async fn fetch_bounds(&self, asset: &str) -> Result<ProbabilityBounds, Error> {
        self.gate
            .guard(|| self.fetch_bounds_inner(asset))
            .await
    }

    async fn fetch_bounds_inner(&self, asset: &str) -> Result<ProbabilityBounds, Error> {
        let url = format!("{}/bounds/{}", self.base_url, asset);
        debug!("Fetching bounds: {} (horizon={}h)", url, HORIZON_HOURS);

        let resp = self
            .client
            .get(&url)
            .query(&[("horizon_hours", HORIZON_HOURS.to_string())])
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ForecastApi {
                status,
                message: body,
            });
        }

        let body: BoundsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if let Some(h) = body.horizon_hours {
            if h != HORIZON_HOURS {
                debug!(
                    "Bounds for {} came back with horizon {}h (requested {}h)",
                    body.asset, h, HORIZON_HOURS
                );
            }
        }

        let mut levels = body.levels;
        levels.sort_by(|a, b| a.price.total_cmp(&b.price));

        Ok(ProbabilityBounds { levels })
    }
}
