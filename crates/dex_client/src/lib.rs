//! REST client for the DEX read API.
//!
//! Covers: market/token metadata, position queries, OHLCV candles.
//! All methods are rate-limited; the API is unauthenticated read-only.

pub mod rate_limit;
pub mod volatility;

use common::{Candle, Error, MarketsPayload, Position, PositionDetail, TokenInfo};
use serde::Deserialize;
use tracing::debug;

use crate::rate_limit::RateLimiter;

/// Async REST client for the DEX read API.
#[derive(Debug, Clone)]
pub struct DexClient {
    client: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
}

impl DexClient {
    /// Create a new client for the given API base URL.
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("failed to build DEX HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(),
        }
    }

    /// URL helper.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Issue a GET and decode the JSON body, mapping non-2xx to `DexApi`.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, Error> {
        self.limiter.wait_read().await;

        let mut req = self.client.get(self.url(path));
        if !query.is_empty() {
            req = req.query(query);
        }

        let resp = req.send().await.map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::DexApi {
                status,
                message: body,
            });
        }

        resp.json::<T>()
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    // ── Read endpoints ────────────────────────────────────────────────

    /// Fetch all listed markets together with the tokens they reference.
    pub async fn get_markets(&self) -> Result<MarketsPayload, Error> {
        let payload: MarketsPayload = self.get_json("/markets", &[]).await?;
        debug!(
            "Fetched {} markets, {} tokens",
            payload.markets.len(),
            payload.tokens.len()
        );
        Ok(payload)
    }

    /// Fetch the token set with current oracle prices.
    pub async fn get_tokens(&self) -> Result<Vec<TokenInfo>, Error> {
        #[derive(Deserialize)]
        struct Wrapper {
            tokens: Vec<TokenInfo>,
        }

        let w: Wrapper = self.get_json("/tokens", &[]).await?;
        debug!("Fetched {} tokens", w.tokens.len());
        Ok(w.tokens)
    }

    /// Fetch open positions for an account.
    pub async fn get_positions(&self, account: &str) -> Result<Vec<Position>, Error> {
        #[derive(Deserialize)]
        struct Wrapper {
            positions: Vec<Position>,
        }

        let w: Wrapper = self
            .get_json("/positions", &[("account", account.to_string())])
            .await?;
        debug!("Fetched {} positions for {}", w.positions.len(), account);
        Ok(w.positions)
    }

    /// Fetch positions enriched with mark price, PnL, and liquidation data.
    pub async fn get_positions_info(&self, account: &str) -> Result<Vec<PositionDetail>, Error> {
        #[derive(Deserialize)]
        struct Wrapper {
            positions: Vec<PositionDetail>,
        }

        let w: Wrapper = self
            .get_json("/positions/info", &[("account", account.to_string())])
            .await?;
        debug!(
            "Fetched {} position details for {}",
            w.positions.len(),
            account
        );
        Ok(w.positions)
    }

    /// Fetch OHLCV candles for an asset, most recent last.
    pub async fn get_candles(
        &self,
        asset: &str,
        period: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, Error> {
        #[derive(Deserialize)]
        struct Wrapper {
            candles: Vec<Candle>,
        }

        let w: Wrapper = self
            .get_json(
                "/candles",
                &[
                    ("asset", asset.to_string()),
                    ("period", period.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        debug!("Fetched {} {} candles for {}", w.candles.len(), period, asset);
        Ok(w.candles)
    }
}
