//! Configuration loader — merges env vars, .env file, and config.toml.

use common::config::BotConfig;
use common::Error;
use std::path::Path;

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_positive_i64(raw: &str, env_name: &str) -> Result<i64, Error> {
    let parsed = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed <= 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn validate_config(config: &BotConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.assets.is_empty() {
        issues.push("assets must contain at least one asset".into());
    }

    if config.cache.markets_secs == 0 {
        issues.push("cache.markets_secs must be > 0".into());
    }
    if config.cache.tokens_secs == 0 {
        issues.push("cache.tokens_secs must be > 0".into());
    }
    if config.cache.positions_secs == 0 {
        issues.push("cache.positions_secs must be > 0".into());
    }
    if config.cache.position_info_secs == 0 {
        issues.push("cache.position_info_secs must be > 0".into());
    }
    if config.cache.volatility_secs == 0 {
        issues.push("cache.volatility_secs must be > 0".into());
    }
    if config.cache.bounds_secs == 0 {
        issues.push("cache.bounds_secs must be > 0".into());
    }

    if config.forecast_cooldown_ms == 0 {
        issues.push("forecast_cooldown_ms must be > 0".into());
    }

    if config.store.path.trim().is_empty() {
        issues.push("store.path must not be empty".into());
    }
    if config.store.retention_hours < 24 {
        issues.push("store.retention_hours must cover the 24h analysis window".into());
    }

    if config.timing.market_refresh_secs == 0 {
        issues.push("timing.market_refresh_secs must be > 0".into());
    }
    if config.timing.bounds_poll_secs == 0 {
        issues.push("timing.bounds_poll_secs must be > 0".into());
    }
    if config.timing.heartbeat_secs == 0 {
        issues.push("timing.heartbeat_secs must be > 0".into());
    }

    if config.volatility.candle_limit < 2 {
        issues.push("volatility.candle_limit must be >= 2".into());
    }
    if config.volatility.periods_per_year <= 0.0 {
        issues.push("volatility.periods_per_year must be > 0".into());
    }
    if config.volatility.candle_period.trim().is_empty() {
        issues.push("volatility.candle_period must not be empty".into());
    }

    if config.analysis.min_snapshots == 0 {
        issues.push("analysis.min_snapshots must be >= 1".into());
    }
    if config.analysis.min_history_hours < 0.0 {
        issues.push("analysis.min_history_hours must be >= 0".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load bot configuration from environment and optional config file.
pub fn load_config() -> Result<BotConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = BotConfig::default();

    // 3. Try loading config.toml if it exists.
    let config_path = Path::new("config.toml");
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config.toml: {}", e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))?;
    }

    // 4. Override with environment variables (highest priority).
    if let Ok(key) = std::env::var("FORECAST_API_KEY") {
        config.forecast_api_key = key;
    }
    if let Ok(url) = std::env::var("FORECAST_BASE_URL") {
        config.forecast_base_url = url;
    }
    if let Ok(url) = std::env::var("DEX_BASE_URL") {
        config.dex_base_url = url;
    }
    if let Ok(account) = std::env::var("RANGE_ACCOUNT") {
        config.account = account;
    }
    if let Ok(assets) = std::env::var("RANGE_ASSETS") {
        let parsed: Vec<String> = assets
            .split(',')
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .collect();
        if parsed.is_empty() {
            return Err(Error::Config(
                "RANGE_ASSETS must be a comma-separated list of symbols".into(),
            ));
        }
        config.assets = parsed;
    }
    if let Ok(raw) = std::env::var("RANGE_FORECAST_COOLDOWN_MS") {
        config.forecast_cooldown_ms = parse_positive_u64(&raw, "RANGE_FORECAST_COOLDOWN_MS")?;
    }
    if let Ok(path) = std::env::var("RANGE_STORE_PATH") {
        config.store.path = path;
    }
    if let Ok(raw) = std::env::var("RANGE_RETENTION_HOURS") {
        config.store.retention_hours = parse_positive_i64(&raw, "RANGE_RETENTION_HOURS")?;
    }
    if let Ok(raw) = std::env::var("RANGE_BOUNDS_POLL_SECS") {
        config.timing.bounds_poll_secs = parse_positive_u64(&raw, "RANGE_BOUNDS_POLL_SECS")?;
    }

    // 5. Validate required fields.
    if config.forecast_api_key.is_empty() {
        return Err(Error::Config(
            "FORECAST_API_KEY is required (set in .env or environment)".into(),
        ));
    }
    if config.account.is_empty() {
        return Err(Error::Config(
            "RANGE_ACCOUNT is required (set in .env or environment)".into(),
        ));
    }

    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> BotConfig {
        BotConfig {
            forecast_api_key: "key".into(),
            account: "0xabc".into(),
            ..BotConfig::default()
        }
    }

    #[test]
    fn test_default_config_with_credentials_validates() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let mut config = valid_config();
        config.cache.bounds_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("bounds_secs"));
    }

    #[test]
    fn test_zero_cooldown_is_rejected() {
        let mut config = valid_config();
        config.forecast_cooldown_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_retention_below_analysis_window_is_rejected() {
        let mut config = valid_config();
        config.store.retention_hours = 12;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("retention_hours"));
    }

    #[test]
    fn test_empty_assets_are_rejected() {
        let mut config = valid_config();
        config.assets.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_issues_are_collected_not_first_only() {
        let mut config = valid_config();
        config.cache.markets_secs = 0;
        config.timing.heartbeat_secs = 0;
        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("markets_secs"));
        assert!(message.contains("heartbeat_secs"));
    }
}
