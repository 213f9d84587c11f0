//! Config manager - server settings and runtime pricing parameters
//!
//! Server settings are read once from the environment (after `.env` is
//! loaded). Pricing parameters start from the environment and can be
//! adjusted while the server runs.

use crate::types::{PricingConfig, PricingConfigUpdate};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("invalid pricing config: {0}")]
    Pricing(String),
}

/// Settings read at startup
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `None` runs the in-memory store
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub port: u16,
    pub pricing: PricingConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PricingConfig::default();
        let pricing = PricingConfig {
            liquidity: parse_or(&lookup, "AMM_LIQUIDITY", defaults.liquidity)?,
            fee_rate: parse_or(&lookup, "AMM_FEE_RATE", defaults.fee_rate)?,
            history_window: parse_or(&lookup, "AMM_HISTORY_WINDOW", defaults.history_window)?,
            ..defaults
        };
        pricing.validate().map_err(ConfigError::Pricing)?;

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            port: parse_or(&lookup, "PORT", 8000)?,
            pricing,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Holds the live pricing parameters
pub struct ConfigManager {
    config: RwLock<PricingConfig>,
}

impl ConfigManager {
    pub fn new(config: PricingConfig) -> Self {
        info!(
            "ConfigManager initialized: liquidity={}, fee_rate={}%, history_window={}",
            config.liquidity,
            config.fee_rate * Decimal::ONE_HUNDRED,
            config.history_window
        );

        Self {
            config: RwLock::new(config),
        }
    }

    /// Apply a partial update. The merged config is validated as a whole
    /// and nothing changes if it is rejected.
    pub fn update_config(&self, update: PricingConfigUpdate) -> Result<PricingConfig, ConfigError> {
        let mut config = self.config.write();

        let merged = PricingConfig {
            liquidity: update.liquidity.unwrap_or(config.liquidity),
            fee_rate: update.fee_rate.unwrap_or(config.fee_rate),
            min_price: update.min_price.unwrap_or(config.min_price),
            max_price: update.max_price.unwrap_or(config.max_price),
            min_odds: update.min_odds.unwrap_or(config.min_odds),
            max_odds: update.max_odds.unwrap_or(config.max_odds),
            history_window: update.history_window.unwrap_or(config.history_window),
        };
        merged.validate().map_err(ConfigError::Pricing)?;

        *config = merged.clone();
        info!(
            "Updated pricing config: liquidity={}, fee_rate={}%, price=[{}, {}], odds=[{}, {}], history_window={}",
            merged.liquidity,
            merged.fee_rate * Decimal::ONE_HUNDRED,
            merged.min_price,
            merged.max_price,
            merged.min_odds,
            merged.max_odds,
            merged.history_window
        );
        Ok(merged)
    }

    /// Get current configuration
    pub fn get_config(&self) -> PricingConfig {
        self.config.read().clone()
    }
}
