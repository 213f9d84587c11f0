//! Type definitions shared by the pricing engine, storage and API layers

use crate::db::{Market, Position, Trade};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Pricing Constants
// ============================================================================

/// Constant liquidity added to each side's traded volume.
/// Keeps the pools non-zero and dampens swings on thin markets.
pub const DEFAULT_LIQUIDITY: Decimal = dec!(100);

/// Fee charged on every trade, as a fraction of the notional
pub const DEFAULT_FEE_RATE: Decimal = dec!(0.01);

/// Bounds for the simulated post-trade price
pub const MIN_TRADE_PRICE: Decimal = dec!(0.05);
pub const MAX_TRADE_PRICE: Decimal = dec!(0.95);

/// Bounds for persisted option odds
pub const MIN_ODDS: Decimal = dec!(0.01);
pub const MAX_ODDS: Decimal = dec!(0.99);

/// Number of most recent trades read when pricing
pub const DEFAULT_HISTORY_WINDOW: usize = 100;

/// Upper bound on the pricing history window
pub const MAX_HISTORY_WINDOW: usize = 10_000;

/// Largest notional accepted for a single trade (USD)
pub const MAX_TRADE_AMOUNT: Decimal = dec!(1000000000);

/// Decimal places accepted on a trade amount and on the fee rate.
/// Keeps `amount * fee_rate` within `Decimal` precision, so fees are exact.
pub const MAX_AMOUNT_SCALE: u32 = 8;

// ============================================================================
// Enums
// ============================================================================

/// Outcome side of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "YES" => Ok(Side::Yes),
            "NO" => Ok(Side::No),
            other => Err(format!("Invalid side '{}': expected YES or NO", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    Active,
    Resolved,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Active => "ACTIVE",
            MarketStatus::Resolved => "RESOLVED",
        }
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ACTIVE" => Ok(MarketStatus::Active),
            "RESOLVED" => Ok(MarketStatus::Resolved),
            other => Err(format!("Invalid market status '{}'", other)),
        }
    }
}

// ============================================================================
// Pricing Configuration
// ============================================================================

/// AMM parameters, adjustable at runtime through the config manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfig {
    pub liquidity: Decimal,
    pub fee_rate: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub min_odds: Decimal,
    pub max_odds: Decimal,
    pub history_window: usize,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            liquidity: DEFAULT_LIQUIDITY,
            fee_rate: DEFAULT_FEE_RATE,
            min_price: MIN_TRADE_PRICE,
            max_price: MAX_TRADE_PRICE,
            min_odds: MIN_ODDS,
            max_odds: MAX_ODDS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

impl PricingConfig {
    /// Check that the parameters describe a usable market maker
    pub fn validate(&self) -> Result<(), String> {
        if self.liquidity <= Decimal::ZERO {
            return Err("liquidity must be positive".to_string());
        }
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err("feeRate must be in [0, 1)".to_string());
        }
        if self.fee_rate.normalize().scale() > MAX_AMOUNT_SCALE {
            return Err(format!("feeRate allows at most {} decimal places", MAX_AMOUNT_SCALE));
        }
        if self.min_price <= Decimal::ZERO
            || self.min_price >= self.max_price
            || self.max_price >= Decimal::ONE
        {
            return Err("price bounds must satisfy 0 < minPrice < maxPrice < 1".to_string());
        }
        if self.min_odds <= Decimal::ZERO
            || self.min_odds >= self.max_odds
            || self.max_odds >= Decimal::ONE
        {
            return Err("odds bounds must satisfy 0 < minOdds < maxOdds < 1".to_string());
        }
        if self.history_window == 0 || self.history_window > MAX_HISTORY_WINDOW {
            return Err(format!("historyWindow must be in [1, {}]", MAX_HISTORY_WINDOW));
        }
        Ok(())
    }
}

/// Partial pricing config update (all fields optional)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingConfigUpdate {
    pub liquidity: Option<Decimal>,
    pub fee_rate: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub min_odds: Option<Decimal>,
    pub max_odds: Option<Decimal>,
    pub history_window: Option<usize>,
}

// ============================================================================
// Quotes & Trades
// ============================================================================

/// Hypothetical trade priced against the current pools. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub market_id: Uuid,
    pub side: Side,
    pub amount: Decimal,
    pub yes_volume: Decimal,
    pub no_volume: Decimal,
    pub yes_pool: Decimal,
    pub no_pool: Decimal,
    pub yes_odds: Decimal,
    pub no_odds: Decimal,
    /// Pool-implied odds of the quoted side before the trade
    pub current_odds: Decimal,
    pub new_price: Decimal,
    pub price_impact: Decimal,
    pub shares: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
}

/// Trade request body as received over HTTP
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub market_id: Uuid,
    pub user_id: Uuid,
    pub side: String,
    pub amount: Decimal,
    pub max_price: Decimal,
}

/// Validated trade order handed to the pricing engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeOrder {
    pub market_id: Uuid,
    pub user_id: Uuid,
    pub side: Side,
    pub amount: Decimal,
    pub max_price: Decimal,
}

/// Outcome of an executed trade
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResult {
    pub trade: Trade,
    pub position: Position,
    pub price_impact: Decimal,
    pub yes_odds: Decimal,
    pub no_odds: Decimal,
    pub total_volume: Decimal,
    pub liquidity_pool: Decimal,
}

/// Aggregated market statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStats {
    pub market_id: Uuid,
    pub status: MarketStatus,
    pub yes_volume: Decimal,
    pub no_volume: Decimal,
    pub yes_pool: Decimal,
    pub no_pool: Decimal,
    /// Pool-implied odds (what the next quote starts from)
    pub implied_yes_odds: Decimal,
    pub implied_no_odds: Decimal,
    /// Odds persisted on the options after the last trade
    pub yes_odds: Decimal,
    pub no_odds: Decimal,
    pub total_volume: Decimal,
    pub liquidity_pool: Decimal,
    pub trade_count: i64,
    pub window_trades: usize,
}

// ============================================================================
// Market Events
// ============================================================================

/// Events pushed to WebSocket subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    MarketCreated {
        market: Market,
    },
    #[serde(rename_all = "camelCase")]
    TradeExecuted {
        market_id: Uuid,
        trade: Trade,
        yes_odds: Decimal,
        no_odds: Decimal,
        total_volume: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    MarketResolved {
        market_id: Uuid,
        outcome: Side,
        resolved_at: DateTime<Utc>,
    },
}
