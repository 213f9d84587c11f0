//! Database models matching the PostgreSQL schema

use crate::types::{MarketStatus, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

fn decode_err(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

fn side_column(row: &PgRow, column: &str) -> Result<Side, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    raw.parse().map_err(decode_err)
}

/// Registered user, identified by wallet address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub wallet_address: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            wallet_address: row.try_get("wallet_address")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// One side of a binary market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketOption {
    pub id: Uuid,
    pub market_id: Uuid,
    pub label: Side,
    pub current_odds: Decimal,
}

impl<'r> FromRow<'r, PgRow> for MarketOption {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            market_id: row.try_get("market_id")?,
            label: side_column(row, "label")?,
            current_odds: row.try_get("current_odds")?,
        })
    }
}

/// Binary market with its YES/NO options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: Uuid,
    pub question: String,
    pub description: Option<String>,
    pub status: MarketStatus,
    pub outcome: Option<Side>,
    pub end_date: Option<DateTime<Utc>>,
    /// Sum of gross trade amounts
    pub total_volume: Decimal,
    /// Sum of fees collected
    pub liquidity_pool: Decimal,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub options: Vec<MarketOption>,
}

impl Market {
    pub fn is_resolved(&self) -> bool {
        self.status == MarketStatus::Resolved
    }

    /// A market with an end date at or before `now` no longer accepts trades
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_date.map(|end| end <= now).unwrap_or(false)
    }

    pub fn option(&self, side: Side) -> Option<&MarketOption> {
        self.options.iter().find(|o| o.label == side)
    }

    pub fn odds(&self, side: Side) -> Option<Decimal> {
        self.option(side).map(|o| o.current_odds)
    }
}

impl<'r> FromRow<'r, PgRow> for Market {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let outcome: Option<String> = row.try_get("outcome")?;
        Ok(Self {
            id: row.try_get("id")?,
            question: row.try_get("question")?,
            description: row.try_get("description")?,
            status: status.parse().map_err(decode_err)?,
            outcome: outcome.map(|o| o.parse::<Side>()).transpose().map_err(decode_err)?,
            end_date: row.try_get("end_date")?,
            total_volume: row.try_get("total_volume")?,
            liquidity_pool: row.try_get("liquidity_pool")?,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
            options: Vec::new(),
        })
    }
}

/// New market request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMarket {
    pub question: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// Executed trade. Rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: Uuid,
    pub market_id: Uuid,
    pub option_id: Uuid,
    pub user_id: Uuid,
    pub side: Side,
    /// Gross USD notional, fee included
    pub amount: Decimal,
    pub price: Decimal,
    pub shares: Decimal,
    pub fee: Decimal,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Trade {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            market_id: row.try_get("market_id")?,
            option_id: row.try_get("option_id")?,
            user_id: row.try_get("user_id")?,
            side: side_column(row, "side")?,
            amount: row.try_get("amount")?,
            price: row.try_get("price")?,
            shares: row.try_get("shares")?,
            fee: row.try_get("fee")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A user's holding on one side of one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub id: Uuid,
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub side: Side,
    pub shares: Decimal,
    pub avg_price: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Position {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            market_id: row.try_get("market_id")?,
            side: side_column(row, "side")?,
            shares: row.try_get("shares")?,
            avg_price: row.try_get("avg_price")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Everything the pricing engine needs to plan a fill, read inside the
/// trade transaction. `market` and `user` are `None` when not found.
#[derive(Debug, Clone)]
pub struct TradeSnapshot {
    pub market: Option<Market>,
    pub user: Option<User>,
    /// Most recent trades on the market, newest first
    pub recent_trades: Vec<Trade>,
    /// Share totals across every trade on the market
    pub yes_shares: Decimal,
    pub no_shares: Decimal,
    /// Existing position of the user on the traded side
    pub position: Option<Position>,
    pub now: DateTime<Utc>,
}

/// Writes produced by a successful fill plan
#[derive(Debug, Clone)]
pub struct FillPlan {
    pub trade: Trade,
    pub position: Position,
    pub yes_odds: Decimal,
    pub no_odds: Decimal,
    pub price_impact: Decimal,
}

/// Result of applying a fill plan
#[derive(Debug, Clone)]
pub struct AppliedFill {
    pub plan: FillPlan,
    pub market: Market,
}
