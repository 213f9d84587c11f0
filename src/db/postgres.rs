//! PostgreSQL store using SQLx
//! Uses runtime query checking (no compile-time DATABASE_URL needed)

use super::{
    AppliedFill, FillPlanner, Market, MarketOption, MarketStore, NewMarket, Position, StoreError,
    Trade, TradeSnapshot, User,
};
use crate::trading::TradeError;
use crate::types::{MarketStatus, Side, TradeOrder};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::postgres::{PgExecutor, PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = include_str!("schema.sql");

const MARKET_COLUMNS: &str = r#"
    id, question, description, status, outcome, end_date,
    total_volume, liquidity_pool, created_at, resolved_at
"#;

const TRADE_COLUMNS: &str = r#"
    id, market_id, option_id, user_id, side, amount,
    price, shares, fee, created_at
"#;

const POSITION_COLUMNS: &str = r#"
    id, user_id, market_id, side, shares, avg_price, updated_at
"#;

/// `LIMIT` bind value; Postgres takes a signed bigint
fn sql_limit(limit: usize) -> Result<i64, StoreError> {
    i64::try_from(limit)
        .map_err(|_| StoreError::InvalidData(format!("limit {} is out of range", limit)))
}

/// Database connection wrapper
#[derive(Clone)]
pub struct Database {
    pool: Arc<PgPool>,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Database pool created with max {} connections", max_connections);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(self.pool()).await?;
        info!("Database schema ready");
        Ok(())
    }
}

/// Load options for the given markets, YES first
async fn fetch_options<'e, E>(executor: E, market_ids: &[Uuid]) -> Result<Vec<MarketOption>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query(
        r#"
        SELECT id, market_id, label, current_odds
        FROM market_options
        WHERE market_id = ANY($1)
        ORDER BY market_id, CASE label WHEN 'YES' THEN 0 ELSE 1 END
        "#,
    )
    .bind(market_ids)
    .fetch_all(executor)
    .await?;

    rows.iter().map(MarketOption::from_row).collect()
}

fn attach_options(markets: &mut [Market], options: Vec<MarketOption>) {
    for option in options {
        if let Some(market) = markets.iter_mut().find(|m| m.id == option.market_id) {
            market.options.push(option);
        }
    }
}

#[async_trait]
impl MarketStore for Database {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    // ==========================================
    // User Operations
    // ==========================================

    async fn upsert_user(&self, wallet_address: &str) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, wallet_address)
            VALUES ($1, $2)
            ON CONFLICT (wallet_address) DO UPDATE SET wallet_address = EXCLUDED.wallet_address
            RETURNING id, wallet_address, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(wallet_address)
        .fetch_one(self.pool())
        .await?;

        Ok(User::from_row(&row)?)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, wallet_address, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(User::from_row(&row)?)),
            None => Ok(None),
        }
    }

    // ==========================================
    // Market Operations
    // ==========================================

    async fn create_market(&self, market: &NewMarket) -> Result<Market, StoreError> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO markets (id, question, description, status, end_date, total_volume, liquidity_pool)
            VALUES ($1, $2, $3, 'ACTIVE', $4, 0, 0)
            RETURNING {}
            "#,
            MARKET_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&market.question)
        .bind(&market.description)
        .bind(market.end_date)
        .fetch_one(&mut *tx)
        .await?;
        let mut created = Market::from_row(&row)?;

        for side in [Side::Yes, Side::No] {
            let row = sqlx::query(
                r#"
                INSERT INTO market_options (id, market_id, label, current_odds)
                VALUES ($1, $2, $3, $4)
                RETURNING id, market_id, label, current_odds
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(created.id)
            .bind(side.as_str())
            .bind(dec!(0.5))
            .fetch_one(&mut *tx)
            .await?;
            created.options.push(MarketOption::from_row(&row)?);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_market(&self, id: Uuid) -> Result<Option<Market>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM markets WHERE id = $1", MARKET_COLUMNS))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut market = Market::from_row(&row)?;
        market.options = fetch_options(self.pool(), &[market.id]).await?;
        Ok(Some(market))
    }

    async fn list_markets(&self, status: Option<MarketStatus>) -> Result<Vec<Market>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM markets
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            "#,
            MARKET_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(self.pool())
        .await?;

        let mut markets = Vec::with_capacity(rows.len());
        for row in rows {
            markets.push(Market::from_row(&row)?);
        }

        let ids: Vec<Uuid> = markets.iter().map(|m| m.id).collect();
        let options = fetch_options(self.pool(), &ids).await?;
        attach_options(&mut markets, options);
        Ok(markets)
    }

    async fn resolve_market(&self, id: Uuid, outcome: Side) -> Result<Option<Market>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE markets
            SET status = 'RESOLVED', outcome = $2, resolved_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND status = 'ACTIVE'
            RETURNING {}
            "#,
            MARKET_COLUMNS
        ))
        .bind(id)
        .bind(outcome.as_str())
        .fetch_optional(self.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut market = Market::from_row(&row)?;
        market.options = fetch_options(self.pool(), &[market.id]).await?;
        Ok(Some(market))
    }

    // ==========================================
    // Trade & Position Reads
    // ==========================================

    async fn recent_trades(&self, market_id: Uuid, limit: usize) -> Result<Vec<Trade>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM trades
            WHERE market_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            TRADE_COLUMNS
        ))
        .bind(market_id)
        .bind(sql_limit(limit)?)
        .fetch_all(self.pool())
        .await?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            trades.push(Trade::from_row(&row)?);
        }
        Ok(trades)
    }

    async fn count_trades(&self, market_id: Uuid) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades WHERE market_id = $1")
            .bind(market_id)
            .fetch_one(self.pool())
            .await?;

        Ok(row.0)
    }

    async fn user_positions(&self, user_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE user_id = $1 ORDER BY updated_at DESC",
            POSITION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        let mut positions = Vec::with_capacity(rows.len());
        for row in rows {
            positions.push(Position::from_row(&row)?);
        }
        Ok(positions)
    }

    // ==========================================
    // Trade Execution
    // ==========================================

    async fn execute_trade(
        &self,
        order: &TradeOrder,
        history_window: usize,
        planner: FillPlanner,
    ) -> Result<AppliedFill, TradeError> {
        // Dropping `tx` on any early return rolls everything back
        let mut tx = self.pool().begin().await?;

        // Row lock on the market serializes concurrent trades against it
        let row = sqlx::query(&format!(
            "SELECT {} FROM markets WHERE id = $1 FOR UPDATE",
            MARKET_COLUMNS
        ))
        .bind(order.market_id)
        .fetch_optional(&mut *tx)
        .await?;

        let market = match row {
            Some(row) => {
                let mut market = Market::from_row(&row)?;
                market.options = fetch_options(&mut *tx, &[market.id]).await?;
                Some(market)
            }
            None => None,
        };

        let user = sqlx::query("SELECT id, wallet_address, created_at FROM users WHERE id = $1")
            .bind(order.user_id)
            .fetch_optional(&mut *tx)
            .await?
            .map(|row| User::from_row(&row))
            .transpose()?;

        let trade_rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM trades
            WHERE market_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            TRADE_COLUMNS
        ))
        .bind(order.market_id)
        .bind(sql_limit(history_window)?)
        .fetch_all(&mut *tx)
        .await?;
        let recent_trades = trade_rows
            .iter()
            .map(Trade::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let totals: Vec<(String, Decimal)> = sqlx::query_as(
            r#"
            SELECT side, COALESCE(SUM(shares), 0)
            FROM trades
            WHERE market_id = $1
            GROUP BY side
            "#,
        )
        .bind(order.market_id)
        .fetch_all(&mut *tx)
        .await?;
        let share_total = |side: Side| {
            totals
                .iter()
                .find(|(s, _)| s == side.as_str())
                .map(|(_, total)| *total)
                .unwrap_or(Decimal::ZERO)
        };

        let position = sqlx::query(&format!(
            "SELECT {} FROM positions WHERE user_id = $1 AND market_id = $2 AND side = $3",
            POSITION_COLUMNS
        ))
        .bind(order.user_id)
        .bind(order.market_id)
        .bind(order.side.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| Position::from_row(&row))
        .transpose()?;

        let snapshot = TradeSnapshot {
            market,
            user,
            recent_trades,
            yes_shares: share_total(Side::Yes),
            no_shares: share_total(Side::No),
            position,
            now: Utc::now(),
        };

        let plan = planner(&snapshot)?;
        let trade = &plan.trade;

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, market_id, option_id, user_id, side, amount,
                price, shares, fee, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(trade.id)
        .bind(trade.market_id)
        .bind(trade.option_id)
        .bind(trade.user_id)
        .bind(trade.side.as_str())
        .bind(trade.amount)
        .bind(trade.price)
        .bind(trade.shares)
        .bind(trade.fee)
        .bind(trade.created_at)
        .execute(&mut *tx)
        .await?;

        let position = &plan.position;
        sqlx::query(
            r#"
            INSERT INTO positions (id, user_id, market_id, side, shares, avg_price, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, market_id, side) DO UPDATE SET
                shares = EXCLUDED.shares,
                avg_price = EXCLUDED.avg_price,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(position.id)
        .bind(position.user_id)
        .bind(position.market_id)
        .bind(position.side.as_str())
        .bind(position.shares)
        .bind(position.avg_price)
        .bind(position.updated_at)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            r#"
            UPDATE market_options
            SET current_odds = CASE label WHEN 'YES' THEN $2 ELSE $3 END
            WHERE market_id = $1
            "#,
        )
        .bind(trade.market_id)
        .bind(plan.yes_odds)
        .bind(plan.no_odds)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 2 {
            return Err(TradeError::Store(StoreError::InvalidData(format!(
                "market {} has {} options, expected 2",
                trade.market_id,
                updated.rows_affected()
            ))));
        }

        let row = sqlx::query(&format!(
            r#"
            UPDATE markets
            SET
                total_volume = total_volume + $2,
                liquidity_pool = liquidity_pool + $3
            WHERE id = $1
            RETURNING {}
            "#,
            MARKET_COLUMNS
        ))
        .bind(trade.market_id)
        .bind(trade.amount)
        .bind(trade.fee)
        .fetch_one(&mut *tx)
        .await?;
        let mut market = Market::from_row(&row)?;
        market.options = fetch_options(&mut *tx, &[market.id]).await?;

        tx.commit().await?;

        Ok(AppliedFill { plan, market })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_limit_rejects_values_beyond_bigint() {
        assert_eq!(sql_limit(100).unwrap(), 100);
        assert_eq!(sql_limit(i64::MAX as usize).unwrap(), i64::MAX);
        assert!(matches!(sql_limit(usize::MAX), Err(StoreError::InvalidData(_))));
    }
}
