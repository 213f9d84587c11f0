//! In-memory store
//!
//! Used when no `DATABASE_URL` is configured. A single lock covers every
//! table, so a trade's snapshot and writes happen as one step.

use super::{
    AppliedFill, FillPlan, FillPlanner, Market, MarketOption, MarketStore, NewMarket, Position,
    StoreError, Trade, TradeSnapshot, User,
};
use crate::trading::TradeError;
use crate::types::{MarketStatus, Side, TradeOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    wallets: HashMap<String, Uuid>,
    markets: HashMap<Uuid, Market>,
    /// Market ids in creation order
    market_order: Vec<Uuid>,
    /// Append-only, oldest first
    trades: Vec<Trade>,
    positions: HashMap<(Uuid, Uuid, Side), Position>,
}

impl Tables {
    fn recent_trades(&self, market_id: Uuid, limit: usize) -> Vec<Trade> {
        self.trades
            .iter()
            .rev()
            .filter(|t| t.market_id == market_id)
            .take(limit)
            .cloned()
            .collect()
    }

    fn share_total(&self, market_id: Uuid, side: Side) -> Decimal {
        self.trades
            .iter()
            .filter(|t| t.market_id == market_id && t.side == side)
            .map(|t| t.shares)
            .sum()
    }

    fn snapshot(&self, order: &TradeOrder, history_window: usize, now: DateTime<Utc>) -> TradeSnapshot {
        TradeSnapshot {
            market: self.markets.get(&order.market_id).cloned(),
            user: self.users.get(&order.user_id).cloned(),
            recent_trades: self.recent_trades(order.market_id, history_window),
            yes_shares: self.share_total(order.market_id, Side::Yes),
            no_shares: self.share_total(order.market_id, Side::No),
            position: self
                .positions
                .get(&(order.user_id, order.market_id, order.side))
                .cloned(),
            now,
        }
    }

    fn apply(&mut self, plan: &FillPlan) -> Result<Market, StoreError> {
        let trade = &plan.trade;
        let market = self
            .markets
            .get_mut(&trade.market_id)
            .ok_or(StoreError::NotFound)?;

        for option in market.options.iter_mut() {
            option.current_odds = match option.label {
                Side::Yes => plan.yes_odds,
                Side::No => plan.no_odds,
            };
        }
        market.total_volume += trade.amount;
        market.liquidity_pool += trade.fee;
        let updated = market.clone();

        let position = &plan.position;
        self.positions.insert(
            (position.user_id, position.market_id, position.side),
            position.clone(),
        );
        self.trades.push(trade.clone());

        Ok(updated)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert_user(&self, wallet_address: &str) -> Result<User, StoreError> {
        let mut tables = self.tables.write();
        if let Some(id) = tables.wallets.get(wallet_address).copied() {
            if let Some(user) = tables.users.get(&id) {
                return Ok(user.clone());
            }
        }

        let user = User {
            id: Uuid::new_v4(),
            wallet_address: wallet_address.to_string(),
            created_at: Utc::now(),
        };
        tables.wallets.insert(user.wallet_address.clone(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn create_market(&self, market: &NewMarket) -> Result<Market, StoreError> {
        let id = Uuid::new_v4();
        let options = [Side::Yes, Side::No]
            .into_iter()
            .map(|label| MarketOption {
                id: Uuid::new_v4(),
                market_id: id,
                label,
                current_odds: dec!(0.5),
            })
            .collect();

        let created = Market {
            id,
            question: market.question.clone(),
            description: market.description.clone(),
            status: MarketStatus::Active,
            outcome: None,
            end_date: market.end_date,
            total_volume: Decimal::ZERO,
            liquidity_pool: Decimal::ZERO,
            created_at: Utc::now(),
            resolved_at: None,
            options,
        };

        let mut tables = self.tables.write();
        tables.markets.insert(id, created.clone());
        tables.market_order.push(id);
        Ok(created)
    }

    async fn get_market(&self, id: Uuid) -> Result<Option<Market>, StoreError> {
        Ok(self.tables.read().markets.get(&id).cloned())
    }

    async fn list_markets(&self, status: Option<MarketStatus>) -> Result<Vec<Market>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .market_order
            .iter()
            .rev()
            .filter_map(|id| tables.markets.get(id))
            .filter(|m| status.map_or(true, |s| m.status == s))
            .cloned()
            .collect())
    }

    async fn resolve_market(&self, id: Uuid, outcome: Side) -> Result<Option<Market>, StoreError> {
        let mut tables = self.tables.write();
        match tables.markets.get_mut(&id) {
            Some(market) if market.status == MarketStatus::Active => {
                market.status = MarketStatus::Resolved;
                market.outcome = Some(outcome);
                market.resolved_at = Some(Utc::now());
                Ok(Some(market.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn recent_trades(&self, market_id: Uuid, limit: usize) -> Result<Vec<Trade>, StoreError> {
        Ok(self.tables.read().recent_trades(market_id, limit))
    }

    async fn count_trades(&self, market_id: Uuid) -> Result<i64, StoreError> {
        let tables = self.tables.read();
        Ok(tables.trades.iter().filter(|t| t.market_id == market_id).count() as i64)
    }

    async fn user_positions(&self, user_id: Uuid) -> Result<Vec<Position>, StoreError> {
        let tables = self.tables.read();
        let mut positions: Vec<Position> = tables
            .positions
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        positions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(positions)
    }

    async fn execute_trade(
        &self,
        order: &TradeOrder,
        history_window: usize,
        planner: FillPlanner,
    ) -> Result<AppliedFill, TradeError> {
        let mut tables = self.tables.write();
        let snapshot = tables.snapshot(order, history_window, Utc::now());
        let plan = planner(&snapshot)?;
        let market = tables.apply(&plan)?;
        Ok(AppliedFill { plan, market })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_market(question: &str) -> NewMarket {
        NewMarket {
            question: question.to_string(),
            description: None,
            end_date: None,
        }
    }

    fn order(market_id: Uuid, user_id: Uuid) -> TradeOrder {
        TradeOrder {
            market_id,
            user_id,
            side: Side::Yes,
            amount: dec!(10),
            max_price: dec!(0.95),
        }
    }

    fn fixed_plan(snapshot: &TradeSnapshot, order: &TradeOrder) -> FillPlan {
        let market = snapshot.market.as_ref().unwrap();
        let now = snapshot.now;
        FillPlan {
            trade: Trade {
                id: Uuid::new_v4(),
                market_id: market.id,
                option_id: market.option(Side::Yes).unwrap().id,
                user_id: order.user_id,
                side: Side::Yes,
                amount: order.amount,
                price: dec!(0.5),
                shares: dec!(20),
                fee: dec!(0.1),
                created_at: now,
            },
            position: Position {
                id: Uuid::new_v4(),
                user_id: order.user_id,
                market_id: market.id,
                side: Side::Yes,
                shares: dec!(20),
                avg_price: dec!(0.5),
                updated_at: now,
            },
            yes_odds: dec!(0.7),
            no_odds: dec!(0.3),
            price_impact: Decimal::ZERO,
        }
    }

    #[tokio::test]
    async fn test_upsert_user_returns_existing_wallet() {
        let store = MemoryStore::new();
        let first = store.upsert_user("0xabc").await.unwrap();
        let second = store.upsert_user("0xabc").await.unwrap();
        assert_eq!(first.id, second.id);

        let other = store.upsert_user("0xdef").await.unwrap();
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_create_market_has_two_even_options() {
        let store = MemoryStore::new();
        let market = store.create_market(&new_market("Q?")).await.unwrap();

        assert_eq!(market.options.len(), 2);
        assert_eq!(market.odds(Side::Yes), Some(dec!(0.5)));
        assert_eq!(market.odds(Side::No), Some(dec!(0.5)));
        assert_eq!(market.status, MarketStatus::Active);
    }

    #[tokio::test]
    async fn test_list_markets_newest_first_and_filtered() {
        let store = MemoryStore::new();
        let first = store.create_market(&new_market("first")).await.unwrap();
        let second = store.create_market(&new_market("second")).await.unwrap();
        store.resolve_market(first.id, Side::No).await.unwrap();

        let all = store.list_markets(None).await.unwrap();
        assert_eq!(all.iter().map(|m| m.id).collect::<Vec<_>>(), vec![second.id, first.id]);

        let active = store.list_markets(Some(MarketStatus::Active)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
    }

    #[tokio::test]
    async fn test_resolve_market_only_once() {
        let store = MemoryStore::new();
        let market = store.create_market(&new_market("Q?")).await.unwrap();

        let resolved = store.resolve_market(market.id, Side::Yes).await.unwrap().unwrap();
        assert_eq!(resolved.outcome, Some(Side::Yes));
        assert!(resolved.resolved_at.is_some());

        assert!(store.resolve_market(market.id, Side::No).await.unwrap().is_none());
        assert!(store.resolve_market(Uuid::new_v4(), Side::No).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_execute_trade_applies_plan() {
        let store = MemoryStore::new();
        let market = store.create_market(&new_market("Q?")).await.unwrap();
        let user = store.upsert_user("0xabc").await.unwrap();
        let order = order(market.id, user.id);

        let planned = order;
        let applied = store
            .execute_trade(&order, 100, Box::new(move |snap: &TradeSnapshot| Ok::<_, TradeError>(fixed_plan(snap, &planned))))
            .await
            .unwrap();

        assert_eq!(applied.market.total_volume, dec!(10));
        assert_eq!(applied.market.liquidity_pool, dec!(0.1));
        assert_eq!(applied.market.odds(Side::Yes), Some(dec!(0.7)));
        assert_eq!(store.count_trades(market.id).await.unwrap(), 1);
        assert_eq!(store.user_positions(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_trade_planner_error_writes_nothing() {
        let store = MemoryStore::new();
        let market = store.create_market(&new_market("Q?")).await.unwrap();
        let user = store.upsert_user("0xabc").await.unwrap();

        let result = store
            .execute_trade(
                &order(market.id, user.id),
                100,
                Box::new(|_: &TradeSnapshot| Err::<FillPlan, _>(TradeError::State("closed".to_string()))),
            )
            .await;

        assert!(matches!(result, Err(TradeError::State(_))));
        assert_eq!(store.count_trades(market.id).await.unwrap(), 0);
        assert!(store.user_positions(user.id).await.unwrap().is_empty());
        let unchanged = store.get_market(market.id).await.unwrap().unwrap();
        assert_eq!(unchanged, market);
    }

    #[tokio::test]
    async fn test_snapshot_sees_share_totals_and_window() {
        let store = MemoryStore::new();
        let market = store.create_market(&new_market("Q?")).await.unwrap();
        let user = store.upsert_user("0xabc").await.unwrap();
        let order = order(market.id, user.id);

        for _ in 0..3 {
            let planned = order;
            store
                .execute_trade(&order, 100, Box::new(move |snap: &TradeSnapshot| Ok::<_, TradeError>(fixed_plan(snap, &planned))))
                .await
                .unwrap();
        }

        let snap = store.tables.read().snapshot(&order, 2, Utc::now());
        assert_eq!(snap.recent_trades.len(), 2);
        assert_eq!(snap.yes_shares, dec!(60));
        assert_eq!(snap.no_shares, Decimal::ZERO);
        assert!(snap.position.is_some());
    }
}
