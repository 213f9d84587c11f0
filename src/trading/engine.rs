//! Market Engine
//!
//! Validates requests, reads through the store, prices with
//! [`pricing`](super::pricing) and publishes market events.

use super::pricing::{self, PoolState};
use crate::config_manager::{ConfigError, ConfigManager};
use crate::db::{FillPlanner, Market, MarketStore, NewMarket, Position, StoreError, Trade, TradeSnapshot, User};
use crate::types::{
    MarketEvent, MarketStats, MarketStatus, PricingConfig, PricingConfigUpdate, Quote, Side,
    TradeOrder, TradeRequest, TradeResult,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Buffered market events per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 256;

const MAX_QUESTION_LEN: usize = 500;

#[derive(Error, Debug)]
pub enum TradeError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    State(String),
    #[error("Slippage exceeded: price {price} is above max price {max_price}")]
    Slippage { price: Decimal, max_price: Decimal },
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn parse_side(raw: &str) -> Result<Side, TradeError> {
    raw.parse().map_err(TradeError::Validation)
}

pub struct MarketEngine {
    store: Arc<dyn MarketStore>,
    config: Arc<ConfigManager>,
    events: broadcast::Sender<MarketEvent>,
}

impl MarketEngine {
    pub fn new(store: Arc<dyn MarketStore>, config: Arc<ConfigManager>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            config,
            events,
        }
    }

    pub fn storage_backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Subscribe to market events (creation, trades, resolution)
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: MarketEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    // ==========================================
    // Pricing Config
    // ==========================================

    pub fn pricing_config(&self) -> PricingConfig {
        self.config.get_config()
    }

    pub fn update_pricing_config(&self, update: PricingConfigUpdate) -> Result<PricingConfig, ConfigError> {
        self.config.update_config(update)
    }

    // ==========================================
    // Users
    // ==========================================

    pub async fn register_user(&self, wallet_address: &str) -> Result<User, TradeError> {
        let wallet = wallet_address.trim();
        if wallet.is_empty() {
            return Err(TradeError::Validation("Wallet address is required".to_string()));
        }
        let user = self.store.upsert_user(wallet).await?;
        info!("User {} registered for wallet {}", user.id, user.wallet_address);
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, TradeError> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| TradeError::NotFound(format!("User {} not found", id)))
    }

    pub async fn user_positions(&self, user_id: Uuid) -> Result<Vec<Position>, TradeError> {
        self.get_user(user_id).await?;
        Ok(self.store.user_positions(user_id).await?)
    }

    // ==========================================
    // Markets
    // ==========================================

    pub async fn create_market(&self, new_market: NewMarket) -> Result<Market, TradeError> {
        let question = new_market.question.trim().to_string();
        if question.is_empty() {
            return Err(TradeError::Validation("Question is required".to_string()));
        }
        if question.chars().count() > MAX_QUESTION_LEN {
            return Err(TradeError::Validation(format!(
                "Question must be at most {} characters",
                MAX_QUESTION_LEN
            )));
        }
        if let Some(end_date) = new_market.end_date {
            if end_date <= Utc::now() {
                return Err(TradeError::Validation("End date must be in the future".to_string()));
            }
        }

        let market = self
            .store
            .create_market(&NewMarket {
                question,
                description: new_market
                    .description
                    .map(|d| d.trim().to_string())
                    .filter(|d| !d.is_empty()),
                end_date: new_market.end_date,
            })
            .await?;

        info!("Market {} created: {}", market.id, market.question);
        self.publish(MarketEvent::MarketCreated {
            market: market.clone(),
        });
        Ok(market)
    }

    pub async fn get_market(&self, id: Uuid) -> Result<Market, TradeError> {
        self.store
            .get_market(id)
            .await?
            .ok_or_else(|| TradeError::NotFound(format!("Market {} not found", id)))
    }

    pub async fn list_markets(&self, status: Option<&str>) -> Result<Vec<Market>, TradeError> {
        let status = status
            .map(|s| s.parse::<MarketStatus>())
            .transpose()
            .map_err(TradeError::Validation)?;
        Ok(self.store.list_markets(status).await?)
    }

    pub async fn market_trades(&self, market_id: Uuid, limit: usize) -> Result<Vec<Trade>, TradeError> {
        self.get_market(market_id).await?;
        Ok(self.store.recent_trades(market_id, limit).await?)
    }

    /// Volume and odds summary built from the same aggregation the quote uses
    pub async fn market_stats(&self, market_id: Uuid) -> Result<MarketStats, TradeError> {
        let market = self.get_market(market_id).await?;
        let config = self.config.get_config();
        let trades = self
            .store
            .recent_trades(market_id, config.history_window)
            .await?;
        let trade_count = self.store.count_trades(market_id).await?;
        let pools = PoolState::from_trades(&trades, config.liquidity);
        let half = dec!(0.5);

        Ok(MarketStats {
            market_id,
            status: market.status,
            yes_volume: pools.yes_volume,
            no_volume: pools.no_volume,
            yes_pool: pools.yes_pool,
            no_pool: pools.no_pool,
            implied_yes_odds: pools.odds(Side::Yes),
            implied_no_odds: pools.odds(Side::No),
            yes_odds: market.odds(Side::Yes).unwrap_or(half),
            no_odds: market.odds(Side::No).unwrap_or(half),
            total_volume: market.total_volume,
            liquidity_pool: market.liquidity_pool,
            trade_count,
            window_trades: trades.len(),
        })
    }

    /// Move an active market to RESOLVED. Happens at most once.
    pub async fn resolve_market(&self, market_id: Uuid, outcome: &str) -> Result<Market, TradeError> {
        let outcome = parse_side(outcome)?;
        let market = self.get_market(market_id).await?;
        if market.is_resolved() {
            return Err(TradeError::State("Market is already resolved".to_string()));
        }

        let resolved = self
            .store
            .resolve_market(market_id, outcome)
            .await?
            .ok_or_else(|| TradeError::State("Market is already resolved".to_string()))?;

        info!("Market {} resolved: {}", market_id, outcome);
        self.publish(MarketEvent::MarketResolved {
            market_id,
            outcome,
            resolved_at: resolved.resolved_at.unwrap_or_else(Utc::now),
        });
        Ok(resolved)
    }

    // ==========================================
    // Quote & Execute
    // ==========================================

    pub async fn quote(&self, market_id: Uuid, side: &str, amount: Decimal) -> Result<Quote, TradeError> {
        let side = parse_side(side)?;
        pricing::validate_amount(amount)?;

        let market = self.get_market(market_id).await?;
        if market.is_resolved() {
            return Err(TradeError::State("Market is already resolved".to_string()));
        }

        let config = self.config.get_config();
        let trades = self
            .store
            .recent_trades(market_id, config.history_window)
            .await?;

        pricing::quote(market_id, &trades, side, amount, &config)
    }

    /// Execute a trade atomically against live data. The price is
    /// recomputed inside the store transaction, never taken from a quote.
    pub async fn execute_trade(&self, request: TradeRequest) -> Result<TradeResult, TradeError> {
        let result = self.try_execute_trade(request).await;
        match &result {
            Ok(_) => {}
            Err(TradeError::Store(e)) => error!("Trade failed: {}", e),
            Err(e) => warn!("Trade rejected: {}", e),
        }
        result
    }

    async fn try_execute_trade(&self, request: TradeRequest) -> Result<TradeResult, TradeError> {
        let side = parse_side(&request.side)?;
        pricing::validate_amount(request.amount)?;
        if request.max_price <= Decimal::ZERO || request.max_price > Decimal::ONE {
            return Err(TradeError::Validation(
                "Max price must be in (0, 1]".to_string(),
            ));
        }

        let order = TradeOrder {
            market_id: request.market_id,
            user_id: request.user_id,
            side,
            amount: request.amount,
            max_price: request.max_price,
        };
        let config = self.config.get_config();
        let history_window = config.history_window;
        let planner: FillPlanner = Box::new(move |snapshot: &TradeSnapshot| {
            pricing::plan_fill(snapshot, &order, &config)
        });

        let applied = self
            .store
            .execute_trade(&order, history_window, planner)
            .await?;
        let plan = applied.plan;
        let market = applied.market;

        info!(
            "Trade {} executed: {} {} ${} @ {} ({} shares, fee ${}) -> YES {} / NO {}",
            plan.trade.id,
            plan.trade.user_id,
            plan.trade.side,
            plan.trade.amount,
            plan.trade.price.round_dp(4),
            plan.trade.shares.round_dp(4),
            plan.trade.fee,
            plan.yes_odds.round_dp(4),
            plan.no_odds.round_dp(4)
        );

        self.publish(MarketEvent::TradeExecuted {
            market_id: market.id,
            trade: plan.trade.clone(),
            yes_odds: plan.yes_odds,
            no_odds: plan.no_odds,
            total_volume: market.total_volume,
        });

        Ok(TradeResult {
            trade: plan.trade,
            position: plan.position,
            price_impact: plan.price_impact,
            yes_odds: plan.yes_odds,
            no_odds: plan.no_odds,
            total_volume: market.total_volume,
            liquidity_pool: market.liquidity_pool,
        })
    }
}
