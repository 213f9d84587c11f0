//! Storage layer
//!
//! `MarketStore` is implemented by [`Database`] (PostgreSQL via SQLx, runtime
//! query checking) and by [`MemoryStore`] for running without a database.

mod memory;
mod models;
mod postgres;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::Database;

use crate::trading::TradeError;
use crate::types::{MarketStatus, Side, TradeOrder};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Record not found")]
    NotFound,
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for TradeError {
    fn from(err: sqlx::Error) -> Self {
        TradeError::Store(StoreError::Sqlx(err))
    }
}

/// Decides the writes of a trade from the snapshot read inside the
/// transaction. Returning an error aborts the trade with nothing written.
pub type FillPlanner = Box<dyn FnOnce(&TradeSnapshot) -> Result<FillPlan, TradeError> + Send>;

#[async_trait]
pub trait MarketStore: Send + Sync {
    /// Short backend name for health output
    fn backend(&self) -> &'static str;

    /// Register a wallet, or return the user already registered with it
    async fn upsert_user(&self, wallet_address: &str) -> Result<User, StoreError>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Create a market together with its YES and NO options at even odds
    async fn create_market(&self, market: &NewMarket) -> Result<Market, StoreError>;

    async fn get_market(&self, id: Uuid) -> Result<Option<Market>, StoreError>;

    /// Markets newest first, optionally filtered by status
    async fn list_markets(&self, status: Option<MarketStatus>) -> Result<Vec<Market>, StoreError>;

    /// Move an ACTIVE market to RESOLVED. Returns `None` when the market
    /// does not exist or is no longer active.
    async fn resolve_market(&self, id: Uuid, outcome: Side) -> Result<Option<Market>, StoreError>;

    /// Most recent trades on a market, newest first
    async fn recent_trades(&self, market_id: Uuid, limit: usize) -> Result<Vec<Trade>, StoreError>;

    async fn count_trades(&self, market_id: Uuid) -> Result<i64, StoreError>;

    async fn user_positions(&self, user_id: Uuid) -> Result<Vec<Position>, StoreError>;

    /// Load a [`TradeSnapshot`] and apply the planner's writes atomically.
    /// Trades on the same market are serialized.
    async fn execute_trade(
        &self,
        order: &TradeOrder,
        history_window: usize,
        planner: FillPlanner,
    ) -> Result<AppliedFill, TradeError>;
}
