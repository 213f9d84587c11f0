//! Trading module - AMM pricing and trade execution

mod engine;
pub mod pricing;

pub use engine::{MarketEngine, TradeError};
