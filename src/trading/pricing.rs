//! AMM pricing over trade history
//!
//! Each side's pool is its traded notional plus a constant liquidity `L`.
//! Odds are pool shares of the total; a prospective trade is priced by adding
//! its amount to its own side's pool. Both the quote endpoint and trade
//! execution call [`quote`], so a quote and an execution against the same
//! history always agree on price.
//!
//! Everything here is pure arithmetic on already-loaded rows.

use super::TradeError;
use crate::db::{FillPlan, Position, Trade, TradeSnapshot};
use crate::types::{PricingConfig, Quote, Side, TradeOrder, MAX_AMOUNT_SCALE, MAX_TRADE_AMOUNT};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

/// Volumes and liquidity-adjusted pools for both sides
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolState {
    pub yes_volume: Decimal,
    pub no_volume: Decimal,
    pub yes_pool: Decimal,
    pub no_pool: Decimal,
}

impl PoolState {
    /// Aggregate trade notional per side. Order of `trades` does not matter.
    pub fn from_trades<'a, I>(trades: I, liquidity: Decimal) -> Self
    where
        I: IntoIterator<Item = &'a Trade>,
    {
        let (yes_volume, no_volume) = trades.into_iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(yes, no), trade| match trade.side {
                Side::Yes => (yes + trade.amount, no),
                Side::No => (yes, no + trade.amount),
            },
        );

        Self {
            yes_volume,
            no_volume,
            yes_pool: yes_volume + liquidity,
            no_pool: no_volume + liquidity,
        }
    }

    pub fn pool(&self, side: Side) -> Decimal {
        match side {
            Side::Yes => self.yes_pool,
            Side::No => self.no_pool,
        }
    }

    pub fn total(&self) -> Decimal {
        self.yes_pool + self.no_pool
    }

    /// Pool-implied probability of `side`. NO is derived as the
    /// complement of YES so the pair sums to exactly one.
    pub fn odds(&self, side: Side) -> Decimal {
        let total = self.total();
        let yes = if total <= Decimal::ZERO {
            dec!(0.5)
        } else {
            self.yes_pool / total
        };
        match side {
            Side::Yes => yes,
            Side::No => Decimal::ONE - yes,
        }
    }
}

/// Reject non-positive, oversized and over-precise notionals
pub fn validate_amount(amount: Decimal) -> Result<(), TradeError> {
    if amount <= Decimal::ZERO {
        return Err(TradeError::Validation(
            "Amount must be greater than 0".to_string(),
        ));
    }
    if amount > MAX_TRADE_AMOUNT {
        return Err(TradeError::Validation(format!(
            "Amount exceeds maximum of {}",
            MAX_TRADE_AMOUNT
        )));
    }
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(TradeError::Validation(format!(
            "Amount allows at most {} decimal places",
            MAX_AMOUNT_SCALE
        )));
    }
    Ok(())
}

/// Price of `side` after adding `amount` to its pool, clamped to the
/// configured trade-price bounds
pub fn simulate_price(pools: &PoolState, side: Side, amount: Decimal, config: &PricingConfig) -> Decimal {
    let raw = (pools.pool(side) + amount) / (pools.total() + amount);
    raw.clamp(config.min_price, config.max_price)
}

/// Price a hypothetical trade of `amount` on `side` against `trades`
pub fn quote(
    market_id: Uuid,
    trades: &[Trade],
    side: Side,
    amount: Decimal,
    config: &PricingConfig,
) -> Result<Quote, TradeError> {
    validate_amount(amount)?;

    let pools = PoolState::from_trades(trades, config.liquidity);
    let current_odds = pools.odds(side);
    let new_price = simulate_price(&pools, side, amount, config);
    let price_impact = (new_price - current_odds).abs() / current_odds;
    let fee = amount * config.fee_rate;

    Ok(Quote {
        market_id,
        side,
        amount,
        yes_volume: pools.yes_volume,
        no_volume: pools.no_volume,
        yes_pool: pools.yes_pool,
        no_pool: pools.no_pool,
        yes_odds: pools.odds(Side::Yes),
        no_odds: pools.odds(Side::No),
        current_odds,
        new_price,
        price_impact,
        shares: amount / new_price,
        fee,
        net_amount: amount - fee,
    })
}

/// YES/NO odds from aggregate share totals. YES is clamped to the odds
/// bounds and NO is its complement, so the pair always sums to one.
pub fn odds_from_shares(yes_shares: Decimal, no_shares: Decimal, config: &PricingConfig) -> (Decimal, Decimal) {
    let total = yes_shares + no_shares;
    let yes = if total <= Decimal::ZERO {
        dec!(0.5)
    } else {
        (yes_shares / total).clamp(config.min_odds, config.max_odds)
    };
    (yes, Decimal::ONE - yes)
}

/// Volume-weighted average entry price after adding a fill
pub fn weighted_average_price(
    old_shares: Decimal,
    old_avg_price: Decimal,
    new_shares: Decimal,
    new_price: Decimal,
) -> Decimal {
    let total = old_shares + new_shares;
    if total <= Decimal::ZERO {
        return new_price;
    }
    (old_shares * old_avg_price + new_shares * new_price) / total
}

/// Decide every write of a trade from a snapshot taken inside the trade
/// transaction. Any error here means nothing is written.
pub fn plan_fill(
    snapshot: &TradeSnapshot,
    order: &TradeOrder,
    config: &PricingConfig,
) -> Result<FillPlan, TradeError> {
    let market = snapshot
        .market
        .as_ref()
        .ok_or_else(|| TradeError::NotFound(format!("Market {} not found", order.market_id)))?;

    if market.is_resolved() {
        return Err(TradeError::State("Market is already resolved".to_string()));
    }
    if market.has_ended(snapshot.now) {
        return Err(TradeError::State("Market has ended".to_string()));
    }

    let option = market.option(order.side).ok_or_else(|| {
        TradeError::State(format!("Market has no {} option", order.side))
    })?;

    let quote = quote(market.id, &snapshot.recent_trades, order.side, order.amount, config)?;

    if quote.new_price > order.max_price {
        return Err(TradeError::Slippage {
            price: quote.new_price,
            max_price: order.max_price,
        });
    }

    if snapshot.user.is_none() {
        return Err(TradeError::NotFound(format!("User {} not found", order.user_id)));
    }

    let trade = Trade {
        id: Uuid::new_v4(),
        market_id: market.id,
        option_id: option.id,
        user_id: order.user_id,
        side: order.side,
        amount: order.amount,
        price: quote.new_price,
        shares: quote.shares,
        fee: quote.fee,
        created_at: snapshot.now,
    };

    let position = match &snapshot.position {
        Some(existing) => Position {
            shares: existing.shares + quote.shares,
            avg_price: weighted_average_price(
                existing.shares,
                existing.avg_price,
                quote.shares,
                quote.new_price,
            ),
            updated_at: snapshot.now,
            ..existing.clone()
        },
        None => Position {
            id: Uuid::new_v4(),
            user_id: order.user_id,
            market_id: market.id,
            side: order.side,
            shares: quote.shares,
            avg_price: quote.new_price,
            updated_at: snapshot.now,
        },
    };

    let (yes_shares, no_shares) = match order.side {
        Side::Yes => (snapshot.yes_shares + quote.shares, snapshot.no_shares),
        Side::No => (snapshot.yes_shares, snapshot.no_shares + quote.shares),
    };
    let (yes_odds, no_odds) = odds_from_shares(yes_shares, no_shares, config);

    Ok(FillPlan {
        trade,
        position,
        yes_odds,
        no_odds,
        price_impact: quote.price_impact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Market, MarketOption, User};
    use crate::types::MarketStatus;
    use chrono::{Duration, Utc};

    fn trade(side: Side, amount: Decimal) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            market_id: Uuid::nil(),
            option_id: Uuid::nil(),
            user_id: Uuid::nil(),
            side,
            amount,
            price: dec!(0.5),
            shares: amount * dec!(2),
            fee: amount * dec!(0.01),
            created_at: Utc::now(),
        }
    }

    fn market() -> Market {
        let id = Uuid::new_v4();
        Market {
            id,
            question: "Will it rain tomorrow?".to_string(),
            description: None,
            status: MarketStatus::Active,
            outcome: None,
            end_date: None,
            total_volume: Decimal::ZERO,
            liquidity_pool: Decimal::ZERO,
            created_at: Utc::now(),
            resolved_at: None,
            options: vec![
                MarketOption { id: Uuid::new_v4(), market_id: id, label: Side::Yes, current_odds: dec!(0.5) },
                MarketOption { id: Uuid::new_v4(), market_id: id, label: Side::No, current_odds: dec!(0.5) },
            ],
        }
    }

    fn snapshot(market: Market) -> TradeSnapshot {
        TradeSnapshot {
            market: Some(market),
            user: Some(User {
                id: Uuid::nil(),
                wallet_address: "0xabc".to_string(),
                created_at: Utc::now(),
            }),
            recent_trades: Vec::new(),
            yes_shares: Decimal::ZERO,
            no_shares: Decimal::ZERO,
            position: None,
            now: Utc::now(),
        }
    }

    fn order(market_id: Uuid, side: Side, amount: Decimal) -> TradeOrder {
        TradeOrder {
            market_id,
            user_id: Uuid::nil(),
            side,
            amount,
            max_price: dec!(0.95),
        }
    }

    fn approx(a: Decimal, b: Decimal) -> bool {
        (a - b).abs() < dec!(0.0001)
    }

    #[test]
    fn test_quote_on_empty_market() {
        let config = PricingConfig::default();
        let q = quote(Uuid::nil(), &[], Side::Yes, dec!(50), &config).unwrap();

        assert_eq!(q.yes_volume, Decimal::ZERO);
        assert_eq!(q.no_volume, Decimal::ZERO);
        assert_eq!(q.yes_pool, dec!(100));
        assert_eq!(q.no_pool, dec!(100));
        assert_eq!(q.current_odds, dec!(0.5));
        // (100 + 50) / (200 + 50)
        assert_eq!(q.new_price, dec!(0.6));
        assert!(approx(q.shares, dec!(83.3333)));
        assert_eq!(q.fee, dec!(0.50));
        assert_eq!(q.net_amount, dec!(49.50));
        assert!(approx(q.price_impact, dec!(0.2)));
    }

    #[test]
    fn test_quote_with_yes_pool_of_150() {
        // pool_yes = 150, pool_no = 100 before the trade
        let config = PricingConfig::default();
        let history = vec![trade(Side::Yes, dec!(50))];
        let q = quote(Uuid::nil(), &history, Side::Yes, dec!(50), &config).unwrap();

        assert_eq!(q.yes_pool, dec!(150));
        assert_eq!(q.no_pool, dec!(100));
        assert_eq!(q.current_odds, dec!(0.6));
        assert!(approx(q.new_price, dec!(0.666667)));
        assert!(approx(q.shares, dec!(75)));
        assert_eq!(q.fee, dec!(0.50));
    }

    #[test]
    fn test_history_order_does_not_matter() {
        let config = PricingConfig::default();
        let mut history = vec![
            trade(Side::Yes, dec!(10)),
            trade(Side::No, dec!(35)),
            trade(Side::Yes, dec!(7.5)),
        ];
        let forward = quote(Uuid::nil(), &history, Side::No, dec!(20), &config).unwrap();
        history.reverse();
        let backward = quote(Uuid::nil(), &history, Side::No, dec!(20), &config).unwrap();
        assert_eq!(forward.new_price, backward.new_price);
        assert_eq!(forward.yes_volume, dec!(17.5));
        assert_eq!(forward.no_volume, dec!(35));
    }

    #[test]
    fn test_new_price_stays_within_bounds() {
        let config = PricingConfig::default();
        let histories = vec![
            vec![],
            vec![trade(Side::Yes, dec!(100000))],
            vec![trade(Side::No, dec!(100000))],
            vec![trade(Side::Yes, dec!(3)), trade(Side::No, dec!(4))],
        ];
        let amounts = [dec!(0.0001), dec!(1), dec!(50), dec!(5000), dec!(999999999)];

        for history in &histories {
            for side in [Side::Yes, Side::No] {
                for amount in amounts {
                    let q = quote(Uuid::nil(), history, side, amount, &config).unwrap();
                    assert!(q.new_price >= dec!(0.05), "price {} below floor", q.new_price);
                    assert!(q.new_price <= dec!(0.95), "price {} above ceiling", q.new_price);
                    assert_eq!(q.yes_odds + q.no_odds, Decimal::ONE);
                }
            }
        }
    }

    #[test]
    fn test_price_clamps_at_both_ends() {
        let config = PricingConfig::default();

        let q = quote(Uuid::nil(), &[], Side::Yes, dec!(1000000), &config).unwrap();
        assert_eq!(q.new_price, dec!(0.95));

        let heavy_no = vec![trade(Side::No, dec!(10000))];
        let q = quote(Uuid::nil(), &heavy_no, Side::Yes, dec!(1), &config).unwrap();
        assert_eq!(q.new_price, dec!(0.05));
        assert_eq!(q.shares, dec!(20));
    }

    #[test]
    fn test_fee_is_exact() {
        let config = PricingConfig::default();
        for amount in [dec!(0.01), dec!(1), dec!(33.33), dec!(123456.789)] {
            let q = quote(Uuid::nil(), &[], Side::No, amount, &config).unwrap();
            assert_eq!(q.fee, amount * dec!(0.01));
            assert_eq!(q.net_amount + q.fee, amount);
        }
    }

    #[test]
    fn test_fee_is_exact_at_full_precision() {
        let amount = dec!(999999999.99999999);
        let q = quote(Uuid::nil(), &[], Side::Yes, amount, &PricingConfig::default()).unwrap();
        assert_eq!(q.fee, dec!(9999999.9999999999));

        let config = PricingConfig {
            fee_rate: dec!(0.12345678),
            ..PricingConfig::default()
        };
        assert!(config.validate().is_ok());
        let q = quote(Uuid::nil(), &[], Side::Yes, amount, &config).unwrap();
        assert_eq!(q.fee, dec!(123456779.9999999987654322));
        assert_eq!(q.net_amount + q.fee, amount);
    }

    #[test]
    fn test_over_precise_amount_rejected() {
        let config = PricingConfig::default();
        for amount in [dec!(0.0000000000000000000000000123), dec!(1.000000001)] {
            let err = quote(Uuid::nil(), &[], Side::Yes, amount, &config).unwrap_err();
            assert!(matches!(err, TradeError::Validation(_)));
        }
        // Trailing zeros do not count against the precision limit
        assert!(validate_amount(dec!(10.000000000000)).is_ok());
        assert!(validate_amount(dec!(0.00000001)).is_ok());
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        let config = PricingConfig::default();
        for amount in [Decimal::ZERO, dec!(-1), dec!(-0.0001)] {
            let err = quote(Uuid::nil(), &[], Side::Yes, amount, &config).unwrap_err();
            assert!(matches!(err, TradeError::Validation(_)));
        }
        let err = quote(Uuid::nil(), &[], Side::Yes, MAX_TRADE_AMOUNT + Decimal::ONE, &config).unwrap_err();
        assert!(matches!(err, TradeError::Validation(_)));
    }

    #[test]
    fn test_odds_from_shares_bounds_and_sum() {
        let config = PricingConfig::default();

        let (yes, no) = odds_from_shares(dec!(75), dec!(25), &config);
        assert_eq!(yes, dec!(0.75));
        assert_eq!(no, dec!(0.25));

        let (yes, no) = odds_from_shares(dec!(1000), Decimal::ZERO, &config);
        assert_eq!(yes, dec!(0.99));
        assert_eq!(no, dec!(0.01));

        let (yes, no) = odds_from_shares(Decimal::ZERO, dec!(1000), &config);
        assert_eq!(yes, dec!(0.01));
        assert_eq!(no, dec!(0.99));

        let (yes, no) = odds_from_shares(Decimal::ZERO, Decimal::ZERO, &config);
        assert_eq!(yes + no, Decimal::ONE);
    }

    #[test]
    fn test_weighted_average_price() {
        // 100 @ 0.5 then 50 @ 0.8 -> (50 + 40) / 150
        let avg = weighted_average_price(dec!(100), dec!(0.5), dec!(50), dec!(0.8));
        assert_eq!(avg, dec!(0.6));

        let avg = weighted_average_price(Decimal::ZERO, Decimal::ZERO, dec!(10), dec!(0.7));
        assert_eq!(avg, dec!(0.7));
    }

    #[test]
    fn test_plan_fill_on_fresh_market() {
        let config = PricingConfig::default();
        let market = market();
        let market_id = market.id;
        let yes_option = market.option(Side::Yes).unwrap().id;
        let snap = snapshot(market);

        let plan = plan_fill(&snap, &order(market_id, Side::Yes, dec!(50)), &config).unwrap();

        assert_eq!(plan.trade.option_id, yes_option);
        assert_eq!(plan.trade.price, dec!(0.6));
        assert_eq!(plan.trade.fee, dec!(0.5));
        assert_eq!(plan.position.shares, plan.trade.shares);
        assert_eq!(plan.position.avg_price, dec!(0.6));
        // All shares are YES after the first trade
        assert_eq!(plan.yes_odds, dec!(0.99));
        assert_eq!(plan.no_odds, dec!(0.01));
    }

    #[test]
    fn test_plan_fill_updates_existing_position_with_vwap() {
        let config = PricingConfig::default();
        let market = market();
        let market_id = market.id;
        let mut snap = snapshot(market);
        snap.yes_shares = dec!(100);
        snap.no_shares = dec!(100);
        snap.position = Some(Position {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            market_id,
            side: Side::No,
            shares: dec!(100),
            avg_price: dec!(0.5),
            updated_at: Utc::now(),
        });

        let plan = plan_fill(&snap, &order(market_id, Side::No, dec!(50)), &config).unwrap();
        let expected = weighted_average_price(dec!(100), dec!(0.5), plan.trade.shares, plan.trade.price);

        assert_eq!(plan.position.id, snap.position.as_ref().unwrap().id);
        assert_eq!(plan.position.shares, dec!(100) + plan.trade.shares);
        assert_eq!(plan.position.avg_price, expected);
        assert!(plan.no_odds > dec!(0.5));
        assert_eq!(plan.yes_odds + plan.no_odds, Decimal::ONE);
    }

    #[test]
    fn test_plan_fill_rejections() {
        let config = PricingConfig::default();

        let mut resolved = market();
        resolved.status = MarketStatus::Resolved;
        let id = resolved.id;
        let err = plan_fill(&snapshot(resolved), &order(id, Side::Yes, dec!(10)), &config).unwrap_err();
        assert!(matches!(err, TradeError::State(_)));

        let mut ended = market();
        ended.end_date = Some(Utc::now() - Duration::hours(1));
        let id = ended.id;
        let err = plan_fill(&snapshot(ended), &order(id, Side::Yes, dec!(10)), &config).unwrap_err();
        assert!(matches!(err, TradeError::State(_)));

        let mut missing_market = snapshot(market());
        missing_market.market = None;
        let err = plan_fill(&missing_market, &order(Uuid::new_v4(), Side::Yes, dec!(10)), &config).unwrap_err();
        assert!(matches!(err, TradeError::NotFound(_)));

        let live = market();
        let id = live.id;
        let mut no_user = snapshot(live);
        no_user.user = None;
        let err = plan_fill(&no_user, &order(id, Side::Yes, dec!(10)), &config).unwrap_err();
        assert!(matches!(err, TradeError::NotFound(_)));
    }

    #[test]
    fn test_plan_fill_enforces_max_price() {
        let config = PricingConfig::default();
        let market = market();
        let id = market.id;
        let mut tight = order(id, Side::Yes, dec!(50));
        tight.max_price = dec!(0.55);

        let err = plan_fill(&snapshot(market), &tight, &config).unwrap_err();
        match err {
            TradeError::Slippage { price, max_price } => {
                assert_eq!(price, dec!(0.6));
                assert_eq!(max_price, dec!(0.55));
            }
            other => panic!("expected slippage error, got {:?}", other),
        }
    }
}
