// 4.0: open leveraged exposure. created from an executed levered order, closed exactly once.
// Open → Closed (collateral returned adjusted by pnl) or Open → Liquidated (collateral forfeited).
// 4.1 close conditions at the bottom: optional usd bounds that trigger a voluntary close.

use crate::order::{LeveredOpen, Order};
use crate::types::{OrderId, Overflow, Price, PositionId, Quote, Timestamp, UserId};
use crate::valuation::{position_value, LeveredTerms, MarketPrices};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub user: UserId,
    pub order_id: OrderId,
    pub terms: LeveredTerms,
    // nominal exposure in buy units, for display
    pub buy_amount: Decimal,
    pub start: Timestamp,
    pub end: Option<Timestamp>,
    pub status: PositionStatus,
    pub liquidation_price: Decimal,
    pub close_condition: Option<CloseCondition>,
}

impl Position {
    pub fn open(order: &Order, open: LeveredOpen, timestamp: Timestamp) -> Self {
        Self {
            id: PositionId::new(),
            user: order.user.clone(),
            order_id: order.id,
            terms: open.terms,
            buy_amount: open.buy_amount,
            start: timestamp,
            end: None,
            status: PositionStatus::Open,
            liquidation_price: open.liquidation_price,
            close_condition: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status == PositionStatus::Open
    }

    pub fn is_liquidated(&self) -> bool {
        self.status == PositionStatus::Liquidated
    }

    pub fn value(&self, prices: &MarketPrices) -> Result<Quote, Overflow> {
        position_value(&self.terms, prices)
    }

    // 4.2: final value converted back into collateral units. never negative.
    pub fn settlement_award(&self, value: Quote, collateral_price: Price) -> Result<Decimal, Overflow> {
        if !value.is_positive() {
            return Ok(Decimal::ZERO);
        }
        value
            .value()
            .checked_div(collateral_price.value())
            .ok_or(Overflow::at("settlement award"))
    }

    /// Stamp the terminal state. Fails if already closed.
    pub fn close(&mut self, liquidated: bool, timestamp: Timestamp) -> Result<(), PositionError> {
        if !self.is_alive() {
            return Err(PositionError::AlreadyClosed(self.id));
        }
        self.status = if liquidated {
            PositionStatus::Liquidated
        } else {
            PositionStatus::Closed
        };
        self.end = Some(timestamp);
        Ok(())
    }

    pub fn set_close_condition(&mut self, condition: CloseCondition) -> Result<(), PositionError> {
        if !self.is_alive() {
            return Err(PositionError::AlreadyClosed(self.id));
        }
        self.close_condition = Some(condition);
        Ok(())
    }

    pub fn crossed_bound(&self, value: Quote) -> Option<Bound> {
        self.close_condition.as_ref().and_then(|c| c.crossed(value))
    }
}

// 4.3: each bound is armed only when > 0. lower is checked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseCondition {
    pub upper: Quote,
    pub lower: Quote,
}

impl CloseCondition {
    pub fn new(upper: Quote, lower: Quote) -> Result<Self, PositionError> {
        if upper.value() < Decimal::ZERO || lower.value() < Decimal::ZERO {
            return Err(PositionError::InvalidCloseCondition(
                "bounds cannot be negative".to_string(),
            ));
        }
        if !upper.is_positive() && !lower.is_positive() {
            return Err(PositionError::InvalidCloseCondition(
                "at least one bound must be set".to_string(),
            ));
        }
        if upper.is_positive() && lower.is_positive() && lower >= upper {
            return Err(PositionError::InvalidCloseCondition(
                "lower bound must be below upper bound".to_string(),
            ));
        }
        Ok(Self { upper, lower })
    }

    pub fn crossed(&self, value: Quote) -> Option<Bound> {
        if self.lower.is_positive() && value < self.lower {
            return Some(Bound::Lower);
        }
        if self.upper.is_positive() && value > self.upper {
            return Some(Bound::Upper);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Upper,
    Lower,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Upper => f.write_str("upper"),
            Bound::Lower => f.write_str("lower"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("Position {0} is already closed")]
    AlreadyClosed(PositionId),

    #[error("Position {0} not found")]
    NotFound(PositionId),

    #[error("Invalid close condition: {0}")]
    InvalidCloseCondition(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{Execution, OrderRequest, SellAmount};
    use crate::types::{Asset, Leverage, Side};
    use rust_decimal_macros::dec;

    fn p(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn test_position() -> Position {
        let req = OrderRequest::levered(
            UserId::new("alice"),
            Asset::new("USDC"),
            Asset::new("ETH"),
            SellAmount::Exact(dec!(1000)),
            dec!(5),
            Side::Long,
        )
        .at_price(dec!(200));
        let order = Order::from_request(
            req,
            dec!(1000),
            Leverage::new(dec!(5)).unwrap(),
            Timestamp::from_millis(0),
        )
        .unwrap();
        let prices = MarketPrices::sell_collateral(p(dec!(200)), p(dec!(1)));
        let Execution::Levered(open) = order.plan(&prices).unwrap() else {
            panic!("levered order planned as spot");
        };
        Position::open(&order, open, Timestamp::from_millis(10))
    }

    #[test]
    fn opens_alive() {
        let pos = test_position();
        assert!(pos.is_alive());
        assert!(!pos.is_liquidated());
        assert_eq!(pos.liquidation_price, dec!(160));
        assert_eq!(pos.terms.collateral_amount, dec!(1000));
        assert!(pos.end.is_none());
    }

    #[test]
    fn close_once() {
        let mut pos = test_position();
        pos.close(false, Timestamp::from_millis(99)).unwrap();
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.end, Some(Timestamp::from_millis(99)));

        let again = pos.close(true, Timestamp::from_millis(100));
        assert!(matches!(again, Err(PositionError::AlreadyClosed(_))));
        // terminal state untouched
        assert_eq!(pos.status, PositionStatus::Closed);
        assert_eq!(pos.end, Some(Timestamp::from_millis(99)));
    }

    #[test]
    fn liquidated_close() {
        let mut pos = test_position();
        pos.close(true, Timestamp::from_millis(5)).unwrap();
        assert!(pos.is_liquidated());
        assert!(!pos.is_alive());
    }

    #[test]
    fn award_in_collateral_units() {
        let pos = test_position();
        let award = pos.settlement_award(Quote::new(dec!(1500)), p(dec!(1))).unwrap();
        assert_eq!(award, dec!(1500));

        let award = pos.settlement_award(Quote::new(dec!(1500)), p(dec!(0.5))).unwrap();
        assert_eq!(award, dec!(3000));

        assert_eq!(pos.settlement_award(Quote::new(dec!(-20)), p(dec!(1))), Ok(Decimal::ZERO));
    }

    #[test]
    fn award_out_of_range() {
        let pos = test_position();
        let tiny = p(dec!(0.0000000000000000000000000001));
        let award = pos.settlement_award(Quote::new(Decimal::MAX), tiny);
        assert_eq!(award, Err(Overflow::at("settlement award")));
    }

    #[test]
    fn close_condition_bounds_armed_independently() {
        // only upper set: lower must not trigger and upper must
        let upper_only = CloseCondition::new(Quote::new(dec!(1200)), Quote::zero()).unwrap();
        assert_eq!(upper_only.crossed(Quote::new(dec!(1))), None);
        assert_eq!(upper_only.crossed(Quote::new(dec!(1300))), Some(Bound::Upper));

        let lower_only = CloseCondition::new(Quote::zero(), Quote::new(dec!(800))).unwrap();
        assert_eq!(lower_only.crossed(Quote::new(dec!(700))), Some(Bound::Lower));
        assert_eq!(lower_only.crossed(Quote::new(dec!(100000))), None);
    }

    #[test]
    fn close_condition_strict_crossing() {
        let both = CloseCondition::new(Quote::new(dec!(1200)), Quote::new(dec!(800))).unwrap();
        assert_eq!(both.crossed(Quote::new(dec!(800))), None);
        assert_eq!(both.crossed(Quote::new(dec!(1200))), None);
        assert_eq!(both.crossed(Quote::new(dec!(1000))), None);
    }

    #[test]
    fn invalid_close_conditions() {
        assert!(CloseCondition::new(Quote::zero(), Quote::zero()).is_err());
        assert!(CloseCondition::new(Quote::new(dec!(-1)), Quote::zero()).is_err());
        assert!(CloseCondition::new(Quote::new(dec!(500)), Quote::new(dec!(900))).is_err());
    }

    #[test]
    fn closed_position_rejects_condition() {
        let mut pos = test_position();
        pos.close(false, Timestamp::from_millis(1)).unwrap();
        let cond = CloseCondition::new(Quote::new(dec!(2000)), Quote::zero()).unwrap();
        assert!(matches!(pos.set_close_condition(cond), Err(PositionError::AlreadyClosed(_))));
    }

    #[test]
    fn value_tracks_market() {
        let pos = test_position();
        let up = MarketPrices::sell_collateral(p(dec!(220)), p(dec!(1)));
        assert_eq!(pos.value(&up).unwrap().value(), dec!(1500));
        assert_eq!(pos.crossed_bound(Quote::new(dec!(1500))), None);
    }
}
