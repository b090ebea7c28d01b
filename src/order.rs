// 2.0: orders. a standing instruction to swap (spot) or open a leveraged position.
// the kind is resolved once at creation: priced or market, spot or levered. never re-derived.
// 2.1 readiness is a strict one sided cross. 2.2 fill math for each kind at the bottom.

use crate::types::{Asset, Leverage, OrderId, Overflow, Price, Side, Timestamp, UserId};
use crate::valuation::{liquidation_price, LeveredTerms, MarketPrices};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which pending group an order waits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingGroup {
    // executes on the very next sweep
    Market,
    // executes once the target price is crossed
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    SpotMarket,
    SpotLimit { price: Price },
    LeveredMarket { leverage: Leverage },
    LeveredLimit { price: Price, leverage: Leverage },
}

impl OrderKind {
    pub fn resolve(price: Option<Price>, leverage: Option<Leverage>) -> Self {
        match (price, leverage) {
            (None, None) => OrderKind::SpotMarket,
            (Some(price), None) => OrderKind::SpotLimit { price },
            (None, Some(leverage)) => OrderKind::LeveredMarket { leverage },
            (Some(price), Some(leverage)) => OrderKind::LeveredLimit { price, leverage },
        }
    }

    pub fn group(&self) -> PendingGroup {
        match self {
            OrderKind::SpotMarket | OrderKind::LeveredMarket { .. } => PendingGroup::Market,
            OrderKind::SpotLimit { .. } | OrderKind::LeveredLimit { .. } => PendingGroup::Limit,
        }
    }

    pub fn target_price(&self) -> Option<Price> {
        match self {
            OrderKind::SpotLimit { price } | OrderKind::LeveredLimit { price, .. } => Some(*price),
            _ => None,
        }
    }

    pub fn leverage(&self) -> Option<Leverage> {
        match self {
            OrderKind::LeveredMarket { leverage } | OrderKind::LeveredLimit { leverage, .. } => {
                Some(*leverage)
            }
            _ => None,
        }
    }

    pub fn is_levered(&self) -> bool {
        self.leverage().is_some()
    }
}

/// How much of the sell asset to commit. `All` sells the whole holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SellAmount {
    Exact(Decimal),
    All,
}

/// Raw user input for a new order, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub user: UserId,
    pub sell: Asset,
    pub buy: Asset,
    pub collateral: Option<Asset>,
    pub sell_amount: SellAmount,
    // buy/sell ratio. None or zero = market
    pub price: Option<Decimal>,
    // None or zero = spot
    pub leverage: Option<Decimal>,
    pub side: Side,
}

impl OrderRequest {
    pub fn spot(user: UserId, sell: Asset, buy: Asset, sell_amount: SellAmount) -> Self {
        Self {
            user,
            sell,
            buy,
            collateral: None,
            sell_amount,
            price: None,
            leverage: None,
            side: Side::Long,
        }
    }

    pub fn levered(
        user: UserId,
        sell: Asset,
        buy: Asset,
        sell_amount: SellAmount,
        leverage: Decimal,
        side: Side,
    ) -> Self {
        Self {
            user,
            sell,
            buy,
            collateral: None,
            sell_amount,
            price: None,
            leverage: Some(leverage),
            side,
        }
    }

    pub fn at_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_collateral(mut self, collateral: Asset) -> Self {
        self.collateral = Some(collateral);
        self
    }

    // the asset whose balance funds this order
    pub fn funding_asset(&self) -> &Asset {
        self.collateral.as_ref().unwrap_or(&self.sell)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user: UserId,
    pub sell: Asset,
    pub buy: Asset,
    // resolved at creation. equals `sell` when the user gave none
    pub collateral: Asset,
    pub sell_amount: Decimal,
    // estimate for priced orders, zero for market orders until filled
    pub buy_amount: Decimal,
    pub kind: OrderKind,
    pub side: Side,
    pub created_at: Timestamp,
    pub executed_at: Option<Timestamp>,
}

impl Order {
    /// Validate a request against the funding balance and build the order.
    pub fn from_request(
        request: OrderRequest,
        available: Decimal,
        max_leverage: Leverage,
        now: Timestamp,
    ) -> Result<Self, OrderError> {
        if request.sell == request.buy {
            return Err(OrderError::SameAsset(request.sell));
        }

        let price = match request.price {
            None => None,
            Some(p) if p.is_zero() => None,
            Some(p) => Some(Price::new(p).ok_or(OrderError::InvalidPrice(p))?),
        };

        let leverage = match request.leverage {
            None => None,
            Some(l) if l.is_zero() => None,
            Some(l) => Some(
                Leverage::new(l.abs())
                    .ok_or(OrderError::InvalidLeverage(l))?
                    .clamp_to(max_leverage),
            ),
        };

        let kind = OrderKind::resolve(price, leverage);
        if !kind.is_levered() {
            if let Some(collateral) = &request.collateral {
                if *collateral != request.sell {
                    return Err(OrderError::CollateralOnSpot(collateral.clone()));
                }
            }
        }

        let collateral = request.funding_asset().clone();
        let sell_amount = match request.sell_amount {
            SellAmount::All => available,
            SellAmount::Exact(amount) => amount,
        };
        if sell_amount <= Decimal::ZERO {
            return Err(OrderError::InvalidAmount(sell_amount));
        }
        if sell_amount > available {
            return Err(OrderError::InsufficientFunds {
                asset: collateral,
                requested: sell_amount,
                available,
            });
        }

        // the fill quantity for a priced order is fixed now, so an absurd target fails here
        let buy_amount = match kind.target_price() {
            Some(target) => sell_amount
                .checked_div(target.value())
                .ok_or(Overflow::at("sell amount / target price"))?,
            None => Decimal::ZERO,
        };

        Ok(Self {
            id: OrderId::new(),
            user: request.user,
            sell: request.sell,
            buy: request.buy,
            collateral,
            sell_amount,
            buy_amount,
            kind,
            side: request.side,
            created_at: now,
            executed_at: None,
        })
    }

    pub fn group(&self) -> PendingGroup {
        self.kind.group()
    }

    // 2.1: long waits for the ratio to fall below target, short for it to rise above.
    // sitting exactly on the target is not ready. market orders are always ready.
    pub fn is_ready(&self, buy_price: Price, sell_price: Price) -> Result<bool, Overflow> {
        let Some(target) = self.kind.target_price() else {
            return Ok(true);
        };
        let current = Price::ratio(buy_price, sell_price)?;
        Ok(match self.side {
            Side::Long => current < target,
            Side::Short => current > target,
        })
    }

    // 2.2: what executing now would do. priced orders fill or open at their own target,
    // market orders at the live ratio. levered collateral is locked, not converted.
    pub fn plan(&self, prices: &MarketPrices) -> Result<Execution, Overflow> {
        match self.kind {
            OrderKind::SpotLimit { price } => Ok(Execution::Spot(SpotFill {
                buy_amount: self
                    .sell_amount
                    .checked_div(price.value())
                    .ok_or(Overflow::at("sell amount / target price"))?,
                price,
            })),
            OrderKind::SpotMarket => {
                let buy_amount = prices
                    .sell
                    .value()
                    .checked_mul(self.sell_amount)
                    .and_then(|sell_cost| sell_cost.checked_div(prices.buy.value()))
                    .ok_or(Overflow::at("spot fill amount"))?;
                Ok(Execution::Spot(SpotFill {
                    buy_amount,
                    price: prices.ratio()?,
                }))
            }
            OrderKind::LeveredLimit { price, leverage } => {
                Ok(Execution::Levered(self.open_at(price, leverage)?))
            }
            OrderKind::LeveredMarket { leverage } => {
                Ok(Execution::Levered(self.open_at(prices.ratio()?, leverage)?))
            }
        }
    }

    fn open_at(&self, entry_price: Price, leverage: Leverage) -> Result<LeveredOpen, Overflow> {
        let terms = LeveredTerms {
            sell: self.sell.clone(),
            buy: self.buy.clone(),
            collateral: self.collateral.clone(),
            entry_price,
            leverage,
            side: self.side,
            collateral_amount: self.sell_amount,
        };
        Ok(LeveredOpen {
            buy_amount: self
                .sell_amount
                .checked_div(entry_price.value())
                .ok_or(Overflow::at("nominal buy amount"))?,
            liquidation_price: liquidation_price(entry_price, leverage, self.side)?,
            terms,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    Spot(SpotFill),
    Levered(LeveredOpen),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotFill {
    pub buy_amount: Decimal,
    // realized buy/sell ratio
    pub price: Price,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeveredOpen {
    pub terms: LeveredTerms,
    pub buy_amount: Decimal,
    pub liquidation_price: Decimal,
}

/// A completed spot swap, kept as trade history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub order_id: OrderId,
    pub user: UserId,
    pub sell: Asset,
    pub buy: Asset,
    pub sell_amount: Decimal,
    pub buy_amount: Decimal,
    pub price: Price,
    pub created_at: Timestamp,
    pub executed_at: Timestamp,
}

impl Trade {
    pub fn from_fill(order: &Order, fill: SpotFill, executed_at: Timestamp) -> Self {
        Self {
            order_id: order.id,
            user: order.user.clone(),
            sell: order.sell.clone(),
            buy: order.buy.clone(),
            sell_amount: order.sell_amount,
            buy_amount: fill.buy_amount,
            price: fill.price,
            created_at: order.created_at,
            executed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderError {
    #[error("Cannot trade {0} for itself")]
    SameAsset(Asset),

    #[error("Sell amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Price must be positive, got {0}")]
    InvalidPrice(Decimal),

    #[error("Leverage must be at least 1x, got {0}")]
    InvalidLeverage(Decimal),

    #[error("Spot trades are paid in the sell asset, not {0}")]
    CollateralOnSpot(Asset),

    #[error("Insufficient {asset}: requested {requested}, available {available}")]
    InsufficientFunds {
        asset: Asset,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Order out of range: {0}")]
    OutOfRange(#[from] Overflow),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn max_lev() -> Leverage {
        Leverage::new(dec!(5)).unwrap()
    }

    fn p(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn build(request: OrderRequest, available: Decimal) -> Result<Order, OrderError> {
        Order::from_request(request, available, max_lev(), Timestamp::from_millis(0))
    }

    fn spot(order: &Order, buy: Price, sell: Price) -> SpotFill {
        match order.plan(&MarketPrices::sell_collateral(buy, sell)).unwrap() {
            Execution::Spot(fill) => fill,
            other => panic!("expected a spot fill, got {other:?}"),
        }
    }

    fn levered(order: &Order, prices: &MarketPrices) -> LeveredOpen {
        match order.plan(prices).unwrap() {
            Execution::Levered(open) => open,
            other => panic!("expected a levered open, got {other:?}"),
        }
    }

    fn usdc_to_eth(amount: Decimal) -> OrderRequest {
        OrderRequest::spot(
            UserId::new("alice"),
            Asset::new("USDC"),
            Asset::new("ETH"),
            SellAmount::Exact(amount),
        )
    }

    #[test]
    fn kind_resolution() {
        let order = build(usdc_to_eth(dec!(100)), dec!(1000)).unwrap();
        assert_eq!(order.kind, OrderKind::SpotMarket);
        assert_eq!(order.group(), PendingGroup::Market);

        let order = build(usdc_to_eth(dec!(100)).at_price(dec!(400)), dec!(1000)).unwrap();
        assert_eq!(order.kind, OrderKind::SpotLimit { price: p(dec!(400)) });
        assert_eq!(order.group(), PendingGroup::Limit);

        // zero price means market
        let order = build(usdc_to_eth(dec!(100)).at_price(dec!(0)), dec!(1000)).unwrap();
        assert_eq!(order.kind, OrderKind::SpotMarket);
    }

    #[test]
    fn levered_kind_and_clamp() {
        let req = OrderRequest::levered(
            UserId::new("alice"),
            Asset::new("USDC"),
            Asset::new("ETH"),
            SellAmount::Exact(dec!(100)),
            dec!(20),
            Side::Short,
        );
        let order = build(req, dec!(1000)).unwrap();
        assert_eq!(order.kind, OrderKind::LeveredMarket { leverage: max_lev() });
        assert!(order.kind.is_levered());
        assert_eq!(order.side, Side::Short);
    }

    #[test]
    fn collateral_resolved_once() {
        let order = build(usdc_to_eth(dec!(100)), dec!(1000)).unwrap();
        assert_eq!(order.collateral, Asset::new("USDC"));

        let req = OrderRequest::levered(
            UserId::new("alice"),
            Asset::new("USDC"),
            Asset::new("ETH"),
            SellAmount::Exact(dec!(1)),
            dec!(2),
            Side::Long,
        )
        .with_collateral(Asset::new("BTC"));
        let order = build(req, dec!(3)).unwrap();
        assert_eq!(order.collateral, Asset::new("BTC"));
    }

    #[test]
    fn spot_rejects_foreign_collateral() {
        let req = usdc_to_eth(dec!(1)).with_collateral(Asset::new("BTC"));
        assert!(matches!(build(req, dec!(10)), Err(OrderError::CollateralOnSpot(_))));
    }

    #[test]
    fn validation_errors() {
        let same = OrderRequest::spot(
            UserId::new("a"),
            Asset::new("ETH"),
            Asset::new("eth"),
            SellAmount::Exact(dec!(1)),
        );
        assert!(matches!(build(same, dec!(10)), Err(OrderError::SameAsset(_))));
        assert!(matches!(build(usdc_to_eth(dec!(0)), dec!(10)), Err(OrderError::InvalidAmount(_))));
        assert!(matches!(
            build(usdc_to_eth(dec!(11)), dec!(10)),
            Err(OrderError::InsufficientFunds { .. })
        ));
        assert!(matches!(
            build(usdc_to_eth(dec!(1)).at_price(dec!(-3)), dec!(10)),
            Err(OrderError::InvalidPrice(_))
        ));
        let mut fractional = usdc_to_eth(dec!(1));
        fractional.leverage = Some(dec!(0.5));
        assert!(matches!(build(fractional, dec!(10)), Err(OrderError::InvalidLeverage(_))));
    }

    #[test]
    fn sell_all_uses_available() {
        let req = OrderRequest::spot(
            UserId::new("alice"),
            Asset::new("USDC"),
            Asset::new("ETH"),
            SellAmount::All,
        );
        let order = build(req.clone(), dec!(742.5)).unwrap();
        assert_eq!(order.sell_amount, dec!(742.5));
        assert!(matches!(build(req, dec!(0)), Err(OrderError::InvalidAmount(_))));
    }

    #[test]
    fn readiness_is_strict() {
        let long = build(usdc_to_eth(dec!(100)).at_price(dec!(400)), dec!(1000)).unwrap();
        let usdc = p(dec!(1));
        assert!(long.is_ready(p(dec!(350)), usdc).unwrap());
        assert!(!long.is_ready(p(dec!(400)), usdc).unwrap());
        assert!(!long.is_ready(p(dec!(450)), usdc).unwrap());

        let mut short = long.clone();
        short.side = Side::Short;
        assert!(short.is_ready(p(dec!(450)), usdc).unwrap());
        assert!(!short.is_ready(p(dec!(400)), usdc).unwrap());
        assert!(!short.is_ready(p(dec!(350)), usdc).unwrap());
    }

    #[test]
    fn market_orders_always_ready() {
        let order = build(usdc_to_eth(dec!(100)), dec!(1000)).unwrap();
        assert!(order.is_ready(p(dec!(1)), p(dec!(1))).unwrap());
    }

    #[test]
    fn market_spot_fill() {
        // 5 ETH → USDC, ETH = 2000, USDC = 1
        let req = OrderRequest::spot(
            UserId::new("alice"),
            Asset::new("ETH"),
            Asset::new("USDC"),
            SellAmount::Exact(dec!(5)),
        );
        let order = build(req, dec!(5)).unwrap();
        let fill = spot(&order, p(dec!(1)), p(dec!(2000)));
        assert_eq!(fill.buy_amount, dec!(10000));
        assert_eq!(fill.price.value(), dec!(0.0005));
    }

    #[test]
    fn limit_spot_fills_at_target() {
        let order = build(usdc_to_eth(dec!(800)).at_price(dec!(400)), dec!(1000)).unwrap();
        // live ratio is 350 but the fill uses 400
        let fill = spot(&order, p(dec!(350)), p(dec!(1)));
        assert_eq!(fill.buy_amount, dec!(2));
        assert_eq!(fill.price.value(), dec!(400));
    }

    #[test]
    fn levered_open_terms() {
        let req = OrderRequest::levered(
            UserId::new("alice"),
            Asset::new("USDC"),
            Asset::new("ETH"),
            SellAmount::Exact(dec!(1000)),
            dec!(5),
            Side::Long,
        );
        let market = build(req.clone(), dec!(1000)).unwrap();
        let prices = MarketPrices::sell_collateral(p(dec!(200)), p(dec!(1)));
        let open = levered(&market, &prices);
        assert_eq!(open.terms.entry_price.value(), dec!(200));
        assert_eq!(open.buy_amount, dec!(5));
        assert_eq!(open.liquidation_price, dec!(160));

        let priced = build(req.at_price(dec!(250)), dec!(1000)).unwrap();
        let open = levered(&priced, &prices);
        assert_eq!(open.terms.entry_price.value(), dec!(250));
        assert_eq!(open.liquidation_price, dec!(200));
    }

    #[test]
    fn limit_fill_in_sell_units_for_non_usd_pair() {
        // sell BTC for ETH with a target of 0.004 BTC per ETH: 1 BTC buys 250 ETH,
        // whatever BTC is worth in usd
        let req = OrderRequest::spot(
            UserId::new("alice"),
            Asset::new("BTC"),
            Asset::new("ETH"),
            SellAmount::Exact(dec!(1)),
        )
        .at_price(dec!(0.004));
        let order = build(req, dec!(2)).unwrap();
        assert_eq!(order.buy_amount, dec!(250));

        // ETH 150, BTC 40000: ratio 0.00375 is below target
        let fill = spot(&order, p(dec!(150)), p(dec!(40000)));
        assert_eq!(fill.buy_amount, dec!(250));
        assert_eq!(fill.price.value(), dec!(0.004));
    }

    #[test]
    fn tiny_target_price_is_out_of_range() {
        let req = usdc_to_eth(dec!(1000)).at_price(dec!(0.0000000000000000000000000001));
        assert!(matches!(build(req, dec!(1000)), Err(OrderError::OutOfRange(_))));
    }

    #[test]
    fn exploding_ratio_is_an_error_not_a_panic() {
        let order = build(usdc_to_eth(dec!(100)).at_price(dec!(400)), dec!(1000)).unwrap();
        let huge = p(Decimal::MAX);
        let tiny = p(dec!(0.0000000000000000000000000001));
        assert!(order.is_ready(huge, tiny).is_err());

        let market = build(usdc_to_eth(dec!(100)), dec!(1000)).unwrap();
        assert!(market.plan(&MarketPrices::sell_collateral(huge, tiny)).is_err());
        // sell cost overflows before the division
        assert!(market.plan(&MarketPrices::sell_collateral(tiny, huge)).is_err());
    }
}
