// 11.0: every settlement state change produces an event. the engine keeps a bounded audit trail
// of them and renders each one into the message sent to the owning user.

use crate::order::{Order, Trade};
use crate::position::{Bound, Position};
use crate::types::{Asset, Leverage, OrderId, PositionId, Quote, Side, Timestamp, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub user: UserId,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, user: UserId, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            user,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // order events
    OrderPlaced(OrderPlacedEvent),
    TradeFilled(TradeFilledEvent),
    OrderRejected(OrderRejectedEvent),

    // position events
    PositionOpened(PositionOpenedEvent),
    PositionClosed(PositionClosedEvent),
    PositionLiquidated(PositionLiquidatedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub order_id: OrderId,
    pub sell: Asset,
    pub buy: Asset,
    pub sell_amount: Decimal,
    pub is_market: bool,
}

impl OrderPlacedEvent {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            sell: order.sell.clone(),
            buy: order.buy.clone(),
            sell_amount: order.sell_amount,
            is_market: order.kind.target_price().is_none(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFilledEvent {
    pub order_id: OrderId,
    pub sell: Asset,
    pub buy: Asset,
    pub sell_amount: Decimal,
    pub buy_amount: Decimal,
}

impl TradeFilledEvent {
    pub fn from_trade(trade: &Trade) -> Self {
        Self {
            order_id: trade.order_id,
            sell: trade.sell.clone(),
            buy: trade.buy.clone(),
            sell_amount: trade.sell_amount,
            buy_amount: trade.buy_amount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRejectedEvent {
    pub order_id: OrderId,
    pub asset: Asset,
    pub requested: Decimal,
    pub available: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub position_id: PositionId,
    pub leverage: Leverage,
    pub side: Side,
    pub buy: Asset,
    pub sell: Asset,
    pub collateral: Asset,
    pub collateral_amount: Decimal,
    pub liquidation_price: Decimal,
}

impl PositionOpenedEvent {
    pub fn from_position(position: &Position) -> Self {
        Self {
            position_id: position.id,
            leverage: position.terms.leverage,
            side: position.terms.side,
            buy: position.terms.buy.clone(),
            sell: position.terms.sell.clone(),
            collateral: position.terms.collateral.clone(),
            collateral_amount: position.terms.collateral_amount,
            liquidation_price: position.liquidation_price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub position_id: PositionId,
    pub value: Quote,
    pub award: Decimal,
    pub collateral: Asset,
    pub reason: CloseReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    UserClosed,
    BoundCrossed(Bound),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub position_id: PositionId,
    pub leverage: Leverage,
    pub side: Side,
    pub buy: Asset,
    pub sell: Asset,
    pub collateral: Asset,
}

impl PositionLiquidatedEvent {
    pub fn from_position(position: &Position) -> Self {
        Self {
            position_id: position.id,
            leverage: position.terms.leverage,
            side: position.terms.side,
            buy: position.terms.buy.clone(),
            sell: position.terms.sell.clone(),
            collateral: position.terms.collateral.clone(),
        }
    }
}

// the user facing message for each event
impl fmt::Display for EventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPayload::OrderPlaced(e) => {
                let when = if e.is_market { "next settlement" } else { "target price" };
                write!(
                    f,
                    "order {} placed: selling {:.3} {} for {}, executes at {}",
                    e.order_id, e.sell_amount, e.sell, e.buy, when
                )
            }
            EventPayload::TradeFilled(e) => write!(
                f,
                "order has been executed: bought {:.3} {} using {:.3} {}",
                e.buy_amount, e.buy, e.sell_amount, e.sell
            ),
            EventPayload::OrderRejected(e) => write!(
                f,
                "order {} cancelled: not enough {} (needed {:.3}, have {:.3})",
                e.order_id, e.asset, e.requested, e.available
            ),
            EventPayload::PositionOpened(e) => write!(
                f,
                "position has been opened: {} {} on {} relative to {} using {:.3} {} as collateral. liquidation at {:.3} {}/{}",
                e.leverage, e.side, e.buy, e.sell, e.collateral_amount, e.collateral,
                e.liquidation_price, e.buy, e.sell
            ),
            EventPayload::PositionClosed(e) => match e.reason {
                CloseReason::UserClosed => write!(
                    f,
                    "position {} closed at ${}, returned {:.3} {}",
                    e.position_id, e.value, e.award, e.collateral
                ),
                CloseReason::BoundCrossed(bound) => write!(
                    f,
                    "position {} crossed {} limit, it has been closed at ${}, returned {:.3} {}",
                    e.position_id, bound, e.value, e.award, e.collateral
                ),
            },
            EventPayload::PositionLiquidated(e) => write!(
                f,
                "position {}, {} {} on {} relative to {} using {} as collateral, reached its liquidation price and has been liquidated",
                e.position_id, e.leverage, e.side, e.buy, e.sell, e.collateral
            ),
        }
    }
}
