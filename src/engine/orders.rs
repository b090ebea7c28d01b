//! Order submission and execution.

use super::core::Engine;
use super::results::{OrderOutcome, SettleError};
use crate::events::{
    EventPayload, OrderPlacedEvent, OrderRejectedEvent, PositionOpenedEvent, TradeFilledEvent,
};
use crate::ledger::UserGuard;
use crate::order::{Execution, LeveredOpen, Order, OrderRequest, SpotFill, Trade};
use crate::position::Position;
use crate::types::{OrderId, Timestamp};
use tracing::{error, info, instrument, warn};

impl Engine {
    /// Validate a request against the user's current balance and queue it.
    /// Funds are checked again at execution, nothing is reserved here.
    #[instrument(skip(self, request), fields(user = %request.user))]
    pub async fn submit_order(&self, request: OrderRequest) -> Result<Order, SettleError> {
        let balance = self.ledger.latest(&request.user).await?;
        let available = balance.quantity(request.funding_asset());
        let order = Order::from_request(request, available, self.config.max_leverage, self.now())?;

        self.stores
            .orders
            .insert(order.group(), order.clone())
            .await
            .map_err(SettleError::Write)?;

        info!(
            order_id = %order.id,
            kind = ?order.kind,
            sell = %order.sell,
            buy = %order.buy,
            amount = %order.sell_amount,
            "order queued"
        );
        self.emit_event(&order.user, EventPayload::OrderPlaced(OrderPlacedEvent::from_order(&order)))
            .await;
        Ok(order)
    }

    /// Execute one pending order if it is ready. Market orders always are.
    #[instrument(skip(self))]
    pub async fn execute_order(&self, order_id: OrderId) -> Result<OrderOutcome, SettleError> {
        let Some(order) = self.stores.orders.get(order_id).await.map_err(SettleError::Read)? else {
            return Ok(OrderOutcome::Gone);
        };

        let prices = self.order_prices(&order).await?;
        if !order.is_ready(prices.buy, prices.sell)? {
            return Ok(OrderOutcome::Waiting);
        }
        // planned before the claim, a price that overflows leaves the order pending
        let execution = order.plan(&prices)?;

        let guard = self.ledger.lock(&order.user).await;

        // deleting is the claim. false means another caller got here first
        if !self.claim_order(&order).await? {
            return Ok(OrderOutcome::Gone);
        }

        let balance = match self.ledger.latest(&order.user).await {
            Ok(balance) => balance,
            Err(e) => {
                self.restore_order(&order).await;
                return Err(e.into());
            }
        };
        let available = balance.quantity(&order.collateral);
        if available < order.sell_amount {
            drop(guard);

            warn!(
                order_id = %order.id,
                user = %order.user,
                asset = %order.collateral,
                requested = %order.sell_amount,
                available = %available,
                "order cancelled, insufficient funds"
            );
            let rejected = OrderRejectedEvent {
                order_id: order.id,
                asset: order.collateral.clone(),
                requested: order.sell_amount,
                available,
            };
            self.emit_event(&order.user, EventPayload::OrderRejected(rejected)).await;
            return Ok(OrderOutcome::Rejected {
                asset: order.collateral,
                requested: order.sell_amount,
                available,
            });
        }

        let now = self.now();
        match execution {
            Execution::Spot(fill) => {
                let (trade, unrecorded) = self.fill_spot(&guard, &order, fill, now).await?;
                drop(guard);
                self.emit_event(&order.user, EventPayload::TradeFilled(TradeFilledEvent::from_trade(&trade)))
                    .await;
                Ok(OrderOutcome::Filled { trade, unrecorded })
            }
            Execution::Levered(open) => {
                let position = self.open_levered(&guard, &order, open, now).await?;
                drop(guard);
                self.emit_event(
                    &order.user,
                    EventPayload::PositionOpened(PositionOpenedEvent::from_position(&position)),
                )
                .await;
                Ok(OrderOutcome::Opened(position))
            }
        }
    }

    // swap sell for buy in one snapshot, then record the trade.
    // a failed history write comes back alongside the trade, the fill stands
    async fn fill_spot(
        &self,
        guard: &UserGuard,
        order: &Order,
        fill: SpotFill,
        now: Timestamp,
    ) -> Result<(Trade, Option<SettleError>), SettleError> {
        let applied = self
            .ledger
            .apply_locked(guard, now, |balance| {
                balance.debit(&order.sell, order.sell_amount)?;
                balance.credit(&order.buy, fill.buy_amount)
            })
            .await;
        if let Err(e) = applied {
            self.restore_order(order).await;
            return Err(e.into());
        }

        let trade = Trade::from_fill(order, fill, now);
        let unrecorded = match self.stores.trades.append(trade.clone()).await {
            Ok(()) => None,
            Err(e) => {
                // balance already moved, only the history entry is missing
                error!(
                    order_id = %order.id,
                    user = %order.user,
                    error = %e,
                    "trade history write failed, inconsistency candidate"
                );
                Some(SettleError::Write(e))
            }
        };

        info!(
            order_id = %order.id,
            user = %order.user,
            sold = %order.sell_amount,
            sell = %order.sell,
            bought = %trade.buy_amount,
            buy = %order.buy,
            price = %trade.price,
            "spot order filled"
        );
        Ok((trade, unrecorded))
    }

    // lock the collateral and create the position
    async fn open_levered(
        &self,
        guard: &UserGuard,
        order: &Order,
        open: LeveredOpen,
        now: Timestamp,
    ) -> Result<Position, SettleError> {
        let applied = self
            .ledger
            .apply_locked(guard, now, |balance| balance.debit(&order.collateral, order.sell_amount))
            .await;
        if let Err(e) = applied {
            self.restore_order(order).await;
            return Err(e.into());
        }

        let position = Position::open(order, open, now);
        if let Err(e) = self.stores.positions.insert(position.clone()).await {
            error!(
                order_id = %order.id,
                user = %order.user,
                error = %e,
                "position write failed, refunding collateral"
            );
            let refund = self
                .ledger
                .apply_locked(guard, self.now(), |balance| {
                    balance.credit(&order.collateral, order.sell_amount)
                })
                .await;
            match refund {
                Ok(_) => self.restore_order(order).await,
                Err(refund_err) => error!(
                    order_id = %order.id,
                    user = %order.user,
                    error = %refund_err,
                    "collateral refund failed, inconsistency candidate"
                ),
            }
            return Err(SettleError::Write(e));
        }

        info!(
            order_id = %order.id,
            position_id = %position.id,
            user = %order.user,
            leverage = %position.terms.leverage,
            side = %position.terms.side,
            entry = %position.terms.entry_price,
            collateral = %order.sell_amount,
            liquidation_price = %position.liquidation_price,
            "position opened"
        );
        Ok(position)
    }

    async fn claim_order(&self, order: &Order) -> Result<bool, SettleError> {
        self.stores.orders.delete(order.id).await.map_err(SettleError::Write)
    }

    async fn restore_order(&self, order: &Order) {
        if let Err(e) = self.stores.orders.insert(order.group(), order.clone()).await {
            error!(
                order_id = %order.id,
                user = %order.user,
                error = %e,
                "order lost after failed execution, inconsistency candidate"
            );
        }
    }
}
