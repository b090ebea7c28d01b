//! Position close, liquidation and close conditions.

use super::core::Engine;
use super::results::{PositionOutcome, SettleError};
use crate::events::{CloseReason, EventPayload, PositionClosedEvent, PositionLiquidatedEvent};
use crate::position::{CloseCondition, Position, PositionError};
use crate::types::{PositionId, Quote, UserId};
use crate::valuation::{MarketPrices, PositionValuation};
use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

/// Why a position is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CloseKind {
    Liquidation,
    Voluntary(CloseReason),
}

impl Engine {
    /// Live positions owned by `user`, oldest first.
    pub async fn open_positions(&self, user: &UserId) -> Result<Vec<Position>, SettleError> {
        let live = self.stores.positions.list_live().await.map_err(SettleError::Read)?;
        Ok(live.into_iter().filter(|p| &p.user == user).collect())
    }

    /// Close at current prices and return the collateral adjusted by pnl.
    /// A position worth nothing is liquidated instead.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn close_position(
        &self,
        user: &UserId,
        id: PositionId,
    ) -> Result<PositionOutcome, SettleError> {
        let position = self.owned_position(user, id).await?;
        if !position.is_alive() {
            return Err(PositionError::AlreadyClosed(id).into());
        }

        let prices = self.position_prices(&position.terms).await?;
        match self.close_with(&position, &prices, CloseKind::Voluntary(CloseReason::UserClosed)).await? {
            PositionOutcome::Gone => Err(PositionError::AlreadyClosed(id).into()),
            outcome => Ok(outcome),
        }
    }

    /// Attach or replace usd bounds that close the position when crossed.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn set_close_condition(
        &self,
        user: &UserId,
        id: PositionId,
        upper: Quote,
        lower: Quote,
    ) -> Result<Position, SettleError> {
        let condition = CloseCondition::new(upper, lower)?;

        let _guard = self.ledger.lock(user).await;
        let mut position = self.owned_position(user, id).await?;
        position.set_close_condition(condition)?;
        self.stores
            .positions
            .update(position.clone())
            .await
            .map_err(SettleError::Write)?;

        info!(position_id = %id, upper = %upper, lower = %lower, "close condition set");
        Ok(position)
    }

    async fn owned_position(&self, user: &UserId, id: PositionId) -> Result<Position, SettleError> {
        let position = self
            .stores
            .positions
            .get(id)
            .await
            .map_err(SettleError::Read)?
            .ok_or(PositionError::NotFound(id))?;
        if &position.user != user {
            return Err(SettleError::NotOwner {
                user: user.clone(),
                position: id,
            });
        }
        Ok(position)
    }

    // 8.3: value a live position once. liquidate at zero, otherwise record the value
    // and check the close condition. a failed valuation write rides along with the
    // outcome, it never blocks the close.
    pub(super) async fn settle_position(
        &self,
        position: &Position,
    ) -> Result<(PositionOutcome, Option<SettleError>), SettleError> {
        let prices = self.position_prices(&position.terms).await?;
        let value = position.value(&prices)?;

        if !value.is_positive() {
            let outcome = self.close_with(position, &prices, CloseKind::Liquidation).await?;
            return Ok((outcome, None));
        }

        let valuation = PositionValuation {
            time: self.now(),
            value,
            position: position.id,
        };
        let unrecorded = match self.stores.valuations.append(valuation).await {
            Ok(()) => None,
            Err(e) => {
                error!(position_id = %position.id, error = %e, "valuation write failed");
                Some(SettleError::Write(e))
            }
        };

        let outcome = match position.crossed_bound(value) {
            Some(bound) => {
                let kind = CloseKind::Voluntary(CloseReason::BoundCrossed(bound));
                self.close_with(position, &prices, kind).await?
            }
            None => PositionOutcome::Valued(value),
        };
        Ok((outcome, unrecorded))
    }

    // 8.4: the one place a position leaves the open state. re-read under the user's
    // lock so a position is closed at most once.
    pub(super) async fn close_with(
        &self,
        seen: &Position,
        prices: &MarketPrices,
        kind: CloseKind,
    ) -> Result<PositionOutcome, SettleError> {
        let guard = self.ledger.lock(&seen.user).await;

        let Some(mut position) = self.stores.positions.get(seen.id).await.map_err(SettleError::Read)? else {
            return Ok(PositionOutcome::Gone);
        };
        if !position.is_alive() {
            return Ok(PositionOutcome::Gone);
        }

        let value = position.value(prices)?;
        // None means liquidation. a voluntary close worth nothing is one too
        let reason = match kind {
            CloseKind::Voluntary(reason) if value.is_positive() => Some(reason),
            _ => None,
        };
        let award = match reason {
            Some(_) => position.settlement_award(value, prices.collateral)?,
            None => Decimal::ZERO,
        };

        let now = self.now();
        position.close(reason.is_none(), now)?;
        self.stores
            .positions
            .update(position.clone())
            .await
            .map_err(SettleError::Write)?;

        if award > Decimal::ZERO {
            let collateral = position.terms.collateral.clone();
            let credited = self
                .ledger
                .apply_locked(&guard, now, |balance| balance.credit(&collateral, award))
                .await;
            if let Err(e) = credited {
                error!(
                    position_id = %position.id,
                    user = %position.user,
                    award = %award,
                    error = %e,
                    "position closed but award not credited, inconsistency candidate"
                );
                return Err(e.into());
            }
        }
        drop(guard);

        let Some(reason) = reason else {
            warn!(
                position_id = %position.id,
                user = %position.user,
                value = %value,
                liquidation_price = %position.liquidation_price,
                "position liquidated"
            );
            self.emit_event(
                &position.user,
                EventPayload::PositionLiquidated(PositionLiquidatedEvent::from_position(&position)),
            )
            .await;
            return Ok(PositionOutcome::Liquidated { value });
        };

        info!(
            position_id = %position.id,
            user = %position.user,
            value = %value,
            award = %award,
            reason = ?reason,
            "position closed"
        );
        let closed = PositionClosedEvent {
            position_id: position.id,
            value,
            award,
            collateral: position.terms.collateral.clone(),
            reason,
        };
        self.emit_event(&position.user, EventPayload::PositionClosed(closed)).await;
        Ok(PositionOutcome::Closed {
            value,
            award,
            reason,
        })
    }
}
