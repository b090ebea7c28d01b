//! Account opening and the portfolio view.

use super::core::Engine;
use super::results::SettleError;
use crate::balance::Balance;
use crate::position::Position;
use crate::store::{ChannelId, StoreError};
use crate::types::{Asset, Overflow, Quote, UserId};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

/// A live position and what it is worth right now.
#[derive(Debug, Clone)]
pub struct PositionView {
    pub position: Position,
    // None when a price for one of its legs is unavailable or out of range
    pub value: Option<Quote>,
}

#[derive(Debug, Clone)]
pub struct Portfolio {
    // latest snapshot without dust, carrying per asset prices and the total
    pub balance: Balance,
    pub holdings_value: Quote,
    pub positions: Vec<PositionView>,
}

impl Portfolio {
    pub fn positions_value(&self) -> Result<Quote, Overflow> {
        self.positions
            .iter()
            .filter_map(|p| p.value)
            .try_fold(Quote::new(Decimal::ZERO), |total, value| total.checked_add(value))
    }

    pub fn net_worth(&self) -> Result<Quote, Overflow> {
        self.holdings_value.checked_add(self.positions_value()?)
    }
}

impl Engine {
    /// Register a user's notification channel and write their first balance.
    #[instrument(skip(self, channel, grants), fields(user = %user))]
    pub async fn open_account(
        &self,
        user: &UserId,
        channel: ChannelId,
        grants: impl IntoIterator<Item = (Asset, Decimal)> + Send,
    ) -> Result<Balance, SettleError> {
        let balance = Balance::with_holdings(user.clone(), grants, self.now())
            .map_err(SettleError::Balance)?;

        match self.stores.directory.register(user, channel).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(SettleError::AccountExists(user.clone())),
            Err(e) => return Err(SettleError::Write(e)),
        }
        self.ledger.open(balance.clone()).await?;

        info!(assets = balance.holdings.len(), "account opened");
        Ok(balance)
    }

    /// Latest balance priced in usd, plus every live position with its value.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn portfolio(&self, user: &UserId) -> Result<Portfolio, SettleError> {
        let mut balance = self
            .ledger
            .latest(user)
            .await?
            .cleaned(self.config.dust_threshold);
        let prices = self.prices_for(balance.holdings.keys()).await?;
        let holdings_value = balance.valuate(prices).map_err(SettleError::Balance)?;

        let mut positions = Vec::new();
        for position in self.open_positions(user).await? {
            let value = match self.position_prices(&position.terms).await {
                Ok(prices) => match position.value(&prices) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(position_id = %position.id, error = %e, "position value out of range");
                        None
                    }
                },
                Err(e) => {
                    warn!(position_id = %position.id, error = %e, "position not priced");
                    None
                }
            };
            positions.push(PositionView { position, value });
        }

        Ok(Portfolio {
            balance,
            holdings_value,
            positions,
        })
    }
}
