//! Oracle lookups. Always done before taking a user's lock.

use super::core::Engine;
use super::results::SettleError;
use crate::order::Order;
use crate::types::{Asset, Price};
use crate::valuation::{LeveredTerms, MarketPrices};
use std::collections::HashMap;
use tracing::debug;

impl Engine {
    pub(super) async fn price_of(&self, asset: &Asset) -> Result<Price, SettleError> {
        let price = self.stores.oracle.latest_price(asset).await?;
        debug!(asset = %asset, price = %price, "price");
        Ok(price)
    }

    /// Buy and sell legs of an order. Opening a position never converts the
    /// collateral, so it is priced like the sell leg.
    pub(super) async fn order_prices(&self, order: &Order) -> Result<MarketPrices, SettleError> {
        let buy = self.price_of(&order.buy).await?;
        let sell = self.price_of(&order.sell).await?;
        Ok(MarketPrices::sell_collateral(buy, sell))
    }

    pub(super) async fn position_prices(
        &self,
        terms: &LeveredTerms,
    ) -> Result<MarketPrices, SettleError> {
        let buy = self.price_of(&terms.buy).await?;
        let sell = self.price_of(&terms.sell).await?;
        let collateral = if terms.collateral_is_sell() {
            sell
        } else {
            self.price_of(&terms.collateral).await?
        };
        Ok(MarketPrices {
            buy,
            sell,
            collateral,
        })
    }

    pub(super) async fn prices_for<'a>(
        &self,
        assets: impl IntoIterator<Item = &'a Asset>,
    ) -> Result<HashMap<Asset, Price>, SettleError> {
        let mut prices = HashMap::new();
        for asset in assets {
            if !prices.contains_key(asset) {
                let price = self.price_of(asset).await?;
                prices.insert(asset.clone(), price);
            }
        }
        Ok(prices)
    }
}
