// 3.0: valuation math. value = collateral_usd * (1 + pct_move * leverage * dir).
// 3.1 liquidation price is the ratio where that bracket hits zero. the two must agree exactly.

use crate::types::{Asset, Leverage, Overflow, Price, PositionId, Quote, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Economic terms of a leveraged exposure, fixed when the position opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeveredTerms {
    pub sell: Asset,
    pub buy: Asset,
    pub collateral: Asset,
    // buy/sell ratio at entry
    pub entry_price: Price,
    pub leverage: Leverage,
    pub side: Side,
    // units of `collateral` locked at open
    pub collateral_amount: Decimal,
}

impl LeveredTerms {
    pub fn collateral_is_sell(&self) -> bool {
        self.collateral == self.sell
    }
}

/// Oracle prices for the three legs of a position, all in usd.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketPrices {
    pub buy: Price,
    pub sell: Price,
    pub collateral: Price,
}

impl MarketPrices {
    // collateral priced like the sell leg, no extra lookup
    pub fn sell_collateral(buy: Price, sell: Price) -> Self {
        Self {
            buy,
            sell,
            collateral: sell,
        }
    }

    pub fn ratio(&self) -> Result<Price, Overflow> {
        Price::ratio(self.buy, self.sell)
    }
}

// 3.2: leveraged percent move of the ratio since entry, signed by direction
pub fn leveraged_delta(terms: &LeveredTerms, current_ratio: Price) -> Result<Decimal, Overflow> {
    let entry = terms.entry_price.value();
    let pct_change = (current_ratio.value() - entry)
        .checked_div(entry)
        .ok_or(Overflow::at("percent move since entry"))?;
    pct_change
        .checked_mul(terms.leverage.value() * terms.side.sign())
        .ok_or(Overflow::at("leveraged move"))
}

// 3.3: usd value of the position at a given ratio and collateral price
pub fn value_at(
    terms: &LeveredTerms,
    current_ratio: Price,
    collateral_price: Price,
) -> Result<Quote, Overflow> {
    let collateral_usd = terms
        .collateral_amount
        .checked_mul(collateral_price.value())
        .ok_or(Overflow::at("collateral usd value"))?;
    let delta = leveraged_delta(terms, current_ratio)?;
    delta
        .checked_mul(collateral_usd)
        .and_then(|pnl| collateral_usd.checked_add(pnl))
        .map(Quote::new)
        .ok_or(Overflow::at("position value"))
}

pub fn position_value(terms: &LeveredTerms, prices: &MarketPrices) -> Result<Quote, Overflow> {
    value_at(terms, prices.ratio()?, prices.collateral)
}

// 3.4: entry shifted by 1/leverage against the position.
// zero or below means the position cannot be liquidated by price (1x long).
pub fn liquidation_price(
    entry_price: Price,
    leverage: Leverage,
    side: Side,
) -> Result<Decimal, Overflow> {
    let entry = entry_price.value();
    // never larger than entry itself, leverage is at least 1
    let shift = leverage.wipeout_move() * entry;
    entry
        .checked_sub(side.sign() * shift)
        .ok_or(Overflow::at("liquidation price"))
}

/// One point of a position's value history. Written once per sweep, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionValuation {
    pub time: Timestamp,
    pub value: Quote,
    pub position: PositionId,
}
