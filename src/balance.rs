//! Balance snapshots.
//!
//! A balance is an immutable per-user snapshot of asset quantities. Mutations never
//! edit a stored snapshot: they derive the next one with [`Balance::next`], apply
//! debits and credits, and the ledger appends the result. Quantities can never go
//! negative; a debit that would overdraw is rejected before anything is persisted.

use crate::types::{Asset, Price, Quote, Timestamp, UserId};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// holdings below this are rounding noise left over from conversions
pub const DEFAULT_DUST: Decimal = dec!(0.0000009);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub user: UserId,
    pub holdings: HashMap<Asset, Decimal>,
    pub timestamp: Timestamp,
    // last valuation, filled by `valuate`. never trusted for settlement math
    pub prices: Option<HashMap<Asset, Price>>,
    pub total: Option<Quote>,
}

impl Balance {
    pub fn new(user: UserId, timestamp: Timestamp) -> Self {
        Self {
            user,
            holdings: HashMap::new(),
            timestamp,
            prices: None,
            total: None,
        }
    }

    pub fn with_holdings(
        user: UserId,
        holdings: impl IntoIterator<Item = (Asset, Decimal)>,
        timestamp: Timestamp,
    ) -> Result<Self, BalanceError> {
        let balance = Self {
            user,
            holdings: holdings.into_iter().collect(),
            timestamp,
            prices: None,
            total: None,
        };
        balance.ensure_non_negative()?;
        Ok(balance)
    }

    /// Derive the successor snapshot. Stale valuations are dropped.
    pub fn next(&self, timestamp: Timestamp) -> Self {
        Self {
            user: self.user.clone(),
            holdings: self.holdings.clone(),
            timestamp,
            prices: None,
            total: None,
        }
    }

    pub fn quantity(&self, asset: &Asset) -> Decimal {
        self.holdings.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn debit(&mut self, asset: &Asset, amount: Decimal) -> Result<(), BalanceError> {
        if amount < Decimal::ZERO {
            return Err(BalanceError::NegativeAmount {
                asset: asset.clone(),
                amount,
            });
        }
        let available = self.quantity(asset);
        if amount > available {
            return Err(BalanceError::Insufficient {
                asset: asset.clone(),
                requested: amount,
                available,
            });
        }
        self.holdings.insert(asset.clone(), available - amount);
        Ok(())
    }

    pub fn credit(&mut self, asset: &Asset, amount: Decimal) -> Result<(), BalanceError> {
        if amount < Decimal::ZERO {
            return Err(BalanceError::NegativeAmount {
                asset: asset.clone(),
                amount,
            });
        }
        let held = self.quantity(asset);
        let next = held
            .checked_add(amount)
            .ok_or_else(|| BalanceError::OutOfRange(asset.clone()))?;
        self.holdings.insert(asset.clone(), next);
        Ok(())
    }

    pub fn ensure_non_negative(&self) -> Result<(), BalanceError> {
        match self.holdings.iter().find(|(_, qty)| **qty < Decimal::ZERO) {
            Some((asset, qty)) => Err(BalanceError::NegativeQuantity {
                asset: asset.clone(),
                quantity: *qty,
            }),
            None => Ok(()),
        }
    }

    /// Copy without holdings smaller than `dust`.
    pub fn cleaned(&self, dust: Decimal) -> Self {
        let mut out = self.clone();
        out.holdings.retain(|_, qty| *qty >= dust);
        out
    }

    /// Price every holding and record the usd total on this snapshot.
    pub fn valuate(&mut self, prices: HashMap<Asset, Price>) -> Result<Quote, BalanceError> {
        let mut total = Decimal::ZERO;
        for (asset, qty) in &self.holdings {
            let price = prices
                .get(asset)
                .ok_or_else(|| BalanceError::MissingPrice(asset.clone()))?;
            total = qty
                .checked_mul(price.value())
                .and_then(|value| total.checked_add(value))
                .ok_or_else(|| BalanceError::OutOfRange(asset.clone()))?;
        }
        self.prices = Some(prices);
        self.total = Some(Quote::new(total));
        Ok(Quote::new(total))
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BalanceError {
    #[error("Insufficient {asset}: requested {requested}, available {available}")]
    Insufficient {
        asset: Asset,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Quantity of {asset} would be negative: {quantity}")]
    NegativeQuantity { asset: Asset, quantity: Decimal },

    #[error("Negative amount {amount} for {asset}")]
    NegativeAmount { asset: Asset, amount: Decimal },

    #[error("No price for {0}")]
    MissingPrice(Asset),

    #[error("Quantity of {0} out of range")]
    OutOfRange(Asset),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> Asset {
        Asset::new("USDC")
    }

    fn eth() -> Asset {
        Asset::new("ETH")
    }

    fn test_balance() -> Balance {
        Balance::with_holdings(
            UserId::new("alice"),
            [(usdc(), dec!(1000)), (eth(), dec!(2))],
            Timestamp::from_millis(0),
        )
        .unwrap()
    }

    #[test]
    fn debit_and_credit() {
        let mut bal = test_balance().next(Timestamp::from_millis(1));
        bal.debit(&usdc(), dec!(400)).unwrap();
        bal.credit(&eth(), dec!(0.2)).unwrap();

        assert_eq!(bal.quantity(&usdc()), dec!(600));
        assert_eq!(bal.quantity(&eth()), dec!(2.2));
        assert_eq!(bal.timestamp, Timestamp::from_millis(1));
    }

    #[test]
    fn debit_rejects_overdraw() {
        let mut bal = test_balance();
        let result = bal.debit(&usdc(), dec!(1000.01));
        assert!(matches!(result, Err(BalanceError::Insufficient { .. })));
        // untouched on failure
        assert_eq!(bal.quantity(&usdc()), dec!(1000));
    }

    #[test]
    fn debit_missing_asset() {
        let mut bal = test_balance();
        let result = bal.debit(&Asset::new("BTC"), dec!(1));
        assert!(matches!(
            result,
            Err(BalanceError::Insufficient { available, .. }) if available == Decimal::ZERO
        ));
    }

    #[test]
    fn negative_amounts_rejected() {
        let mut bal = test_balance();
        assert!(matches!(bal.credit(&usdc(), dec!(-5)), Err(BalanceError::NegativeAmount { .. })));
        assert!(matches!(bal.debit(&usdc(), dec!(-5)), Err(BalanceError::NegativeAmount { .. })));
    }

    #[test]
    fn constructing_negative_holdings_fails() {
        let result = Balance::with_holdings(
            UserId::new("bob"),
            [(usdc(), dec!(-1))],
            Timestamp::from_millis(0),
        );
        assert!(matches!(result, Err(BalanceError::NegativeQuantity { .. })));
    }

    #[test]
    fn next_drops_valuation() {
        let mut bal = test_balance();
        let prices = HashMap::from([
            (usdc(), Price::new_unchecked(dec!(1))),
            (eth(), Price::new_unchecked(dec!(2000))),
        ]);
        bal.valuate(prices).unwrap();
        assert!(bal.total.is_some());

        let next = bal.next(Timestamp::from_millis(5));
        assert!(next.total.is_none());
        assert!(next.prices.is_none());
        assert_eq!(next.holdings, bal.holdings);
    }

    #[test]
    fn valuation_total() {
        let mut bal = test_balance();
        let prices = HashMap::from([
            (usdc(), Price::new_unchecked(dec!(1))),
            (eth(), Price::new_unchecked(dec!(2000))),
        ]);
        let total = bal.valuate(prices).unwrap();
        // 1000 + 2 * 2000
        assert_eq!(total.value(), dec!(5000));
    }

    #[test]
    fn valuation_missing_price() {
        let mut bal = test_balance();
        let prices = HashMap::from([(usdc(), Price::new_unchecked(dec!(1)))]);
        assert!(matches!(bal.valuate(prices), Err(BalanceError::MissingPrice(a)) if a == eth()));
    }

    #[test]
    fn credit_overflow_is_rejected() {
        let mut bal = test_balance();
        assert!(matches!(bal.credit(&usdc(), Decimal::MAX), Err(BalanceError::OutOfRange(a)) if a == usdc()));
        assert_eq!(bal.quantity(&usdc()), dec!(1000));
    }

    #[test]
    fn valuation_overflow_is_rejected() {
        let mut bal = test_balance();
        let prices = HashMap::from([
            (usdc(), Price::new_unchecked(dec!(1))),
            (eth(), Price::new_unchecked(Decimal::MAX)),
        ]);
        assert!(matches!(bal.valuate(prices), Err(BalanceError::OutOfRange(a)) if a == eth()));
        assert!(bal.total.is_none());
    }

    #[test]
    fn dust_is_cleaned() {
        let mut bal = test_balance();
        bal.credit(&Asset::new("DOGE"), dec!(0.0000001)).unwrap();
        let cleaned = bal.cleaned(DEFAULT_DUST);
        assert_eq!(cleaned.holdings.len(), 2);
        assert_eq!(cleaned.quantity(&Asset::new("DOGE")), Decimal::ZERO);
    }
}
