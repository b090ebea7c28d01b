// 1.0: all the primitives live here. users, assets, ids, prices, usd amounts, leverage, timestamps.
// each is a newtype so the compiler catches a price passed where a usd amount belongs.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.1: ticker symbol. always stored upper case so "eth" and "ETH" are the same asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Asset(String);

impl Asset {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    pub fn symbol(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub Uuid);

impl OrderId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(pub Uuid);

impl PositionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Long = profit when the buy/sell ratio goes up. Short = profit when it goes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => dec!(1),
            Side::Short => dec!(-1),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// 1.2: a price. either usd per unit from the oracle, or a buy/sell ratio. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    // buy usd price / sell usd price. how many sell units one buy unit costs.
    // fails when the quotient leaves the decimal range or rounds down to zero
    pub fn ratio(buy: Price, sell: Price) -> Result<Price, Overflow> {
        buy.0
            .checked_div(sell.0)
            .and_then(Price::new)
            .ok_or(Overflow::at("buy/sell price ratio"))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.3: usd amount. position values, balance totals, close bounds all use this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote(Decimal);

impl Quote {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn checked_add(&self, other: Quote) -> Result<Self, Overflow> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(Overflow::at("usd total"))
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.round_dp(3))
    }
}

impl PartialOrd for Quote {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quote {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// 1.4: leverage multiplier. must be >= 1x. spot trades carry no leverage at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Leverage(Decimal);

impl Leverage {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value >= Decimal::ONE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value >= Decimal::ONE);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    // 5x leverage → a 20% adverse move wipes the collateral (1/5)
    pub fn wipeout_move(&self) -> Decimal {
        Decimal::ONE / self.0
    }

    pub fn clamp_to(self, max: Leverage) -> Self {
        if self.0 > max.0 {
            max
        } else {
            self
        }
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0.normalize())
    }
}

// 1.5: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }
}

// 1.6: decimal arithmetic that left the representable range. prices and amounts are
// user or oracle supplied, so every settlement formula goes through checked ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Overflow: {context}")]
pub struct Overflow {
    pub context: &'static str,
}

impl Overflow {
    pub fn at(context: &'static str) -> Self {
        Self { context }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_symbols_are_normalized() {
        assert_eq!(Asset::new(" eth"), Asset::new("ETH"));
        assert_eq!(Asset::new("usdc").symbol(), "USDC");
    }

    #[test]
    fn price_rejects_non_positive() {
        assert!(Price::new(dec!(0)).is_none());
        assert!(Price::new(dec!(-1)).is_none());
        assert!(Price::new(dec!(0.01)).is_some());
    }

    #[test]
    fn price_ratio() {
        let eth = Price::new_unchecked(dec!(2000));
        let usdc = Price::new_unchecked(dec!(1));
        assert_eq!(Price::ratio(eth, usdc).unwrap().value(), dec!(2000));
        assert_eq!(Price::ratio(usdc, eth).unwrap().value(), dec!(0.0005));
    }

    #[test]
    fn price_ratio_out_of_range() {
        let huge = Price::new_unchecked(Decimal::MAX);
        let tiny = Price::new_unchecked(dec!(0.0000000000000000000000000001));
        assert_eq!(Price::ratio(huge, tiny), Err(Overflow::at("buy/sell price ratio")));
        // rounds to zero, which is not a price
        assert!(Price::ratio(tiny, huge).is_err());
    }

    #[test]
    fn quote_checked_add() {
        let a = Quote::new(dec!(1.5));
        assert_eq!(a.checked_add(Quote::new(dec!(2))).unwrap().value(), dec!(3.5));
        assert!(Quote::new(Decimal::MAX).checked_add(a).is_err());
    }

    #[test]
    fn leverage_wipeout_move() {
        let lev_5x = Leverage::new(dec!(5)).unwrap();
        assert_eq!(lev_5x.wipeout_move(), dec!(0.2));

        let lev_1x = Leverage::new(dec!(1)).unwrap();
        assert_eq!(lev_1x.wipeout_move(), dec!(1));

        assert!(Leverage::new(dec!(0.5)).is_none());
    }

    #[test]
    fn leverage_clamp() {
        let max = Leverage::new(dec!(5)).unwrap();
        let big = Leverage::new(dec!(20)).unwrap();
        let small = Leverage::new(dec!(3)).unwrap();
        assert_eq!(big.clamp_to(max), max);
        assert_eq!(small.clamp_to(max), small);
    }
}
