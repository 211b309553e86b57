use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};

/// Available amount per asset symbol.
pub type Balances = HashMap<String, BigDecimal>;

/// A market in the exchange's `QUOTE_BASE` form: `BTC_ETH` is ETH priced in
/// BTC. Buying spends the quote asset, selling spends the base asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair {
    pub quote_asset: String,
    pub base_asset: String,
}

impl Pair {
    pub fn new(quote_asset: impl Into<String>, base_asset: impl Into<String>) -> Self {
        Self {
            quote_asset: quote_asset.into(),
            base_asset: base_asset.into(),
        }
    }

    pub fn symbol(&self) -> String {
        format!("{}_{}", self.quote_asset, self.base_asset)
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.quote_asset, self.base_asset)
    }
}

/// Best bid and ask for one pair. Both sides are always present; an
/// unquoted pair is simply absent from the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub pair: String,
    pub highest_bid: BigDecimal,
    pub lowest_ask: BigDecimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Traversal direction around the three-pair cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Clockwise => write!(f, "clockwise"),
            Direction::CounterClockwise => write!(f, "counter-clockwise"),
        }
    }
}

/// One pair of the triangle together with the account that trades it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub pair: Pair,
    pub account: String,
}

/// The three markets of the cycle for assets A, B and C:
/// `ab = A_B`, `bc = B_C`, `ac = A_C`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriangleMarkets {
    pub ab: Market,
    pub bc: Market,
    pub ac: Market,
}

impl TriangleMarkets {
    pub fn markets(&self) -> [&Market; 3] {
        [&self.ab, &self.bc, &self.ac]
    }

    pub fn symbols(&self) -> [String; 3] {
        [self.ab.pair.symbol(), self.bc.pair.symbol(), self.ac.pair.symbol()]
    }

    pub fn assets(&self) -> [String; 3] {
        [
            self.ab.pair.quote_asset.clone(),
            self.ab.pair.base_asset.clone(),
            self.bc.pair.base_asset.clone(),
        ]
    }

    /// Leg sides in `[ab, bc, ac]` order.
    pub fn sides(&self, direction: Direction) -> [Side; 3] {
        match direction {
            Direction::Clockwise => [Side::Buy, Side::Buy, Side::Sell],
            Direction::CounterClockwise => [Side::Sell, Side::Sell, Side::Buy],
        }
    }
}

/// A sized limit order for one leg. Never mutated once placed; a retry
/// builds a fresh value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLeg {
    pub pair: Pair,
    pub side: Side,
    pub account: String,
    pub price: BigDecimal,
    pub amount: BigDecimal,
}

impl fmt::Display for TradeLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {} via {}",
            self.side, self.amount, self.pair, self.price, self.account
        )
    }
}

/// A trade executed synchronously when the order was accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilledTrade {
    pub amount: BigDecimal,
}

/// The exchange's answer to an accepted placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: String,
    pub resulting_trades: Vec<FilledTrade>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
}

/// Open orders grouped by pair symbol.
pub type OpenOrders = HashMap<String, Vec<OpenOrder>>;

/// An order accepted for a leg. Superseded, not mutated, on retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub leg: TradeLeg,
    pub placed_at: DateTime<Utc>,
    pub filled_amount: BigDecimal,
}

impl Order {
    pub fn new(leg: TradeLeg, placed: PlacedOrder) -> Self {
        let filled_amount = placed
            .resulting_trades
            .iter()
            .map(|trade| &trade.amount)
            .sum();

        Self {
            id: placed.order_id,
            leg,
            placed_at: Utc::now(),
            filled_amount,
        }
    }

    /// Whether the synchronously filled amount matches the intended amount
    /// within `tolerance`.
    pub fn is_filled(&self, tolerance: &BigDecimal) -> bool {
        (&self.leg.amount - &self.filled_amount).abs() < *tolerance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub available: BigDecimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    fn test_leg(amount: &str) -> TradeLeg {
        TradeLeg {
            pair: Pair::new("BTC", "ETH"),
            side: Side::Buy,
            account: "private_0".to_string(),
            price: dec("0.0741"),
            amount: dec(amount),
        }
    }

    #[test]
    fn test_pair_symbol() {
        let pair = Pair::new("BTC", "ETH");
        assert_eq!(pair.symbol(), "BTC_ETH");
        assert_eq!(pair.to_string(), "BTC_ETH");
    }

    #[test]
    fn test_order_sums_resulting_trades() {
        let order = Order::new(
            test_leg("1.5"),
            PlacedOrder {
                order_id: "42".to_string(),
                resulting_trades: vec![
                    FilledTrade { amount: dec("1.0") },
                    FilledTrade { amount: dec("0.499999995") },
                ],
            },
        );

        assert_eq!(order.filled_amount, dec("1.499999995"));
        assert!(order.is_filled(&dec("0.00000001")));
    }

    #[test]
    fn test_partial_fill_is_not_filled() {
        let order = Order::new(
            test_leg("1.5"),
            PlacedOrder {
                order_id: "43".to_string(),
                resulting_trades: vec![FilledTrade { amount: dec("1.4") }],
            },
        );

        assert!(!order.is_filled(&dec("0.00000001")));
    }

    #[test]
    fn test_clockwise_sides() {
        let markets = TriangleMarkets {
            ab: Market { pair: Pair::new("BTC", "ETH"), account: "a".to_string() },
            bc: Market { pair: Pair::new("ETH", "BCH"), account: "b".to_string() },
            ac: Market { pair: Pair::new("BTC", "BCH"), account: "c".to_string() },
        };

        assert_eq!(markets.sides(Direction::Clockwise), [Side::Buy, Side::Buy, Side::Sell]);
        assert_eq!(
            markets.sides(Direction::CounterClockwise),
            [Side::Sell, Side::Sell, Side::Buy]
        );
        assert_eq!(markets.assets(), ["BTC".to_string(), "ETH".to_string(), "BCH".to_string()]);
    }
}
