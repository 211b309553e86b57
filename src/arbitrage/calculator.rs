use bigdecimal::BigDecimal;
use thiserror::Error;
use tracing::debug;

use crate::{
    config::TradeSettings,
    market::PriceCache,
    types::{Balances, Direction, Market, PriceQuote, Side, TradeLeg, TriangleMarkets},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizingError {
    #[error("no quote cached for {0}")]
    MissingQuote(String),
    #[error("non-positive price for {0}")]
    InvalidPrice(String),
    #[error("nothing to {side} on {pair}: computed amount {amount}")]
    NothingToTrade {
        pair: String,
        side: Side,
        amount: String,
    },
}

/// Turns prices and balances into limit orders.
pub struct TradeSizer {
    balance_fraction: BigDecimal,
    amount_scale: i64,
}

impl TradeSizer {
    pub fn new(settings: &TradeSettings) -> Self {
        Self {
            balance_fraction: settings.balance_fraction.clone(),
            amount_scale: settings.amount_scale,
        }
    }

    /// Buys at the ask with a fraction of the quote balance, sells at the bid
    /// with a fraction of the base balance. Amounts are truncated to the
    /// exchange precision.
    pub fn size_leg(
        &self,
        market: &Market,
        side: Side,
        quote: Option<&PriceQuote>,
        balances: &Balances,
    ) -> Result<TradeLeg, SizingError> {
        let symbol = market.pair.symbol();
        let quote = quote.ok_or_else(|| SizingError::MissingQuote(symbol.clone()))?;
        let zero = BigDecimal::from(0);

        let (price, amount) = match side {
            Side::Buy => {
                let price = quote.lowest_ask.clone();
                if price <= zero {
                    return Err(SizingError::InvalidPrice(symbol));
                }
                let spend = balance_of(balances, &market.pair.quote_asset) * &self.balance_fraction;
                let amount = spend / &price;
                (price, amount)
            }
            Side::Sell => {
                let price = quote.highest_bid.clone();
                if price <= zero {
                    return Err(SizingError::InvalidPrice(symbol));
                }
                let amount = balance_of(balances, &market.pair.base_asset) * &self.balance_fraction;
                (price, amount)
            }
        };

        let amount = amount.with_scale(self.amount_scale);
        if amount <= zero {
            return Err(SizingError::NothingToTrade {
                pair: symbol,
                side,
                amount: amount.to_string(),
            });
        }

        let leg = TradeLeg {
            pair: market.pair.clone(),
            side,
            account: market.account.clone(),
            price,
            amount,
        };
        debug!("Sized leg: {}", leg);
        Ok(leg)
    }

    /// Sizes the replacement for a cancelled leg from fresh prices and
    /// balances, capped at what the cancelled order left unfilled.
    pub fn size_retry(
        &self,
        market: &Market,
        side: Side,
        quote: Option<&PriceQuote>,
        balances: &Balances,
        remaining: Option<&BigDecimal>,
    ) -> Result<TradeLeg, SizingError> {
        let mut leg = self.size_leg(market, side, quote, balances)?;

        if let Some(remaining) = remaining {
            let remaining = remaining.with_scale(self.amount_scale);
            if remaining <= BigDecimal::from(0) {
                return Err(SizingError::NothingToTrade {
                    pair: market.pair.symbol(),
                    side,
                    amount: remaining.to_string(),
                });
            }
            if leg.amount > remaining {
                debug!("Capping {} retry at unfilled {}", market.pair, remaining);
                leg.amount = remaining;
            }
        }

        Ok(leg)
    }

    /// All three legs in `[ab, bc, ac]` order.
    pub fn size_triangle(
        &self,
        markets: &TriangleMarkets,
        direction: Direction,
        prices: &PriceCache,
        balances: &Balances,
    ) -> Result<[TradeLeg; 3], SizingError> {
        let [ab, bc, ac] = markets.markets();
        let [ab_side, bc_side, ac_side] = markets.sides(direction);

        Ok([
            self.size_leg(ab, ab_side, prices.quote(&ab.pair.symbol()).as_ref(), balances)?,
            self.size_leg(bc, bc_side, prices.quote(&bc.pair.symbol()).as_ref(), balances)?,
            self.size_leg(ac, ac_side, prices.quote(&ac.pair.symbol()).as_ref(), balances)?,
        ])
    }
}

fn balance_of(balances: &Balances, asset: &str) -> BigDecimal {
    balances
        .get(asset)
        .cloned()
        .unwrap_or_else(|| BigDecimal::from(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config,
        testing::{dec, quote},
    };

    fn sizer() -> TradeSizer {
        TradeSizer::new(&TradeSettings::from_config(&test_config()).unwrap())
    }

    fn balances() -> Balances {
        [("BTC", "1"), ("ETH", "10"), ("BCH", "50")]
            .into_iter()
            .map(|(asset, amount)| (asset.to_string(), dec(amount)))
            .collect()
    }

    fn prices() -> PriceCache {
        let cache = PriceCache::new();
        cache.update(quote("BTC_ETH", "0.074", "0.0741"));
        cache.update(quote("BTC_BCH", "0.0131", "0.0132"));
        cache.update(quote("ETH_BCH", "0.177", "0.170"));
        cache
    }

    #[test]
    fn test_clockwise_legs() {
        let markets = test_config().markets();
        let legs = sizer()
            .size_triangle(&markets, Direction::Clockwise, &prices(), &balances())
            .unwrap();

        // 0.999 * 1 BTC / 0.0741
        assert_eq!(legs[0].side, Side::Buy);
        assert_eq!(legs[0].price, dec("0.0741"));
        assert_eq!(legs[0].amount, dec("13.48178137"));
        assert_eq!(legs[0].account, "private_0");

        // 0.999 * 10 ETH / 0.170
        assert_eq!(legs[1].side, Side::Buy);
        assert_eq!(legs[1].amount, dec("58.76470588"));

        // 0.999 * 50 BCH at the bid
        assert_eq!(legs[2].side, Side::Sell);
        assert_eq!(legs[2].price, dec("0.0131"));
        assert_eq!(legs[2].amount, dec("49.95"));
        assert_eq!(legs[2].account, "private_1");
    }

    #[test]
    fn test_counter_clockwise_legs() {
        let markets = test_config().markets();
        let legs = sizer()
            .size_triangle(&markets, Direction::CounterClockwise, &prices(), &balances())
            .unwrap();

        assert_eq!(legs[0].side, Side::Sell);
        assert_eq!(legs[0].price, dec("0.074"));
        assert_eq!(legs[0].amount, dec("9.99"));

        assert_eq!(legs[2].side, Side::Buy);
        assert_eq!(legs[2].amount, dec("75.68181818"));
    }

    #[test]
    fn test_missing_quote_fails() {
        let markets = test_config().markets();
        let cache = PriceCache::new();
        cache.update(quote("BTC_ETH", "0.074", "0.0741"));

        let result = sizer().size_triangle(&markets, Direction::Clockwise, &cache, &balances());
        assert_eq!(result.unwrap_err(), SizingError::MissingQuote("ETH_BCH".to_string()));
    }

    #[test]
    fn test_empty_balance_fails() {
        let markets = test_config().markets();
        let result = sizer().size_triangle(&markets, Direction::Clockwise, &prices(), &Balances::new());
        assert!(matches!(result, Err(SizingError::NothingToTrade { .. })));
    }

    #[test]
    fn test_retry_capped_at_unfilled_amount() {
        let markets = test_config().markets();
        let [_, _, ac] = markets.markets();
        let btc_bch = quote("BTC_BCH", "0.0131", "0.0132");

        // 20 BCH of the original 49.95 sold before the cancel
        let leg = sizer()
            .size_retry(ac, Side::Sell, Some(&btc_bch), &balances(), Some(&dec("29.95")))
            .unwrap();
        assert_eq!(leg.amount, dec("29.95"));

        // A smaller balance wins over the cap
        let leg = sizer()
            .size_retry(ac, Side::Sell, Some(&btc_bch), &balances(), Some(&dec("60")))
            .unwrap();
        assert_eq!(leg.amount, dec("49.95"));

        let result = sizer().size_retry(ac, Side::Sell, Some(&btc_bch), &balances(), Some(&dec("0")));
        assert!(matches!(result, Err(SizingError::NothingToTrade { .. })));
    }
}
