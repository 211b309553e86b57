use bigdecimal::BigDecimal;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::{
    bot::gate::{TradeGate, TradeGuard},
    config::TradeSettings,
    market::PriceCache,
    types::{Direction, PriceQuote, TriangleMarkets},
};

/// Wakes the detector loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorSignal {
    /// A ticker fetch moved at least one tracked quote.
    PricesChanged,
    /// A triangle finished; look again with the settled prices.
    Reevaluate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    pub direction: Direction,
    pub estimated_yield: BigDecimal,
}

/// `(1 / ab.ask) / bc.ask * ac.bid`: spend A for B, B for C, sell C for A.
pub fn clockwise_yield(ab: &PriceQuote, bc: &PriceQuote, ac: &PriceQuote) -> Option<BigDecimal> {
    let zero = BigDecimal::from(0);
    if ab.lowest_ask <= zero || bc.lowest_ask <= zero {
        return None;
    }

    Some(BigDecimal::from(1) / &ab.lowest_ask / &bc.lowest_ask * &ac.highest_bid)
}

/// `(1 / ac.ask) * bc.bid * ab.bid`: spend A for C, sell C for B, sell B for A.
pub fn counter_clockwise_yield(
    ab: &PriceQuote,
    bc: &PriceQuote,
    ac: &PriceQuote,
) -> Option<BigDecimal> {
    if ac.lowest_ask <= BigDecimal::from(0) {
        return None;
    }

    Some(BigDecimal::from(1) / &ac.lowest_ask * &bc.highest_bid * &ab.highest_bid)
}

pub struct ArbitrageDetector {
    markets: TriangleMarkets,
    profit_threshold: BigDecimal,
}

impl ArbitrageDetector {
    pub fn new(markets: TriangleMarkets, settings: &TradeSettings) -> Self {
        Self {
            markets,
            profit_threshold: settings.profit_threshold.clone(),
        }
    }

    /// Pure over the given snapshot. Clockwise wins when both clear the
    /// threshold; a missing or unusable quote is never profitable.
    pub fn evaluate(&self, prices: &HashMap<String, PriceQuote>) -> Option<Opportunity> {
        let [ab, bc, ac] = self.markets.symbols();
        let (ab, bc, ac) = (prices.get(&ab)?, prices.get(&bc)?, prices.get(&ac)?);

        let clockwise = clockwise_yield(ab, bc, ac);
        let counter_clockwise = counter_clockwise_yield(ab, bc, ac);

        debug!(
            "Yields: clockwise {}, counter-clockwise {}",
            display_yield(&clockwise),
            display_yield(&counter_clockwise)
        );

        if let Some(estimated_yield) = clockwise.filter(|y| *y > self.profit_threshold) {
            return Some(Opportunity {
                direction: Direction::Clockwise,
                estimated_yield,
            });
        }

        counter_clockwise
            .filter(|y| *y > self.profit_threshold)
            .map(|estimated_yield| Opportunity {
                direction: Direction::CounterClockwise,
                estimated_yield,
            })
    }

    /// Evaluates the cache and, on a hit, takes the trade gate. Does nothing
    /// while a trade holds the gate.
    pub fn check(&self, gate: &TradeGate, prices: &PriceCache) -> Option<(Opportunity, TradeGuard)> {
        if gate.is_busy() {
            return None;
        }

        let opportunity = self.evaluate(&prices.snapshot())?;
        let guard = gate.try_acquire()?;

        info!(
            "Arbitrage opportunity: {} yield {}",
            opportunity.direction, opportunity.estimated_yield
        );
        Some((opportunity, guard))
    }
}

fn display_yield(value: &Option<BigDecimal>) -> String {
    match value {
        Some(value) => value.with_scale(6).to_string(),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::test_config,
        testing::{dec, quote},
    };

    fn detector() -> ArbitrageDetector {
        let config = test_config();
        let settings = TradeSettings::from_config(&config).unwrap();
        ArbitrageDetector::new(config.markets(), &settings)
    }

    fn scenario_prices(eth_bch_ask: &str) -> PriceCache {
        let cache = PriceCache::new();
        cache.update(quote("BTC_ETH", "0.074", "0.0741"));
        cache.update(quote("BTC_BCH", "0.0131", "0.0132"));
        cache.update(quote("ETH_BCH", "0.177", eth_bch_ask));
        cache
    }

    fn close_to(value: &BigDecimal, expected: &str) -> bool {
        (value - &dec(expected)).abs() < dec("0.001")
    }

    #[test]
    fn test_scenario_below_threshold() {
        let prices = scenario_prices("0.178").snapshot();
        let [ab, bc, ac] = ["BTC_ETH", "ETH_BCH", "BTC_BCH"].map(|p| prices[p].clone());

        let clockwise = clockwise_yield(&ab, &bc, &ac).unwrap();
        assert!(close_to(&clockwise, "0.993"));
        assert!(detector().evaluate(&prices).is_none());
    }

    #[test]
    fn test_scenario_clockwise_trigger() {
        let prices = scenario_prices("0.170").snapshot();
        let opportunity = detector().evaluate(&prices).unwrap();

        assert_eq!(opportunity.direction, Direction::Clockwise);
        assert!(close_to(&opportunity.estimated_yield, "1.040"));
    }

    #[test]
    fn test_counter_clockwise_trigger() {
        let cache = PriceCache::new();
        cache.update(quote("BTC_ETH", "0.0741", "0.0742"));
        cache.update(quote("BTC_BCH", "0.0125", "0.0126"));
        cache.update(quote("ETH_BCH", "0.177", "0.178"));

        let opportunity = detector().evaluate(&cache.snapshot()).unwrap();
        assert_eq!(opportunity.direction, Direction::CounterClockwise);
        assert!(opportunity.estimated_yield > dec("1.008"));
    }

    #[test]
    fn test_yields_are_pure() {
        let prices = scenario_prices("0.170").snapshot();
        let [ab, bc, ac] = ["BTC_ETH", "ETH_BCH", "BTC_BCH"].map(|p| prices[p].clone());

        let first = (clockwise_yield(&ab, &bc, &ac), counter_clockwise_yield(&ab, &bc, &ac));
        for _ in 0..10 {
            assert_eq!(
                (clockwise_yield(&ab, &bc, &ac), counter_clockwise_yield(&ab, &bc, &ac)),
                first
            );
        }
        assert_eq!(detector().evaluate(&prices), detector().evaluate(&prices));
    }

    #[test]
    fn test_partial_cache_and_zero_ask_not_profitable() {
        let cache = PriceCache::new();
        cache.update(quote("BTC_ETH", "0.074", "0.0741"));
        assert!(detector().evaluate(&cache.snapshot()).is_none());

        cache.update(quote("BTC_BCH", "0.0131", "0"));
        cache.update(quote("ETH_BCH", "0.177", "0"));
        assert!(detector().evaluate(&cache.snapshot()).is_none());
    }

    #[test]
    fn test_never_triggers_while_gate_held() {
        let detector = detector();
        let gate = TradeGate::new();
        let prices = scenario_prices("0.170");

        let (_, guard) = detector.check(&gate, &prices).unwrap();
        for _ in 0..1000 {
            assert!(detector.check(&gate, &prices).is_none());
        }

        drop(guard);
        assert!(detector.check(&gate, &prices).is_some());
    }
}
