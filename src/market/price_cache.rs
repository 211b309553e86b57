use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::PriceQuote;

/// Latest bid/ask per pair. Written by the ticker poller only.
#[derive(Default)]
pub struct PriceCache {
    quotes: RwLock<HashMap<String, PriceQuote>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `quote` and reports whether its bid or ask differ from what was
    /// cached. A first quote for a pair counts as a change.
    pub fn update(&self, quote: PriceQuote) -> bool {
        let mut quotes = self.quotes.write();
        match quotes.get(&quote.pair) {
            Some(cached)
                if cached.highest_bid == quote.highest_bid
                    && cached.lowest_ask == quote.lowest_ask =>
            {
                false
            }
            _ => {
                quotes.insert(quote.pair.clone(), quote);
                true
            }
        }
    }

    pub fn quote(&self, pair: &str) -> Option<PriceQuote> {
        self.quotes.read().get(pair).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, PriceQuote> {
        self.quotes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}
