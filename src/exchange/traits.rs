use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::HashMap;

use crate::types::{Balances, OpenOrders, Pair, PlacedOrder, PriceQuote, Side};

/// Latest best bid/ask for every pair the exchange lists, keyed by symbol.
pub type Ticker = HashMap<String, PriceQuote>;

/// Public market data.
#[async_trait]
pub trait MarketData: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_ticker(&self) -> Result<Ticker>;
}

/// The remote exchange. Every call is routed through the scheduler by the
/// caller; implementations do no throttling of their own.
#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_ticker(&self) -> Result<Ticker>;

    async fn place_order(
        &self,
        account: &str,
        pair: &Pair,
        side: Side,
        price: &BigDecimal,
        amount: &BigDecimal,
    ) -> Result<PlacedOrder>;

    /// Returns whether the exchange confirmed the cancellation.
    async fn cancel_order(&self, account: &str, order_id: &str) -> Result<bool>;

    async fn list_open_orders(&self, account: &str) -> Result<OpenOrders>;

    async fn fetch_balances(&self, account: &str) -> Result<Balances>;
}
