use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use parking_lot::Mutex;
use std::{str::FromStr, sync::Arc};
use tracing::{debug, info};

use crate::{
    config::ExchangeConfig,
    exchange::traits::{Exchange, MarketData, Ticker},
    types::{Balances, FilledTrade, OpenOrder, OpenOrders, Pair, PlacedOrder, Side},
};

/// In-memory exchange for dry runs. Quotes come from a real `MarketData`
/// source; orders that cross the last seen book fill at their limit price,
/// the rest wait for a later ticker to cross them. All credential sets share
/// one balance sheet, as sub-keys of a single exchange account would.
pub struct PaperExchange {
    market: Arc<dyn MarketData>,
    state: Mutex<PaperBook>,
}

struct PaperBook {
    balances: Balances,
    book: Ticker,
    resting: Vec<RestingOrder>,
    next_order_id: u64,
}

#[derive(Debug, Clone)]
struct RestingOrder {
    order_id: String,
    pair: Pair,
    side: Side,
    price: BigDecimal,
    amount: BigDecimal,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn MarketData>, balances: Balances) -> Self {
        Self {
            market,
            state: Mutex::new(PaperBook {
                balances,
                book: Ticker::new(),
                resting: Vec::new(),
                next_order_id: 1,
            }),
        }
    }

    pub fn from_config(market: Arc<dyn MarketData>, config: &ExchangeConfig) -> Result<Self> {
        let mut balances = Balances::new();
        for (asset, amount) in &config.paper_balances {
            let amount = BigDecimal::from_str(amount)
                .map_err(|e| anyhow!("Invalid paper balance for {}: {}", asset, e))?;
            balances.insert(asset.to_uppercase(), amount);
        }

        info!(
            "Paper exchange backed by {} market data with {} funded assets",
            market.name(),
            balances.len()
        );
        Ok(Self::new(market, balances))
    }
}

impl PaperBook {
    fn available(&self, asset: &str) -> BigDecimal {
        self.balances
            .get(asset)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0))
    }

    fn adjust(&mut self, asset: &str, delta: BigDecimal) {
        let entry = self
            .balances
            .entry(asset.to_string())
            .or_insert_with(|| BigDecimal::from(0));
        *entry += delta;
    }

    /// Takes the funds an order spends out of the available balance.
    fn reserve(&mut self, pair: &Pair, side: Side, price: &BigDecimal, amount: &BigDecimal) -> Result<()> {
        let (asset, cost) = match side {
            Side::Buy => (&pair.quote_asset, price * amount),
            Side::Sell => (&pair.base_asset, amount.clone()),
        };

        let available = self.available(asset);
        if cost > available {
            return Err(anyhow!(
                "Insufficient {} balance: need {}, have {}",
                asset,
                cost,
                available
            ));
        }

        self.adjust(asset, -cost);
        Ok(())
    }

    fn release(&mut self, order: &RestingOrder) {
        match order.side {
            Side::Buy => self.adjust(&order.pair.quote_asset, &order.price * &order.amount),
            Side::Sell => self.adjust(&order.pair.base_asset, order.amount.clone()),
        }
    }

    /// Credits the proceeds of a fill whose funds were already reserved.
    fn credit(&mut self, pair: &Pair, side: Side, price: &BigDecimal, amount: &BigDecimal) {
        match side {
            Side::Buy => self.adjust(&pair.base_asset, amount.clone()),
            Side::Sell => self.adjust(&pair.quote_asset, price * amount),
        }
    }

    fn crosses(&self, pair: &Pair, side: Side, price: &BigDecimal) -> bool {
        match self.book.get(&pair.symbol()) {
            Some(quote) => match side {
                Side::Buy => *price >= quote.lowest_ask,
                Side::Sell => *price <= quote.highest_bid,
            },
            None => false,
        }
    }

    fn match_resting(&mut self) {
        let resting = std::mem::take(&mut self.resting);
        for order in resting {
            if self.crosses(&order.pair, order.side, &order.price) {
                debug!("Paper fill of resting order {} on {}", order.order_id, order.pair);
                self.credit(&order.pair, order.side, &order.price, &order.amount);
            } else {
                self.resting.push(order);
            }
        }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        "Paper"
    }

    async fn fetch_ticker(&self) -> Result<Ticker> {
        let ticker = self.market.fetch_ticker().await?;

        let mut state = self.state.lock();
        state.book = ticker.clone();
        state.match_resting();
        Ok(ticker)
    }

    async fn place_order(
        &self,
        account: &str,
        pair: &Pair,
        side: Side,
        price: &BigDecimal,
        amount: &BigDecimal,
    ) -> Result<PlacedOrder> {
        if *amount <= BigDecimal::from(0) || *price <= BigDecimal::from(0) {
            return Err(anyhow!("Invalid order: {} {} @ {}", amount, pair, price));
        }

        let mut state = self.state.lock();
        state.reserve(pair, side, price, amount)?;

        let order_id = state.next_order_id.to_string();
        state.next_order_id += 1;

        if state.crosses(pair, side, price) {
            state.credit(pair, side, price, amount);
            debug!("Paper order {} from {} filled on placement", order_id, account);
            return Ok(PlacedOrder {
                order_id,
                resulting_trades: vec![FilledTrade {
                    amount: amount.clone(),
                }],
            });
        }

        state.resting.push(RestingOrder {
            order_id: order_id.clone(),
            pair: pair.clone(),
            side,
            price: price.clone(),
            amount: amount.clone(),
        });
        debug!("Paper order {} from {} resting on {}", order_id, account, pair);

        Ok(PlacedOrder {
            order_id,
            resulting_trades: Vec::new(),
        })
    }

    async fn cancel_order(&self, _account: &str, order_id: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let position = state.resting.iter().position(|o| o.order_id == order_id);

        match position {
            Some(index) => {
                let order = state.resting.remove(index);
                state.release(&order);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_open_orders(&self, _account: &str) -> Result<OpenOrders> {
        let state = self.state.lock();
        let mut open = OpenOrders::new();
        for order in &state.resting {
            open.entry(order.pair.symbol())
                .or_insert_with(Vec::new)
                .push(OpenOrder {
                    order_id: order.order_id.clone(),
                });
        }
        Ok(open)
    }

    async fn fetch_balances(&self, _account: &str) -> Result<Balances> {
        Ok(self.state.lock().balances.clone())
    }
}
