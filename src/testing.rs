//! Test doubles shared by the unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;

use crate::{
    alerts::{Alert, OperatorAlert},
    arbitrage::detector::DetectorSignal,
    bot::{
        context::TradingContext,
        scheduler::{Scheduler, FORCED_TICKER_PRIORITY, PRIVATE_RATE_CLASS, PUBLIC_RATE_CLASS},
    },
    config::Config,
    exchange::{Exchange, MarketData, Ticker},
    journal::{JournalEntry, TradeJournal},
    types::{Balances, FilledTrade, OpenOrder, OpenOrders, Pair, PlacedOrder, PriceQuote, Side},
};

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn quote(pair: &str, bid: &str, ask: &str) -> PriceQuote {
    PriceQuote {
        pair: pair.to_string(),
        highest_bid: dec(bid),
        lowest_ask: dec(ask),
    }
}

/// Same lanes as the default account layout, with a generous private class.
pub fn test_scheduler() -> Scheduler {
    Scheduler::builder()
        .lane("private_0", 1)
        .lane("private_1", 1)
        .lane("private_2", 1)
        .lane("private_util", 1)
        .rate_class(PUBLIC_RATE_CLASS, 2, Duration::from_secs(1))
        .rate_class(PRIVATE_RATE_CLASS, 1000, Duration::from_secs(1))
        .build()
}

/// Market data whose quotes the test sets by hand.
pub struct StaticMarket {
    ticker: Mutex<Ticker>,
}

impl StaticMarket {
    pub fn new(quotes: Vec<PriceQuote>) -> Self {
        Self {
            ticker: Mutex::new(quotes.into_iter().map(|q| (q.pair.clone(), q)).collect()),
        }
    }

    pub fn set(&self, quote: PriceQuote) {
        self.ticker.lock().insert(quote.pair.clone(), quote);
    }
}

#[async_trait]
impl MarketData for StaticMarket {
    fn name(&self) -> &str {
        "Static"
    }

    async fn fetch_ticker(&self) -> Result<Ticker> {
        Ok(self.ticker.lock().clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRecord {
    pub order_id: String,
    pub account: String,
    pub pair: String,
    pub side: Side,
    pub price: BigDecimal,
    pub amount: BigDecimal,
}

#[derive(Default)]
struct Script {
    ticker: Ticker,
    balances: Balances,
    fail_ticker: bool,
    fail_balances: bool,
    fail_open_orders: bool,
    fail_placement: HashSet<String>,
    fill_from: HashMap<String, usize>,
    partial_fill: HashMap<String, BigDecimal>,
    cancel_fails: bool,
    clear_open_after: Option<usize>,
    attempts: HashMap<String, usize>,
    open: Vec<(String, String)>,
    placements: Vec<PlacementRecord>,
    cancels: Vec<(String, String)>,
    next_order_id: u64,
    ticker_calls: usize,
    balance_calls: usize,
    list_calls: usize,
}

/// Exchange whose behaviour each test scripts: which pairs fill on
/// placement, which placements fail, whether cancels succeed. Every call is
/// recorded.
#[derive(Default)]
pub struct ScriptedExchange {
    script: Mutex<Script>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quote(&self, quote: PriceQuote) {
        self.script.lock().ticker.insert(quote.pair.clone(), quote);
    }

    pub fn set_balances(&self, balances: &[(&str, &str)]) {
        self.script.lock().balances = balances
            .iter()
            .map(|(asset, amount)| (asset.to_string(), dec(amount)))
            .collect();
    }

    pub fn fail_ticker(&self, fail: bool) {
        self.script.lock().fail_ticker = fail;
    }

    pub fn fail_balances(&self, fail: bool) {
        self.script.lock().fail_balances = fail;
    }

    pub fn fail_open_orders(&self, fail: bool) {
        self.script.lock().fail_open_orders = fail;
    }

    pub fn fail_placement(&self, pair: &str) {
        self.script.lock().fail_placement.insert(pair.to_string());
    }

    /// Placements on `pair` fill immediately from the `attempt`-th one on
    /// (1-based). Pairs without a setting never fill on placement.
    pub fn fill_from(&self, pair: &str, attempt: usize) {
        self.script.lock().fill_from.insert(pair.to_string(), attempt);
    }

    /// The next placement on `pair` that does not fully fill reports a
    /// synchronous fill of `amount` and stays open for the rest.
    pub fn partial_fill(&self, pair: &str, amount: &str) {
        self.script.lock().partial_fill.insert(pair.to_string(), dec(amount));
    }

    pub fn cancel_fails(&self, fails: bool) {
        self.script.lock().cancel_fails = fails;
    }

    /// Every open order disappears (fills) on the `calls`-th open-order query.
    pub fn clear_open_after(&self, calls: usize) {
        self.script.lock().clear_open_after = Some(calls);
    }

    pub fn placements(&self) -> Vec<PlacementRecord> {
        self.script.lock().placements.clone()
    }

    pub fn placements_for(&self, pair: &str) -> Vec<PlacementRecord> {
        self.placements().into_iter().filter(|p| p.pair == pair).collect()
    }

    /// `(account, order_id)` of every cancel request.
    pub fn cancels(&self) -> Vec<(String, String)> {
        self.script.lock().cancels.clone()
    }

    pub fn open_order_ids(&self) -> Vec<String> {
        self.script.lock().open.iter().map(|(_, id)| id.clone()).collect()
    }

    pub fn ticker_calls(&self) -> usize {
        self.script.lock().ticker_calls
    }

    pub fn balance_calls(&self) -> usize {
        self.script.lock().balance_calls
    }

    pub fn list_calls(&self) -> usize {
        self.script.lock().list_calls
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn fetch_ticker(&self) -> Result<Ticker> {
        let mut script = self.script.lock();
        script.ticker_calls += 1;
        if script.fail_ticker {
            return Err(anyhow!("ticker unavailable"));
        }
        Ok(script.ticker.clone())
    }

    async fn place_order(
        &self,
        account: &str,
        pair: &Pair,
        side: Side,
        price: &BigDecimal,
        amount: &BigDecimal,
    ) -> Result<PlacedOrder> {
        let mut script = self.script.lock();
        let symbol = pair.symbol();

        let attempt = {
            let count = script.attempts.entry(symbol.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if script.fail_placement.contains(&symbol) {
            return Err(anyhow!("order on {} rejected", symbol));
        }

        script.next_order_id += 1;
        let order_id = script.next_order_id.to_string();

        script.placements.push(PlacementRecord {
            order_id: order_id.clone(),
            account: account.to_string(),
            pair: symbol.clone(),
            side,
            price: price.clone(),
            amount: amount.clone(),
        });

        let fills = script
            .fill_from
            .get(&symbol)
            .map_or(false, |from| attempt >= *from);

        if fills {
            return Ok(PlacedOrder {
                order_id,
                resulting_trades: vec![FilledTrade {
                    amount: amount.clone(),
                }],
            });
        }

        let resulting_trades = script
            .partial_fill
            .remove(&symbol)
            .map(|amount| vec![FilledTrade { amount }])
            .unwrap_or_default();

        script.open.push((symbol, order_id.clone()));
        Ok(PlacedOrder {
            order_id,
            resulting_trades,
        })
    }

    async fn cancel_order(&self, account: &str, order_id: &str) -> Result<bool> {
        let mut script = self.script.lock();
        script.cancels.push((account.to_string(), order_id.to_string()));

        if script.cancel_fails {
            return Ok(false);
        }

        let before = script.open.len();
        script.open.retain(|(_, id)| id != order_id);
        Ok(script.open.len() < before)
    }

    async fn list_open_orders(&self, _account: &str) -> Result<OpenOrders> {
        let mut script = self.script.lock();
        script.list_calls += 1;

        if script.fail_open_orders {
            return Err(anyhow!("open orders unavailable"));
        }
        if script.clear_open_after.map_or(false, |n| script.list_calls >= n) {
            script.open.clear();
        }

        let mut open = OpenOrders::new();
        for (symbol, order_id) in &script.open {
            open.entry(symbol.clone()).or_insert_with(Vec::new).push(OpenOrder {
                order_id: order_id.clone(),
            });
        }
        Ok(open)
    }

    async fn fetch_balances(&self, _account: &str) -> Result<Balances> {
        let mut script = self.script.lock();
        script.balance_calls += 1;
        if script.fail_balances {
            return Err(anyhow!("balances unavailable"));
        }
        Ok(script.balances.clone())
    }
}

#[derive(Default)]
pub struct RecordingJournal {
    entries: Mutex<Vec<JournalEntry>>,
    closed: AtomicBool,
}

impl RecordingJournal {
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.entries.lock().iter().map(|e| e.kind()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TradeJournal for RecordingJournal {
    fn record(&self, entry: JournalEntry) {
        self.entries.lock().push(entry);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerter {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }
}

impl OperatorAlert for RecordingAlerter {
    fn escalate(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

/// Profitable clockwise book (ETH_BCH ask 0.170) with funded balances.
pub fn scenario_exchange() -> Arc<ScriptedExchange> {
    let exchange = Arc::new(ScriptedExchange::new());
    exchange.set_quote(quote("BTC_ETH", "0.074", "0.0741"));
    exchange.set_quote(quote("BTC_BCH", "0.0131", "0.0132"));
    exchange.set_quote(quote("ETH_BCH", "0.177", "0.170"));
    exchange.set_balances(&[("BTC", "1"), ("ETH", "10"), ("BCH", "50")]);
    exchange
}

pub struct Harness {
    pub context: Arc<TradingContext>,
    pub exchange: Arc<ScriptedExchange>,
    pub journal: Arc<RecordingJournal>,
    pub alerts: Arc<RecordingAlerter>,
    pub inbox: mpsc::Receiver<DetectorSignal>,
}

/// A context over `exchange` with balances and prices already loaded.
pub async fn harness(config: Config, exchange: Arc<ScriptedExchange>) -> Harness {
    let journal = Arc::new(RecordingJournal::default());
    let alerts = Arc::new(RecordingAlerter::default());

    let (context, inbox) =
        TradingContext::new(&config, exchange.clone(), journal.clone(), alerts.clone()).unwrap();
    context.balances.refresh().await.unwrap();
    context.poller.refresh_now(FORCED_TICKER_PRIORITY).await.unwrap();

    Harness {
        context: Arc::new(context),
        exchange,
        journal,
        alerts,
        inbox,
    }
}
