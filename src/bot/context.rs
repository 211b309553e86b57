use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{
    alerts::OperatorAlert,
    arbitrage::detector::DetectorSignal,
    bot::{gate::TradeGate, metrics::TradeStats, scheduler::Scheduler},
    config::{Config, TradeSettings},
    exchange::Exchange,
    journal::TradeJournal,
    market::{BalanceTracker, PriceCache, TickerPoller},
    types::TriangleMarkets,
};

/// Everything a trade needs, shared between the detector loop, the poller
/// and executor tasks.
pub struct TradingContext {
    pub settings: TradeSettings,
    pub markets: TriangleMarkets,
    pub utility_account: String,
    pub scheduler: Scheduler,
    pub exchange: Arc<dyn Exchange>,
    pub prices: Arc<PriceCache>,
    pub balances: Arc<BalanceTracker>,
    pub poller: Arc<TickerPoller>,
    pub gate: TradeGate,
    pub stats: Arc<Mutex<TradeStats>>,
    pub journal: Arc<dyn TradeJournal>,
    pub alerts: Arc<dyn OperatorAlert>,
    pub signals: mpsc::Sender<DetectorSignal>,
}

impl TradingContext {
    /// Builds the shared components. The returned receiver is the detector
    /// loop's signal inbox; it holds at most one pending signal.
    pub fn new(
        config: &Config,
        exchange: Arc<dyn Exchange>,
        journal: Arc<dyn TradeJournal>,
        alerts: Arc<dyn OperatorAlert>,
    ) -> Result<(Self, mpsc::Receiver<DetectorSignal>)> {
        let settings = TradeSettings::from_config(config)?;
        let markets = config.markets();
        let utility_account = config.accounts.utility.name.clone();

        let scheduler = Scheduler::from_config(
            &config.scheduler,
            config.accounts.all().iter().map(|account| account.name.as_str()),
        );

        let (signals, inbox) = mpsc::channel(1);
        let gate = TradeGate::new();
        let prices = Arc::new(PriceCache::new());

        let balances = Arc::new(BalanceTracker::new(
            scheduler.clone(),
            exchange.clone(),
            utility_account.clone(),
            markets.assets(),
        ));

        let poller = Arc::new(TickerPoller::new(
            scheduler.clone(),
            exchange.clone(),
            prices.clone(),
            gate.clone(),
            markets.symbols(),
            signals.clone(),
        ));

        let context = Self {
            settings,
            markets,
            utility_account,
            scheduler,
            exchange,
            prices,
            balances,
            poller,
            gate,
            stats: Arc::new(Mutex::new(TradeStats::new())),
            journal,
            alerts,
            signals,
        };

        Ok((context, inbox))
    }
}
