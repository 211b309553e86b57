use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    watch,
};
use tracing::{debug, info, warn};

use crate::{
    arbitrage::detector::DetectorSignal,
    bot::{
        gate::TradeGate,
        scheduler::{Scheduler, SchedulerTask, DEFAULT_PRIORITY, PUBLIC_RATE_CLASS, TICKER_LANE},
    },
    exchange::Exchange,
    market::PriceCache,
};

/// Keeps the price cache fresh and tells the detector when it moved.
pub struct TickerPoller {
    scheduler: Scheduler,
    exchange: Arc<dyn Exchange>,
    prices: Arc<PriceCache>,
    gate: TradeGate,
    symbols: [String; 3],
    signals: mpsc::Sender<DetectorSignal>,
}

impl TickerPoller {
    pub fn new(
        scheduler: Scheduler,
        exchange: Arc<dyn Exchange>,
        prices: Arc<PriceCache>,
        gate: TradeGate,
        symbols: [String; 3],
        signals: mpsc::Sender<DetectorSignal>,
    ) -> Self {
        Self {
            scheduler,
            exchange,
            prices,
            gate,
            symbols,
            signals,
        }
    }

    /// One ticker fetch at `priority`. Returns whether any tracked quote
    /// changed; a change raises `PricesChanged`.
    pub async fn poll_once(&self, priority: u8) -> Result<bool> {
        let task = SchedulerTask::new(TICKER_LANE, priority, PUBLIC_RATE_CLASS);
        let ticker = self
            .scheduler
            .submit(task, || self.exchange.fetch_ticker())
            .await?;

        let mut changed = false;
        for symbol in &self.symbols {
            match ticker.get(symbol) {
                Some(quote) => changed |= self.prices.update(quote.clone()),
                None => warn!("Ticker response has no quote for {}", symbol),
            }
        }

        if changed {
            debug!("Tracked prices changed");
            self.signal(DetectorSignal::PricesChanged);
        }
        Ok(changed)
    }

    /// Single fetch outside the polling loop, used at start-up and between
    /// retry rounds.
    pub async fn refresh_now(&self, priority: u8) -> Result<bool> {
        self.poll_once(priority).await
    }

    /// Fetches back to back while no trade is in progress, parking on the
    /// gate otherwise. Returns once `shutdown` turns true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Ticker poller started for {}", self.symbols.join(", "));

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            if self.gate.is_busy() {
                debug!("Trade in progress, ticker poller parked");
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = self.gate.wait_idle() => {}
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                result = self.poll_once(DEFAULT_PRIORITY) => {
                    if let Err(e) = result {
                        warn!("Ticker fetch failed: {}", e);
                    }
                }
            }
        }

        info!("Ticker poller stopped");
    }

    fn signal(&self, signal: DetectorSignal) {
        match self.signals.try_send(signal) {
            // A pending signal already covers this one.
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => debug!("Detector gone, dropping {:?}", signal),
        }
    }
}
