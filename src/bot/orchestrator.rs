use anyhow::{anyhow, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use bigdecimal::BigDecimal;
use tokio::{
    sync::{mpsc, watch},
    task::{JoinError, JoinHandle, JoinSet},
};
use tracing::{debug, error, info, warn};

use crate::{
    alerts::{LogAlerter, OperatorAlert, WebhookAlerter},
    arbitrage::{
        detector::{ArbitrageDetector, DetectorSignal},
        executor::{ExecutionError, TriangleExecutor, TriangleReport},
    },
    bot::{context::TradingContext, scheduler::FORCED_TICKER_PRIORITY},
    config::{mask_secret, Config},
    exchange::{Exchange, MarketData, PaperExchange, PoloniexTicker},
    journal::{JournalEntry, MultiJournal, PgJournal, TracingJournal, TradeJournal},
};

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupted,
    TradeLimitReached,
    PlacementFailed,
}

type TradeResult = Result<Option<TriangleReport>, ExecutionError>;

pub struct ArbitrageBot {
    context: Arc<TradingContext>,
    detector: ArbitrageDetector,
    inbox: Mutex<Option<mpsc::Receiver<DetectorSignal>>>,
    shutdown: watch::Sender<bool>,
    journal_writers: Mutex<Vec<JoinHandle<()>>>,
}

impl ArbitrageBot {
    pub async fn new(config: Config) -> Result<Self> {
        info!("Initializing Triangle Arbitrage Trader");

        for account in config.accounts.all() {
            match &account.api_key {
                Some(key) => info!("Account {} uses key {}", account.name, mask_secret(key)),
                None => info!("Account {} has no credentials", account.name),
            }
        }

        // Public prices from the live exchange, orders against the paper book
        let market: Arc<dyn MarketData> = Arc::new(PoloniexTicker::new(&config.exchange)?);
        let exchange: Arc<dyn Exchange> = Arc::new(PaperExchange::from_config(market, &config.exchange)?);
        info!("Exchange initialized: {}", exchange.name());

        // Journal: always the log, plus Postgres when configured
        let mut journals: Vec<Arc<dyn TradeJournal>> = vec![Arc::new(TracingJournal)];
        let mut writers = Vec::new();
        if let Some(url) = &config.journal.database_url {
            let (journal, writer) = PgJournal::connect(url, config.journal.max_connections).await?;
            journals.push(Arc::new(journal));
            writers.push(writer);
        }
        let journal: Arc<dyn TradeJournal> = Arc::new(MultiJournal::new(journals));

        let alerts: Arc<dyn OperatorAlert> = match &config.alerts.webhook_url {
            Some(url) => Arc::new(WebhookAlerter::new(url.clone())?),
            None => Arc::new(LogAlerter),
        };

        let bot = Self::with_components(&config, exchange, journal, alerts)?;
        Ok(bot.with_journal_writers(writers))
    }

    pub fn with_components(
        config: &Config,
        exchange: Arc<dyn Exchange>,
        journal: Arc<dyn TradeJournal>,
        alerts: Arc<dyn OperatorAlert>,
    ) -> Result<Self> {
        let (context, inbox) = TradingContext::new(config, exchange, journal, alerts)?;
        let detector = ArbitrageDetector::new(context.markets.clone(), &context.settings);
        let (shutdown, _) = watch::channel(false);

        info!(
            "Trading triangle {} with threshold {}",
            context.markets.symbols().join(" / "),
            context.settings.profit_threshold
        );

        Ok(Self {
            context: Arc::new(context),
            detector,
            inbox: Mutex::new(Some(inbox)),
            shutdown,
            journal_writers: Mutex::new(Vec::new()),
        })
    }

    /// Background journal tasks that `run` waits on before returning.
    pub fn with_journal_writers(self, writers: Vec<JoinHandle<()>>) -> Self {
        self.journal_writers.lock().extend(writers);
        self
    }

    pub fn context(&self) -> &Arc<TradingContext> {
        &self.context
    }

    /// Loads balances and prices, starts the poller and runs the detector
    /// loop until interrupted, the trade limit is hit or a placement fails.
    pub async fn run(&self) -> Result<ShutdownReason> {
        let mut inbox = self
            .inbox
            .lock()
            .take()
            .ok_or_else(|| anyhow!("Bot is already running"))?;
        let ctx = &self.context;

        info!("Starting Triangle Arbitrage Trader");

        ctx.balances
            .refresh()
            .await
            .map_err(|e| anyhow!("Initial balance refresh failed: {}", e))?;
        ctx.poller
            .refresh_now(FORCED_TICKER_PRIORITY)
            .await
            .map_err(|e| anyhow!("Initial ticker fetch failed: {}", e))?;

        let zero = BigDecimal::from(0);
        for asset in ctx.markets.assets() {
            match ctx.balances.available(&asset) {
                Some(balance) if balance.available > zero => {}
                _ => warn!("No {} available; opportunities needing it will be skipped", asset),
            }
        }

        let mut prices: Vec<_> = ctx.prices.snapshot().into_values().collect();
        prices.sort_by(|a, b| a.pair.cmp(&b.pair));
        ctx.journal.record(JournalEntry::Initialized {
            at: Utc::now(),
            balances: ctx.balances.snapshot(),
            prices,
        });

        let mut shutdown = self.shutdown.subscribe();
        let poller = tokio::spawn(ctx.poller.clone().run(self.shutdown.subscribe()));
        let mut trades: JoinSet<TradeResult> = JoinSet::new();

        self.try_trade(&mut trades);

        let reason = loop {
            tokio::select! {
                signal = inbox.recv() => match signal {
                    Some(signal) => {
                        debug!("Detector woken by {:?}", signal);
                        self.try_trade(&mut trades);
                    }
                    None => break ShutdownReason::Interrupted,
                },
                Some(joined) = trades.join_next(), if !trades.is_empty() => {
                    if let Some(reason) = self.on_trade_finished(joined) {
                        break reason;
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Shutdown requested");
                    break ShutdownReason::Interrupted;
                }
            }
        };

        // No new trades; let the one in flight reach its outcome.
        ctx.gate.halt();
        if !trades.is_empty() {
            info!("Waiting for the triangle in flight to finish");
        }
        while let Some(joined) = trades.join_next().await {
            self.on_trade_finished(joined);
        }

        self.shutdown.send_replace(true);
        if let Err(e) = poller.await {
            error!("Ticker poller task failed: {}", e);
        }

        {
            let stats = ctx.stats.lock();
            info!("{}", stats.generate_report());
            match stats.export_json() {
                Ok(json) => debug!("Final trade stats: {}", json),
                Err(e) => warn!("{}", e),
            }
        }

        // Let queued journal entries reach storage before the process exits.
        ctx.journal.close();
        let writers = std::mem::take(&mut *self.journal_writers.lock());
        for writer in writers {
            if let Err(e) = writer.await {
                error!("Journal writer task failed: {}", e);
            }
        }

        info!("Triangle trader stopped: {:?}", reason);
        Ok(reason)
    }

    pub fn stop(&self) {
        info!("Stopping Triangle Arbitrage Trader");
        self.shutdown.send_replace(true);
    }

    fn try_trade(&self, trades: &mut JoinSet<TradeResult>) {
        let ctx = &self.context;
        let Some((opportunity, guard)) = self.detector.check(&ctx.gate, &ctx.prices) else {
            return;
        };

        let executor = TriangleExecutor::new(ctx.clone());
        trades.spawn(async move { executor.run(opportunity.direction, guard).await });
    }

    fn on_trade_finished(&self, joined: Result<TradeResult, JoinError>) -> Option<ShutdownReason> {
        match joined {
            Ok(Ok(None)) => None,
            Ok(Ok(Some(report))) => {
                debug!(
                    "Triangle {} finished: {:?} after {} retries",
                    report.triangle_id, report.outcome, report.retries
                );
                if report.trade_limit_reached {
                    return Some(ShutdownReason::TradeLimitReached);
                }
                None
            }
            Ok(Err(e)) => {
                error!("Fatal execution error: {}", e);
                Some(ShutdownReason::PlacementFailed)
            }
            Err(e) => {
                // The guard was dropped during unwinding, so the gate is free.
                warn!("Trade task ended abnormally: {}", e);
                None
            }
        }
    }
}
