use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::Utc;
use std::{collections::HashSet, fmt, sync::Arc};
use thiserror::Error;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    alerts::Alert,
    arbitrage::{calculator::TradeSizer, detector::DetectorSignal},
    bot::{
        context::TradingContext,
        gate::TradeGuard,
        metrics::TradeOutcome,
        scheduler::{
            SchedulerTask, DEFAULT_PRIORITY, FORCED_TICKER_PRIORITY, ORDER_PRIORITY,
            PRIVATE_RATE_CLASS,
        },
    },
    journal::JournalEntry,
    types::{Direction, Market, Order, Side, TradeLeg},
};

/// Why a triangle ended without all three legs filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    CancellationFailed,
    RetriesExhausted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::CancellationFailed => write!(f, "all cancellations failed"),
            FailureReason::RetriesExhausted => write!(f, "retry rounds exhausted"),
        }
    }
}

/// Errors that stop the bot rather than end a single triangle.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("placement failed for triangle {triangle_id}: {reason}")]
    PlacementFailed {
        triangle_id: Uuid,
        reason: String,
        accepted: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct TriangleReport {
    pub triangle_id: Uuid,
    pub direction: Direction,
    pub outcome: TradeOutcome,
    pub failure: Option<FailureReason>,
    pub orders: Vec<Order>,
    pub retries: u64,
    pub trade_limit_reached: bool,
}

struct LegSlot {
    market: Market,
    side: Side,
    order: Option<Order>,
    filled: bool,
    /// Unfilled part of the last cancelled order; caps its replacement.
    remaining: Option<BigDecimal>,
}

/// The single triangle being worked on. Owned by one executor run.
struct TriangleRun {
    id: Uuid,
    direction: Direction,
    slots: Vec<LegSlot>,
    retries: u64,
}

impl TriangleRun {
    fn all_filled(&self) -> bool {
        self.slots.iter().all(|slot| slot.filled)
    }

    /// Placed legs whose order is no longer open have filled.
    fn mark_fills(&mut self, open: &HashSet<String>) {
        for slot in self.slots.iter_mut().filter(|slot| !slot.filled) {
            if let Some(order) = &slot.order {
                if !open.contains(&order.id) {
                    debug!("Order {} on {} no longer open, filled", order.id, order.leg.pair);
                    slot.filled = true;
                }
            }
        }
    }

    fn order_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter_map(|slot| slot.order.as_ref().map(|order| order.id.clone()))
            .collect()
    }

    fn unfilled_order_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|slot| !slot.filled)
            .filter_map(|slot| slot.order.as_ref().map(|order| order.id.clone()))
            .collect()
    }

    fn orders(&self) -> Vec<Order> {
        self.slots.iter().filter_map(|slot| slot.order.clone()).collect()
    }
}

/// Drives one triangle from sizing to a definite outcome.
pub struct TriangleExecutor {
    context: Arc<TradingContext>,
    sizer: TradeSizer,
}

impl TriangleExecutor {
    pub fn new(context: Arc<TradingContext>) -> Self {
        let sizer = TradeSizer::new(&context.settings);
        Self { context, sizer }
    }

    /// Runs the triangle while holding `guard`. Returns `None` when the legs
    /// cannot be sized: nothing is placed and no triangle is counted. A failed
    /// initial placement halts the gate and returns an error so the bot can
    /// stop. Every other path ends in a finalized report.
    pub async fn run(
        &self,
        direction: Direction,
        guard: TradeGuard,
    ) -> Result<Option<TriangleReport>, ExecutionError> {
        let ctx = &self.context;

        let balances = ctx.balances.snapshot();
        let legs = match self
            .sizer
            .size_triangle(&ctx.markets, direction, &ctx.prices, &balances)
        {
            Ok(legs) => legs,
            Err(e) => {
                self.skip(direction, e.to_string(), guard).await;
                return Ok(None);
            }
        };

        let triangle_id = Uuid::new_v4();
        info!(%triangle_id, "Starting {} triangle", direction);

        let markets = ctx.markets.markets();
        let sides = ctx.markets.sides(direction);
        let mut run = TriangleRun {
            id: triangle_id,
            direction,
            slots: markets
                .iter()
                .zip(sides)
                .map(|(market, side)| LegSlot {
                    market: (*market).clone(),
                    side,
                    order: None,
                    filled: false,
                    remaining: None,
                })
                .collect(),
            retries: 0,
        };

        ctx.journal.record(JournalEntry::TriangleStarted {
            at: Utc::now(),
            triangle_id,
            direction,
            legs: legs.to_vec(),
        });

        // Placing: all three at once, one per account lane.
        let [first, second, third] = &legs;
        let (first, second, third) =
            tokio::join!(self.place(first), self.place(second), self.place(third));

        let mut failures = Vec::new();
        for (slot, result) in run.slots.iter_mut().zip([first, second, third]) {
            match result {
                Ok(order) => {
                    info!(%triangle_id, "Placed order {}: {}", order.id, order.leg);
                    ctx.journal.record(JournalEntry::OrderPlaced {
                        at: Utc::now(),
                        triangle_id,
                        order: order.clone(),
                        retry: false,
                    });
                    slot.order = Some(order);
                }
                Err(e) => failures.push(format!("{}: {}", slot.market.pair, e)),
            }
        }

        if !failures.is_empty() {
            return Err(self.abort_on_placement(run, failures, guard));
        }

        // Immediate check
        let tolerance = &ctx.settings.fill_tolerance;
        for slot in &mut run.slots {
            slot.filled = slot
                .order
                .as_ref()
                .map_or(false, |order| order.is_filled(tolerance));
        }

        let failure = if run.all_filled() {
            info!(%triangle_id, "All legs filled on placement");
            None
        } else if self.await_fills(&mut run).await {
            None
        } else {
            self.cancel_and_retry(&mut run).await.err()
        };

        Ok(Some(self.finalize(run, failure, guard).await))
    }

    /// Gives the opportunity up before any order exists. The detector is not
    /// re-armed; the next price change does that.
    async fn skip(&self, direction: Direction, reason: String, guard: TradeGuard) {
        let ctx = &self.context;
        warn!("Skipping {} opportunity, cannot size legs: {}", direction, reason);

        ctx.journal.record(JournalEntry::TriangleSkipped {
            at: Utc::now(),
            direction,
            reason,
        });

        // Picks up deposits made outside the bot.
        if let Err(e) = ctx.balances.refresh().await {
            warn!("Balance refresh after skipped opportunity failed: {}", e);
        }
        drop(guard);
    }

    async fn place(&self, leg: &TradeLeg) -> Result<Order> {
        let ctx = &self.context;
        let task = SchedulerTask::new(&leg.account, ORDER_PRIORITY, PRIVATE_RATE_CLASS);
        let placed = ctx
            .scheduler
            .submit(task, || {
                ctx.exchange
                    .place_order(&leg.account, &leg.pair, leg.side, &leg.price, &leg.amount)
            })
            .await?;

        Ok(Order::new(leg.clone(), placed))
    }

    async fn cancel(&self, order_id: &str) -> Result<bool> {
        let ctx = &self.context;
        let task = SchedulerTask::new(&ctx.utility_account, DEFAULT_PRIORITY, PRIVATE_RATE_CLASS);
        ctx.scheduler
            .submit(task, || ctx.exchange.cancel_order(&ctx.utility_account, order_id))
            .await
    }

    async fn open_order_ids(&self) -> Result<HashSet<String>> {
        let ctx = &self.context;
        let task = SchedulerTask::new(&ctx.utility_account, DEFAULT_PRIORITY, PRIVATE_RATE_CLASS);
        let open = ctx
            .scheduler
            .submit(task, || ctx.exchange.list_open_orders(&ctx.utility_account))
            .await?;

        Ok(open
            .into_values()
            .flatten()
            .map(|order| order.order_id)
            .collect())
    }

    /// Rechecks open orders on a fixed interval until every leg has filled
    /// or the fill timeout passes.
    async fn await_fills(&self, run: &mut TriangleRun) -> bool {
        let settings = &self.context.settings;
        let deadline = Instant::now() + settings.fill_timeout;

        loop {
            match self.open_order_ids().await {
                Ok(open) => {
                    run.mark_fills(&open);
                    if run.all_filled() {
                        info!(triangle_id = %run.id, "All legs filled");
                        return true;
                    }
                }
                Err(e) => warn!(triangle_id = %run.id, "Open-order query failed: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep_until((now + settings.fill_poll_interval).min(deadline)).await;
        }
    }

    /// Cancels legs still resting, re-places them at fresh prices and waits.
    /// Filled legs are never touched.
    async fn cancel_and_retry(&self, run: &mut TriangleRun) -> Result<(), FailureReason> {
        let ctx = &self.context;
        let settings = &ctx.settings;
        let triangle_id = run.id;

        for round in 1..=settings.max_retry_rounds {
            let open = match self.open_order_ids().await {
                Ok(open) => open,
                Err(e) => {
                    warn!(%triangle_id, round, "Open-order query failed: {}", e);
                    sleep(settings.retry_backoff).await;
                    continue;
                }
            };

            run.mark_fills(&open);
            if run.all_filled() {
                info!(%triangle_id, round, "All legs filled");
                return Ok(());
            }

            // Unplaced legs skip straight to the retry below.
            let mut requested = Vec::new();
            let mut cancelled = 0;
            for slot in run.slots.iter_mut().filter(|slot| !slot.filled) {
                let Some((order_id, unfilled)) = slot
                    .order
                    .as_ref()
                    .map(|order| (order.id.clone(), &order.leg.amount - &order.filled_amount))
                else {
                    continue;
                };

                requested.push(order_id.clone());
                match self.cancel(&order_id).await {
                    Ok(true) => {
                        info!(%triangle_id, round, "Cancelled order {} on {}", order_id, slot.market.pair);
                        slot.order = None;
                        slot.remaining = Some(unfilled);
                        cancelled += 1;
                    }
                    Ok(false) => warn!(%triangle_id, "Exchange refused to cancel order {}", order_id),
                    Err(e) => warn!(%triangle_id, "Cancel of order {} failed: {}", order_id, e),
                }
            }

            if !requested.is_empty() && cancelled == 0 {
                error!(%triangle_id, "Every cancellation failed, giving up on triangle");
                self.escalate(
                    triangle_id,
                    format!("All {} cancellations failed; orders may still be open", requested.len()),
                    requested,
                );
                return Err(FailureReason::CancellationFailed);
            }

            if let Err(e) = ctx.poller.refresh_now(FORCED_TICKER_PRIORITY).await {
                warn!(%triangle_id, "Forced ticker refresh failed, retrying on cached prices: {}", e);
            }

            if let Err(e) = ctx.balances.refresh().await {
                warn!(%triangle_id, "Balance refresh before retry failed: {}", e);
            }

            let balances = ctx.balances.snapshot();
            for slot in run.slots.iter_mut().filter(|slot| !slot.filled && slot.order.is_none()) {
                let quote = ctx.prices.quote(&slot.market.pair.symbol());
                let leg = match self.sizer.size_retry(
                    &slot.market,
                    slot.side,
                    quote.as_ref(),
                    &balances,
                    slot.remaining.as_ref(),
                ) {
                    Ok(leg) => leg,
                    Err(e) => {
                        warn!(%triangle_id, "Cannot resize {} leg: {}", slot.market.pair, e);
                        continue;
                    }
                };

                match self.place(&leg).await {
                    Ok(order) => {
                        info!(%triangle_id, round, "Retry order {}: {}", order.id, order.leg);
                        ctx.journal.record(JournalEntry::OrderPlaced {
                            at: Utc::now(),
                            triangle_id,
                            order: order.clone(),
                            retry: true,
                        });
                        run.retries += 1;
                        slot.filled = order.is_filled(&settings.fill_tolerance);
                        slot.order = Some(order);
                    }
                    Err(e) => warn!(%triangle_id, "Retry placement on {} failed: {}", slot.market.pair, e),
                }
            }

            if run.all_filled() {
                info!(%triangle_id, round, "All legs filled on retry");
                return Ok(());
            }

            sleep(settings.retry_backoff).await;
        }

        match self.open_order_ids().await {
            Ok(open) => run.mark_fills(&open),
            Err(e) => warn!(%triangle_id, "Final open-order query failed: {}", e),
        }
        if run.all_filled() {
            return Ok(());
        }

        error!(%triangle_id, "Legs still unfilled after {} retry rounds", settings.max_retry_rounds);
        self.escalate(
            triangle_id,
            format!("Legs unfilled after {} retry rounds", settings.max_retry_rounds),
            run.unfilled_order_ids(),
        );
        Err(FailureReason::RetriesExhausted)
    }

    fn abort_on_placement(
        &self,
        run: TriangleRun,
        failures: Vec<String>,
        mut guard: TradeGuard,
    ) -> ExecutionError {
        let reason = failures.join("; ");
        let accepted = run.order_ids();

        error!(triangle_id = %run.id, "Order placement failed, halting: {}", reason);
        guard.halt();

        self.escalate(
            run.id,
            format!("Placement failed ({}); accepted orders may be resting", reason),
            accepted.clone(),
        );
        self.record_completion(&run, TradeOutcome::Failure, Some(format!("placement failed: {}", reason)));

        drop(guard);
        ExecutionError::PlacementFailed {
            triangle_id: run.id,
            reason,
            accepted,
        }
    }

    async fn finalize(
        &self,
        run: TriangleRun,
        failure: Option<FailureReason>,
        mut guard: TradeGuard,
    ) -> TriangleReport {
        let ctx = &self.context;

        if let Err(e) = ctx.balances.refresh().await {
            warn!(triangle_id = %run.id, "Balance refresh after triangle failed: {}", e);
        }

        let outcome = match failure {
            None => TradeOutcome::Success,
            Some(_) => TradeOutcome::Failure,
        };
        let attempted = self.record_completion(&run, outcome, failure.map(|f| f.to_string()));

        let trade_limit_reached = ctx.settings.max_trades.map_or(false, |max| attempted >= max);
        if trade_limit_reached {
            info!("Trade limit of {} reached, no further triangles", attempted);
            guard.halt();
        }
        drop(guard);

        if ctx.signals.try_send(DetectorSignal::Reevaluate).is_err() {
            debug!("Detector already has a pending signal");
        }

        TriangleReport {
            triangle_id: run.id,
            direction: run.direction,
            outcome,
            failure,
            orders: run.orders(),
            retries: run.retries,
            trade_limit_reached,
        }
    }

    /// Counts the triangle and journals its completion. Returns the new
    /// attempted total.
    fn record_completion(&self, run: &TriangleRun, outcome: TradeOutcome, reason: Option<String>) -> u64 {
        let ctx = &self.context;
        let (attempted, successful, unsuccessful) = {
            let mut stats = ctx.stats.lock();
            stats.record(run.direction, outcome, run.retries);
            (stats.attempted, stats.successful, stats.unsuccessful)
        };

        match &reason {
            None => info!(
                triangle_id = %run.id,
                "Triangle succeeded ({} successful / {} unsuccessful)", successful, unsuccessful
            ),
            Some(reason) => warn!(
                triangle_id = %run.id,
                "Triangle failed: {} ({} successful / {} unsuccessful)", reason, successful, unsuccessful
            ),
        }

        ctx.journal.record(JournalEntry::Completed {
            at: Utc::now(),
            triangle_id: run.id,
            direction: run.direction,
            outcome,
            reason,
            orders: run.orders(),
            retries: run.retries,
            attempted,
            successful,
            unsuccessful,
        });

        attempted
    }

    fn escalate(&self, triangle_id: Uuid, reason: String, order_ids: Vec<String>) {
        let alert = Alert::new(Some(triangle_id), reason, order_ids);
        self.context.journal.record(JournalEntry::Escalation {
            at: Utc::now(),
            alert: alert.clone(),
        });
        self.context.alerts.escalate(alert);
    }
}
