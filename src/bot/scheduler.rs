use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, VecDeque},
    future::Future,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::oneshot,
    time::{sleep, Instant},
};
use tracing::{debug, trace};

use crate::config::SchedulerConfig;

pub const DEFAULT_PRIORITY: u8 = 5;
pub const FORCED_TICKER_PRIORITY: u8 = 10;
pub const ORDER_PRIORITY: u8 = 11;

pub const TICKER_LANE: &str = "ticker";
pub const PUBLIC_RATE_CLASS: &str = "public";
pub const PRIVATE_RATE_CLASS: &str = "private";

/// Where and how a unit of work runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerTask {
    pub lane: String,
    pub priority: u8,
    pub rate_class: String,
}

impl SchedulerTask {
    pub fn new(lane: impl Into<String>, priority: u8, rate_class: impl Into<String>) -> Self {
        Self {
            lane: lane.into(),
            priority,
            rate_class: rate_class.into(),
        }
    }
}

/// Task queue that every exchange call passes through.
///
/// Lanes bound how many tasks run at once (one per account for
/// authenticated calls); pending tasks in a lane start highest priority
/// first, FIFO among equals. Rate classes cap how many tasks start within a
/// sliding interval, across all lanes. Lanes that were never configured
/// have no concurrency bound.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    lanes: Mutex<HashMap<String, LaneState>>,
    rate_classes: HashMap<String, RateWindow>,
}

struct LaneState {
    limit: Option<usize>,
    in_flight: usize,
    pending: BinaryHeap<Waiter>,
    next_seq: u64,
}

impl LaneState {
    fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            in_flight: 0,
            pending: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn has_capacity(&self) -> bool {
        self.limit.map_or(true, |limit| self.in_flight < limit)
    }
}

struct Waiter {
    priority: u8,
    seq: u64,
    grant: oneshot::Sender<LanePermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority wins, then the earlier submission.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A running slot in a lane. Dropping it hands the slot to the next waiter,
/// so a task that is cancelled mid-flight never leaks its lane.
pub struct LanePermit {
    inner: Arc<Inner>,
    lane: String,
}

impl Drop for LanePermit {
    fn drop(&mut self) {
        self.inner.release(&self.lane);
    }
}

struct RateWindow {
    max_calls: usize,
    interval: Duration,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateWindow {
    fn new(max_calls: usize, interval: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            interval,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until starting one more call keeps the window within bounds.
    async fn acquire(&self) {
        loop {
            let wait = {
                let mut starts = self.starts.lock();
                let now = Instant::now();
                while let Some(oldest) = starts.front() {
                    if now.duration_since(*oldest) >= self.interval {
                        starts.pop_front();
                    } else {
                        break;
                    }
                }

                if starts.len() < self.max_calls {
                    starts.push_back(now);
                    return;
                }

                match starts.front() {
                    Some(oldest) => self.interval - now.duration_since(*oldest),
                    None => Duration::ZERO,
                }
            };

            trace!("Rate window full, waiting {:?}", wait);
            sleep(wait).await;
        }
    }
}

pub struct SchedulerBuilder {
    lanes: HashMap<String, LaneState>,
    rate_classes: HashMap<String, RateWindow>,
}

impl SchedulerBuilder {
    pub fn lane(mut self, name: impl Into<String>, concurrency: usize) -> Self {
        self.lanes
            .insert(name.into(), LaneState::new(Some(concurrency.max(1))));
        self
    }

    pub fn rate_class(mut self, name: impl Into<String>, max_calls: usize, interval: Duration) -> Self {
        self.rate_classes
            .insert(name.into(), RateWindow::new(max_calls, interval));
        self
    }

    pub fn build(self) -> Scheduler {
        Scheduler {
            inner: Arc::new(Inner {
                lanes: Mutex::new(self.lanes),
                rate_classes: self.rate_classes,
            }),
        }
    }
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder {
            lanes: HashMap::new(),
            rate_classes: HashMap::new(),
        }
    }

    /// One serialized lane per account, plus the public and private rate
    /// classes. The ticker lane stays unbounded.
    pub fn from_config<'a>(
        config: &SchedulerConfig,
        accounts: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut builder = Self::builder()
            .rate_class(PUBLIC_RATE_CLASS, config.public.max_calls, config.public.interval())
            .rate_class(PRIVATE_RATE_CLASS, config.private.max_calls, config.private.interval());

        for account in accounts {
            builder = builder.lane(account, 1);
        }

        builder.build()
    }

    /// Runs `action` once its lane has room and its rate class allows
    /// another start. The action's error is returned as is.
    pub async fn submit<T, F, Fut>(&self, task: SchedulerTask, action: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let window = self
            .inner
            .rate_classes
            .get(&task.rate_class)
            .ok_or_else(|| anyhow!("Unknown rate class: {}", task.rate_class))?;

        let _permit = self.acquire_lane(&task).await?;
        window.acquire().await;

        trace!(lane = %task.lane, priority = task.priority, "Running scheduled task");
        action().await
    }

    /// Tasks waiting for a slot in `lane`.
    pub fn queued(&self, lane: &str) -> usize {
        self.inner
            .lanes
            .lock()
            .get(lane)
            .map_or(0, |state| state.pending.len())
    }

    /// Tasks currently holding a slot in `lane`.
    pub fn in_flight(&self, lane: &str) -> usize {
        self.inner
            .lanes
            .lock()
            .get(lane)
            .map_or(0, |state| state.in_flight)
    }

    async fn acquire_lane(&self, task: &SchedulerTask) -> Result<LanePermit> {
        let receiver = {
            let mut lanes = self.inner.lanes.lock();
            let state = lanes
                .entry(task.lane.clone())
                .or_insert_with(|| LaneState::new(None));

            if state.has_capacity() && state.pending.is_empty() {
                state.in_flight += 1;
                return Ok(LanePermit {
                    inner: self.inner.clone(),
                    lane: task.lane.clone(),
                });
            }

            let (grant, receiver) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(Waiter {
                priority: task.priority,
                seq,
                grant,
            });

            debug!(
                lane = %task.lane,
                priority = task.priority,
                queued = state.pending.len(),
                "Task queued behind busy lane"
            );
            receiver
        };

        receiver
            .await
            .map_err(|_| anyhow!("Scheduler dropped lane {} while task was queued", task.lane))
    }
}

impl Inner {
    fn release(self: &Arc<Self>, lane: &str) {
        let next = {
            let mut lanes = self.lanes.lock();
            let Some(state) = lanes.get_mut(lane) else {
                return;
            };

            // The slot passes straight to the next waiter, so in_flight only
            // drops when nobody is queued.
            match state.pending.pop() {
                Some(waiter) => Some(waiter.grant),
                None => {
                    state.in_flight = state.in_flight.saturating_sub(1);
                    None
                }
            }
        };

        if let Some(grant) = next {
            let permit = LanePermit {
                inner: self.clone(),
                lane: lane.to_string(),
            };
            // A waiter that gave up returns the permit, whose drop hands the
            // slot on again.
            let _ = grant.send(permit);
        }
    }
}
