use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Busy,
    /// No further trades start; set on fatal errors and at shutdown.
    Halted,
}

/// The single "trade in progress" token. Acquisition is synchronous, so the
/// check and the set can never be split by an await.
#[derive(Clone)]
pub struct TradeGate {
    state: Arc<watch::Sender<GateState>>,
}

impl TradeGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GateState::Idle);
        Self {
            state: Arc::new(state),
        }
    }

    /// Takes the token if no trade holds it. The returned guard releases it
    /// on drop, whether the trade finished or its task panicked.
    pub fn try_acquire(&self) -> Option<TradeGuard> {
        let acquired = self.state.send_if_modified(|state| {
            if *state == GateState::Idle {
                *state = GateState::Busy;
                true
            } else {
                false
            }
        });

        if acquired {
            debug!("Trade gate acquired");
            Some(TradeGuard {
                gate: self.clone(),
                halt_on_release: false,
            })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.state.borrow() != GateState::Idle
    }

    pub fn is_halted(&self) -> bool {
        *self.state.borrow() == GateState::Halted
    }

    /// Stops new trades for good. A trade already running keeps its guard.
    pub fn halt(&self) {
        self.state.send_replace(GateState::Halted);
    }

    /// Resolves once no trade holds the token. Never resolves after a halt.
    pub async fn wait_idle(&self) {
        let mut receiver = self.state.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = receiver.wait_for(|state| *state == GateState::Idle).await;
    }

    fn release(&self, halt: bool) {
        self.state.send_modify(|state| {
            if halt {
                *state = GateState::Halted;
            } else if *state == GateState::Busy {
                *state = GateState::Idle;
            }
        });
    }
}

impl Default for TradeGate {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TradeGuard {
    gate: TradeGate,
    halt_on_release: bool,
}

impl TradeGuard {
    /// Releases the token as halted instead of idle.
    pub fn halt(&mut self) {
        self.halt_on_release = true;
    }
}

impl Drop for TradeGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("Trade gate released by a panicking trade");
        }
        self.gate.release(self.halt_on_release);
        debug!(halted = self.halt_on_release, "Trade gate released");
    }
}
