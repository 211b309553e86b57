pub mod context;
pub mod gate;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;

pub use context::TradingContext;
pub use gate::{TradeGate, TradeGuard};
pub use metrics::{TradeOutcome, TradeStats};
pub use orchestrator::{ArbitrageBot, ShutdownReason};
pub use scheduler::{Scheduler, SchedulerTask};
