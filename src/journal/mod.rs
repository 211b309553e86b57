pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    alerts::Alert,
    bot::metrics::TradeOutcome,
    types::{Balances, Direction, Order, PriceQuote, TradeLeg},
};

pub use postgres::PgJournal;

/// One ledger line. Serialized with a `kind` tag so every adapter can store
/// it as a single JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Initialized {
        at: DateTime<Utc>,
        balances: Balances,
        prices: Vec<PriceQuote>,
    },
    TriangleStarted {
        at: DateTime<Utc>,
        triangle_id: Uuid,
        direction: Direction,
        legs: Vec<TradeLeg>,
    },
    /// A profitable opportunity dropped before any order was placed.
    TriangleSkipped {
        at: DateTime<Utc>,
        direction: Direction,
        reason: String,
    },
    OrderPlaced {
        at: DateTime<Utc>,
        triangle_id: Uuid,
        order: Order,
        retry: bool,
    },
    Completed {
        at: DateTime<Utc>,
        triangle_id: Uuid,
        direction: Direction,
        outcome: TradeOutcome,
        reason: Option<String>,
        orders: Vec<Order>,
        retries: u64,
        attempted: u64,
        successful: u64,
        unsuccessful: u64,
    },
    Escalation {
        at: DateTime<Utc>,
        alert: Alert,
    },
}

impl JournalEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            JournalEntry::Initialized { .. } => "initialized",
            JournalEntry::TriangleStarted { .. } => "triangle_started",
            JournalEntry::TriangleSkipped { .. } => "triangle_skipped",
            JournalEntry::OrderPlaced { .. } => "order_placed",
            JournalEntry::Completed { .. } => "completed",
            JournalEntry::Escalation { .. } => "escalation",
        }
    }

    pub fn triangle_id(&self) -> Option<Uuid> {
        match self {
            JournalEntry::Initialized { .. } | JournalEntry::TriangleSkipped { .. } => None,
            JournalEntry::TriangleStarted { triangle_id, .. }
            | JournalEntry::OrderPlaced { triangle_id, .. }
            | JournalEntry::Completed { triangle_id, .. } => Some(*triangle_id),
            JournalEntry::Escalation { alert, .. } => alert.triangle_id,
        }
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        match self {
            JournalEntry::Initialized { at, .. }
            | JournalEntry::TriangleStarted { at, .. }
            | JournalEntry::TriangleSkipped { at, .. }
            | JournalEntry::OrderPlaced { at, .. }
            | JournalEntry::Completed { at, .. }
            | JournalEntry::Escalation { at, .. } => *at,
        }
    }
}

/// Durable record of what the bot did. `record` must return immediately;
/// adapters that do I/O hand the entry to a background task.
pub trait TradeJournal: Send + Sync {
    fn record(&self, entry: JournalEntry);

    /// Stops accepting entries so background writers can drain and exit.
    fn close(&self) {}
}

/// Writes entries as JSON on the `ledger` tracing target.
pub struct TracingJournal;

impl TradeJournal for TracingJournal {
    fn record(&self, entry: JournalEntry) {
        match serde_json::to_string(&entry) {
            Ok(line) => info!(target: "ledger", "{}", line),
            Err(e) => warn!("Failed to serialize {} journal entry: {}", entry.kind(), e),
        }
    }
}

/// Fans every entry out to several journals.
pub struct MultiJournal {
    journals: Vec<Arc<dyn TradeJournal>>,
}

impl MultiJournal {
    pub fn new(journals: Vec<Arc<dyn TradeJournal>>) -> Self {
        Self { journals }
    }
}

impl TradeJournal for MultiJournal {
    fn record(&self, entry: JournalEntry) {
        for journal in &self.journals {
            journal.record(entry.clone());
        }
    }

    fn close(&self) {
        for journal in &self.journals {
            journal.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingJournal;

    #[test]
    fn test_entry_serializes_with_kind_tag() {
        let triangle_id = Uuid::new_v4();
        let entry = JournalEntry::Completed {
            at: Utc::now(),
            triangle_id,
            direction: Direction::Clockwise,
            outcome: TradeOutcome::Success,
            reason: None,
            orders: Vec::new(),
            retries: 0,
            attempted: 1,
            successful: 1,
            unsuccessful: 0,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "completed");
        assert_eq!(json["direction"], "clockwise");
        assert_eq!(json["outcome"], "success");
        assert_eq!(entry.triangle_id(), Some(triangle_id));

        let parsed: JournalEntry = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_multi_journal_fans_out() {
        let first = Arc::new(RecordingJournal::default());
        let second = Arc::new(RecordingJournal::default());
        let journals: Vec<Arc<dyn TradeJournal>> = vec![
            first.clone() as Arc<dyn TradeJournal>,
            second.clone(),
            Arc::new(TracingJournal),
        ];
        let journal = MultiJournal::new(journals);

        journal.record(JournalEntry::Escalation {
            at: Utc::now(),
            alert: Alert::new(None, "test", Vec::new()),
        });

        assert_eq!(first.kinds(), vec!["escalation"]);
        assert_eq!(second.kinds(), vec!["escalation"]);

        journal.close();
        assert!(first.is_closed());
        assert!(second.is_closed());
    }
}
