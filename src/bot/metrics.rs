use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Direction;

/// Outcome of one finalized triangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Success,
    Failure,
}

/// Running totals, only ever incremented at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStats {
    pub attempted: u64,
    pub successful: u64,
    pub unsuccessful: u64,
    pub retries_placed: u64,
    pub by_direction: HashMap<String, u64>,
    pub started_at: DateTime<Utc>,
    pub last_trade_at: Option<DateTime<Utc>>,
}

impl TradeStats {
    pub fn new() -> Self {
        Self {
            attempted: 0,
            successful: 0,
            unsuccessful: 0,
            retries_placed: 0,
            by_direction: HashMap::new(),
            started_at: Utc::now(),
            last_trade_at: None,
        }
    }

    pub fn record(&mut self, direction: Direction, outcome: TradeOutcome, retries: u64) {
        self.attempted += 1;
        match outcome {
            TradeOutcome::Success => self.successful += 1,
            TradeOutcome::Failure => self.unsuccessful += 1,
        }
        self.retries_placed += retries;
        *self.by_direction.entry(direction.to_string()).or_insert(0) += 1;
        self.last_trade_at = Some(Utc::now());
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.successful as f64 / self.attempted as f64
    }

    pub fn generate_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Triangle Trader Report ===\n");
        report.push_str(&format!("Running since: {}\n", self.started_at));
        report.push_str(&format!("Attempted: {}\n", self.attempted));
        report.push_str(&format!("Successful: {}\n", self.successful));
        report.push_str(&format!("Unsuccessful: {}\n", self.unsuccessful));
        report.push_str(&format!("Success Rate: {:.2}%\n", self.success_rate() * 100.0));
        report.push_str(&format!("Retry Orders Placed: {}\n", self.retries_placed));

        let mut directions: Vec<_> = self.by_direction.iter().collect();
        directions.sort();
        for (direction, count) in directions {
            report.push_str(&format!("  {}: {}\n", direction, count));
        }

        if let Some(last) = self.last_trade_at {
            report.push_str(&format!("Last Trade: {}\n", last));
        }

        report
    }

    pub fn export_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize trade stats: {}", e))
    }
}

impl Default for TradeStats {
    fn default() -> Self {
        Self::new()
    }
}
