use anyhow::Result;
use bigdecimal::BigDecimal;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::{
    bot::scheduler::{Scheduler, SchedulerTask, DEFAULT_PRIORITY, PRIVATE_RATE_CLASS},
    exchange::Exchange,
    types::{Balance, Balances},
};

/// Available balances of the three triangle assets.
pub struct BalanceTracker {
    scheduler: Scheduler,
    exchange: Arc<dyn Exchange>,
    account: String,
    assets: [String; 3],
    balances: RwLock<Balances>,
}

impl BalanceTracker {
    pub fn new(
        scheduler: Scheduler,
        exchange: Arc<dyn Exchange>,
        account: impl Into<String>,
        assets: [String; 3],
    ) -> Self {
        Self {
            scheduler,
            exchange,
            account: account.into(),
            assets,
            balances: RwLock::new(Balances::new()),
        }
    }

    /// Fetches every balance through the utility lane and swaps the tracked
    /// set in one write. Assets the exchange omits count as zero.
    pub async fn refresh(&self) -> Result<()> {
        let task = SchedulerTask::new(&self.account, DEFAULT_PRIORITY, PRIVATE_RATE_CLASS);
        let fetched = self
            .scheduler
            .submit(task, || self.exchange.fetch_balances(&self.account))
            .await?;

        let next: Balances = self
            .assets
            .iter()
            .map(|asset| {
                let available = fetched
                    .get(asset)
                    .cloned()
                    .unwrap_or_else(|| BigDecimal::from(0));
                (asset.clone(), available)
            })
            .collect();

        info!(
            "Balances: {}",
            self.assets
                .iter()
                .map(|asset| format!("{} {}", asset, next[asset]))
                .collect::<Vec<_>>()
                .join(", ")
        );

        *self.balances.write() = next;
        Ok(())
    }

    pub fn snapshot(&self) -> Balances {
        self.balances.read().clone()
    }

    pub fn available(&self, asset: &str) -> Option<Balance> {
        self.balances.read().get(asset).map(|available| Balance {
            asset: asset.to_string(),
            available: available.clone(),
        })
    }
}
