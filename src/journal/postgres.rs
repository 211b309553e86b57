use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use super::{JournalEntry, TradeJournal};

/// Postgres ledger. Entries queue on an unbounded channel and a background
/// task inserts them one by one, so `record` never waits on the database.
pub struct PgJournal {
    sender: Mutex<Option<mpsc::UnboundedSender<JournalEntry>>>,
}

impl PgJournal {
    /// Connects, creates the table if needed and starts the writer task. The
    /// task ends after `close` (or drop) once the queue has drained; await
    /// the returned handle to be sure every entry reached the database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<(Self, JoinHandle<()>)> {
        info!("Connecting to journal database: {}", mask_database_url(url));

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .map_err(|e| anyhow!("Failed to connect to journal database: {}", e))?;

        health_check(&pool).await?;
        run_migrations(&pool).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_entries(pool, receiver));

        info!("Journal database ready");
        Ok((Self::new(sender), writer))
    }

    fn new(sender: mpsc::UnboundedSender<JournalEntry>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }
}

impl TradeJournal for PgJournal {
    fn record(&self, entry: JournalEntry) {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            warn!("Journal closed, dropping {} entry", entry.kind());
            return;
        };
        if let Err(e) = sender.send(entry) {
            error!("Journal writer stopped, dropping {} entry", e.0.kind());
        }
    }

    fn close(&self) {
        if self.sender.lock().take().is_some() {
            debug!("Journal closed, writer draining");
        }
    }
}

async fn write_entries(pool: PgPool, mut receiver: mpsc::UnboundedReceiver<JournalEntry>) {
    while let Some(entry) = receiver.recv().await {
        if let Err(e) = insert_entry(&pool, &entry).await {
            error!("Failed to persist {} journal entry: {}", entry.kind(), e);
        }
    }

    pool.close().await;
    debug!("Journal writer finished");
}

async fn insert_entry(pool: &PgPool, entry: &JournalEntry) -> Result<()> {
    let document = serde_json::to_value(entry)
        .map_err(|e| anyhow!("Failed to serialize journal entry: {}", e))?;

    sqlx::query(
        r#"
        INSERT INTO trade_journal (triangle_id, kind, recorded_at, entry)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(entry.triangle_id())
    .bind(entry.kind())
    .bind(entry.recorded_at())
    .bind(document)
    .execute(pool)
    .await
    .map_err(|e| anyhow!("Failed to insert journal entry: {}", e))?;

    Ok(())
}

async fn health_check(pool: &PgPool) -> Result<()> {
    let row = sqlx::query("SELECT 1 as test")
        .fetch_one(pool)
        .await
        .map_err(|e| anyhow!("Journal database health check failed: {}", e))?;

    let test_value: i32 = row.try_get("test")?;
    if test_value != 1 {
        return Err(anyhow!("Journal database health check returned unexpected value"));
    }

    Ok(())
}

async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running journal migrations");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trade_journal (
            id BIGSERIAL PRIMARY KEY,
            triangle_id UUID,
            kind VARCHAR(32) NOT NULL,
            recorded_at TIMESTAMP WITH TIME ZONE NOT NULL,
            entry JSONB NOT NULL,
            created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| anyhow!("Failed to create trade_journal table: {}", e))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_journal_triangle ON trade_journal(triangle_id)")
        .execute(pool)
        .await
        .map_err(|e| anyhow!("Failed to create triangle index: {}", e))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_journal_recorded_at ON trade_journal(recorded_at)")
        .execute(pool)
        .await
        .map_err(|e| anyhow!("Failed to create recorded_at index: {}", e))?;

    info!("Journal migrations completed");
    Ok(())
}

pub fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "****");
            return masked;
        }
    }
    url.to_string()
}
