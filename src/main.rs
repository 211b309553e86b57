use anyhow::Result;
use std::{process::ExitCode, sync::Arc};
use tracing::{error, info, Level};
use triangle_arbitrage_trader::{
    bot::{ArbitrageBot, ShutdownReason},
    config::Config,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting Triangle Arbitrage Trader");

    // Load configuration
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");

    let bot = Arc::new(ArbitrageBot::new(config).await.map_err(|e| {
        error!("Failed to initialize bot: {}", e);
        e
    })?);

    // Handle graceful shutdown
    let stopper = bot.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            stopper.stop();
        }
    });

    let reason = bot.run().await.map_err(|e| {
        error!("Bot error: {}", e);
        e
    })?;

    info!("Triangle Arbitrage Trader shutdown complete ({:?})", reason);
    Ok(match reason {
        ShutdownReason::PlacementFailed => ExitCode::from(2),
        ShutdownReason::Interrupted | ShutdownReason::TradeLimitReached => ExitCode::SUCCESS,
    })
}
