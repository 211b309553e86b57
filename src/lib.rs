pub mod alerts;
pub mod arbitrage;
pub mod bot;
pub mod config;
pub mod exchange;
pub mod journal;
pub mod market;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use types::*;
