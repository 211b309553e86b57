pub mod balances;
pub mod poller;
pub mod price_cache;

pub use balances::BalanceTracker;
pub use poller::TickerPoller;
pub use price_cache::PriceCache;
