pub mod paper;
pub mod poloniex;
pub mod traits;

pub use paper::PaperExchange;
pub use poloniex::PoloniexTicker;
pub use traits::*;
