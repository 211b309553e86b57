pub mod calculator;
pub mod detector;
pub mod executor;

pub use calculator::TradeSizer;
pub use detector::{ArbitrageDetector, DetectorSignal};
pub use executor::{ExecutionError, TriangleExecutor, TriangleReport};
