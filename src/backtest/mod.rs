pub mod metrics;
pub mod runner;
pub mod synthetic;

pub use metrics::{BacktestResult, BacktestTrade, DrawdownTracker, ExitReason};
pub use runner::{run_backtest, BacktestParams, BacktestRunner};
pub use synthetic::{linear_candles, MarketScenario, SyntheticDataGenerator};
