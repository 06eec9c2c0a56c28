// Live order execution: per-tick state machine and its timer
pub mod scheduler;
pub mod trader;

pub use scheduler::{LoopStatus, TradingLoop};
pub use trader::{CloseReason, LiveTrader, TickOutcome, TickState, TraderOptions, TraderStatus};
