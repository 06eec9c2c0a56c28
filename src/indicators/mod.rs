// Technical indicators module
// EMA and RSI series aligned 1:1 with the candles they were computed from

pub mod moving_average;
pub mod rsi;

pub use moving_average::{calculate_ema, calculate_sma};
pub use rsi::{calculate_rsi, RSI_NEUTRAL};
