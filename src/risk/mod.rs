// Risk management module
pub mod sizing;

pub use sizing::{calculate_position_size, protective_levels, spread_pips, ProtectiveLevels};
