use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Side, Timeframe};

/// Why a simulated position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Reversal,
    EndOfData,
}

/// Record of a single simulated trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestTrade {
    pub entry_date: DateTime<Utc>,
    pub exit_date: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub profit: f64,
    pub profit_percent: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub exit_reason: ExitReason,
}

impl BacktestTrade {
    pub fn holding_minutes(&self) -> i64 {
        (self.exit_date - self.entry_date).num_minutes()
    }
}

/// Running peak-to-trough tracker over an equity curve
#[derive(Debug, Clone)]
pub struct DrawdownTracker {
    peak: f64,
    max_drawdown: f64,
    max_drawdown_percent: f64,
}

impl DrawdownTracker {
    pub fn new(initial_equity: f64) -> Self {
        Self {
            peak: initial_equity,
            max_drawdown: 0.0,
            max_drawdown_percent: 0.0,
        }
    }

    pub fn update(&mut self, equity: f64) {
        if equity > self.peak {
            self.peak = equity;
        }

        let drawdown = self.peak - equity;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
            self.max_drawdown_percent = if self.peak > 0.0 {
                drawdown / self.peak * 100.0
            } else {
                0.0
            };
        }
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn max_drawdown_percent(&self) -> f64 {
        self.max_drawdown_percent
    }
}

/// Complete backtest performance report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub symbol: String,
    pub timeframe: Timeframe,

    // P&L
    pub initial_balance: f64,
    pub final_balance: f64,
    pub total_profit: f64,
    pub total_profit_percent: f64,

    // Trade statistics
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,

    // Risk
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub sharpe_ratio: f64,

    pub signals_filtered: u64,
    pub trades: Vec<BacktestTrade>,
}

impl BacktestResult {
    /// Aggregate statistics over a closed trade ledger
    pub fn from_trades(
        symbol: &str,
        timeframe: Timeframe,
        initial_balance: f64,
        final_balance: f64,
        drawdown: &DrawdownTracker,
        signals_filtered: u64,
        trades: Vec<BacktestTrade>,
    ) -> Self {
        let total_trades = trades.len();
        let total_profit: f64 = trades.iter().map(|t| t.profit).sum();
        let total_profit_percent = if initial_balance > 0.0 {
            total_profit / initial_balance * 100.0
        } else {
            0.0
        };

        let wins: Vec<f64> = trades.iter().map(|t| t.profit).filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = trades.iter().map(|t| t.profit).filter(|p| *p <= 0.0).collect();

        let win_rate = if total_trades > 0 {
            wins.len() as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let total_wins: f64 = wins.iter().sum();
        let total_losses: f64 = losses.iter().map(|p| p.abs()).sum();

        let avg_win = if wins.is_empty() {
            0.0
        } else {
            total_wins / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            total_losses / losses.len() as f64
        };

        let largest_win = wins.iter().copied().fold(0.0, f64::max);
        let largest_loss = losses.iter().copied().fold(0.0, f64::min);

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let returns: Vec<f64> = trades.iter().map(|t| t.profit_percent).collect();

        Self {
            symbol: symbol.to_string(),
            timeframe,
            initial_balance,
            final_balance,
            total_profit,
            total_profit_percent,
            total_trades,
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            win_rate,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            profit_factor,
            max_drawdown: drawdown.max_drawdown(),
            max_drawdown_percent: drawdown.max_drawdown_percent(),
            sharpe_ratio: calculate_sharpe_ratio(&returns),
            signals_filtered,
            trades,
        }
    }

    pub fn trades_by_reason(&self, reason: ExitReason) -> usize {
        self.trades.iter().filter(|t| t.exit_reason == reason).count()
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              BACKTEST PERFORMANCE REPORT              ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("📊 P&L SUMMARY ({} {})", self.symbol, self.timeframe);
        println!("  Initial Balance:       ${:.2}", self.initial_balance);
        println!("  Final Balance:         ${:.2}", self.final_balance);
        println!(
            "  Total Profit:          ${:.2} ({:+.2}%)",
            self.total_profit, self.total_profit_percent
        );

        println!("\n📈 TRADE STATISTICS");
        println!("  Total Trades:          {}", self.total_trades);
        println!(
            "  Winning Trades:        {} ({:.1}%)",
            self.winning_trades, self.win_rate
        );
        println!("  Losing Trades:         {}", self.losing_trades);
        println!("  Signals Filtered:      {}", self.signals_filtered);

        if self.total_trades > 0 {
            println!("\n💰 WIN/LOSS ANALYSIS");
            println!("  Average Win:           ${:.2}", self.avg_win);
            println!("  Average Loss:          ${:.2}", self.avg_loss);
            println!("  Largest Win:           ${:.2}", self.largest_win);
            println!("  Largest Loss:          ${:.2}", self.largest_loss);
            println!("  Profit Factor:         {:.2}", self.profit_factor);

            println!("\n🚪 EXITS");
            println!("  Stop Loss:             {}", self.trades_by_reason(ExitReason::StopLoss));
            println!("  Take Profit:           {}", self.trades_by_reason(ExitReason::TakeProfit));
            println!("  Reversal:              {}", self.trades_by_reason(ExitReason::Reversal));
            println!("  End of Data:           {}", self.trades_by_reason(ExitReason::EndOfData));
        }

        println!("\n⚠️  RISK METRICS");
        println!(
            "  Max Drawdown:          ${:.2} ({:.2}%)",
            self.max_drawdown, self.max_drawdown_percent
        );
        // Per-trade ratio, not annualized
        println!("  Sharpe Ratio:          {:.2}", self.sharpe_ratio);

        println!("\n═══════════════════════════════════════════════════════\n");
    }
}

/// Mean over population standard deviation of per-trade percent returns
///
/// Risk-free rate of 0, no annualization. Returns 0 when the deviation is 0.
pub fn calculate_sharpe_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }

    let mean_return = returns.iter().sum::<f64>() / returns.len() as f64;

    let variance = returns
        .iter()
        .map(|r| {
            let diff = r - mean_return;
            diff * diff
        })
        .sum::<f64>()
        / returns.len() as f64;

    let std_dev = variance.sqrt();

    if std_dev > 0.0 {
        mean_return / std_dev
    } else {
        0.0
    }
}
