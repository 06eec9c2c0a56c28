use serde::{Deserialize, Serialize};

use crate::backtest::metrics::{BacktestResult, BacktestTrade, DrawdownTracker, ExitReason};
use crate::broker::Broker;
use crate::config::BotConfig;
use crate::error::BotError;
use crate::models::{realized_profit, Candle, Side, Timeframe};
use crate::risk::sizing::{calculate_position_size, protective_levels};
use crate::strategy::{IndicatorSet, SignalConfig, SignalEngine, StrategyKind};
use crate::Result;

/// Inputs of one backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Window start, unix seconds
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub fast_period: usize,
    pub slow_period: usize,
    pub risk_percent: f64,
    pub stop_loss_pips: f64,
    pub take_profit_pips: f64,
    pub initial_balance: f64,
    pub allow_buy: bool,
    pub allow_sell: bool,
    pub strategy: StrategyKind,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
}

impl Default for BacktestParams {
    fn default() -> Self {
        Self::from_bot_config(&BotConfig::default(), 10_000.0)
    }
}

impl BacktestParams {
    pub fn from_bot_config(config: &BotConfig, initial_balance: f64) -> Self {
        Self {
            symbol: config.symbol.clone(),
            timeframe: config.timeframe,
            start: None,
            end: None,
            fast_period: config.fast_period,
            slow_period: config.slow_period,
            risk_percent: config.risk_percent,
            stop_loss_pips: config.stop_loss_pips,
            take_profit_pips: config.take_profit_pips,
            initial_balance,
            allow_buy: config.allow_buy,
            allow_sell: config.allow_sell,
            strategy: config.strategy,
            rsi_period: config.rsi_period,
            rsi_overbought: config.rsi_overbought,
            rsi_oversold: config.rsi_oversold,
        }
    }

    pub fn signal_config(&self) -> SignalConfig {
        SignalConfig {
            fast_period: self.fast_period,
            slow_period: self.slow_period,
            strategy: self.strategy,
            rsi_period: self.rsi_period,
            rsi_overbought: self.rsi_overbought,
            rsi_oversold: self.rsi_oversold,
            allow_buy: self.allow_buy,
            allow_sell: self.allow_sell,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.initial_balance > 0.0) {
            return Err(BotError::Config(format!(
                "initial balance must be positive, got {}",
                self.initial_balance
            )));
        }
        self.signal_config().validate()
    }
}

/// Simulated open position
#[derive(Debug, Clone)]
struct Position {
    side: Side,
    entry_price: f64,
    entry_index: usize,
    size: f64,
    stop_loss: f64,
    take_profit: f64,
}

impl Position {
    fn cost(&self) -> f64 {
        self.entry_price * self.size
    }

    /// Exit level and reason hit by `candle`, stop-loss first
    fn protective_exit(&self, candle: &Candle) -> Option<(f64, ExitReason)> {
        let (stop_hit, target_hit) = match self.side {
            Side::Buy => (candle.low <= self.stop_loss, candle.high >= self.take_profit),
            Side::Sell => (candle.high >= self.stop_loss, candle.low <= self.take_profit),
        };

        if stop_hit {
            Some((self.stop_loss, ExitReason::StopLoss))
        } else if target_hit {
            Some((self.take_profit, ExitReason::TakeProfit))
        } else {
            None
        }
    }
}

/// Single-position EMA crossover simulator
pub struct BacktestRunner {
    params: BacktestParams,
}

impl BacktestRunner {
    pub fn new(params: BacktestParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &BacktestParams {
        &self.params
    }

    /// Run a backtest over `candles`
    ///
    /// Candles must be ascending by time and at least `slow_period + 2`
    /// long. The result is a pure function of the inputs.
    pub fn run(&self, candles: &[Candle]) -> Result<BacktestResult> {
        let params = &self.params;
        params.validate()?;

        let mut engine = SignalEngine::new(params.signal_config())?;
        let indicators = IndicatorSet::compute(candles, engine.config())?;

        tracing::info!(
            symbol = %params.symbol,
            timeframe = %params.timeframe,
            strategy = %params.strategy,
            candles = candles.len(),
            "Starting backtest"
        );

        let mut balance = params.initial_balance;
        let mut position: Option<Position> = None;
        let mut trades = Vec::new();
        let mut drawdown = DrawdownTracker::new(balance);

        for i in params.slow_period..candles.len() {
            let candle = &candles[i];

            if let Some(open) = position.as_ref() {
                let exit = open.protective_exit(candle).or_else(|| {
                    (engine.crossover_at(&indicators, i) == Some(open.side.opposite()))
                        .then_some((candle.close, ExitReason::Reversal))
                });

                if let Some((exit_price, reason)) = exit {
                    let trade = self.close_position(open, candles, i, exit_price, reason);
                    balance += open.cost() + trade.profit;
                    trades.push(trade);
                    position = None;
                }
            } else {
                let signal = engine.evaluate(&indicators, i, candle.close);
                if let Some(side) = signal.kind.side() {
                    position = self.open_position(side, candle.close, i, balance);
                    if let Some(opened) = &position {
                        balance -= opened.cost();
                    }
                }
            }

            let reserved = position.as_ref().map_or(0.0, Position::cost);
            drawdown.update(balance + reserved);
        }

        if let Some(open) = position.take() {
            let last = candles.len() - 1;
            let trade =
                self.close_position(&open, candles, last, candles[last].close, ExitReason::EndOfData);
            balance += open.cost() + trade.profit;
            trades.push(trade);
            drawdown.update(balance);
        }

        let result = BacktestResult::from_trades(
            &params.symbol,
            params.timeframe,
            params.initial_balance,
            balance,
            &drawdown,
            engine.signals_filtered(),
            trades,
        );

        tracing::info!(
            trades = result.total_trades,
            profit = result.total_profit,
            profit_percent = result.total_profit_percent,
            signals_filtered = result.signals_filtered,
            "Backtest complete"
        );

        Ok(result)
    }

    /// Run backtest and print report
    pub fn run_and_report(&self, candles: &[Candle], scenario_name: &str) -> Result<BacktestResult> {
        println!("\n🔬 Running backtest: {}", scenario_name);
        println!("   Strategy: {}", self.params.strategy);
        println!(
            "   EMA: {}/{}  SL/TP: {}/{} pips  Risk: {}%",
            self.params.fast_period,
            self.params.slow_period,
            self.params.stop_loss_pips,
            self.params.take_profit_pips,
            self.params.risk_percent
        );
        println!("   Candles: {}", candles.len());
        println!("   Initial Balance: ${:.2}", self.params.initial_balance);

        let result = self.run(candles)?;
        result.print_report();

        Ok(result)
    }

    fn open_position(&self, side: Side, entry_price: f64, index: usize, balance: f64) -> Option<Position> {
        let params = &self.params;
        let levels = protective_levels(side, entry_price, params.stop_loss_pips, params.take_profit_pips);
        let size = calculate_position_size(balance, params.risk_percent, entry_price, levels.stop_loss);

        if size <= 0.0 || balance < entry_price * size {
            tracing::debug!(%side, index, size, balance, "Entry skipped: size not affordable");
            return None;
        }

        tracing::debug!(%side, index, entry_price, size, "Opened position");
        Some(Position {
            side,
            entry_price,
            entry_index: index,
            size,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
        })
    }

    fn close_position(
        &self,
        position: &Position,
        candles: &[Candle],
        index: usize,
        exit_price: f64,
        reason: ExitReason,
    ) -> BacktestTrade {
        let (profit, profit_percent) =
            realized_profit(position.side, position.entry_price, exit_price, position.size);

        tracing::debug!(
            side = %position.side,
            index,
            exit_price,
            profit,
            ?reason,
            "Closed position"
        );

        BacktestTrade {
            entry_date: candles[position.entry_index].datetime(),
            exit_date: candles[index].datetime(),
            symbol: self.params.symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            profit,
            profit_percent,
            stop_loss: Some(position.stop_loss),
            take_profit: Some(position.take_profit),
            exit_reason: reason,
        }
    }
}

/// Fetch the candle window from `broker` and simulate it
pub async fn run_backtest(broker: &dyn Broker, params: &BacktestParams) -> Result<BacktestResult> {
    params.validate()?;

    let candles = broker
        .get_klines(&params.symbol, params.timeframe, params.start, params.end, None)
        .await?;

    BacktestRunner::new(params.clone()).run(&candles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::synthetic::{linear_candles, MarketScenario, SyntheticDataGenerator};

    fn params() -> BacktestParams {
        BacktestParams {
            symbol: "SYNTH".to_string(),
            allow_sell: true,
            ..BacktestParams::default()
        }
    }

    #[test]
    fn test_backtest_uptrend() {
        tracing_subscriber::fmt()
            .with_env_filter("crossbot=debug")
            .try_init()
            .ok();

        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Uptrend, 500, Timeframe::FiveMinutes);

        let result = BacktestRunner::new(params()).run(&candles).unwrap();

        assert!(result.final_balance > 0.0);
        let ledger: f64 = result.trades.iter().map(|t| t.profit).sum();
        assert!((result.final_balance - (result.initial_balance + ledger)).abs() < 1e-6);
    }

    #[test]
    fn test_backtest_volatile_keeps_one_position() {
        let mut gen = SyntheticDataGenerator::new(42);
        let candles = gen.generate(MarketScenario::Volatile, 500, Timeframe::FiveMinutes);

        let result = BacktestRunner::new(params()).run(&candles).unwrap();

        // No two trades overlap in time
        for pair in result.trades.windows(2) {
            assert!(pair[1].entry_date >= pair[0].exit_date);
        }
    }

    #[test]
    fn test_backtest_insufficient_data() {
        let candles = linear_candles(100.0, 110.0, 22, 0, 300);

        let result = BacktestRunner::new(params()).run(&candles);
        assert!(matches!(
            result,
            Err(BotError::InsufficientData { needed: 23, got: 22 })
        ));
    }

    #[test]
    fn test_stop_loss_checked_before_take_profit() {
        let position = Position {
            side: Side::Buy,
            entry_price: 100.0,
            entry_index: 0,
            size: 1.0,
            stop_loss: 99.7,
            take_profit: 100.75,
        };
        // Wide candle touching both levels
        let candle = Candle {
            time: 0,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 1.0,
        };

        assert_eq!(
            position.protective_exit(&candle),
            Some((99.7, ExitReason::StopLoss))
        );
    }

    #[test]
    fn test_sell_position_exits_mirror_buy() {
        let position = Position {
            side: Side::Sell,
            entry_price: 100.0,
            entry_index: 0,
            size: 1.0,
            stop_loss: 100.3,
            take_profit: 99.25,
        };
        let candle = Candle {
            time: 0,
            open: 99.5,
            high: 99.6,
            low: 99.2,
            close: 99.3,
            volume: 1.0,
        };

        assert_eq!(
            position.protective_exit(&candle),
            Some((99.25, ExitReason::TakeProfit))
        );
    }

    #[test]
    fn test_unsupported_strategy_rejected() {
        let candles = linear_candles(100.0, 110.0, 60, 0, 300);
        let params = BacktestParams {
            strategy: StrategyKind::Momentum,
            ..params()
        };

        assert!(matches!(
            BacktestRunner::new(params).run(&candles),
            Err(BotError::UnsupportedStrategy(_))
        ));
    }

    #[test]
    fn test_non_positive_balance_rejected() {
        let candles = linear_candles(100.0, 110.0, 60, 0, 300);
        let params = BacktestParams {
            initial_balance: 0.0,
            ..params()
        };

        assert!(matches!(
            BacktestRunner::new(params).run(&candles),
            Err(BotError::Config(_))
        ));
    }
}
