use crossbot::backtest::{
    linear_candles, run_backtest, BacktestParams, BacktestRunner, ExitReason, MarketScenario,
    SyntheticDataGenerator,
};
use crossbot::broker::PaperBroker;
use crossbot::strategy::StrategyKind;
use crossbot::{BotError, Candle, Side, Timeframe};

const T0: i64 = 1_700_000_000;
const FIVE_MINUTES: i64 = 300;

/// Decline from 150 to 100, then climb back to 200
fn dip_then_rally() -> Vec<Candle> {
    let mut candles = linear_candles(150.0, 100.0, 40, T0, FIVE_MINUTES);
    let rally = linear_candles(100.0, 200.0, 100, T0 + 39 * FIVE_MINUTES, FIVE_MINUTES);
    candles.extend_from_slice(&rally[1..]);
    candles
}

fn params(symbol: &str) -> BacktestParams {
    BacktestParams {
        symbol: symbol.to_string(),
        ..BacktestParams::default()
    }
}

#[test]
fn test_rally_after_dip_is_profitable() {
    let candles = dip_then_rally();
    let result = BacktestRunner::new(params("TEST-USD")).run(&candles).unwrap();

    assert!(result.total_trades >= 1);
    assert!(result.trades.iter().all(|t| t.side == Side::Buy));
    assert!(result.win_rate > 50.0);
    assert!(result.total_profit > 0.0);
    assert!(result.max_drawdown_percent < result.total_profit_percent);

    let first = &result.trades[0];
    assert_eq!(first.exit_reason, ExitReason::TakeProfit);
    let take_profit = first.take_profit.unwrap();
    let stop_loss = first.stop_loss.unwrap();
    assert!((take_profit - first.entry_price * 1.0075).abs() < 1e-9);
    assert!((stop_loss - first.entry_price * 0.997).abs() < 1e-9);
    assert_eq!(first.exit_price, take_profit);
    assert!((result.final_balance - 10_075.0).abs() < 1e-6);
}

#[test]
fn test_steady_uptrend_never_crosses() {
    // fast EMA leads slow from the first defined value, so no crossover appears
    let candles = linear_candles(100.0, 200.0, 100, T0, FIVE_MINUTES);
    let result = BacktestRunner::new(params("TEST-USD")).run(&candles).unwrap();

    assert_eq!(result.total_trades, 0);
    assert_eq!(result.final_balance, result.initial_balance);
    assert_eq!(result.max_drawdown, 0.0);
    assert_eq!(result.sharpe_ratio, 0.0);
}

#[test]
fn test_final_balance_matches_trade_ledger() {
    let p = BacktestParams {
        allow_sell: true,
        ..params("SYNTH-USD")
    };

    for scenario in MarketScenario::all() {
        let candles = SyntheticDataGenerator::new(7).generate(scenario, 400, Timeframe::FiveMinutes);
        let result = BacktestRunner::new(p.clone()).run(&candles).unwrap();

        let ledger: f64 = result.trades.iter().map(|t| t.profit).sum();
        assert!(
            (result.final_balance - (result.initial_balance + ledger)).abs() < 1e-6,
            "{}: balance {} vs ledger {}",
            scenario.name(),
            result.final_balance,
            ledger
        );
        assert_eq!(result.winning_trades + result.losing_trades, result.total_trades);
        assert!(result.max_drawdown_percent >= 0.0);

        for pair in result.trades.windows(2) {
            assert!(pair[0].exit_date <= pair[1].entry_date, "positions overlap");
        }
    }
}

#[test]
fn test_backtest_is_deterministic() {
    let candles = SyntheticDataGenerator::new(42).generate(MarketScenario::Volatile, 500, Timeframe::FiveMinutes);
    let runner = BacktestRunner::new(BacktestParams {
        allow_sell: true,
        strategy: StrategyKind::EmaRsi,
        ..params("SYNTH-USD")
    });

    let first = runner.run(&candles).unwrap();
    let second = runner.run(&candles).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_short_history_is_rejected() {
    let candles = linear_candles(100.0, 110.0, 22, T0, FIVE_MINUTES);
    let err = BacktestRunner::new(params("TEST-USD")).run(&candles).unwrap_err();

    assert!(matches!(err, BotError::InsufficientData { needed: 23, got: 22 }));
}

#[test]
fn test_sell_disabled_opens_no_shorts() {
    let candles = SyntheticDataGenerator::new(3).generate(MarketScenario::Downtrend, 400, Timeframe::FiveMinutes);
    let result = BacktestRunner::new(params("SYNTH-USD")).run(&candles).unwrap();

    assert!(result.trades.iter().all(|t| t.side == Side::Buy));
}

#[tokio::test]
async fn test_run_backtest_through_broker() {
    let candles = dip_then_rally();
    let broker = PaperBroker::new("TEST-USD", 10_000.0).with_candles(candles.clone());

    let via_broker = run_backtest(&broker, &params("TEST-USD")).await.unwrap();
    let direct = BacktestRunner::new(params("TEST-USD")).run(&candles).unwrap();
    assert_eq!(via_broker, direct);

    // history window narrower than the slow period
    let narrow = BacktestParams {
        start: Some(T0 + 120 * FIVE_MINUTES),
        ..params("TEST-USD")
    };
    let err = run_backtest(&broker, &narrow).await.unwrap_err();
    assert!(matches!(err, BotError::InsufficientData { .. }));
}
