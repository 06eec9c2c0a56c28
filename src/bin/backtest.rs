use anyhow::Result;
use clap::Parser;
use crossbot::backtest::{run_backtest, BacktestParams, BacktestResult, MarketScenario, SyntheticDataGenerator};
use crossbot::broker::PaperBroker;
use crossbot::strategy::StrategyKind;
use crossbot::Timeframe;

/// Run the EMA crossover strategy over synthetic market scenarios
#[derive(Parser)]
#[command(name = "backtest")]
#[command(version)]
struct Cli {
    /// Scenario to run (uptrend, downtrend, sideways, volatile, with-gaps, drawdown); all when omitted
    #[arg(long)]
    scenario: Option<MarketScenario>,

    #[arg(long, default_value = "SYNTH-USD")]
    symbol: String,

    #[arg(long, default_value = "5m")]
    timeframe: Timeframe,

    #[arg(long, default_value_t = 500)]
    candles: usize,

    /// Seed for the synthetic data generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 9)]
    fast: usize,

    #[arg(long, default_value_t = 21)]
    slow: usize,

    #[arg(long, default_value = "ema-only")]
    strategy: StrategyKind,

    #[arg(long, default_value_t = 1.5)]
    risk_percent: f64,

    #[arg(long, default_value_t = 30.0)]
    stop_loss_pips: f64,

    #[arg(long, default_value_t = 75.0)]
    take_profit_pips: f64,

    #[arg(long, default_value_t = 10_000.0)]
    balance: f64,

    /// Also trade short on downward crossovers
    #[arg(long)]
    allow_sell: bool,
}

impl Cli {
    fn params(&self) -> BacktestParams {
        BacktestParams {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
            fast_period: self.fast,
            slow_period: self.slow,
            risk_percent: self.risk_percent,
            stop_loss_pips: self.stop_loss_pips,
            take_profit_pips: self.take_profit_pips,
            initial_balance: self.balance,
            allow_buy: true,
            allow_sell: self.allow_sell,
            strategy: self.strategy,
            ..BacktestParams::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crossbot=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let params = cli.params();

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║           CROSSBOT BACKTESTING SUITE                  ║");
    println!("╚═══════════════════════════════════════════════════════╝");
    println!(
        "   {} {} | EMA {}/{} | {} | SL/TP {}/{} pips | risk {}%",
        params.symbol,
        params.timeframe,
        params.fast_period,
        params.slow_period,
        params.strategy,
        params.stop_loss_pips,
        params.take_profit_pips,
        params.risk_percent
    );

    let scenarios = match cli.scenario {
        Some(scenario) => vec![scenario],
        None => MarketScenario::all().to_vec(),
    };

    let mut results = Vec::new();
    for scenario in scenarios {
        let candles = SyntheticDataGenerator::new(cli.seed).generate(scenario, cli.candles, params.timeframe);
        let broker = PaperBroker::new(&params.symbol, params.initial_balance).with_candles(candles);

        println!("\n🔬 Scenario: {}", scenario.name());
        match run_backtest(&broker, &params).await {
            Ok(result) => {
                result.print_report();
                results.push((scenario.name(), result));
            }
            Err(e) => eprintln!("❌ Backtest failed for {}: {}", scenario.name(), e),
        }
    }

    print_summary_comparison(&results);
    Ok(())
}

fn print_summary_comparison(results: &[(&str, BacktestResult)]) {
    if results.len() < 2 {
        return;
    }

    println!("\n╔═══════════════════════════════════════════════════════╗");
    println!("║              SCENARIO COMPARISON                      ║");
    println!("╚═══════════════════════════════════════════════════════╝\n");

    println!(
        "{:<12} {:>10} {:>9} {:>7} {:>7} {:>8} {:>8}",
        "Scenario", "Profit", "Return%", "Trades", "Win%", "MaxDD%", "Sharpe"
    );
    println!("{}", "─".repeat(68));

    for (name, result) in results {
        println!(
            "{:<12} {:>10.2} {:>9.2} {:>7} {:>7.1} {:>8.2} {:>8.2}",
            name,
            result.total_profit,
            result.total_profit_percent,
            result.total_trades,
            result.win_rate,
            result.max_drawdown_percent,
            result.sharpe_ratio
        );
    }

    if let Some((best, result)) = results
        .iter()
        .max_by(|a, b| a.1.total_profit_percent.total_cmp(&b.1.total_profit_percent))
    {
        println!("\n🏆 Best Scenario: {} ({:+.2}%)", best, result.total_profit_percent);
    }

    let total_trades: usize = results.iter().map(|(_, r)| r.total_trades).sum();
    let filtered: u64 = results.iter().map(|(_, r)| r.signals_filtered).sum();
    println!("📊 Total trades: {}  Signals filtered: {}", total_trades, filtered);
    println!("\n═══════════════════════════════════════════════════════\n");
}
