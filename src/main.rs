use anyhow::Result;
use chrono::Utc;
use crossbot::backtest::{MarketScenario, SyntheticDataGenerator};
use crossbot::broker::{Broker, PaperBroker, RateLimitedBroker};
use crossbot::config::Settings;
use crossbot::execution::{LiveTrader, TraderOptions, TradingLoop};
use crossbot::persistence::{ConfigStore, MemoryStore, RedisStore, TradeStore};
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

/// Candles generated ahead of time to feed the paper market
const FEED_CANDLES: usize = 2_000;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = Settings::load()?;
    setup_logging(&settings.log_filter);

    let trading = &settings.trading;
    tracing::info!("🚀 Crossbot starting (paper trading)");
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Symbol: {} ({})", trading.symbol, trading.timeframe);
    tracing::info!("  Strategy: {} EMA {}/{}", trading.strategy, trading.fast_period, trading.slow_period);
    tracing::info!("  Risk: {}%  SL/TP: {}/{} pips", trading.risk_percent, trading.stop_loss_pips, trading.take_profit_pips);
    tracing::info!("  Directions: buy={} sell={}", trading.allow_buy, trading.allow_sell);

    let (paper, mut feed) = build_paper_market(&settings);
    let broker: Arc<dyn Broker> = Arc::new(RateLimitedBroker::from_arc(
        Arc::clone(&paper),
        settings.broker_requests_per_second,
    ));

    let (trades, configs) = connect_stores(&settings.redis_url).await;
    if configs.active_config().await?.is_none() {
        configs.set_active_config(Some(trading.clone())).await?;
        tracing::info!("Activated configuration for {}", trading.symbol);
    }

    let trader = Arc::new(LiveTrader::new(
        broker,
        trades,
        configs,
        TraderOptions::from_settings(&settings),
    ));
    let trading_loop = Arc::new(TradingLoop::new(trader));
    trading_loop.start(None).await?;

    // Paper market: one new candle per timeframe interval
    let interval = Duration::from_secs(trading.timeframe.seconds() as u64);
    let feed_paper = Arc::clone(&paper);
    let feed_task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match feed.next() {
                Some(candle) => {
                    tracing::debug!(close = candle.close, "📈 Paper candle");
                    feed_paper.push_candle(candle);
                }
                None => {
                    tracing::warn!("Paper market feed exhausted");
                    break;
                }
            }
        }
    });

    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = feed_task => {
            tracing::error!("Market feed exited: {:?}", result);
        }
    }

    trading_loop.stop(false).await?;
    let status = trading_loop.status().await;
    tracing::info!(
        "Ticks: {}  Signals filtered: {}  Last outcome: {:?}",
        status.trader.ticks,
        status.trader.signals_filtered,
        status.trader.last_outcome
    );
    tracing::info!("👋 Crossbot stopped");
    Ok(())
}

fn setup_logging(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Paper broker seeded with history, plus the candles still to come
fn build_paper_market(settings: &Settings) -> (Arc<PaperBroker>, std::vec::IntoIter<crossbot::Candle>) {
    let trading = &settings.trading;
    let interval = trading.timeframe.seconds();
    let history = trading.candle_limit * 2;
    let start_time = Utc::now().timestamp() - history as i64 * interval;

    let mut candles = SyntheticDataGenerator::new(Utc::now().timestamp() as u64)
        .with_start_time(start_time)
        .generate(MarketScenario::Sideways, history + FEED_CANDLES, trading.timeframe);
    let future = candles.split_off(history);

    tracing::info!("Seeded paper market with {} candles", candles.len());
    let paper = PaperBroker::new(&trading.symbol, settings.paper_balance).with_candles(candles);

    (Arc::new(paper), future.into_iter())
}

async fn connect_stores(redis_url: &str) -> (Arc<dyn TradeStore>, Arc<dyn ConfigStore>) {
    match RedisStore::new(redis_url).await {
        Ok(store) => {
            tracing::info!("Redis persistence enabled at {}", redis_url);
            let store = Arc::new(store);
            let trades: Arc<dyn TradeStore> = store.clone();
            let configs: Arc<dyn ConfigStore> = store;
            (trades, configs)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Redis ({}), continuing with in-memory trades",
                e
            );
            let store = Arc::new(MemoryStore::new());
            let trades: Arc<dyn TradeStore> = store.clone();
            let configs: Arc<dyn ConfigStore> = store;
            (trades, configs)
        }
    }
}
