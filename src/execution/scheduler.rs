use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use super::trader::{LiveTrader, TraderStatus};
use crate::error::BotError;
use crate::models::Timeframe;
use crate::Result;

/// Timer-driven owner of a [`LiveTrader`]
///
/// Built once at startup and shared by `Arc`. Each timer firing spawns a
/// tick; a firing that lands while a tick is still running is dropped by
/// the trader's re-entrancy guard.
pub struct TradingLoop {
    trader: Arc<LiveTrader>,
    timer: Mutex<Option<Timer>>,
}

struct Timer {
    task: JoinHandle<()>,
    interval_minutes: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopStatus {
    pub running: bool,
    pub interval_minutes: Option<u64>,
    pub trader: TraderStatus,
}

impl TradingLoop {
    pub fn new(trader: Arc<LiveTrader>) -> Self {
        Self {
            trader,
            timer: Mutex::new(None),
        }
    }

    pub fn trader(&self) -> &Arc<LiveTrader> {
        &self.trader
    }

    /// Start ticking every `interval_minutes`, or at the active timeframe's cadence
    ///
    /// Any previous timer is stopped first. Stored trades are reconciled
    /// with the broker before the first tick, which fires immediately.
    pub async fn start(&self, interval_minutes: Option<u64>) -> Result<()> {
        let mut timer = self.timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.task.abort();
            tracing::info!("Stopped previous trading timer");
        }

        let minutes = match interval_minutes {
            Some(minutes) => minutes,
            None => self.default_interval().await,
        };
        if minutes == 0 {
            return Err(BotError::Config("poll interval must be at least 1 minute".to_string()));
        }

        if let Err(e) = self.trader.reconcile().await {
            tracing::warn!("Reconcile before start failed: {}", e);
        }

        let trader = Arc::clone(&self.trader);
        let period = Duration::from_secs(minutes * 60);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now(), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let trader = Arc::clone(&trader);
                tokio::spawn(async move {
                    let outcome = trader.tick().await;
                    tracing::debug!(?outcome, "Tick finished");
                });
            }
        });

        tracing::info!("💹 Trading loop started, polling every {} min", minutes);
        *timer = Some(Timer {
            task,
            interval_minutes: minutes,
        });
        Ok(())
    }

    /// Stop the timer; pending entries are cancelled and, if asked, open trades closed
    pub async fn stop(&self, close_open_trades: bool) -> Result<()> {
        let mut timer = self.timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.task.abort();
            tracing::info!("Trading loop stopped");
        }
        self.trader.shutdown(close_open_trades).await
    }

    /// Stop without closing positions and start again at the same interval
    pub async fn restart(&self) -> Result<()> {
        let interval = self.timer.lock().await.as_ref().map(|t| t.interval_minutes);
        self.stop(false).await?;
        self.start(interval).await
    }

    pub async fn status(&self) -> LoopStatus {
        let timer = self.timer.lock().await;
        LoopStatus {
            running: timer.as_ref().is_some_and(|t| !t.task.is_finished()),
            interval_minutes: timer.as_ref().map(|t| t.interval_minutes),
            trader: self.trader.status(),
        }
    }

    async fn default_interval(&self) -> u64 {
        match self.trader.active_config().await {
            Ok(Some(config)) => config.timeframe.poll_interval_minutes(),
            Ok(None) => Timeframe::FiveMinutes.poll_interval_minutes(),
            Err(e) => {
                tracing::warn!("Could not read active config for poll interval: {}", e);
                Timeframe::FiveMinutes.poll_interval_minutes()
            }
        }
    }
}
