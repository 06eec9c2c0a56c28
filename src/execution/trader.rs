use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use crate::broker::Broker;
use crate::config::{BotConfig, Settings};
use crate::error::BotError;
use crate::models::{parse_amount, Order, OrderStatus, Side, Trade, TradeStatus};
use crate::persistence::{ConfigStore, TradeStore};
use crate::risk::sizing::{calculate_position_size, protective_levels, spread_pips, ProtectiveLevels};
use crate::strategy::{validate_candle_uniformity, IndicatorSet, SignalEngine};
use crate::Result;

/// Phase of the tick currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickState {
    Idle,
    CheckingSignal,
    Entering,
    ProtectingPosition,
    SafetyClosing,
}

/// Why a live trade was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Reversal,
    Manual,
    Shutdown,
    SafetyClose,
}

impl CloseReason {
    fn describe(&self) -> &'static str {
        match self {
            Self::StopLoss => "Closed by stop-loss order",
            Self::TakeProfit => "Closed by take-profit order",
            Self::Reversal => "Closed on opposite crossover",
            Self::Manual => "Closed manually",
            Self::Shutdown => "Closed on shutdown",
            Self::SafetyClose => "Safety close",
        }
    }
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another tick was still running
    Busy,
    NoConfig,
    NoAction,
    ZeroBalance,
    SpreadTooWide { spread_pips: f64 },
    /// Entry submitted but not yet reported filled
    EntryPending { trade_id: Uuid },
    EntryCancelled { trade_id: Uuid },
    Protected { trade_id: Uuid, take_profit: bool },
    SafetyClosed { trade_id: Uuid },
    /// An open trade was left as is
    PositionOpen { trade_id: Uuid },
    PositionClosed { trade_id: Uuid, reason: CloseReason },
    Failed(String),
}

/// Snapshot of a trader for status reporting
#[derive(Debug, Clone, PartialEq)]
pub struct TraderStatus {
    pub state: TickState,
    pub ticks: u64,
    pub signals_filtered: u64,
    pub last_outcome: Option<TickOutcome>,
}

impl Default for TraderStatus {
    fn default() -> Self {
        Self {
            state: TickState::Idle,
            ticks: 0,
            signals_filtered: 0,
            last_outcome: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TraderOptions {
    /// Delay before the single order re-query after submission
    pub fill_poll_delay: Duration,
    /// Delay between cancelling protective orders and the closing order
    pub balance_release_delay: Duration,
}

impl Default for TraderOptions {
    fn default() -> Self {
        Self {
            fill_poll_delay: Duration::from_millis(500),
            balance_release_delay: Duration::from_secs(1),
        }
    }
}

impl TraderOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            fill_poll_delay: settings.fill_poll_delay(),
            balance_release_delay: settings.balance_release_delay(),
        }
    }
}

/// Clears the running flag when the tick ends, whichever way it ends
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Live trading state machine for the active configuration
pub struct LiveTrader {
    broker: Arc<dyn Broker>,
    trades: Arc<dyn TradeStore>,
    configs: Arc<dyn ConfigStore>,
    options: TraderOptions,
    running: AtomicBool,
    status: Mutex<TraderStatus>,
}

impl LiveTrader {
    pub fn new(
        broker: Arc<dyn Broker>,
        trades: Arc<dyn TradeStore>,
        configs: Arc<dyn ConfigStore>,
        options: TraderOptions,
    ) -> Self {
        Self {
            broker,
            trades,
            configs,
            options,
            running: AtomicBool::new(false),
            status: Mutex::new(TraderStatus::default()),
        }
    }

    pub fn status(&self) -> TraderStatus {
        self.status_lock().clone()
    }

    pub async fn active_config(&self) -> Result<Option<BotConfig>> {
        self.configs.active_config().await
    }

    fn status_lock(&self) -> MutexGuard<'_, TraderStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: TickState) {
        self.status_lock().state = state;
    }

    fn try_acquire(&self) -> Option<TickGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickGuard(&self.running))
    }

    /// Wait for any running tick to finish, then hold the flag
    async fn acquire(&self) -> TickGuard<'_> {
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Run one tick; errors are logged and reported as [`TickOutcome::Failed`]
    pub async fn tick(&self) -> TickOutcome {
        let _guard = match self.try_acquire() {
            Some(guard) => guard,
            None => {
                tracing::debug!("Tick skipped: previous tick still running");
                return TickOutcome::Busy;
            }
        };

        let outcome = match self.run_tick().await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Tick failed: {}", e);
                TickOutcome::Failed(e.to_string())
            }
        };

        let mut status = self.status_lock();
        status.state = TickState::Idle;
        status.ticks += 1;
        status.last_outcome = Some(outcome.clone());
        outcome
    }

    async fn run_tick(&self) -> Result<TickOutcome> {
        let config = match self.configs.active_config().await? {
            Some(config) => config,
            None => {
                tracing::info!("No active trading configuration, skipping tick");
                return Ok(TickOutcome::NoConfig);
            }
        };
        config.validate()?;
        let symbol = config.symbol.as_str();

        self.set_state(TickState::CheckingSignal);

        if let Some(trade) = self.trades.open_trades(symbol).await?.into_iter().next() {
            return self.manage_open_trade(trade, &config).await;
        }

        let candles = self
            .broker
            .get_klines(symbol, config.timeframe, None, None, Some(config.candle_limit))
            .await?;
        if let Err(e) = validate_candle_uniformity(&candles, config.timeframe.seconds()) {
            tracing::warn!(symbol, "Candle data quality issue: {}", e);
        }

        let mut engine = SignalEngine::new(config.signal_config())?;
        let signal = engine.evaluate_latest(&candles)?;
        self.status_lock().signals_filtered += engine.signals_filtered();

        let side = match signal.kind.side() {
            Some(side) => side,
            None => {
                tracing::debug!(
                    symbol,
                    fast = signal.fast_value,
                    slow = signal.slow_value,
                    "No signal"
                );
                return Ok(TickOutcome::NoAction);
            }
        };
        tracing::info!(symbol, %side, price = signal.price, "📶 Crossover signal");

        let quote = config.quote_currency();
        let balance = self.broker.get_balance(&quote).await?.available()?;
        if balance <= 0.0 {
            tracing::error!(symbol, currency = %quote, "No available balance, skipping entry");
            return Ok(TickOutcome::ZeroBalance);
        }

        let ticker = self.broker.get_ticker(symbol).await?;
        let spread = spread_pips(ticker.best_bid()?, ticker.best_ask()?);
        if spread > config.max_spread_pips {
            tracing::warn!(
                symbol,
                spread_pips = spread,
                max_spread_pips = config.max_spread_pips,
                "Spread too wide, aborting entry"
            );
            return Ok(TickOutcome::SpreadTooWide { spread_pips: spread });
        }

        let entry_price = ticker.last()?;
        let levels = protective_levels(side, entry_price, config.stop_loss_pips, config.take_profit_pips);
        let size = calculate_position_size(balance, config.risk_percent, entry_price, levels.stop_loss);
        if size <= 0.0 {
            return Err(BotError::InvalidSizing(format!(
                "zero size for entry {} with stop {}",
                entry_price, levels.stop_loss
            )));
        }

        let current = self.broker.get_balance(&quote).await?.available()?;
        if current < entry_price * size {
            return Err(BotError::InvalidSizing(format!(
                "balance {:.2} no longer covers {:.6} @ {:.2}",
                current, size, entry_price
            )));
        }

        self.set_state(TickState::Entering);
        let mut trade = self.enter(&config, side, size, entry_price).await?;

        if trade.status == TradeStatus::Cancelled {
            return Ok(TickOutcome::EntryCancelled { trade_id: trade.id });
        }

        self.protect(&mut trade, &config).await
    }

    /// Submit the entry order and persist the trade with what is known of its fill
    ///
    /// An accepted market order is treated as filled unless the re-query
    /// reports it cancelled or rejected. Missing fill data falls back to the
    /// requested size and the ticker price.
    async fn enter(&self, config: &BotConfig, side: Side, size: f64, entry_price: f64) -> Result<Trade> {
        let symbol = config.symbol.as_str();
        let order = self.broker.place_market_order(symbol, side, size).await?;
        let fill = self.refresh_order(symbol, &order).await;

        let confirmed = fill.is_filled() || order.is_filled();
        let fill_size = Some(fill.filled_size()).filter(|s| *s > 0.0).unwrap_or(size);
        let price = fill_price(&fill).unwrap_or(entry_price);

        let mut trade = Trade::new(order.order_id.clone(), symbol.to_string(), side, price, fill_size);
        let dead = !confirmed && matches!(fill.status, OrderStatus::Cancelled | OrderStatus::Rejected);
        if dead {
            trade.status = TradeStatus::Cancelled;
            trade.closed_at = Some(Utc::now());
            trade.note = Some(match fill.status {
                OrderStatus::Rejected => "Entry order rejected by the broker".to_string(),
                _ => "Entry order cancelled by the broker".to_string(),
            });
        } else {
            trade.status = TradeStatus::Filled;
        }
        self.trades.insert_trade(&trade).await?;

        if dead {
            tracing::warn!(trade_id = %trade.id, order_id = %trade.order_id, status = ?fill.status, "Entry order not executed");
            return Ok(trade);
        }
        if !confirmed {
            tracing::warn!(
                trade_id = %trade.id,
                order_id = %trade.order_id,
                "Fill not confirmed, assuming requested size at ticker price"
            );
        }

        tracing::info!(
            trade_id = %trade.id,
            order_id = %trade.order_id,
            symbol,
            %side,
            price,
            size = fill_size,
            confirmed,
            "✅ Entry order placed"
        );
        Ok(trade)
    }

    /// Place whichever protective orders `trade` is missing
    ///
    /// Stop-loss is mandatory; when it cannot be placed the position is
    /// safety-closed in the same call. Take-profit failure only warns.
    async fn protect(&self, trade: &mut Trade, config: &BotConfig) -> Result<TickOutcome> {
        self.set_state(TickState::ProtectingPosition);

        let symbol = trade.symbol.clone();
        let exit_side = trade.side.opposite();
        // levels already recorded for this trade win over the current config
        let levels = match (trade.stop_loss, trade.take_profit) {
            (Some(stop_loss), Some(take_profit)) => ProtectiveLevels { stop_loss, take_profit },
            _ => protective_levels(trade.side, trade.price, config.stop_loss_pips, config.take_profit_pips),
        };
        trade.stop_loss = Some(levels.stop_loss);
        trade.take_profit = Some(levels.take_profit);

        let mut stop_loss_error = None;
        if trade.stop_loss_order_id.is_none() {
            match self
                .broker
                .place_stop_loss_order(&symbol, exit_side, trade.size, levels.stop_loss)
                .await
            {
                Ok(order) => {
                    tracing::info!(trade_id = %trade.id, order_id = %order.order_id, stop = levels.stop_loss, "🛡️ Stop-loss placed");
                    trade.stop_loss_order_id = Some(order.order_id);
                }
                Err(e) => {
                    tracing::error!(trade_id = %trade.id, "Stop-loss placement failed: {}", e);
                    stop_loss_error = Some(BotError::ProtectionFailure(e.to_string()));
                }
            }
        }

        if trade.take_profit_order_id.is_none() {
            match self
                .broker
                .place_take_profit_order(&symbol, exit_side, trade.size, levels.take_profit)
                .await
            {
                Ok(order) => {
                    tracing::info!(trade_id = %trade.id, order_id = %order.order_id, target = levels.take_profit, "🎯 Take-profit placed");
                    trade.take_profit_order_id = Some(order.order_id);
                }
                Err(e) => {
                    tracing::warn!(
                        trade_id = %trade.id,
                        "Take-profit placement failed, position protected by stop-loss only: {}",
                        e
                    );
                }
            }
        }

        if let Some(cause) = stop_loss_error {
            self.safety_close(trade, &cause).await?;
            return Ok(TickOutcome::SafetyClosed { trade_id: trade.id });
        }

        self.trades.update_trade(trade).await?;
        Ok(TickOutcome::Protected {
            trade_id: trade.id,
            take_profit: trade.take_profit_order_id.is_some(),
        })
    }

    /// Close an unprotected position; the trade ends up `closed` either way
    async fn safety_close(&self, trade: &mut Trade, cause: &BotError) -> Result<()> {
        self.set_state(TickState::SafetyClosing);
        tracing::warn!(trade_id = %trade.id, symbol = %trade.symbol, "⚠️ Safety-closing unprotected position");

        match self.close_position(trade, CloseReason::SafetyClose).await {
            Ok(()) => {
                trade.note = Some(format!("Safety close after {}", cause));
            }
            Err(e) => {
                tracing::error!(trade_id = %trade.id, "Safety close failed: {}", e);
                trade.status = TradeStatus::Closed;
                trade.closed_at = Some(Utc::now());
                trade.note = Some(format!(
                    "{}; safety close failed: {}. Position may still be open at the broker",
                    cause, e
                ));
            }
        }

        self.trades.update_trade(trade).await
    }

    /// Cancel resting protective orders, release funds and exit at market
    ///
    /// Mutates `trade` in memory only; callers persist it.
    async fn close_position(&self, trade: &mut Trade, reason: CloseReason) -> Result<()> {
        let symbol = trade.symbol.clone();
        let cancelled = self.cancel_protective_orders(trade).await;
        if cancelled > 0 {
            tokio::time::sleep(self.options.balance_release_delay).await;
        }

        let order = self
            .broker
            .place_market_order(&symbol, trade.side.opposite(), trade.size)
            .await?;
        let fill = self.refresh_order(&symbol, &order).await;

        let exit_price = match fill_price(&fill) {
            Some(price) => price,
            None => self.last_price(&symbol).await.unwrap_or(trade.price),
        };

        trade.close_at(exit_price);
        trade.note = Some(reason.describe().to_string());

        tracing::info!(
            trade_id = %trade.id,
            symbol = %symbol,
            exit_price,
            profit = trade.profit.unwrap_or(0.0),
            ?reason,
            "🔚 Trade closed"
        );
        Ok(())
    }

    /// Close at market; if the exit order fails, put protection back before erroring
    async fn close_or_restore(&self, trade: &mut Trade, reason: CloseReason, config: &BotConfig) -> Result<()> {
        let error = match self.close_position(trade, reason).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        tracing::error!(trade_id = %trade.id, ?reason, "Exit order failed, restoring protection: {}", error);
        match self.sync_protection(trade, config).await {
            Ok(outcome) => tracing::info!(trade_id = %trade.id, ?outcome, "Protection restored after failed exit"),
            Err(e) => tracing::error!(trade_id = %trade.id, "Restoring protection failed: {}", e),
        }
        Err(error)
    }

    /// Cancel resting stop-loss/take-profit orders for the trade's symbol
    async fn cancel_protective_orders(&self, trade: &Trade) -> usize {
        let symbol = trade.symbol.as_str();
        let ids: Vec<String> = match self.broker.get_open_orders(symbol).await {
            Ok(orders) => orders
                .into_iter()
                .filter(|o| o.is_protective() && o.is_resting())
                .map(|o| o.order_id)
                .collect(),
            Err(e) => {
                tracing::warn!(symbol, "Could not list open orders, cancelling known ids: {}", e);
                trade
                    .stop_loss_order_id
                    .iter()
                    .chain(trade.take_profit_order_id.iter())
                    .cloned()
                    .collect()
            }
        };

        let mut cancelled = 0;
        for id in ids {
            match self.broker.cancel_order(symbol, &id).await {
                Ok(()) => {
                    tracing::debug!(symbol, order_id = %id, "Protective order cancelled");
                    cancelled += 1;
                }
                Err(e) => tracing::warn!(symbol, order_id = %id, "Cancel failed: {}", e),
            }
        }
        cancelled
    }

    /// Handle the one non-terminal trade for the symbol
    async fn manage_open_trade(&self, mut trade: Trade, config: &BotConfig) -> Result<TickOutcome> {
        if matches!(trade.status, TradeStatus::Pending | TradeStatus::Unknown) {
            return self.resolve_entry(trade, config, false).await;
        }

        if let Some(outcome) = self.sync_protection(&mut trade, config).await? {
            return Ok(outcome);
        }

        if config.close_on_reversal && self.reversal_against(&trade, config).await? {
            self.close_or_restore(&mut trade, CloseReason::Reversal, config).await?;
            self.trades.update_trade(&trade).await?;
            return Ok(TickOutcome::PositionClosed {
                trade_id: trade.id,
                reason: CloseReason::Reversal,
            });
        }

        Ok(TickOutcome::PositionOpen { trade_id: trade.id })
    }

    /// Settle an entry whose fill was not confirmed; `cancel_unfilled` cancels it
    async fn resolve_entry(&self, mut trade: Trade, config: &BotConfig, cancel_unfilled: bool) -> Result<TickOutcome> {
        let order = self.broker.get_order(&trade.symbol, &trade.order_id).await?;

        if order.is_filled() {
            if order.filled_size() > 0.0 {
                trade.size = order.filled_size();
            }
            if let Some(price) = fill_price(&order) {
                trade.price = price;
            }
            trade.status = TradeStatus::Filled;
            self.trades.update_trade(&trade).await?;
            tracing::info!(trade_id = %trade.id, price = trade.price, "Entry fill confirmed");
            return self.protect(&mut trade, config).await;
        }

        let dead = matches!(order.status, OrderStatus::Cancelled | OrderStatus::Rejected);
        if dead || cancel_unfilled {
            if !dead {
                if let Err(e) = self.broker.cancel_order(&trade.symbol, &trade.order_id).await {
                    tracing::warn!(trade_id = %trade.id, "Cancelling pending entry failed: {}", e);
                }
            }
            trade.status = TradeStatus::Cancelled;
            trade.closed_at = Some(Utc::now());
            trade.note = Some(if dead {
                "Entry order was cancelled or rejected before filling".to_string()
            } else {
                "Unfilled entry cancelled on restart".to_string()
            });
            self.trades.update_trade(&trade).await?;
            tracing::info!(trade_id = %trade.id, "Pending entry cancelled");
            return Ok(TickOutcome::EntryCancelled { trade_id: trade.id });
        }

        Ok(TickOutcome::EntryPending { trade_id: trade.id })
    }

    /// Close the trade if a protective order filled, re-place missing ones
    ///
    /// Returns `None` when the position stays open and fully protected.
    async fn sync_protection(&self, trade: &mut Trade, config: &BotConfig) -> Result<Option<TickOutcome>> {
        let stop_loss = self.lookup(&trade.symbol, trade.stop_loss_order_id.as_deref()).await?;
        let take_profit = self.lookup(&trade.symbol, trade.take_profit_order_id.as_deref()).await?;

        let fills = [
            (&stop_loss, &take_profit, CloseReason::StopLoss, trade.stop_loss),
            (&take_profit, &stop_loss, CloseReason::TakeProfit, trade.take_profit),
        ];
        for (order, other, reason, level) in fills {
            let order = match order {
                Some(order) if order.is_filled() => order,
                _ => continue,
            };

            if let Some(other) = other.as_ref().filter(|o| o.is_resting()) {
                if let Err(e) = self.broker.cancel_order(&trade.symbol, &other.order_id).await {
                    tracing::warn!(trade_id = %trade.id, order_id = %other.order_id, "Cancel failed: {}", e);
                }
            }

            let exit_price = fill_price(order).or(level).unwrap_or(trade.price);
            trade.close_at(exit_price);
            trade.note = Some(reason.describe().to_string());
            self.trades.update_trade(trade).await?;

            tracing::info!(
                trade_id = %trade.id,
                exit_price,
                profit = trade.profit.unwrap_or(0.0),
                ?reason,
                "🔚 Protective order filled"
            );
            return Ok(Some(TickOutcome::PositionClosed {
                trade_id: trade.id,
                reason,
            }));
        }

        let gone = |order: &Option<Order>| {
            order
                .as_ref()
                .map_or(true, |o| matches!(o.status, OrderStatus::Cancelled | OrderStatus::Rejected))
        };
        let missing_stop = gone(&stop_loss);
        let missing_target = gone(&take_profit);
        if !missing_stop && !missing_target {
            return Ok(None);
        }

        if missing_stop {
            trade.stop_loss_order_id = None;
        }
        if missing_target {
            trade.take_profit_order_id = None;
        }
        tracing::info!(trade_id = %trade.id, missing_stop, missing_target, "Re-establishing protection");
        self.protect(trade, config).await.map(Some)
    }

    async fn lookup(&self, symbol: &str, order_id: Option<&str>) -> Result<Option<Order>> {
        match order_id {
            Some(id) => Ok(Some(self.broker.get_order(symbol, id).await?)),
            None => Ok(None),
        }
    }

    async fn reversal_against(&self, trade: &Trade, config: &BotConfig) -> Result<bool> {
        let candles = self
            .broker
            .get_klines(&config.symbol, config.timeframe, None, None, Some(config.candle_limit))
            .await?;
        let engine = SignalEngine::new(config.signal_config())?;
        let indicators = IndicatorSet::compute(&candles, engine.config())?;

        Ok(engine.crossover_at(&indicators, candles.len() - 1) == Some(trade.side.opposite()))
    }

    async fn refresh_order(&self, symbol: &str, order: &Order) -> Order {
        tokio::time::sleep(self.options.fill_poll_delay).await;
        match self.broker.get_order(symbol, &order.order_id).await {
            Ok(refreshed) => refreshed,
            Err(e) => {
                tracing::warn!(order_id = %order.order_id, "Order re-query failed: {}", e);
                order.clone()
            }
        }
    }

    async fn last_price(&self, symbol: &str) -> Option<f64> {
        match self.broker.get_ticker(symbol).await {
            Ok(ticker) => ticker.last().ok(),
            Err(e) => {
                tracing::warn!(symbol, "Ticker unavailable for exit price: {}", e);
                None
            }
        }
    }

    /// Bring stored trades in line with the broker after a (re)start
    ///
    /// Unfilled entries are cancelled; filled positions get any missing
    /// protective orders back.
    pub async fn reconcile(&self) -> Result<()> {
        let _guard = self.acquire().await;
        let config = match self.configs.active_config().await? {
            Some(config) => config,
            None => return Ok(()),
        };

        self.cancel_stray_orders(&config.symbol).await;

        for trade in self.trades.open_trades(&config.symbol).await? {
            let trade_id = trade.id;
            let result = match trade.status {
                TradeStatus::Pending | TradeStatus::Unknown => {
                    self.resolve_entry(trade, &config, true).await
                }
                _ => {
                    let mut trade = trade;
                    self.sync_protection(&mut trade, &config)
                        .await
                        .map(|outcome| outcome.unwrap_or(TickOutcome::PositionOpen { trade_id }))
                }
            };

            match result {
                Ok(outcome) => tracing::info!(trade_id = %trade_id, ?outcome, "Reconciled trade"),
                Err(e) => tracing::error!(trade_id = %trade_id, "Reconcile failed: {}", e),
            }
        }

        self.set_state(TickState::Idle);
        Ok(())
    }

    /// Cancel pending entries and optionally close every open position
    pub async fn shutdown(&self, close_open_trades: bool) -> Result<()> {
        let _guard = self.acquire().await;
        let config = match self.configs.active_config().await? {
            Some(config) => config,
            None => return Ok(()),
        };

        self.cancel_stray_orders(&config.symbol).await;

        for trade in self.trades.open_trades(&config.symbol).await? {
            let trade_id = trade.id;
            let result = match trade.status {
                TradeStatus::Pending | TradeStatus::Unknown => {
                    self.resolve_entry(trade, &config, true).await.map(|_| ())
                }
                _ if close_open_trades => {
                    let mut trade = trade;
                    match self.close_or_restore(&mut trade, CloseReason::Shutdown, &config).await {
                        Ok(()) => self.trades.update_trade(&trade).await,
                        Err(e) => Err(e),
                    }
                }
                _ => Ok(()),
            };

            if let Err(e) = result {
                tracing::error!(trade_id = %trade_id, "Shutdown handling failed: {}", e);
            }
        }

        self.set_state(TickState::Idle);
        Ok(())
    }

    /// Cancel resting non-protective orders, e.g. limit entries left behind
    async fn cancel_stray_orders(&self, symbol: &str) {
        match self.broker.get_open_orders(symbol).await {
            Ok(orders) => {
                for order in orders.iter().filter(|o| !o.is_protective()) {
                    match self.broker.cancel_order(symbol, &order.order_id).await {
                        Ok(()) => tracing::info!(symbol, order_id = %order.order_id, "Cancelled pending order"),
                        Err(e) => tracing::warn!(symbol, order_id = %order.order_id, "Cancel failed: {}", e),
                    }
                }
            }
            Err(e) => tracing::warn!(symbol, "Could not list open orders: {}", e),
        }
    }

    /// Close one trade at market
    pub async fn close_trade(&self, trade_id: Uuid) -> Result<Trade> {
        let _guard = self.acquire().await;
        let mut trade = self
            .trades
            .get_trade(trade_id)
            .await?
            .ok_or_else(|| BotError::Persistence(format!("trade {} not found", trade_id)))?;

        match trade.status {
            TradeStatus::Closed | TradeStatus::Cancelled => return Ok(trade),
            TradeStatus::Pending | TradeStatus::Unknown => {
                if let Err(e) = self.broker.cancel_order(&trade.symbol, &trade.order_id).await {
                    tracing::warn!(trade_id = %trade.id, "Cancelling entry failed: {}", e);
                }
                trade.status = TradeStatus::Cancelled;
                trade.closed_at = Some(Utc::now());
                trade.note = Some(CloseReason::Manual.describe().to_string());
            }
            TradeStatus::Filled => {
                let config = self.configs.active_config().await?.unwrap_or_default();
                self.close_or_restore(&mut trade, CloseReason::Manual, &config).await?;
            }
        }

        self.trades.update_trade(&trade).await?;
        Ok(trade)
    }
}

/// Price an order filled at, from its fill data or its limit/trigger price
fn fill_price(order: &Order) -> Option<f64> {
    if !order.is_filled() {
        return None;
    }
    order.average_fill_price().or_else(|| {
        order
            .price
            .as_deref()
            .and_then(|p| parse_amount(p).ok())
            .filter(|p| *p > 0.0)
    })
}
