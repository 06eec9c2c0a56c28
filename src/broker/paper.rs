use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::Broker;
use crate::error::BotError;
use crate::models::{
    format_amount, Account, Balance, Candle, Order, OrderStatus, OrderType, Side, Ticker,
    Timeframe,
};
use crate::risk::sizing::PIPS_PER_UNIT;
use crate::Result;

/// Which paper broker operations should fail
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    pub market_orders: bool,
    /// Market orders that succeed before every further one fails
    pub market_orders_allowed: Option<usize>,
    pub stop_loss: bool,
    pub take_profit: bool,
    pub get_order: bool,
    pub cancel_order: bool,
    pub klines: bool,
    pub ticker: bool,
    pub balance: bool,
    /// Report fills as `unknown` status with nonzero fill data
    pub report_unknown_status: bool,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    order: Order,
    size: f64,
    trigger: Option<f64>,
}

#[derive(Debug)]
struct PaperState {
    candles: Vec<Candle>,
    price: f64,
    spread_pips: f64,
    balances: BTreeMap<String, f64>,
    orders: BTreeMap<String, PaperOrder>,
    next_order_id: u64,
    market_orders_placed: usize,
    failures: FailurePlan,
    calls: Vec<String>,
}

/// In-memory exchange for dry runs and tests
///
/// Market orders are acknowledged as `pending` and report their fill on
/// the next `get_order`, like an exchange that settles asynchronously.
/// Stop-loss, take-profit and limit orders rest until a price update
/// crosses their trigger.
pub struct PaperBroker {
    symbol: String,
    base: String,
    quote: String,
    state: Mutex<PaperState>,
}

fn split_symbol(symbol: &str) -> (String, String) {
    let mut parts = symbol.splitn(2, |c: char| matches!(c, '-' | '/' | '_'));
    let base = parts.next().unwrap_or(symbol).to_string();
    let quote = parts.next().unwrap_or("USD").to_string();
    (base, quote)
}

impl PaperBroker {
    pub fn new(symbol: &str, quote_balance: f64) -> Self {
        let (base, quote) = split_symbol(symbol);
        let mut balances = BTreeMap::new();
        balances.insert(quote.clone(), quote_balance);
        balances.insert(base.clone(), 0.0);

        Self {
            symbol: symbol.to_string(),
            base,
            quote,
            state: Mutex::new(PaperState {
                candles: Vec::new(),
                price: 0.0,
                spread_pips: 0.0,
                balances,
                orders: BTreeMap::new(),
                next_order_id: 1,
                market_orders_placed: 0,
                failures: FailurePlan::default(),
                calls: Vec::new(),
            }),
        }
    }

    /// Seed candle history; the last close becomes the current price
    pub fn with_candles(self, candles: Vec<Candle>) -> Self {
        {
            let mut state = self.state();
            if let Some(last) = candles.last() {
                state.price = last.close;
            }
            state.candles = candles;
        }
        self
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_failures(&self, failures: FailurePlan) {
        self.state().failures = failures;
    }

    /// Quoted spread around the last price, in pips
    pub fn set_spread_pips(&self, spread_pips: f64) {
        self.state().spread_pips = spread_pips;
    }

    pub fn set_balance(&self, currency: &str, amount: f64) {
        self.state().balances.insert(currency.to_string(), amount);
    }

    pub fn balance_of(&self, currency: &str) -> f64 {
        self.state().balances.get(currency).copied().unwrap_or(0.0)
    }

    /// Move the market, filling any resting order the price crosses
    pub fn set_price(&self, price: f64) {
        let mut state = self.state();
        state.price = price;
        self.trigger_resting(&mut state);
    }

    /// Append a candle and move the market to its close
    pub fn push_candle(&self, candle: Candle) {
        let mut state = self.state();
        state.candles.push(candle);
        state.price = candle.close;
        self.trigger_resting(&mut state);
    }

    pub fn candle_count(&self) -> usize {
        self.state().candles.len()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.state().orders.values().map(|o| o.order.clone()).collect()
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.state().orders.get(order_id).map(|o| o.order.clone())
    }

    /// Names of the broker operations invoked so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    fn record(state: &mut PaperState, call: &str) {
        state.calls.push(call.to_string());
    }

    fn check_symbol(&self, symbol: &str) -> Result<()> {
        if symbol == self.symbol {
            Ok(())
        } else {
            Err(BotError::broker(format!("unsupported symbol {}", symbol)))
        }
    }

    fn next_id(state: &mut PaperState) -> String {
        let id = format!("paper-{}", state.next_order_id);
        state.next_order_id += 1;
        id
    }

    fn settle(&self, state: &mut PaperState, side: Side, size: f64, price: f64) {
        let value = size * price;
        let (quote_delta, base_delta) = match side {
            Side::Buy => (-value, size),
            Side::Sell => (value, -size),
        };
        *state.balances.entry(self.quote.clone()).or_insert(0.0) += quote_delta;
        *state.balances.entry(self.base.clone()).or_insert(0.0) += base_delta;
    }

    fn fill(&self, state: &mut PaperState, order_id: &str, price: f64) {
        let (side, size) = match state.orders.get(order_id) {
            Some(o) => (o.order.side, o.size),
            None => return,
        };
        self.settle(state, side, size, price);

        let unknown = state.failures.report_unknown_status;
        if let Some(entry) = state.orders.get_mut(order_id) {
            entry.order.status = if unknown {
                OrderStatus::Unknown
            } else {
                OrderStatus::Filled
            };
            entry.order.filled_size = format_amount(size);
            entry.order.filled_value = format_amount(size * price);
            entry.order.price = Some(format_amount(price));
        }
    }

    fn trigger_resting(&self, state: &mut PaperState) {
        let price = state.price;
        let triggered: Vec<(String, f64)> = state
            .orders
            .values()
            .filter(|o| o.order.is_resting() && o.order.order_type != OrderType::Market)
            .filter_map(|o| {
                let trigger = o.trigger?;
                let hit = match (o.order.order_type, o.order.side) {
                    (OrderType::StopLoss, Side::Sell) => price <= trigger,
                    (OrderType::StopLoss, Side::Buy) => price >= trigger,
                    (OrderType::TakeProfit | OrderType::Limit, Side::Sell) => price >= trigger,
                    (OrderType::TakeProfit | OrderType::Limit, Side::Buy) => price <= trigger,
                    (OrderType::Market, _) => false,
                };
                hit.then(|| (o.order.order_id.clone(), trigger))
            })
            .collect();

        for (order_id, trigger) in triggered {
            tracing::debug!(order_id = %order_id, trigger, "Paper order triggered");
            self.fill(state, &order_id, trigger);
        }
    }

    fn rest_order(
        &self,
        state: &mut PaperState,
        side: Side,
        order_type: OrderType,
        size: f64,
        trigger: f64,
    ) -> Result<Order> {
        if size <= 0.0 || trigger <= 0.0 {
            return Err(BotError::broker("size and price must be positive"));
        }

        let order = Order {
            order_id: Self::next_id(state),
            symbol: self.symbol.clone(),
            side,
            order_type,
            status: OrderStatus::Open,
            size: format_amount(size),
            price: Some(format_amount(trigger)),
            filled_size: "0".to_string(),
            filled_value: "0".to_string(),
        };
        state.orders.insert(
            order.order_id.clone(),
            PaperOrder {
                order: order.clone(),
                size,
                trigger: Some(trigger),
            },
        );
        Ok(order)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        let mut state = self.state();
        Self::record(&mut state, "get_accounts");
        Ok(state
            .balances
            .iter()
            .map(|(currency, amount)| Account {
                id: format!("paper-{}", currency.to_lowercase()),
                currency: currency.clone(),
                balance: Balance {
                    currency: currency.clone(),
                    available: format_amount(amount.max(0.0)),
                    hold: "0".to_string(),
                },
            })
            .collect())
    }

    async fn get_balance(&self, currency: &str) -> Result<Balance> {
        let mut state = self.state();
        Self::record(&mut state, "get_balance");
        if state.failures.balance {
            return Err(BotError::broker("balance endpoint unavailable"));
        }
        let amount = state.balances.get(currency).copied().unwrap_or(0.0);
        Ok(Balance {
            currency: currency.to_string(),
            available: format_amount(amount.max(0.0)),
            hold: "0".to_string(),
        })
    }

    async fn get_klines(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        let mut state = self.state();
        Self::record(&mut state, "get_klines");
        self.check_symbol(symbol)?;
        if state.failures.klines {
            return Err(BotError::broker("klines request timed out"));
        }

        let mut candles: Vec<Candle> = state
            .candles
            .iter()
            .filter(|c| start.map_or(true, |s| c.time >= s))
            .filter(|c| end.map_or(true, |e| c.time <= e))
            .copied()
            .collect();

        if let Some(limit) = limit {
            let skip = candles.len().saturating_sub(limit);
            candles.drain(..skip);
        }
        Ok(candles)
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let mut state = self.state();
        Self::record(&mut state, "get_ticker");
        self.check_symbol(symbol)?;
        if state.failures.ticker {
            return Err(BotError::broker("ticker request timed out"));
        }

        let half_spread = state.price * state.spread_pips / PIPS_PER_UNIT / 2.0;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price: format_amount(state.price),
            bid: format_amount(state.price - half_spread),
            ask: format_amount(state.price + half_spread),
        })
    }

    async fn place_market_order(&self, symbol: &str, side: Side, size: f64) -> Result<Order> {
        let mut state = self.state();
        Self::record(&mut state, "place_market_order");
        self.check_symbol(symbol)?;

        let budget_spent = state
            .failures
            .market_orders_allowed
            .map_or(false, |allowed| state.market_orders_placed >= allowed);
        if state.failures.market_orders || budget_spent {
            return Err(BotError::broker("market order rejected"));
        }
        if size <= 0.0 {
            return Err(BotError::broker("order size must be positive"));
        }

        let price = state.price;
        if side == Side::Buy {
            let available = state.balances.get(&self.quote).copied().unwrap_or(0.0);
            if size * price > available * (1.0 + 1e-9) {
                return Err(BotError::broker(format!(
                    "insufficient {} balance: need {:.2}, have {:.2}",
                    self.quote,
                    size * price,
                    available
                )));
            }
        }

        let order = Order {
            order_id: Self::next_id(&mut state),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            status: OrderStatus::Pending,
            size: format_amount(size),
            price: None,
            filled_size: "0".to_string(),
            filled_value: "0".to_string(),
        };
        state.market_orders_placed += 1;
        state.orders.insert(
            order.order_id.clone(),
            PaperOrder {
                order: order.clone(),
                size,
                trigger: None,
            },
        );
        self.fill(&mut state, &order.order_id, price);

        Ok(order)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        price: f64,
    ) -> Result<Order> {
        let mut state = self.state();
        Self::record(&mut state, "place_limit_order");
        self.check_symbol(symbol)?;
        let order = self.rest_order(&mut state, side, OrderType::Limit, size, price)?;
        self.trigger_resting(&mut state);
        Ok(order)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let mut state = self.state();
        Self::record(&mut state, "cancel_order");
        self.check_symbol(symbol)?;
        if state.failures.cancel_order {
            return Err(BotError::broker("cancel rejected"));
        }

        let entry = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BotError::broker(format!("order {} not found", order_id)))?;
        if !entry.order.is_resting() {
            return Err(BotError::broker(format!(
                "order {} is {:?}, cannot cancel",
                order_id, entry.order.status
            )));
        }
        entry.order.status = OrderStatus::Cancelled;
        Ok(())
    }

    async fn get_order(&self, symbol: &str, order_id: &str) -> Result<Order> {
        let mut state = self.state();
        Self::record(&mut state, "get_order");
        self.check_symbol(symbol)?;
        if state.failures.get_order {
            return Err(BotError::broker("order lookup timed out"));
        }
        state
            .orders
            .get(order_id)
            .map(|o| o.order.clone())
            .ok_or_else(|| BotError::broker(format!("order {} not found", order_id)))
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<Order>> {
        let mut state = self.state();
        Self::record(&mut state, "get_open_orders");
        self.check_symbol(symbol)?;
        Ok(state
            .orders
            .values()
            .filter(|o| o.order.is_resting())
            .map(|o| o.order.clone())
            .collect())
    }

    async fn place_stop_loss_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        stop_price: f64,
    ) -> Result<Order> {
        let mut state = self.state();
        Self::record(&mut state, "place_stop_loss_order");
        self.check_symbol(symbol)?;
        if state.failures.stop_loss {
            return Err(BotError::broker("stop-loss order rejected"));
        }
        self.rest_order(&mut state, side, OrderType::StopLoss, size, stop_price)
    }

    async fn place_take_profit_order(
        &self,
        symbol: &str,
        side: Side,
        size: f64,
        price: f64,
    ) -> Result<Order> {
        let mut state = self.state();
        Self::record(&mut state, "place_take_profit_order");
        self.check_symbol(symbol)?;
        if state.failures.take_profit {
            return Err(BotError::broker("take-profit order rejected"));
        }
        self.rest_order(&mut state, side, OrderType::TakeProfit, size, price)
    }

    async fn is_symbol_supported(&self, symbol: &str) -> Result<bool> {
        let mut state = self.state();
        Self::record(&mut state, "is_symbol_supported");
        Ok(symbol == self.symbol)
    }
}
