use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BotError;
use crate::Result;

/// OHLCV candlestick, `time` in unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.time, 0).unwrap_or_default()
    }
}

/// Candle timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Timeframe {
    pub fn seconds(&self) -> i64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 300,
            Self::FifteenMinutes => 900,
            Self::ThirtyMinutes => 1_800,
            Self::OneHour => 3_600,
            Self::FourHours => 14_400,
            Self::OneDay => 86_400,
        }
    }

    /// How often the live loop polls for this candle size
    pub fn poll_interval_minutes(&self) -> u64 {
        match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 2,
            Self::FifteenMinutes => 5,
            Self::ThirtyMinutes => 10,
            Self::OneHour => 15,
            Self::FourHours => 30,
            Self::OneDay => 60,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "30m" => Ok(Self::ThirtyMinutes),
            "1h" => Ok(Self::OneHour),
            "4h" => Ok(Self::FourHours),
            "1d" => Ok(Self::OneDay),
            other => Err(BotError::Config(format!("unknown timeframe '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("buy"),
            Self::Sell => f.write_str("sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Buy,
    Sell,
    None,
}

impl SignalKind {
    pub fn side(&self) -> Option<Side> {
        match self {
            Self::Buy => Some(Side::Buy),
            Self::Sell => Some(Side::Sell),
            Self::None => None,
        }
    }
}

/// Trading signal derived from two adjacent indicator points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub fast_value: f64,
    pub slow_value: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Open,
    Filled,
    Cancelled,
    Rejected,
    Unknown,
}

/// Broker order as seen by the core. Amounts stay decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub size: String,
    pub price: Option<String>,
    pub filled_size: String,
    pub filled_value: String,
}

impl Order {
    pub fn filled_size(&self) -> f64 {
        parse_amount(&self.filled_size).unwrap_or(0.0)
    }

    pub fn filled_value(&self) -> f64 {
        parse_amount(&self.filled_value).unwrap_or(0.0)
    }

    /// `unknown` with nonzero fill data counts as filled
    pub fn is_filled(&self) -> bool {
        match self.status {
            OrderStatus::Filled => true,
            OrderStatus::Unknown => self.filled_size() > 0.0 || self.filled_value() > 0.0,
            _ => false,
        }
    }

    pub fn is_resting(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Open)
    }

    pub fn is_protective(&self) -> bool {
        matches!(self.order_type, OrderType::StopLoss | OrderType::TakeProfit)
    }

    /// Average fill price, when the broker reported both size and value
    pub fn average_fill_price(&self) -> Option<f64> {
        let size = self.filled_size();
        let value = self.filled_value();
        if size > 0.0 && value > 0.0 {
            Some(value / size)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: String,
    pub bid: String,
    pub ask: String,
}

impl Ticker {
    pub fn last(&self) -> Result<f64> {
        parse_amount(&self.price)
    }

    pub fn best_bid(&self) -> Result<f64> {
        parse_amount(&self.bid)
    }

    pub fn best_ask(&self) -> Result<f64> {
        parse_amount(&self.ask)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub available: String,
    pub hold: String,
}

impl Balance {
    pub fn available(&self) -> Result<f64> {
        parse_amount(&self.available)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub currency: String,
    pub balance: Balance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Filled,
    Closed,
    Cancelled,
    Unknown,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }

    /// Counts toward the one-position-per-symbol limit
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

/// Live trade record, persisted by a [`crate::persistence::TradeStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: f64,
    pub size: f64,
    pub status: TradeStatus,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
    pub exit_price: Option<f64>,
    pub profit: Option<f64>,
    pub profit_percent: Option<f64>,
    pub note: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn new(order_id: String, symbol: String, side: Side, price: f64, size: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            symbol,
            side,
            order_type: OrderType::Market,
            price,
            size,
            status: TradeStatus::Pending,
            stop_loss: None,
            take_profit: None,
            stop_loss_order_id: None,
            take_profit_order_id: None,
            exit_price: None,
            profit: None,
            profit_percent: None,
            note: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Realized profit for an exit at `exit_price`
    pub fn realized_profit(&self, exit_price: f64) -> (f64, f64) {
        realized_profit(self.side, self.price, exit_price, self.size)
    }

    /// Mark closed at `exit_price`, recording realized profit
    pub fn close_at(&mut self, exit_price: f64) {
        let (profit, profit_percent) = self.realized_profit(exit_price);
        self.exit_price = Some(exit_price);
        self.profit = Some(profit);
        self.profit_percent = Some(profit_percent);
        self.status = TradeStatus::Closed;
        self.closed_at = Some(Utc::now());
    }
}

/// Profit and profit percent of a position of `size` from `entry` to `exit`
pub fn realized_profit(side: Side, entry: f64, exit: f64, size: f64) -> (f64, f64) {
    let per_unit = match side {
        Side::Buy => exit - entry,
        Side::Sell => entry - exit,
    };
    let percent = if entry > 0.0 { per_unit / entry * 100.0 } else { 0.0 };
    (per_unit * size, percent)
}

/// Parse a broker decimal-as-string amount
pub fn parse_amount(value: &str) -> Result<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }
    let decimal = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))?;
    decimal
        .to_f64()
        .ok_or_else(|| BotError::broker(format!("amount out of range: {}", value)))
}

/// Format an amount for the broker
pub fn format_amount(value: f64) -> String {
    Decimal::from_f64_retain(value)
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: OrderStatus, filled_size: &str, filled_value: &str) -> Order {
        Order {
            order_id: "o-1".to_string(),
            symbol: "BTC-USD".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            status,
            size: "1".to_string(),
            price: None,
            filled_size: filled_size.to_string(),
            filled_value: filled_value.to_string(),
        }
    }

    #[test]
    fn test_unknown_status_with_fill_counts_as_filled() {
        assert!(order(OrderStatus::Unknown, "0.5", "50").is_filled());
        assert!(order(OrderStatus::Unknown, "0", "12.5").is_filled());
        assert!(!order(OrderStatus::Unknown, "0", "0").is_filled());
        assert!(!order(OrderStatus::Pending, "0.5", "50").is_filled());
    }

    #[test]
    fn test_average_fill_price() {
        assert_eq!(order(OrderStatus::Filled, "2", "200").average_fill_price(), Some(100.0));
        assert_eq!(order(OrderStatus::Filled, "0", "").average_fill_price(), None);
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("101.25").unwrap(), 101.25);
        assert_eq!(parse_amount("").unwrap(), 0.0);
        assert!(parse_amount("not-a-number").is_err());
    }

    #[test]
    fn test_realized_profit_mirrors_side() {
        let (buy, buy_pct) = realized_profit(Side::Buy, 100.0, 110.0, 2.0);
        assert_eq!(buy, 20.0);
        assert!((buy_pct - 10.0).abs() < 1e-9);

        let (sell, sell_pct) = realized_profit(Side::Sell, 100.0, 110.0, 2.0);
        assert_eq!(sell, -20.0);
        assert!((sell_pct + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_trade_status_terminal() {
        assert!(TradeStatus::Closed.is_terminal());
        assert!(TradeStatus::Cancelled.is_terminal());
        assert!(TradeStatus::Filled.is_open());
        assert!(TradeStatus::Unknown.is_open());
        assert!(TradeStatus::Pending.is_open());
        assert!(!TradeStatus::Closed.is_open());
    }

    #[test]
    fn test_timeframe_poll_interval() {
        assert_eq!(Timeframe::OneMinute.poll_interval_minutes(), 1);
        assert_eq!(Timeframe::FourHours.poll_interval_minutes(), 30);
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::FourHours);
        assert!("7m".parse::<Timeframe>().is_err());
    }
}
