//! Market data and order types shared by the core and the collaborators.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV bar, timestamped in exchange-local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        timestamp: NaiveDateTime,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// High minus low of this bar.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// Order bars by timestamp and drop duplicate timestamps (first one wins).
pub fn into_series(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    bars
}

/// Last traded price and session volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
}

/// Direction of a breakout trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order action that opens a position on this side.
    pub fn entry_action(self) -> OrderAction {
        match self {
            Side::Long => OrderAction::Buy,
            Side::Short => OrderAction::Sell,
        }
    }

    /// Order action that closes a position on this side.
    pub fn exit_action(self) -> OrderAction {
        match self {
            Side::Long => OrderAction::Sell,
            Side::Short => OrderAction::Buy,
        }
    }

    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order side as sent to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderAction::Buy => "BUY",
            OrderAction::Sell => "SELL",
        }
    }
}

/// Order price type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceType {
    Limit,
    Market,
}

impl PriceType {
    pub fn as_str(self) -> &'static str {
        match self {
            PriceType::Limit => "LIMIT",
            PriceType::Market => "MARKET",
        }
    }
}

/// Order handed to the broker collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub action: OrderAction,
    pub quantity: u64,
    pub price_type: PriceType,
    /// Limit price, or the reference price for a market order
    pub price: Decimal,
}

/// Broker response normalised at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub filled: bool,
    pub fill_price: Decimal,
    pub order_id: String,
}

// ==================== OpenAlgo wire types ====================

/// Common OpenAlgo response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: String,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }

    pub fn reason(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| format!("status={}", self.status))
    }
}

/// One candle from `/api/v1/history`.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryCandle {
    /// Epoch seconds
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

/// Quote payload from `/api/v1/quotes`.
#[derive(Debug, Clone, Deserialize)]
pub struct QuoteData {
    pub ltp: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

/// Order status payload from `/api/v1/orderstatus`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderStatusData {
    pub order_status: String,
    #[serde(default)]
    pub average_price: Decimal,
    #[serde(default)]
    pub price: Decimal,
}
