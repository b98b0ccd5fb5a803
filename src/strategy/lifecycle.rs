//! Trade lifecycle state machine.
//!
//! A trade moves PENDING -> OPEN -> CLOSED. While open it is evaluated on
//! every price observation:
//! - target hit closes with TARGET
//! - (possibly ratcheted) stop hit closes with STOP
//! - otherwise the progressive lock table may tighten the stop
//!
//! The manager never talks to the broker. It returns order intents and
//! events; the session runner places the orders and serializes calls per
//! trade.

use crate::error::{OrbError, OrbResult};
use crate::market::{OrderAction, OrderFill, Side};
use crate::strategy::levels::SideLevels;
use crate::strategy::lock_table::ProgressiveLockTable;
use crate::strategy::sizing::TickRounder;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Why a trade was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    Target,
    Stop,
    ForcedEod,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Target => "TARGET",
            ExitReason::Stop => "STOP",
            ExitReason::ForcedEod => "FORCED_EOD",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradeState {
    Pending,
    Open,
    Closed(ExitReason),
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeState::Pending => f.write_str("PENDING"),
            TradeState::Open => f.write_str("OPEN"),
            TradeState::Closed(reason) => write!(f, "CLOSED({})", reason),
        }
    }
}

/// One position for one instrument.
///
/// `entry_price`, `target_price` and `quantity` are fixed once the fill is
/// confirmed. `stop_price` only ever moves toward reduced risk.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveTrade {
    pub symbol: String,
    pub side: Side,
    /// Levels planned before the fill
    pub planned: SideLevels,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub quantity: u64,
    pub state: TradeState,
    pub order_id: Option<String>,
    pub opened_at: Option<NaiveDateTime>,
    pub closed_at: Option<NaiveDateTime>,
    pub exit_price: Option<Decimal>,
    /// Broker order id of the confirmed exit
    pub exit_order_id: Option<String>,
    /// Exit order sent but never reconciled with the broker
    pub pending_exit: Option<PendingExit>,
}

/// An exit order whose outcome the broker has not confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum PendingExit {
    /// Can be cancelled or looked up by id
    Order(String),
    /// Placement timed out before an id came back; only an operator can
    /// tell whether it executed
    Untracked,
}

impl From<Option<String>> for PendingExit {
    fn from(order_id: Option<String>) -> Self {
        order_id.map_or(PendingExit::Untracked, PendingExit::Order)
    }
}

impl ActiveTrade {
    pub fn is_pending(&self) -> bool {
        self.state == TradeState::Pending
    }

    pub fn is_open(&self) -> bool {
        self.state == TradeState::Open
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, TradeState::Closed(_))
    }

    pub fn exit_reason(&self) -> Option<ExitReason> {
        match self.state {
            TradeState::Closed(reason) => Some(reason),
            _ => None,
        }
    }

    /// Signed profit fraction relative to the entry price.
    pub fn profit_fraction(&self, price: Decimal) -> Decimal {
        if self.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        match self.side {
            Side::Long => (price - self.entry_price) / self.entry_price,
            Side::Short => (self.entry_price - price) / self.entry_price,
        }
    }

    /// Mark-to-market PnL at `price`.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        let per_share = match self.side {
            Side::Long => price - self.entry_price,
            Side::Short => self.entry_price - price,
        };
        per_share * Decimal::from(self.quantity)
    }

    /// PnL at the exit price, once closed.
    pub fn realized_pnl(&self) -> Option<Decimal> {
        self.exit_price.map(|p| self.pnl_at(p))
    }

    /// Record the broker's fill for the closing order.
    pub fn settle_exit(&mut self, fill_price: Decimal, order_id: impl Into<String>) {
        if !self.is_closed() {
            return;
        }
        if fill_price > Decimal::ZERO {
            self.exit_price = Some(fill_price);
        }
        self.exit_order_id = Some(order_id.into());
        self.pending_exit = None;
    }

    /// Closed, but the exit order has not been confirmed yet.
    pub fn awaiting_exit(&self) -> bool {
        self.is_closed() && self.exit_order_id.is_none()
    }

    /// Exit order for a closed trade.
    pub fn exit_intent(&self) -> Option<OrderIntent> {
        let reason = self.exit_reason()?;
        Some(OrderIntent::Exit {
            symbol: self.symbol.clone(),
            side: self.side,
            quantity: self.quantity,
            reason,
            reference_price: self.exit_price,
        })
    }

    fn is_more_favorable_stop(&self, candidate: Decimal) -> bool {
        match self.side {
            Side::Long => candidate > self.stop_price,
            Side::Short => candidate < self.stop_price,
        }
    }

    fn target_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price >= self.target_price,
            Side::Short => price <= self.target_price,
        }
    }

    fn stop_hit(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price <= self.stop_price,
            Side::Short => price >= self.stop_price,
        }
    }
}

/// Order the caller should send to the broker.
///
/// Entries carry no price: the executor prices them off the live quote at
/// send time.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderIntent {
    Entry {
        symbol: String,
        side: Side,
        quantity: u64,
    },
    Exit {
        symbol: String,
        side: Side,
        quantity: u64,
        reason: ExitReason,
        reference_price: Option<Decimal>,
    },
}

impl OrderIntent {
    pub fn symbol(&self) -> &str {
        match self {
            OrderIntent::Entry { symbol, .. } | OrderIntent::Exit { symbol, .. } => symbol,
        }
    }

    pub fn quantity(&self) -> u64 {
        match self {
            OrderIntent::Entry { quantity, .. } | OrderIntent::Exit { quantity, .. } => *quantity,
        }
    }

    pub fn action(&self) -> OrderAction {
        match self {
            OrderIntent::Entry { side, .. } => side.entry_action(),
            OrderIntent::Exit { side, .. } => side.exit_action(),
        }
    }

    /// Last observed price of an exit. `None` for entries and for exits
    /// forced without a quote.
    pub fn reference_price(&self) -> Option<Decimal> {
        match self {
            OrderIntent::Entry { .. } => None,
            OrderIntent::Exit {
                reference_price, ..
            } => *reference_price,
        }
    }
}

/// State change reported to the caller for logging and journaling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TradeEvent {
    Opened {
        symbol: String,
        side: Side,
        entry_price: Decimal,
        stop_price: Decimal,
        target_price: Decimal,
        quantity: u64,
    },
    StopRatcheted {
        symbol: String,
        from: Decimal,
        to: Decimal,
        profit_fraction: Decimal,
    },
    Closed {
        symbol: String,
        reason: ExitReason,
        price: Option<Decimal>,
    },
}

impl TradeEvent {
    pub fn symbol(&self) -> &str {
        match self {
            TradeEvent::Opened { symbol, .. }
            | TradeEvent::StopRatcheted { symbol, .. }
            | TradeEvent::Closed { symbol, .. } => symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TradeEvent::Opened { .. } => "opened",
            TradeEvent::StopRatcheted { .. } => "stop_ratcheted",
            TradeEvent::Closed { .. } => "closed",
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub events: Vec<TradeEvent>,
    pub exit: Option<OrderIntent>,
}

impl Evaluation {
    pub fn is_noop(&self) -> bool {
        self.events.is_empty() && self.exit.is_none()
    }
}

/// Drives [`ActiveTrade`] transitions.
#[derive(Debug, Clone)]
pub struct TradeLifecycleManager {
    lock_table: ProgressiveLockTable,
    ticks: TickRounder,
}

impl TradeLifecycleManager {
    pub fn new(lock_table: ProgressiveLockTable, ticks: TickRounder) -> Self {
        Self { lock_table, ticks }
    }

    pub fn lock_table(&self) -> &ProgressiveLockTable {
        &self.lock_table
    }

    /// Create a PENDING trade and the entry order for it.
    pub fn open_request(
        &self,
        symbol: &str,
        side: Side,
        planned: SideLevels,
        quantity: u64,
    ) -> (ActiveTrade, OrderIntent) {
        let trade = ActiveTrade {
            symbol: symbol.to_string(),
            side,
            planned,
            entry_price: planned.entry,
            stop_price: planned.stop,
            target_price: planned.target,
            quantity,
            state: TradeState::Pending,
            order_id: None,
            opened_at: None,
            closed_at: None,
            exit_price: None,
            exit_order_id: None,
            pending_exit: None,
        };
        let intent = OrderIntent::Entry {
            symbol: symbol.to_string(),
            side,
            quantity,
        };
        debug!(%symbol, %side, quantity, entry = %planned.entry, "Entry requested");
        (trade, intent)
    }

    /// PENDING -> OPEN on a confirmed fill.
    ///
    /// The entry price becomes the fill price. Stop and target come from
    /// the planned levels, tick-rounded.
    pub fn confirm_fill(
        &self,
        trade: &mut ActiveTrade,
        fill: &OrderFill,
        at: NaiveDateTime,
    ) -> OrbResult<TradeEvent> {
        if !trade.is_pending() {
            return Err(OrbError::InvalidTransition {
                symbol: trade.symbol.clone(),
                from: trade.state.to_string(),
                to: TradeState::Open.to_string(),
            });
        }
        if !fill.filled || fill.fill_price <= Decimal::ZERO {
            return Err(OrbError::order_rejected(
                &trade.symbol,
                format!("fill not confirmed (order {})", fill.order_id),
            ));
        }

        trade.entry_price = fill.fill_price;
        trade.stop_price = self.ticks.round(trade.planned.stop);
        trade.target_price = self.ticks.round(trade.planned.target);
        trade.order_id = Some(fill.order_id.clone());
        trade.opened_at = Some(at);
        trade.state = TradeState::Open;

        info!(
            symbol = %trade.symbol,
            side = %trade.side,
            entry = %trade.entry_price,
            stop = %trade.stop_price,
            target = %trade.target_price,
            quantity = trade.quantity,
            "Trade opened"
        );

        Ok(TradeEvent::Opened {
            symbol: trade.symbol.clone(),
            side: trade.side,
            entry_price: trade.entry_price,
            stop_price: trade.stop_price,
            target_price: trade.target_price,
            quantity: trade.quantity,
        })
    }

    /// Evaluate an OPEN trade at `price`. No-op for any other state.
    pub fn on_price(&self, trade: &mut ActiveTrade, price: Decimal, at: NaiveDateTime) -> Evaluation {
        if !trade.is_open() || price <= Decimal::ZERO {
            return Evaluation::default();
        }

        if trade.target_hit(price) {
            return self.close(trade, ExitReason::Target, Some(price), at);
        }
        if trade.stop_hit(price) {
            return self.close(trade, ExitReason::Stop, Some(price), at);
        }

        let mut evaluation = Evaluation::default();
        let profit = trade.profit_fraction(price);
        let best = self
            .lock_table
            .reached(profit)
            .map(|level| self.lock_price(trade, level.locked))
            .filter(|candidate| trade.is_more_favorable_stop(*candidate))
            .reduce(|a, b| match trade.side {
                Side::Long => a.max(b),
                Side::Short => a.min(b),
            });

        if let Some(new_stop) = best {
            let old_stop = trade.stop_price;
            trade.stop_price = new_stop;
            info!(
                symbol = %trade.symbol,
                from = %old_stop,
                to = %new_stop,
                %profit,
                "Stop ratcheted"
            );
            evaluation.events.push(TradeEvent::StopRatcheted {
                symbol: trade.symbol.clone(),
                from: old_stop,
                to: new_stop,
                profit_fraction: profit,
            });
        }
        evaluation
    }

    /// OPEN -> CLOSED(FORCED_EOD), whatever the price.
    ///
    /// Calling it on a trade that is not open does nothing, so a forced exit
    /// racing a stop or target close cannot emit a second exit order.
    pub fn force_exit(
        &self,
        trade: &mut ActiveTrade,
        last_price: Option<Decimal>,
        at: NaiveDateTime,
    ) -> Evaluation {
        if !trade.is_open() {
            return Evaluation::default();
        }
        self.close(trade, ExitReason::ForcedEod, last_price, at)
    }

    fn lock_price(&self, trade: &ActiveTrade, locked: Decimal) -> Decimal {
        let raw = match trade.side {
            Side::Long => trade.entry_price * (Decimal::ONE + locked),
            Side::Short => trade.entry_price * (Decimal::ONE - locked),
        };
        self.ticks.round(raw)
    }

    fn close(
        &self,
        trade: &mut ActiveTrade,
        reason: ExitReason,
        price: Option<Decimal>,
        at: NaiveDateTime,
    ) -> Evaluation {
        trade.state = TradeState::Closed(reason);
        trade.closed_at = Some(at);
        trade.exit_price = price;

        info!(
            symbol = %trade.symbol,
            side = %trade.side,
            %reason,
            price = ?price,
            stop = %trade.stop_price,
            "Trade closed"
        );

        Evaluation {
            events: vec![TradeEvent::Closed {
                symbol: trade.symbol.clone(),
                reason,
                price,
            }],
            exit: trade.exit_intent(),
        }
    }
}
