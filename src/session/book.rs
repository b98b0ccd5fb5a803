//! Per-session trade book.

use crate::strategy::ActiveTrade;
use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{info, warn};

/// Why the book refused a new trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookLimit {
    NotInitialized,
    DailyCap,
    ConcurrentCap,
    AlreadyTraded,
}

/// Trades of one session: at most one live trade per instrument, bounded by
/// the daily and concurrent caps.
#[derive(Debug)]
pub struct TradeBook {
    session_date: Option<NaiveDate>,
    max_trades_per_day: u32,
    max_concurrent: u32,
    trades: HashMap<String, ActiveTrade>,
    closed: Vec<ActiveTrade>,
    trades_today: u32,
}

impl TradeBook {
    pub fn new(max_trades_per_day: u32, max_concurrent: u32) -> Self {
        Self {
            session_date: None,
            max_trades_per_day,
            max_concurrent,
            trades: HashMap::new(),
            closed: Vec::new(),
            trades_today: 0,
        }
    }

    /// Start a session. Any state left from a previous day is dropped.
    pub fn init(&mut self, date: NaiveDate) {
        if self.session_date != Some(date) {
            if !self.trades.is_empty() {
                warn!(
                    stale = self.trades.len(),
                    "Dropping trades left over from previous session"
                );
            }
            self.trades.clear();
            self.closed.clear();
            self.trades_today = 0;
        }
        self.session_date = Some(date);
        info!(%date, "Trade book initialised");
    }

    /// End the session and hand back everything it traded.
    pub fn teardown(&mut self) -> Vec<ActiveTrade> {
        let mut all: Vec<ActiveTrade> = self.closed.drain(..).collect();
        all.extend(self.trades.drain().map(|(_, t)| t));
        info!(
            date = ?self.session_date,
            trades = all.len(),
            "Trade book torn down"
        );
        self.session_date = None;
        all
    }

    pub fn session_date(&self) -> Option<NaiveDate> {
        self.session_date
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    pub fn has_traded_today(&self) -> bool {
        self.trades_today > 0
    }

    /// Open plus pending trades.
    pub fn live_count(&self) -> usize {
        self.trades.values().filter(|t| !t.is_closed()).count()
    }

    /// Whether a new trade on `symbol` is allowed.
    pub fn check_admit(&self, symbol: &str) -> Result<(), BookLimit> {
        if self.session_date.is_none() {
            return Err(BookLimit::NotInitialized);
        }
        if self.trades_today >= self.max_trades_per_day {
            return Err(BookLimit::DailyCap);
        }
        if self.live_count() >= self.max_concurrent as usize {
            return Err(BookLimit::ConcurrentCap);
        }
        if self.trades.contains_key(symbol) || self.closed.iter().any(|t| t.symbol == symbol) {
            return Err(BookLimit::AlreadyTraded);
        }
        Ok(())
    }

    pub fn can_open(&self) -> bool {
        self.session_date.is_some()
            && self.trades_today < self.max_trades_per_day
            && self.live_count() < self.max_concurrent as usize
    }

    /// Add a trade that just opened. Counts against the daily cap.
    pub fn insert(&mut self, trade: ActiveTrade) -> Result<(), BookLimit> {
        self.check_admit(&trade.symbol)?;
        self.trades_today += 1;
        self.trades.insert(trade.symbol.clone(), trade);
        Ok(())
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut ActiveTrade> {
        self.trades.get_mut(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&ActiveTrade> {
        self.trades.get(symbol)
    }

    /// Symbols with an open trade, sorted.
    pub fn open_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .trades
            .values()
            .filter(|t| t.is_open())
            .map(|t| t.symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Closed trades whose exit order is not confirmed yet, sorted.
    pub fn awaiting_exit_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .trades
            .values()
            .filter(|t| t.awaiting_exit())
            .map(|t| t.symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Move a closed trade out of the live set.
    pub fn remove_closed(&mut self, symbol: &str) -> Option<&ActiveTrade> {
        let is_closed = self.trades.get(symbol).map(|t| t.is_closed())?;
        if !is_closed {
            return None;
        }
        let trade = self.trades.remove(symbol)?;
        self.closed.push(trade);
        self.closed.last()
    }

    pub fn closed(&self) -> &[ActiveTrade] {
        &self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{OrderFill, Side};
    use crate::strategy::{ProgressiveLockTable, SideLevels, TickRounder, TradeLifecycleManager};
    use crate::config::LockConfig;
    use rust_decimal_macros::dec;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    fn manager() -> TradeLifecycleManager {
        TradeLifecycleManager::new(
            ProgressiveLockTable::try_from(&LockConfig::default()).unwrap(),
            TickRounder::uniform(dec!(0.05)),
        )
    }

    fn open(m: &TradeLifecycleManager, symbol: &str) -> ActiveTrade {
        let levels = SideLevels {
            entry: dec!(100),
            stop: dec!(98),
            target: dec!(120),
            risk_per_share: dec!(2),
        };
        let (mut trade, _) = m.open_request(symbol, Side::Long, levels, 10);
        let fill = OrderFill {
            filled: true,
            fill_price: dec!(100),
            order_id: "1".into(),
        };
        m.confirm_fill(&mut trade, &fill, day().and_hms_opt(9, 31, 0).unwrap())
            .unwrap();
        trade
    }

    #[test]
    fn test_requires_init() {
        let book = TradeBook::new(1, 2);
        assert_eq!(book.check_admit("SBIN"), Err(BookLimit::NotInitialized));
        assert!(!book.can_open());
    }

    #[test]
    fn test_daily_cap() {
        let m = manager();
        let mut book = TradeBook::new(1, 2);
        book.init(day());

        book.insert(open(&m, "SBIN")).unwrap();
        assert!(book.has_traded_today());
        assert_eq!(book.insert(open(&m, "TCS")), Err(BookLimit::DailyCap));
    }

    #[test]
    fn test_concurrent_cap_and_duplicates() {
        let m = manager();
        let mut book = TradeBook::new(5, 2);
        book.init(day());

        book.insert(open(&m, "SBIN")).unwrap();
        assert_eq!(book.check_admit("SBIN"), Err(BookLimit::AlreadyTraded));
        book.insert(open(&m, "TCS")).unwrap();
        assert_eq!(book.insert(open(&m, "INFY")), Err(BookLimit::ConcurrentCap));
        assert_eq!(book.open_symbols(), vec!["SBIN".to_string(), "TCS".to_string()]);
    }

    #[test]
    fn test_remove_closed_frees_slot_and_teardown() {
        let m = manager();
        let mut book = TradeBook::new(5, 1);
        book.init(day());
        book.insert(open(&m, "SBIN")).unwrap();

        // still open: nothing removed
        assert!(book.remove_closed("SBIN").is_none());

        let at = day().and_hms_opt(15, 14, 0).unwrap();
        let trade = book.get_mut("SBIN").unwrap();
        m.force_exit(trade, Some(dec!(101)), at);
        assert!(book.remove_closed("SBIN").is_some());
        assert_eq!(book.live_count(), 0);
        assert!(book.can_open());
        // a closed symbol is not traded again the same day
        assert_eq!(book.check_admit("SBIN"), Err(BookLimit::AlreadyTraded));

        let all = book.teardown();
        assert_eq!(all.len(), 1);
        assert_eq!(book.session_date(), None);
    }
}
