//! SQLite trade journal.
//!
//! Records every lifecycle event and every closed trade so a session can be
//! reviewed after the fact:
//! - `trade_events`: opened, stop ratcheted, closed
//! - `closed_trades`: one row per finished trade with its realised PnL, or
//!   NULL exit price and PnL when the exit fill was never confirmed

use crate::strategy::{ActiveTrade, TradeEvent};
use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A closed trade read back from the journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTradeRecord {
    pub symbol: String,
    pub side: String,
    pub quantity: u64,
    pub entry_price: Decimal,
    /// `None` when the exit price is unknown
    pub exit_price: Option<Decimal>,
    pub reason: String,
    pub pnl: Option<Decimal>,
    pub opened_at: Option<NaiveDateTime>,
    pub closed_at: NaiveDateTime,
}

/// A journaled lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub timestamp: NaiveDateTime,
    pub symbol: String,
    pub event: String,
    pub price: Option<Decimal>,
    pub stop: Option<Decimal>,
    pub detail: String,
}

/// Day totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub date: NaiveDate,
    pub trades: usize,
    pub winners: usize,
    pub losers: usize,
    /// Closed trades without a known exit price
    pub unpriced: usize,
    pub total_pnl: Decimal,
    pub by_reason: BTreeMap<String, usize>,
    pub events: usize,
}

/// SQLite-backed journal.
pub struct TradeJournal {
    conn: Connection,
}

impl TradeJournal {
    /// Open (or create) the journal database.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open journal at {:?}", db_path.as_ref()))?;

        let journal = Self { conn };
        journal.init_schema()?;

        info!("Trade journal opened at {:?}", db_path.as_ref());
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS trade_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT,
                event TEXT NOT NULL,
                price TEXT,
                stop TEXT,
                detail TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON trade_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_symbol ON trade_events(symbol);

            CREATE TABLE IF NOT EXISTS closed_trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT,
                reason TEXT NOT NULL,
                pnl TEXT,
                opened_at TEXT,
                closed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_closed_closed_at ON closed_trades(closed_at);
            "#,
        )?;

        debug!("Journal schema initialized");
        Ok(())
    }

    /// Append one lifecycle event.
    pub fn record_event(&self, at: NaiveDateTime, event: &TradeEvent) -> Result<()> {
        let (side, price, stop) = match event {
            TradeEvent::Opened {
                side,
                entry_price,
                stop_price,
                ..
            } => (Some(side.as_str()), Some(*entry_price), Some(*stop_price)),
            TradeEvent::StopRatcheted { to, .. } => (None, None, Some(*to)),
            TradeEvent::Closed { price, .. } => (None, *price, None),
        };
        let detail = serde_json::to_string(event).context("Failed to encode trade event")?;

        self.conn.execute(
            r#"
            INSERT INTO trade_events (timestamp, symbol, side, event, price, stop, detail)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                at.format(TS_FORMAT).to_string(),
                event.symbol(),
                side,
                event.kind(),
                price.map(|p| p.to_string()),
                stop.map(|s| s.to_string()),
                detail,
            ],
        )?;
        Ok(())
    }

    /// Store a finished trade. Trades that are not closed are skipped.
    pub fn record_closed(&self, trade: &ActiveTrade) -> Result<()> {
        let (Some(reason), Some(closed_at)) = (trade.exit_reason(), trade.closed_at) else {
            warn!(symbol = %trade.symbol, state = %trade.state, "Not journaling a trade that is not closed");
            return Ok(());
        };
        let pnl = trade.realized_pnl();
        if pnl.is_none() {
            warn!(symbol = %trade.symbol, %reason, "Journaling closed trade with unknown exit price");
        }

        self.conn.execute(
            r#"
            INSERT INTO closed_trades (symbol, side, quantity, entry_price, exit_price, reason,
                                       pnl, opened_at, closed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                trade.symbol,
                trade.side.as_str(),
                trade.quantity,
                trade.entry_price.to_string(),
                trade.exit_price.map(|p| p.to_string()),
                reason.as_str(),
                pnl.map(|p| p.to_string()),
                trade.opened_at.map(|t| t.format(TS_FORMAT).to_string()),
                closed_at.format(TS_FORMAT).to_string(),
            ],
        )?;

        debug!(symbol = %trade.symbol, %reason, pnl = ?pnl, "Closed trade journaled");
        Ok(())
    }

    /// Closed trades whose exit fell on `date`, oldest first.
    pub fn closed_trades_for(&self, date: NaiveDate) -> Result<Vec<ClosedTradeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT symbol, side, quantity, entry_price, exit_price, reason, pnl, opened_at, closed_at
            FROM closed_trades
            WHERE substr(closed_at, 1, 10) = ?1
            ORDER BY closed_at, id
            "#,
        )?;

        let rows: Vec<ClosedTradeRecord> = stmt
            .query_map([date.to_string()], |row| {
                let exit_price: Option<String> = row.get(4)?;
                let pnl: Option<String> = row.get(6)?;
                let opened_at: Option<String> = row.get(7)?;
                Ok(ClosedTradeRecord {
                    symbol: row.get(0)?,
                    side: row.get(1)?,
                    quantity: row.get(2)?,
                    entry_price: parse_decimal(&row.get::<_, String>(3)?),
                    exit_price: exit_price.as_deref().map(parse_decimal),
                    reason: row.get(5)?,
                    pnl: pnl.as_deref().map(parse_decimal),
                    opened_at: opened_at.as_deref().and_then(parse_ts),
                    closed_at: parse_ts(&row.get::<_, String>(8)?)
                        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN)),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows)
    }

    /// Events journaled on `date`, in order.
    pub fn events_for(&self, date: NaiveDate) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, symbol, event, price, stop, detail
            FROM trade_events
            WHERE substr(timestamp, 1, 10) = ?1
            ORDER BY timestamp, id
            "#,
        )?;

        let rows: Vec<EventRecord> = stmt
            .query_map([date.to_string()], |row| {
                let price: Option<String> = row.get(3)?;
                let stop: Option<String> = row.get(4)?;
                Ok(EventRecord {
                    timestamp: parse_ts(&row.get::<_, String>(0)?)
                        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN)),
                    symbol: row.get(1)?,
                    event: row.get(2)?,
                    price: price.as_deref().map(parse_decimal),
                    stop: stop.as_deref().map(parse_decimal),
                    detail: row.get(5)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows)
    }

    /// Totals for `date`.
    pub fn session_summary(&self, date: NaiveDate) -> Result<SessionSummary> {
        let trades = self.closed_trades_for(date)?;
        let events = self.events_for(date)?.len();

        let mut by_reason = BTreeMap::new();
        for trade in &trades {
            *by_reason.entry(trade.reason.clone()).or_insert(0) += 1;
        }

        Ok(SessionSummary {
            date,
            trades: trades.len(),
            winners: trades
                .iter()
                .filter(|t| t.pnl.is_some_and(|p| p > Decimal::ZERO))
                .count(),
            losers: trades
                .iter()
                .filter(|t| t.pnl.is_some_and(|p| p < Decimal::ZERO))
                .count(),
            unpriced: trades.iter().filter(|t| t.pnl.is_none()).count(),
            total_pnl: trades.iter().filter_map(|t| t.pnl).sum(),
            by_reason,
            events,
        })
    }
}

fn parse_decimal(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).ok()
}
