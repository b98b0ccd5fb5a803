//! Opening range statistics and Wilder ATR.

use crate::error::{OrbError, OrbResult};
use crate::market::Bar;
use crate::utils::safe_div;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

/// Inclusive intraday window, in exchange-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpeningWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl OpeningWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Whether `ts` falls on `date` inside [start, end].
    pub fn contains(&self, date: NaiveDate, ts: NaiveDateTime) -> bool {
        ts.date() == date && ts.time() >= self.start && ts.time() <= self.end
    }

    /// Bars of `date` inside the window, in input order.
    pub fn filter<'a>(&self, date: NaiveDate, bars: &'a [Bar]) -> Vec<&'a Bar> {
        bars.iter()
            .filter(|b| self.contains(date, b.timestamp))
            .collect()
    }
}

/// Average True Range with Wilder smoothing.
///
/// Until `period` true ranges have been seen the value is their simple
/// average; afterwards `atr += (tr - atr) / period`.
#[derive(Debug, Clone)]
pub struct AtrIndicator {
    period: usize,
    prev_close: Option<Decimal>,
    value: Decimal,
    count: usize,
    sum: Decimal,
}

impl AtrIndicator {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            value: Decimal::ZERO,
            count: 0,
            sum: Decimal::ZERO,
        }
    }

    /// Feed one bar and return the updated ATR.
    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Decimal {
        let tr = match self.prev_close {
            Some(prev) => (high - low)
                .max((high - prev).abs())
                .max((low - prev).abs()),
            None => high - low,
        };
        self.prev_close = Some(close);

        if self.count < self.period {
            self.sum += tr;
            self.count += 1;
            self.value = self.sum / Decimal::from(self.count as u64);
        } else {
            self.value += (tr - self.value) / Decimal::from(self.period as u64);
        }
        self.value
    }

    pub fn value(&self) -> Decimal {
        self.value
    }

    /// True once `period` bars seeded the average.
    pub fn is_warm(&self) -> bool {
        self.count >= self.period
    }
}

/// ATR of the full series; zero for an empty series.
pub fn compute_atr(bars: &[Bar], period: usize) -> Decimal {
    let mut atr = AtrIndicator::new(period);
    for bar in bars {
        atr.update(bar.high, bar.low, bar.close);
    }
    atr.value()
}

/// Opening range of one instrument for one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpeningRangeStats {
    pub symbol: String,
    pub session_date: NaiveDate,
    pub high: Decimal,
    pub low: Decimal,
    pub range: Decimal,
    pub atr: Decimal,
    /// Widest single-bar range in the window relative to the window's first open
    pub volatility: Decimal,
}

/// Reduces a day's bar series to its opening range.
#[derive(Debug, Clone)]
pub struct OpeningRangeCalculator {
    window: OpeningWindow,
    atr_period: usize,
}

impl OpeningRangeCalculator {
    pub fn new(window: OpeningWindow, atr_period: usize) -> Self {
        Self { window, atr_period }
    }

    pub fn window(&self) -> OpeningWindow {
        self.window
    }

    /// Compute the opening range of `bars` for `session_date`.
    ///
    /// ATR runs over the whole series, the range over the window only.
    pub fn compute(
        &self,
        symbol: &str,
        session_date: NaiveDate,
        bars: &[Bar],
    ) -> OrbResult<OpeningRangeStats> {
        let opening = self.window.filter(session_date, bars);
        let first = opening.first().ok_or_else(|| OrbError::NoOpeningData {
            symbol: symbol.to_string(),
        })?;

        let high = opening.iter().map(|b| b.high).max().unwrap_or(first.high);
        let low = opening.iter().map(|b| b.low).min().unwrap_or(first.low);
        let widest = opening
            .iter()
            .map(|b| b.range())
            .max()
            .unwrap_or(Decimal::ZERO);

        let stats = OpeningRangeStats {
            symbol: symbol.to_string(),
            session_date,
            high,
            low,
            range: high - low,
            atr: compute_atr(bars, self.atr_period),
            volatility: safe_div(widest, first.open),
        };

        debug!(
            %symbol,
            bars = opening.len(),
            high = %stats.high,
            low = %stats.low,
            atr = %stats.atr,
            volatility = %stats.volatility,
            "Opening range computed"
        );

        Ok(stats)
    }
}
