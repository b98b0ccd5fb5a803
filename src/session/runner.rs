//! Session orchestration: entry, fallback, monitor and EOD jobs.
//!
//! The runner owns the trade book behind one async mutex. Every lifecycle
//! transition (fill confirmation, ratchet, close, forced exit) happens while
//! that lock is held, so the monitor and the EOD job never race on the same
//! trade.

use super::book::TradeBook;
use super::executor::OrderExecutor;
use super::health::{DataHealthMonitor, HealthAlert};
use super::schedule::Job;
use crate::config::Config;
use crate::error::{OrbError, OrbResult};
use crate::market::{Bar, MarketDataProvider, OrderFill, OrderGateway, Side};
use crate::persistence::TradeJournal;
use crate::strategy::{
    side_order, ActiveTrade, LevelDeriver, MarketDirection, OpeningRangeCalculator, OpeningWindow,
    PendingExit, PositionSizer, ProgressiveLockTable, SideLevels, SymbolSelector, TickRounder, TradeEvent,
    TradeLifecycleManager,
};
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

const ORDER_FAILURE_ALERT: u32 = 3;

/// What a session traded.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub date: Option<NaiveDate>,
    pub trades: Vec<ActiveTrade>,
    pub realized_pnl: Decimal,
    pub alerts: Vec<HealthAlert>,
    pub needs_attention: bool,
}

/// Runs one trading day against the market data and broker collaborators.
pub struct SessionRunner {
    config: Config,
    data: Arc<dyn MarketDataProvider>,
    gateway: Arc<dyn OrderGateway>,
    calculator: OpeningRangeCalculator,
    deriver: LevelDeriver,
    sizer: PositionSizer,
    ticks: TickRounder,
    selector: SymbolSelector,
    lifecycle: TradeLifecycleManager,
    executor: OrderExecutor,
    book: Arc<Mutex<TradeBook>>,
    health: Mutex<DataHealthMonitor>,
    journal: Option<Mutex<TradeJournal>>,
}

impl SessionRunner {
    pub fn new(
        config: Config,
        data: Arc<dyn MarketDataProvider>,
        gateway: Arc<dyn OrderGateway>,
    ) -> OrbResult<Self> {
        let ticks = TickRounder::from(&config.ticks);
        let lock_table = ProgressiveLockTable::try_from(&config.lock)?;
        let window = OpeningWindow::new(config.session.opening_start, config.session.opening_end);

        Ok(Self {
            calculator: OpeningRangeCalculator::new(window, config.risk.atr_period),
            deriver: LevelDeriver::new(config.levels.clone(), config.risk.target_multiplier),
            sizer: PositionSizer::new(config.risk.total_capital, config.risk.risk_per_trade),
            selector: SymbolSelector::new(config.selection.clone()),
            lifecycle: TradeLifecycleManager::new(lock_table, ticks.clone()),
            executor: OrderExecutor::new(config.execution.clone(), ticks.clone()),
            ticks,
            book: Arc::new(Mutex::new(TradeBook::new(
                config.risk.max_trades_per_day,
                config.risk.max_concurrent_trades,
            ))),
            health: Mutex::new(DataHealthMonitor::new(
                config.data_unavailable_alert,
                ORDER_FAILURE_ALERT,
            )),
            journal: None,
            data,
            gateway,
            config,
        })
    }

    /// Journal every event and closed trade.
    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(Mutex::new(journal));
        self
    }

    pub fn book(&self) -> Arc<Mutex<TradeBook>> {
        self.book.clone()
    }

    pub async fn health_alerts(&self) -> Vec<HealthAlert> {
        self.health.lock().await.alerts().to_vec()
    }

    /// Reset the book and health state for `date`.
    pub async fn start_session(&self, date: NaiveDate) {
        self.book.lock().await.init(date);
        self.health.lock().await.reset();
        info!(%date, universe = self.config.session.universe.len(), "Session started");
    }

    /// Dispatch one scheduled job.
    pub async fn run_job(&self, job: Job, now: NaiveDateTime) -> Option<SessionReport> {
        match job {
            Job::Entry => {
                self.run_entry(now).await;
                None
            }
            Job::Fallback => {
                self.run_fallback(now).await;
                None
            }
            Job::Monitor => {
                self.monitor(now).await;
                None
            }
            Job::Eod => Some(self.run_eod(now).await),
        }
    }

    /// Direction of the configured index over the opening window.
    pub async fn market_direction(&self, now: NaiveDateTime) -> Option<MarketDirection> {
        let index = self.config.session.direction_index.as_deref()?;
        let date = now.date();

        match self
            .data
            .get_bars(index, date, &self.config.session.bar_interval)
            .await
        {
            Ok(bars) => {
                self.health.lock().await.record_data_success();
                let opening = self.calculator.window().filter(date, &bars);
                let direction = MarketDirection::from_opening(&opening);
                info!(%index, direction = ?direction, "Market direction");
                direction
            }
            Err(e) => {
                self.note_data_failure(index, &e, now).await;
                None
            }
        }
    }

    /// Primary entry pass: direction filter, then the top candidates.
    #[instrument(skip(self), fields(job = "entry"))]
    pub async fn run_entry(&self, now: NaiveDateTime) -> Vec<String> {
        let preferred = self
            .market_direction(now)
            .await
            .and_then(MarketDirection::preferred_side);
        self.scan_and_enter(now, preferred, false).await
    }

    /// Second chance when nothing traded yet: no side preference, first
    /// valid breakout only.
    #[instrument(skip(self), fields(job = "fallback"))]
    pub async fn run_fallback(&self, now: NaiveDateTime) -> Vec<String> {
        if self.book.lock().await.has_traded_today() {
            info!("Already traded today, fallback skipped");
            return Vec::new();
        }
        self.scan_and_enter(now, None, true).await
    }

    /// Evaluate every open trade at its latest quote. Returns the number of
    /// trades closed by this pass.
    pub async fn monitor(&self, now: NaiveDateTime) -> usize {
        let time = now.time();
        if time < self.config.session.trading_start || time > self.config.session.trading_end {
            return 0;
        }

        let mut book = self.book.lock().await;
        let mut closed = 0;

        for symbol in book.open_symbols() {
            let price = match self.data.get_quote(&symbol).await {
                Ok(quote) => {
                    self.health.lock().await.record_data_success();
                    quote.price
                }
                Err(e) => {
                    self.note_data_failure(&symbol, &e, now).await;
                    continue;
                }
            };

            let Some(trade) = book.get_mut(&symbol) else {
                continue;
            };
            let evaluation = self.lifecycle.on_price(trade, price, now);
            for event in &evaluation.events {
                self.journal_event(now, event).await;
            }
            if evaluation.exit.is_some() {
                closed += 1;
            }
        }

        self.settle_exits(&mut book, now).await;
        closed
    }

    /// Force every open trade out and close the session.
    #[instrument(skip(self), fields(job = "eod"))]
    pub async fn run_eod(&self, now: NaiveDateTime) -> SessionReport {
        let mut book = self.book.lock().await;

        for symbol in book.open_symbols() {
            let last_price = self.data.get_quote(&symbol).await.ok().map(|q| q.price);
            let Some(trade) = book.get_mut(&symbol) else {
                continue;
            };
            let evaluation = self.lifecycle.force_exit(trade, last_price, now);
            for event in &evaluation.events {
                self.journal_event(now, event).await;
            }
        }

        self.settle_exits(&mut book, now).await;

        for symbol in book.awaiting_exit_symbols() {
            error!(%symbol, "Exit order not confirmed at end of day, check the broker position");
            if let Some(trade) = book.get(&symbol) {
                self.journal_closed(trade).await;
            }
        }

        let date = book.session_date();
        let trades = book.teardown();
        drop(book);

        let health = self.health.lock().await;
        let report = SessionReport {
            date,
            realized_pnl: trades.iter().filter_map(|t| t.realized_pnl()).sum(),
            trades,
            alerts: health.alerts().to_vec(),
            needs_attention: health.needs_attention(),
        };

        info!(
            date = ?report.date,
            trades = report.trades.len(),
            realized_pnl = %report.realized_pnl,
            alerts = report.alerts.len(),
            "Session closed"
        );
        report
    }

    async fn scan_and_enter(
        &self,
        now: NaiveDateTime,
        preferred: Option<Side>,
        first_only: bool,
    ) -> Vec<String> {
        let date = now.date();
        let universe = self.load_universe(now).await;
        let window = self.calculator.window();
        let openings: Vec<(String, Vec<Bar>)> = universe
            .iter()
            .map(|(symbol, bars)| {
                (
                    symbol.clone(),
                    window.filter(date, bars).into_iter().cloned().collect(),
                )
            })
            .collect();
        let candidates = self.selector.select(&openings);

        let mut book = self.book.lock().await;
        let mut opened = Vec::new();

        for candidate in candidates {
            if !book.can_open() {
                info!(trades_today = book.trades_today(), "Trade caps reached");
                break;
            }
            if let Err(limit) = book.check_admit(&candidate.symbol) {
                debug!(symbol = %candidate.symbol, ?limit, "Candidate not admitted");
                continue;
            }
            let Some((_, bars)) = universe.iter().find(|(s, _)| *s == candidate.symbol) else {
                continue;
            };

            match self
                .try_enter(&mut book, &candidate.symbol, bars, preferred, now)
                .await
            {
                Ok(true) => {
                    opened.push(candidate.symbol.clone());
                    if first_only {
                        break;
                    }
                }
                Ok(false) => {}
                Err(e @ OrbError::OrderUnresolved { .. }) => {
                    error!(
                        symbol = %candidate.symbol,
                        error = %e,
                        "Entry order state unknown, check the broker; stopping entry pass"
                    );
                    break;
                }
                Err(e) => warn!(symbol = %candidate.symbol, error = %e, "Entry failed"),
            }
        }

        info!(opened = ?opened, "Entry pass finished");
        opened
    }

    async fn load_universe(&self, now: NaiveDateTime) -> Vec<(String, Vec<Bar>)> {
        let date = now.date();
        let mut universe = Vec::with_capacity(self.config.session.universe.len());

        for symbol in &self.config.session.universe {
            match self
                .data
                .get_bars(symbol, date, &self.config.session.bar_interval)
                .await
            {
                Ok(bars) => {
                    self.health.lock().await.record_data_success();
                    universe.push((symbol.clone(), bars));
                }
                Err(e) => self.note_data_failure(symbol, &e, now).await,
            }
        }
        universe
    }

    /// Try both sides of one instrument, preferred side first. `Ok(true)`
    /// when a trade opened.
    async fn try_enter(
        &self,
        book: &mut TradeBook,
        symbol: &str,
        bars: &[Bar],
        preferred: Option<Side>,
        now: NaiveDateTime,
    ) -> OrbResult<bool> {
        let stats = match self.calculator.compute(symbol, now.date(), bars) {
            Ok(stats) => stats,
            Err(e) => {
                debug!(%symbol, error = %e, "Skipping instrument");
                return Ok(false);
            }
        };
        let levels = self.deriver.derive(&stats);

        for side in side_order(preferred) {
            let planned = match levels.side(symbol, side) {
                Ok(raw) => self.round_levels(raw),
                Err(e) => {
                    debug!(%symbol, %side, error = %e, "Side rejected");
                    continue;
                }
            };
            if !planned.is_ordered(side) {
                debug!(%symbol, %side, "Levels collapsed on the tick grid");
                continue;
            }

            let quantity = match self.sizer.size(symbol, planned.entry, planned.stop) {
                Ok(quantity) => quantity,
                Err(e) => {
                    debug!(%symbol, %side, error = %e, "Side not sized");
                    continue;
                }
            };

            let quote = match self.data.get_quote(symbol).await {
                Ok(quote) => {
                    self.health.lock().await.record_data_success();
                    quote
                }
                Err(e) => {
                    self.note_data_failure(symbol, &e, now).await;
                    return Ok(false);
                }
            };
            if quote.volume > Decimal::ZERO && quote.volume < self.config.risk.min_quote_volume {
                info!(%symbol, volume = %quote.volume, "Quote volume below minimum, skipping");
                return Ok(false);
            }

            let (mut trade, intent) = self.lifecycle.open_request(symbol, side, planned, quantity);
            let fill = match self
                .executor
                .enter(
                    self.gateway.as_ref(),
                    symbol,
                    intent.action(),
                    quantity,
                    quote.price,
                )
                .await
            {
                Ok(fill) => {
                    self.health.lock().await.record_order_success(symbol);
                    fill
                }
                Err(e) => {
                    self.health.lock().await.record_order_failure(symbol, now);
                    if matches!(e, OrbError::OrderUnresolved { .. }) {
                        return Err(e);
                    }
                    warn!(%symbol, %side, error = %e, "Entry order abandoned");
                    return Ok(false);
                }
            };

            let event = self.lifecycle.confirm_fill(&mut trade, &fill, now)?;
            self.journal_event(now, &event).await;

            if let Err(limit) = book.insert(trade) {
                error!(%symbol, ?limit, "Filled trade refused by the book");
                return Err(OrbError::InvalidTransition {
                    symbol: symbol.to_string(),
                    from: "PENDING".into(),
                    to: "OPEN".into(),
                });
            }
            return Ok(true);
        }

        Ok(false)
    }

    fn round_levels(&self, raw: SideLevels) -> SideLevels {
        let entry = self.ticks.round(raw.entry);
        let stop = self.ticks.round(raw.stop);
        SideLevels {
            entry,
            stop,
            target: self.ticks.round(raw.target),
            risk_per_share: (entry - stop).abs(),
        }
    }

    /// Send exit orders for closed trades that are not settled yet. An exit
    /// left unresolved by an earlier pass is reconciled with the broker
    /// before anything new is sent.
    async fn settle_exits(&self, book: &mut TradeBook, now: NaiveDateTime) {
        for symbol in book.awaiting_exit_symbols() {
            let Some(trade) = book.get_mut(&symbol) else {
                continue;
            };

            match trade.pending_exit.clone() {
                Some(PendingExit::Untracked) => {
                    warn!(%symbol, "Exit order state unknown, waiting for manual reconciliation");
                    continue;
                }
                Some(PendingExit::Order(order_id)) => {
                    match self.executor.resolve(self.gateway.as_ref(), &symbol, &order_id).await {
                        Ok(Some(fill)) => {
                            self.finish_exit(trade, fill).await;
                            book.remove_closed(&symbol);
                            continue;
                        }
                        Ok(None) => trade.pending_exit = None,
                        Err(e) => {
                            error!(%symbol, error = %e, "Exit order still unresolved");
                            continue;
                        }
                    }
                }
                None => {}
            }

            let Some(intent) = trade.exit_intent() else {
                continue;
            };

            match self
                .executor
                .exit(
                    self.gateway.as_ref(),
                    &symbol,
                    intent.action(),
                    intent.quantity(),
                    intent.reference_price(),
                )
                .await
            {
                Ok(fill) => {
                    self.health.lock().await.record_order_success(&symbol);
                    self.finish_exit(trade, fill).await;
                    book.remove_closed(&symbol);
                }
                Err(OrbError::OrderUnresolved { order_id, reason, .. }) => {
                    self.health.lock().await.record_order_failure(&symbol, now);
                    error!(
                        %symbol,
                        order_id = ?order_id,
                        %reason,
                        "Exit order state unknown, not resending"
                    );
                    trade.pending_exit = Some(PendingExit::from(order_id));
                }
                Err(e) => {
                    self.health.lock().await.record_order_failure(&symbol, now);
                    error!(%symbol, error = %e, "Exit order failed, will retry");
                }
            }
        }
    }

    async fn finish_exit(&self, trade: &mut ActiveTrade, fill: OrderFill) {
        trade.settle_exit(fill.fill_price, fill.order_id);
        info!(
            symbol = %trade.symbol,
            reason = ?trade.exit_reason(),
            exit = ?trade.exit_price,
            pnl = ?trade.realized_pnl(),
            "Exit filled"
        );
        self.journal_closed(trade).await;
    }

    async fn note_data_failure(&self, symbol: &str, error: &OrbError, now: NaiveDateTime) {
        warn!(%symbol, %error, "Market data unavailable");
        self.health.lock().await.record_data_failure(symbol, now);
    }

    async fn journal_event(&self, at: NaiveDateTime, event: &TradeEvent) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.lock().await.record_event(at, event) {
                warn!(error = %e, "Failed to journal trade event");
            }
        }
    }

    async fn journal_closed(&self, trade: &ActiveTrade) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.lock().await.record_closed(trade) {
                warn!(error = %e, "Failed to journal closed trade");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TickConfig;
    use crate::market::{
        MockMarketData, OrderAction, OrderRequest, PaperBroker, PaperOutcome, PriceType,
    };
    use crate::strategy::ExitReason;
    use rust_decimal_macros::dec;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        day().and_hms_opt(h, m, 0).unwrap()
    }

    fn bar(m: u32, o: Decimal, h: Decimal, l: Decimal, c: Decimal, v: Decimal) -> Bar {
        Bar::new(at(9, m), o, h, l, c, v)
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.session.universe = vec!["AAA".into(), "BBB".into()];
        config.session.direction_index = Some("NIFTY".into());
        config.ticks = TickConfig {
            price_threshold: dec!(100000),
            small_tick: dec!(0.05),
            large_tick: dec!(0.05),
        };
        config.execution.retry_backoff_ms = 0;
        config
    }

    async fn seed(data: &MockMarketData, index_up: bool) {
        let index_close = if index_up { dec!(23560) } else { dec!(23400) };
        data.set_bars(
            "NIFTY",
            vec![
                bar(15, dec!(23500), dec!(23520), dec!(23490), dec!(23510), dec!(0)),
                bar(30, dec!(23510), dec!(23570), dec!(23390), index_close, dec!(0)),
            ],
        )
        .await;
        // strong volume, ranks first
        data.set_bars(
            "BBB",
            vec![
                bar(15, dec!(100), dec!(101), dec!(99), dec!(100.5), dec!(12000)),
                bar(30, dec!(100.5), dec!(101), dec!(99.5), dec!(101), dec!(8000)),
            ],
        )
        .await;
        data.set_bars(
            "AAA",
            vec![
                bar(15, dec!(200), dec!(200.5), dec!(199.8), dec!(200.2), dec!(1000)),
                bar(30, dec!(200.2), dec!(200.4), dec!(199.9), dec!(200.1), dec!(1000)),
            ],
        )
        .await;
        data.set_quote("BBB", dec!(101.2), dec!(100000)).await;
        data.set_quote("AAA", dec!(200.1), dec!(100000)).await;
    }

    async fn runner(
        config: Config,
        data: Arc<MockMarketData>,
        broker: Arc<PaperBroker>,
    ) -> SessionRunner {
        let runner = SessionRunner::new(config, data, broker)
            .unwrap()
            .with_journal(TradeJournal::new(":memory:").unwrap());
        runner.start_session(day()).await;
        runner
    }

    #[tokio::test]
    async fn test_entry_takes_preferred_side_within_daily_cap() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;

        let opened = runner.run_entry(at(9, 31)).await;
        assert_eq!(opened, vec!["BBB".to_string()]);

        let orders = broker.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].action, OrderAction::Buy);
        assert_eq!(orders[0].price_type, PriceType::Limit);
        // 101.2 * 1.001 on the 0.05 grid
        assert_eq!(orders[0].price, dec!(101.30));

        {
            let book = runner.book();
            let book = book.lock().await;
            let trade = book.get("BBB").unwrap();
            assert!(trade.is_open());
            assert_eq!(trade.side, Side::Long);
            assert_eq!(trade.entry_price, dec!(101.30));
            assert!(trade.quantity > 0);
            assert_eq!(book.trades_today(), 1);
        }

        // one trade per day: fallback does nothing
        assert!(runner.run_fallback(at(10, 0)).await.is_empty());
        assert_eq!(broker.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_down_market_goes_short() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, false).await;
        data.set_quote("BBB", dec!(98.9), dec!(100000)).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;

        assert_eq!(runner.run_entry(at(9, 31)).await, vec!["BBB".to_string()]);

        let orders = broker.orders().await;
        assert_eq!(orders[0].action, OrderAction::Sell);
        assert_eq!(orders[0].price, dec!(98.80));
        let book = runner.book();
        assert_eq!(book.lock().await.get("BBB").unwrap().side, Side::Short);
    }

    #[tokio::test]
    async fn test_monitor_ratchets_then_stops_out() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;
        runner.run_entry(at(9, 31)).await;

        // (101.9 - 101.3) / 101.3 passes 0.4%: stop = 101.3 * 1.002
        data.set_price("BBB", dec!(101.9)).await;
        assert_eq!(runner.monitor(at(10, 0)).await, 0);
        let quantity = {
            let book = runner.book();
            let book = book.lock().await;
            let trade = book.get("BBB").unwrap();
            assert_eq!(trade.stop_price, dec!(101.50));
            trade.quantity
        };

        data.set_price("BBB", dec!(101.45)).await;
        assert_eq!(runner.monitor(at(10, 5)).await, 1);

        let orders = broker.orders().await;
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1].action, OrderAction::Sell);
        assert_eq!(orders[1].price_type, PriceType::Market);
        assert_eq!(orders[1].quantity, quantity);

        let state = broker.get_state().await;
        assert_eq!(state.positions["BBB"].quantity, 0);
        assert_eq!(
            state.realized_pnl,
            (dec!(101.45) - dec!(101.30)) * Decimal::from(quantity)
        );

        let book = runner.book();
        let book = book.lock().await;
        assert!(book.open_symbols().is_empty());
        assert_eq!(book.closed().len(), 1);
        assert_eq!(book.closed()[0].exit_reason(), Some(ExitReason::Stop));
    }

    #[tokio::test]
    async fn test_eod_forces_exit_once() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;
        runner.run_entry(at(9, 31)).await;

        data.set_price("BBB", dec!(101.6)).await;
        let report = runner.run_eod(at(15, 14)).await;

        assert_eq!(report.date, Some(day()));
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].exit_reason(), Some(ExitReason::ForcedEod));
        assert_eq!(report.trades[0].exit_price, Some(dec!(101.6)));
        assert!(report.realized_pnl > Decimal::ZERO);
        assert_eq!(broker.orders().await.len(), 2);

        // monitor after EOD finds nothing to evaluate
        assert_eq!(runner.monitor(at(15, 15)).await, 0);
        assert_eq!(broker.orders().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_exit_is_retried() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;
        runner.run_entry(at(9, 31)).await;

        // exit order and both retries rejected
        for _ in 0..3 {
            broker.script(PaperOutcome::Reject("RMS".into())).await;
        }
        data.set_price("BBB", dec!(90)).await;
        assert_eq!(runner.monitor(at(10, 0)).await, 1);
        {
            let book = runner.book();
            let book = book.lock().await;
            assert_eq!(book.awaiting_exit_symbols(), vec!["BBB".to_string()]);
        }

        // next pass settles it
        runner.monitor(at(10, 1)).await;
        let book = runner.book();
        let book = book.lock().await;
        assert!(book.awaiting_exit_symbols().is_empty());
        assert_eq!(book.closed()[0].exit_price, Some(dec!(90)));
    }

    #[tokio::test]
    async fn test_exit_filled_before_cancel_is_not_resent() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;
        runner.run_entry(at(9, 31)).await;

        broker.script(PaperOutcome::LateFill).await;
        data.set_price("BBB", dec!(90)).await;
        assert_eq!(runner.monitor(at(10, 0)).await, 1);

        assert_eq!(broker.orders().await.len(), 2);
        assert_eq!(broker.resting_orders().await, 0);
        assert_eq!(broker.get_state().await.positions["BBB"].quantity, 0);

        let book = runner.book();
        let book = book.lock().await;
        assert!(book.awaiting_exit_symbols().is_empty());
        assert_eq!(book.closed()[0].exit_price, Some(dec!(90)));
    }

    #[tokio::test]
    async fn test_exit_in_unknown_state_is_reconciled_not_resent() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;
        runner.run_entry(at(9, 31)).await;

        for _ in 0..3 {
            broker.script(PaperOutcome::Reject("RMS".into())).await;
        }
        data.set_price("BBB", dec!(90)).await;
        runner.monitor(at(10, 0)).await;
        let placed = broker.orders().await.len();

        // nothing is known about this order
        {
            let book = runner.book();
            let mut book = book.lock().await;
            book.get_mut("BBB").unwrap().pending_exit = Some(PendingExit::Untracked);
        }
        runner.monitor(at(10, 1)).await;
        assert_eq!(broker.orders().await.len(), placed);

        // an exit that is still resting at the broker and has filled
        let quantity = runner.book().lock().await.get("BBB").unwrap().quantity;
        broker.script(PaperOutcome::LateFill).await;
        let resting = broker
            .place_order(&OrderRequest {
                symbol: "BBB".into(),
                action: OrderAction::Sell,
                quantity,
                price_type: PriceType::Market,
                price: dec!(90),
            })
            .await;
        let Err(OrbError::OrderTimeout {
            order_id: Some(order_id),
            ..
        }) = resting
        else {
            panic!("expected a resting order, got {:?}", resting);
        };
        {
            let book = runner.book();
            let mut book = book.lock().await;
            book.get_mut("BBB").unwrap().pending_exit = Some(PendingExit::Order(order_id));
        }
        let placed = broker.orders().await.len();

        runner.monitor(at(10, 2)).await;
        assert_eq!(broker.orders().await.len(), placed);
        assert_eq!(broker.get_state().await.positions["BBB"].quantity, 0);
        let book = runner.book();
        let book = book.lock().await;
        assert!(book.awaiting_exit_symbols().is_empty());
        assert_eq!(book.closed()[0].exit_price, Some(dec!(90)));
        assert_eq!(book.closed()[0].pending_exit, None);
    }

    #[tokio::test]
    async fn test_eod_without_quote_leaves_exit_price_unknown() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;
        runner.run_entry(at(9, 31)).await;
        let quantity = runner.book().lock().await.get("BBB").unwrap().quantity;

        data.set_unavailable("BBB", true).await;
        let report = runner.run_eod(at(15, 14)).await;

        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].exit_reason(), Some(ExitReason::ForcedEod));
        assert_eq!(report.trades[0].exit_price, None);
        assert_eq!(report.trades[0].realized_pnl(), None);
        assert_eq!(report.realized_pnl, Decimal::ZERO);
        // no exit was filled at a made-up price
        let state = broker.get_state().await;
        assert_eq!(state.positions["BBB"].quantity, quantity as i64);
        assert_eq!(state.realized_pnl, Decimal::ZERO);

        let journal = runner.journal.as_ref().unwrap().lock().await;
        let summary = journal.session_summary(day()).unwrap();
        assert_eq!(summary.trades, 1);
        assert_eq!(summary.unpriced, 1);
        assert_eq!(summary.total_pnl, Decimal::ZERO);
        let trades = journal.closed_trades_for(day()).unwrap();
        assert_eq!(trades[0].exit_price, None);
    }

    #[tokio::test]
    async fn test_late_entry_fill_is_kept() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;

        broker.script(PaperOutcome::LateFill).await;
        assert_eq!(runner.run_entry(at(9, 31)).await, vec!["BBB".to_string()]);

        // one order, no second entry placed over the late fill
        assert_eq!(broker.orders().await.len(), 1);
        assert_eq!(broker.resting_orders().await, 0);
        let book = runner.book();
        let book = book.lock().await;
        let trade = book.get("BBB").unwrap();
        assert!(trade.is_open());
        assert_eq!(trade.entry_price, dec!(101.30));
    }

    #[tokio::test]
    async fn test_fallback_after_thin_volume_at_entry() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        data.set_quote("BBB", dec!(101.2), dec!(1000)).await;
        data.set_quote("AAA", dec!(200.1), dec!(1000)).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;

        assert!(runner.run_entry(at(9, 31)).await.is_empty());
        assert!(broker.orders().await.is_empty());

        data.set_quote("BBB", dec!(101.2), dec!(50000)).await;
        data.set_quote("AAA", dec!(200.1), dec!(50000)).await;
        let opened = runner.run_fallback(at(10, 0)).await;
        assert_eq!(opened, vec!["BBB".to_string()]);
        // no preference: LONG is tried first
        assert_eq!(broker.orders().await[0].action, OrderAction::Buy);
    }

    #[tokio::test]
    async fn test_rejected_entry_moves_to_next_candidate() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;

        for _ in 0..3 {
            broker.script(PaperOutcome::Timeout).await;
        }
        let opened = runner.run_entry(at(9, 31)).await;

        // BBB abandoned after three attempts, AAA traded instead
        assert_eq!(opened, vec!["AAA".to_string()]);
        let orders = broker.orders().await;
        assert_eq!(orders.len(), 4);
        // retries use the wider buffer: 101.2 * 1.002
        assert_eq!(orders[1].price, dec!(101.40));
    }

    #[tokio::test]
    async fn test_data_outage_raises_alert() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        for symbol in ["NIFTY", "AAA", "BBB"] {
            data.set_unavailable(symbol, true).await;
        }
        let mut config = test_config();
        config.data_unavailable_alert = 3;
        let runner = runner(config, data.clone(), broker.clone()).await;

        assert!(runner.run_entry(at(9, 31)).await.is_empty());
        let alerts = runner.health_alerts().await;
        assert_eq!(alerts.len(), 1);

        let report = runner.run_eod(at(15, 14)).await;
        assert!(report.needs_attention);
        assert!(report.trades.is_empty());
    }

    #[tokio::test]
    async fn test_monitor_outside_trading_window() {
        let data = Arc::new(MockMarketData::new());
        let broker = Arc::new(PaperBroker::new());
        seed(&data, true).await;
        let runner = runner(test_config(), data.clone(), broker.clone()).await;
        runner.run_entry(at(9, 31)).await;

        data.set_price("BBB", dec!(90)).await;
        assert_eq!(runner.monitor(at(15, 30)).await, 0);
        let book = runner.book();
        assert!(book.lock().await.get("BBB").unwrap().is_open());
    }
}
