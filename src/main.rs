//! ORB Engine - Main Entry Point
//!
//! Runs one intraday session against OpenAlgo market data, with a paper
//! broker by default, and reports on past sessions from the trade journal.

use anyhow::{Context, Result};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, Utc, Weekday};
use clap::{Parser, Subcommand};
use orb_engine::config::Config;
use orb_engine::market::{OpenAlgoClient, OrderGateway, PaperBroker};
use orb_engine::persistence::TradeJournal;
use orb_engine::session::{JobSchedule, SessionReport, SessionRunner};
use orb_engine::utils::to_percent;
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// ORB Engine CLI
#[derive(Parser)]
#[command(name = "orb-engine")]
#[command(version, about = "Intraday opening range breakout trading over OpenAlgo")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one trading session (paper broker unless --live)
    Run {
        /// Send orders to the real broker
        #[arg(long)]
        live: bool,

        /// Session date (YYYY-MM-DD), defaults to today in exchange time
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Show the journal summary for one day
    Status {
        /// Path to the journal database (default: from configuration)
        #[arg(long)]
        db: Option<String>,

        /// Day to report (YYYY-MM-DD), defaults to today in exchange time
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// List individual events as well
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;

    match cli.command {
        Some(Commands::Status { db, date, verbose }) => {
            let db = db.unwrap_or_else(|| config.journal_path.clone());
            let date = match date {
                Some(date) => date,
                None => exchange_now(exchange_offset(&config)?).date(),
            };
            show_status(&db, date, verbose)
        }
        Some(Commands::Run { live, date }) => run_session(config, live, date).await,
        None => run_session(config, false, None).await,
    }
}

fn exchange_offset(config: &Config) -> Result<FixedOffset> {
    config
        .session
        .utc_offset()
        .context("utc_offset_minutes out of range")
}

/// Current exchange-local time.
fn exchange_now(offset: FixedOffset) -> NaiveDateTime {
    Utc::now().with_timezone(&offset).naive_local()
}

async fn run_session(config: Config, live: bool, date: Option<NaiveDate>) -> Result<()> {
    config.validate()?;
    log_config(&config, live);

    let offset = exchange_offset(&config)?;
    let session_date = date.unwrap_or_else(|| exchange_now(offset).date());

    if matches!(session_date.weekday(), Weekday::Sat | Weekday::Sun) {
        info!(%session_date, "Weekend, no session to run");
        return Ok(());
    }

    let client = Arc::new(OpenAlgoClient::new(
        &config.broker,
        offset,
        config.execution.order_timeout_secs,
    )?);
    let gateway: Arc<dyn OrderGateway> = if live {
        warn!("⚠️  LIVE TRADING MODE - orders go to the broker");
        client.clone()
    } else {
        info!("📝 PAPER TRADING MODE - orders are simulated");
        Arc::new(PaperBroker::new())
    };

    if let Some(parent) = Path::new(&config.journal_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal directory {:?}", parent))?;
        }
    }
    let journal = TradeJournal::new(&config.journal_path)?;

    let tick = Duration::from_secs(config.session.monitor_interval_secs.max(1));
    let mut schedule = JobSchedule::new(&config.session);
    let runner = SessionRunner::new(config, client, gateway)?.with_journal(journal);

    // Jobs run on the session date at the current exchange time of day.
    let clock = move || session_date.and_time(exchange_now(offset).time());

    runner.start_session(session_date).await;
    info!("🚀 Session loop started");

    let mut ticker = tokio::time::interval(tick);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let report = loop {
        tokio::select! {
            _ = &mut shutdown => {
                warn!("🛑 Shutdown signal received, forcing exit of open trades");
                break runner.run_eod(clock()).await;
            }
            _ = ticker.tick() => {
                let now = clock();
                let mut finished = None;
                for job in schedule.due(now.time()) {
                    if let Some(report) = runner.run_job(job, now).await {
                        finished = Some(report);
                    }
                }
                if let Some(report) = finished {
                    break report;
                }
            }
        }
    };

    print_report(&report);
    Ok(())
}

/// Initialize logging to stdout and a daily rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "orb-engine.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the whole process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("orb_engine=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config, live: bool) {
    info!("📋 Configuration:");
    info!(
        "   Broker: {} ({}, {})",
        config.broker.host, config.broker.exchange, config.broker.product
    );
    info!("   Mode: {}", if live { "LIVE" } else { "PAPER" });
    info!(
        "   Capital: {} | Risk/Trade: {}%",
        config.risk.total_capital,
        to_percent(config.risk.risk_per_trade)
    );
    info!(
        "   ATR Period: {} | Target: {}R",
        config.risk.atr_period, config.risk.target_multiplier
    );
    info!(
        "   Opening Range: {} - {} | Entry {} | Fallback {} | EOD {}",
        config.session.opening_start,
        config.session.opening_end,
        config.session.entry_time,
        config.session.fallback_time,
        config.session.eod_exit_time
    );
    info!(
        "   Caps: {} trade(s)/day, {} concurrent | Top {} of {} symbols",
        config.risk.max_trades_per_day,
        config.risk.max_concurrent_trades,
        config.selection.top_n,
        config.session.universe.len()
    );
    info!(
        "   Direction Index: {}",
        config.session.direction_index.as_deref().unwrap_or("none")
    );
}

fn print_report(report: &SessionReport) {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!(
        "📊 Session {}: {} trade(s), realized PnL {}",
        report
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".into()),
        report.trades.len(),
        report.realized_pnl
    );
    for trade in &report.trades {
        info!(
            "   {} {} x{} @ {} -> {} ({})",
            trade.symbol,
            trade.side,
            trade.quantity,
            trade.entry_price,
            trade
                .exit_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".into()),
            trade.state
        );
    }
    if report.needs_attention {
        warn!("⚠️  Market data was unavailable for much of the session, check the data feed");
    }
}

/// Print the journal summary for one day.
fn show_status(db_path: &str, date: NaiveDate, verbose: bool) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              ORB SESSION STATUS                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Journal not found: {}", db_path);
        println!("   No session has run yet, or the journal path is incorrect.");
        return Ok(());
    }

    let journal = TradeJournal::new(db_path)?;
    let summary = journal.session_summary(date)?;

    println!("\n📅 {}", summary.date);
    println!("   ├─ Closed Trades:  {}", summary.trades);
    println!("   ├─ Winners:        {}", summary.winners);
    println!("   ├─ Losers:         {}", summary.losers);
    if summary.unpriced > 0 {
        println!("   ├─ Exit Unknown:   {} (check broker fills)", summary.unpriced);
    }
    println!("   ├─ Realized PnL:   {}", summary.total_pnl);
    println!("   └─ Events:         {}", summary.events);

    if !summary.by_reason.is_empty() {
        println!("\n🚪 Exits");
        for (reason, count) in &summary.by_reason {
            println!("   ├─ {:<12} {}", reason, count);
        }
    }

    let trades = journal.closed_trades_for(date)?;
    if !trades.is_empty() {
        println!("\n📈 Trades");
        for trade in &trades {
            let marker = match trade.pnl {
                Some(pnl) if pnl >= Decimal::ZERO => "✅",
                Some(_) => "❌",
                None => "❓",
            };
            let unknown = || "?".to_string();
            println!(
                "   {} {} {} x{}  {} -> {}  {}  PnL {}",
                marker,
                trade.symbol,
                trade.side,
                trade.quantity,
                trade.entry_price,
                trade.exit_price.map(|p| p.to_string()).unwrap_or_else(unknown),
                trade.reason,
                trade.pnl.map(|p| p.to_string()).unwrap_or_else(unknown)
            );
        }
    }

    if verbose {
        let events = journal.events_for(date)?;
        if !events.is_empty() {
            println!("\n🧾 Events");
            for event in &events {
                println!(
                    "   {}  {:<8} {:<15} price={} stop={}",
                    event.timestamp.format("%H:%M:%S"),
                    event.symbol,
                    event.event,
                    event
                        .price
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".into()),
                    event
                        .stop
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".into())
                );
            }
        }
    }

    Ok(())
}
