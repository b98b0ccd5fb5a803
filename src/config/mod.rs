//! Configuration management for the breakout engine.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// OpenAlgo broker connection
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Session clock and instrument universe
    #[serde(default)]
    pub session: SessionConfig,
    /// Capital, sizing and trade caps
    #[serde(default)]
    pub risk: RiskConfig,
    /// Entry/stop buffer policy
    #[serde(default)]
    pub levels: LevelsConfig,
    /// Candidate scoring
    #[serde(default)]
    pub selection: SelectionConfig,
    /// Progressive profit lock table
    #[serde(default)]
    pub lock: LockConfig,
    /// Price tick grid
    #[serde(default)]
    pub ticks: TickConfig,
    /// Order placement and retry
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// SQLite trade journal location
    #[serde(default = "default_journal_path")]
    pub journal_path: String,
    /// Consecutive data failures before the session raises an operator alert
    #[serde(default = "default_data_unavailable_alert")]
    pub data_unavailable_alert: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// OpenAlgo server base URL
    #[serde(default = "default_host")]
    pub host: String,
    /// API key sent in every request body
    #[serde(default)]
    pub api_key: String,
    /// Exchange code for equities
    #[serde(default = "default_exchange")]
    pub exchange: String,
    /// Product type (MIS = intraday)
    #[serde(default = "default_product")]
    pub product: String,
    /// Strategy tag attached to orders
    #[serde(default = "default_strategy_tag")]
    pub strategy_tag: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// First minute of the opening range (inclusive)
    #[serde(default = "default_opening_start")]
    pub opening_start: NaiveTime,
    /// Last minute of the opening range (inclusive)
    #[serde(default = "default_opening_end")]
    pub opening_end: NaiveTime,
    /// Monitoring starts at this time
    #[serde(default = "default_trading_start")]
    pub trading_start: NaiveTime,
    /// Monitoring stops at this time
    #[serde(default = "default_trading_end")]
    pub trading_end: NaiveTime,
    /// Primary entry job time
    #[serde(default = "default_entry_time")]
    pub entry_time: NaiveTime,
    /// Fallback entry job time
    #[serde(default = "default_fallback_time")]
    pub fallback_time: NaiveTime,
    /// Forced exit time
    #[serde(default = "default_eod_exit_time")]
    pub eod_exit_time: NaiveTime,
    /// Exchange timezone offset from UTC in minutes (IST = 330)
    #[serde(default = "default_utc_offset")]
    pub utc_offset_minutes: i32,
    /// Bar interval requested from the history endpoint
    #[serde(default = "default_bar_interval")]
    pub bar_interval: String,
    /// Seconds between position monitoring passes
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_secs: u64,
    /// Instruments considered for selection
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
    /// Index whose opening window sets the preferred side (None = no preference)
    #[serde(default = "default_direction_index")]
    pub direction_index: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Account capital used for sizing
    #[serde(default = "default_total_capital")]
    pub total_capital: Decimal,
    /// Fraction of capital risked per trade (0.0-1.0)
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: Decimal,
    /// ATR smoothing period
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    /// Reward/risk multiple for the target
    #[serde(default = "default_target_multiplier")]
    pub target_multiplier: Decimal,
    /// Maximum trades opened per session
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    /// Maximum simultaneously open trades
    #[serde(default = "default_max_concurrent_trades")]
    pub max_concurrent_trades: u32,
    /// Minimum quoted volume before an entry is placed
    #[serde(default = "default_min_quote_volume")]
    pub min_quote_volume: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelsConfig {
    /// Opening volatility above which the tighter entry buffer applies
    #[serde(default = "default_high_vol_threshold")]
    pub high_vol_threshold: Decimal,
    /// Entry buffer as ATR multiple in high-volatility regimes
    #[serde(default = "default_high_vol_entry_mult")]
    pub high_vol_entry_atr_mult: Decimal,
    /// Entry buffer as ATR multiple in calm regimes
    #[serde(default = "default_low_vol_entry_mult")]
    pub low_vol_entry_atr_mult: Decimal,
    /// Stop buffer as ATR multiple
    #[serde(default = "default_stop_atr_mult")]
    pub stop_atr_mult: Decimal,
    /// Stop buffer as opening-range multiple
    #[serde(default = "default_stop_range_mult")]
    pub stop_range_mult: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Number of candidates selected per cycle
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Opening volume that earns a volume score of 1.0
    #[serde(default = "default_min_volume_threshold")]
    pub min_volume_threshold: Decimal,
    /// Upper bound on the volume score
    #[serde(default = "default_volume_score_cap")]
    pub volume_score_cap: Decimal,
    #[serde(default = "default_momentum_weight")]
    pub momentum_weight: Decimal,
    #[serde(default = "default_volatility_weight")]
    pub volatility_weight: Decimal,
    #[serde(default = "default_volume_weight")]
    pub volume_weight: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// First profit threshold (0.004 = 0.4%)
    #[serde(default = "default_first_threshold")]
    pub first_threshold: Decimal,
    /// Last profit threshold (inclusive)
    #[serde(default = "default_last_threshold")]
    pub last_threshold: Decimal,
    /// Spacing between thresholds
    #[serde(default = "default_threshold_step")]
    pub threshold_step: Decimal,
    /// Locked profit = threshold - lock_offset
    #[serde(default = "default_lock_offset")]
    pub lock_offset: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    /// Prices below this use the small tick
    #[serde(default = "default_tick_threshold")]
    pub price_threshold: Decimal,
    #[serde(default = "default_small_tick")]
    pub small_tick: Decimal,
    #[serde(default = "default_large_tick")]
    pub large_tick: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Limit price offset from LTP on the first attempt (0.001 = 0.1%)
    #[serde(default = "default_limit_buffer")]
    pub limit_buffer: Decimal,
    /// Limit price offset from LTP on retries
    #[serde(default = "default_retry_buffer")]
    pub retry_buffer: Decimal,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Seconds to wait for a fill confirmation
    #[serde(default = "default_order_timeout")]
    pub order_timeout_secs: u64,
    /// Base backoff between attempts, multiplied by the attempt number
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

// Default value functions
fn default_journal_path() -> String {
    "data/orb_journal.db".to_string()
}

fn default_data_unavailable_alert() -> u32 {
    5
}

fn default_host() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_exchange() -> String {
    "NSE".to_string()
}

fn default_product() -> String {
    "MIS".to_string()
}

fn default_strategy_tag() -> String {
    "orb".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_opening_start() -> NaiveTime {
    hm(9, 15)
}

fn default_opening_end() -> NaiveTime {
    hm(9, 30)
}

fn default_trading_start() -> NaiveTime {
    hm(9, 31)
}

fn default_trading_end() -> NaiveTime {
    hm(15, 15)
}

fn default_entry_time() -> NaiveTime {
    hm(9, 31)
}

fn default_fallback_time() -> NaiveTime {
    hm(10, 0)
}

fn default_eod_exit_time() -> NaiveTime {
    hm(15, 14) // one minute ahead of trading_end so exits land inside the session
}

fn default_utc_offset() -> i32 {
    330 // Asia/Kolkata
}

fn default_bar_interval() -> String {
    "1m".to_string()
}

fn default_monitor_interval() -> u64 {
    10
}

fn default_universe() -> Vec<String> {
    [
        "ADANIENT", "ADANIPORTS", "APOLLOHOSP", "ASIANPAINT", "AXISBANK", "BAJAJ-AUTO",
        "BAJFINANCE", "BAJAJFINSV", "BPCL", "BHARTIARTL", "BRITANNIA", "CIPLA", "COALINDIA",
        "DIVISLAB", "DRREDDY", "EICHERMOT", "GRASIM", "HCLTECH", "HDFCBANK", "HDFCLIFE",
        "HEROMOTOCO", "HINDALCO", "HINDUNILVR", "ICICIBANK", "ITC", "INDUSINDBK", "INFY",
        "JSWSTEEL", "KOTAKBANK", "LT", "M&M", "MARUTI", "NTPC", "ONGC", "POWERGRID", "RELIANCE",
        "SBILIFE", "SBIN", "SUNPHARMA", "TCS", "TATACONSUM", "TATAMOTORS", "TATASTEEL", "TECHM",
        "TITAN", "ULTRACEMCO", "UPL", "WIPRO",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_direction_index() -> Option<String> {
    Some("NIFTY".to_string())
}

fn default_total_capital() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_risk_per_trade() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_atr_period() -> usize {
    14
}

fn default_target_multiplier() -> Decimal {
    Decimal::new(10, 0)
}

fn default_max_trades_per_day() -> u32 {
    1
}

fn default_max_concurrent_trades() -> u32 {
    2
}

fn default_min_quote_volume() -> Decimal {
    Decimal::new(5000, 0)
}

fn default_high_vol_threshold() -> Decimal {
    Decimal::new(5, 3) // 0.005
}

fn default_high_vol_entry_mult() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_low_vol_entry_mult() -> Decimal {
    Decimal::new(8, 2) // 0.08
}

fn default_stop_atr_mult() -> Decimal {
    Decimal::new(3, 1) // 0.3
}

fn default_stop_range_mult() -> Decimal {
    Decimal::new(2, 1) // 0.2
}

fn default_top_n() -> usize {
    2
}

fn default_min_volume_threshold() -> Decimal {
    Decimal::new(5000, 0)
}

fn default_volume_score_cap() -> Decimal {
    Decimal::new(3, 0)
}

fn default_momentum_weight() -> Decimal {
    Decimal::new(5, 1)
}

fn default_volatility_weight() -> Decimal {
    Decimal::new(3, 1)
}

fn default_volume_weight() -> Decimal {
    Decimal::new(2, 1)
}

fn default_first_threshold() -> Decimal {
    Decimal::new(4, 3) // 0.4%
}

fn default_last_threshold() -> Decimal {
    Decimal::new(10, 2) // 10%
}

fn default_threshold_step() -> Decimal {
    Decimal::new(2, 3) // 0.2%
}

fn default_lock_offset() -> Decimal {
    Decimal::new(2, 3) // 0.2%
}

fn default_tick_threshold() -> Decimal {
    Decimal::new(500, 0)
}

fn default_small_tick() -> Decimal {
    Decimal::ONE
}

fn default_large_tick() -> Decimal {
    Decimal::new(3, 0)
}

fn default_limit_buffer() -> Decimal {
    Decimal::new(1, 3) // 0.1%
}

fn default_retry_buffer() -> Decimal {
    Decimal::new(2, 3) // 0.2%
}

fn default_max_retries() -> u8 {
    2
}

fn default_order_timeout() -> u64 {
    30
}

fn default_retry_backoff() -> u64 {
    500
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("ORB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.risk.risk_per_trade > Decimal::ZERO && self.risk.risk_per_trade <= Decimal::ONE,
            "risk_per_trade must be between 0 and 1"
        );

        anyhow::ensure!(
            self.risk.total_capital > Decimal::ZERO,
            "total_capital must be positive"
        );

        anyhow::ensure!(self.risk.atr_period >= 1, "atr_period must be >= 1");

        anyhow::ensure!(
            self.risk.target_multiplier > Decimal::ZERO,
            "target_multiplier must be positive"
        );

        anyhow::ensure!(
            self.risk.max_trades_per_day >= 1 && self.risk.max_concurrent_trades >= 1,
            "trade caps must be >= 1"
        );

        anyhow::ensure!(
            self.session.opening_start <= self.session.opening_end,
            "opening_start must not be after opening_end"
        );

        anyhow::ensure!(
            self.session.trading_start <= self.session.trading_end,
            "trading_start must not be after trading_end"
        );

        anyhow::ensure!(
            self.session.utc_offset().is_some(),
            "utc_offset_minutes out of range"
        );

        anyhow::ensure!(
            self.ticks.small_tick > Decimal::ZERO && self.ticks.large_tick > Decimal::ZERO,
            "tick sizes must be positive"
        );

        anyhow::ensure!(self.selection.top_n >= 1, "top_n must be >= 1");

        anyhow::ensure!(
            self.lock.threshold_step > Decimal::ZERO
                && self.lock.first_threshold > Decimal::ZERO
                && self.lock.first_threshold <= self.lock.last_threshold,
            "lock thresholds must be positive and ordered"
        );

        Ok(())
    }
}

impl SessionConfig {
    /// Exchange timezone as a fixed UTC offset.
    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            session: SessionConfig::default(),
            risk: RiskConfig::default(),
            levels: LevelsConfig::default(),
            selection: SelectionConfig::default(),
            lock: LockConfig::default(),
            ticks: TickConfig::default(),
            execution: ExecutionConfig::default(),
            journal_path: default_journal_path(),
            data_unavailable_alert: default_data_unavailable_alert(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_key: String::new(),
            exchange: default_exchange(),
            product: default_product(),
            strategy_tag: default_strategy_tag(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            opening_start: default_opening_start(),
            opening_end: default_opening_end(),
            trading_start: default_trading_start(),
            trading_end: default_trading_end(),
            entry_time: default_entry_time(),
            fallback_time: default_fallback_time(),
            eod_exit_time: default_eod_exit_time(),
            utc_offset_minutes: default_utc_offset(),
            bar_interval: default_bar_interval(),
            monitor_interval_secs: default_monitor_interval(),
            universe: default_universe(),
            direction_index: default_direction_index(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            total_capital: default_total_capital(),
            risk_per_trade: default_risk_per_trade(),
            atr_period: default_atr_period(),
            target_multiplier: default_target_multiplier(),
            max_trades_per_day: default_max_trades_per_day(),
            max_concurrent_trades: default_max_concurrent_trades(),
            min_quote_volume: default_min_quote_volume(),
        }
    }
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            high_vol_threshold: default_high_vol_threshold(),
            high_vol_entry_atr_mult: default_high_vol_entry_mult(),
            low_vol_entry_atr_mult: default_low_vol_entry_mult(),
            stop_atr_mult: default_stop_atr_mult(),
            stop_range_mult: default_stop_range_mult(),
        }
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            min_volume_threshold: default_min_volume_threshold(),
            volume_score_cap: default_volume_score_cap(),
            momentum_weight: default_momentum_weight(),
            volatility_weight: default_volatility_weight(),
            volume_weight: default_volume_weight(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            first_threshold: default_first_threshold(),
            last_threshold: default_last_threshold(),
            threshold_step: default_threshold_step(),
            lock_offset: default_lock_offset(),
        }
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            price_threshold: default_tick_threshold(),
            small_tick: default_small_tick(),
            large_tick: default_large_tick(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            limit_buffer: default_limit_buffer(),
            retry_buffer: default_retry_buffer(),
            max_retries: default_max_retries(),
            order_timeout_secs: default_order_timeout(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}
