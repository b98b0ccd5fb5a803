//! Trading session orchestration.
//!
//! Wires the strategy core to the collaborators:
//! - Trade book with per-day and concurrent caps
//! - Order execution with buffered limits and retries
//! - Data and order health alerts
//! - Job schedule and the session runner

mod book;
mod executor;
mod health;
mod runner;
mod schedule;

pub use book::{BookLimit, TradeBook};
pub use executor::OrderExecutor;
pub use health::{AlertSeverity, DataHealthMonitor, HealthAlert, HealthIssue};
pub use runner::{SessionReport, SessionRunner};
pub use schedule::{Job, JobSchedule};
