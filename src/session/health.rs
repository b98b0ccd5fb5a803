//! Session health tracking.
//!
//! Counts repeated data outages and order failures and raises a structured
//! alert once a threshold is reached. Alerts are surfaced to the operator
//! through the log; nothing here halts the session.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// What went wrong.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum HealthIssue {
    /// Market data kept failing across the session
    RepeatedDataUnavailable { consecutive: u32, last_symbol: String },
    /// Entry or exit orders kept failing for one instrument
    OrderExecutionFailure { symbol: String, consecutive: u32 },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Warning,
    Error,
}

/// One alert for the operator.
#[derive(Debug, Clone, Serialize)]
pub struct HealthAlert {
    pub at: NaiveDateTime,
    pub issue: HealthIssue,
    pub severity: AlertSeverity,
    pub message: String,
}

impl HealthAlert {
    /// Emit as a structured log line.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        match self.severity {
            AlertSeverity::Warning => warn!(target: "session_alert", "SESSION_ALERT: {}", json),
            AlertSeverity::Error => error!(target: "session_alert", "SESSION_ALERT: {}", json),
        }
    }
}

/// Tracks data and order health for one session.
#[derive(Debug)]
pub struct DataHealthMonitor {
    data_alert_threshold: u32,
    order_alert_threshold: u32,
    consecutive_data_failures: u32,
    data_alerted: bool,
    order_failures: HashMap<String, u32>,
    alerts: Vec<HealthAlert>,
}

impl DataHealthMonitor {
    pub fn new(data_alert_threshold: u32, order_alert_threshold: u32) -> Self {
        Self {
            data_alert_threshold: data_alert_threshold.max(1),
            order_alert_threshold: order_alert_threshold.max(1),
            consecutive_data_failures: 0,
            data_alerted: false,
            order_failures: HashMap::new(),
            alerts: Vec::new(),
        }
    }

    /// Record a `DataUnavailable` failure. Alerts once per outage.
    pub fn record_data_failure(&mut self, symbol: &str, at: NaiveDateTime) -> Option<HealthAlert> {
        self.consecutive_data_failures += 1;
        debug!(
            %symbol,
            consecutive = self.consecutive_data_failures,
            "Market data unavailable"
        );

        if self.consecutive_data_failures < self.data_alert_threshold || self.data_alerted {
            return None;
        }

        self.data_alerted = true;
        let alert = HealthAlert {
            at,
            issue: HealthIssue::RepeatedDataUnavailable {
                consecutive: self.consecutive_data_failures,
                last_symbol: symbol.to_string(),
            },
            severity: AlertSeverity::Error,
            message: format!(
                "{} consecutive market data failures, operator attention required",
                self.consecutive_data_failures
            ),
        };
        self.push(alert.clone());
        Some(alert)
    }

    /// Any successful fetch ends the outage.
    pub fn record_data_success(&mut self) {
        if self.consecutive_data_failures > 0 {
            info!(
                previous_failures = self.consecutive_data_failures,
                "Market data recovered"
            );
        }
        self.consecutive_data_failures = 0;
        self.data_alerted = false;
    }

    pub fn record_order_failure(&mut self, symbol: &str, at: NaiveDateTime) -> Option<HealthAlert> {
        let count = self.order_failures.entry(symbol.to_string()).or_insert(0);
        *count += 1;
        let consecutive = *count;

        if consecutive < self.order_alert_threshold {
            return None;
        }

        let alert = HealthAlert {
            at,
            issue: HealthIssue::OrderExecutionFailure {
                symbol: symbol.to_string(),
                consecutive,
            },
            severity: AlertSeverity::Warning,
            message: format!("{} consecutive order failures for {}", consecutive, symbol),
        };
        self.push(alert.clone());
        Some(alert)
    }

    pub fn record_order_success(&mut self, symbol: &str) {
        self.order_failures.remove(symbol);
    }

    pub fn consecutive_data_failures(&self) -> u32 {
        self.consecutive_data_failures
    }

    pub fn alerts(&self) -> &[HealthAlert] {
        &self.alerts
    }

    /// Whether the session saw an unresolved data outage alert.
    pub fn needs_attention(&self) -> bool {
        self.data_alerted
    }

    /// Forget everything at session start.
    pub fn reset(&mut self) {
        self.consecutive_data_failures = 0;
        self.data_alerted = false;
        self.order_failures.clear();
        self.alerts.clear();
    }

    fn push(&mut self, alert: HealthAlert) {
        alert.emit();
        self.alerts.push(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 6)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_data_alert_once_per_outage() {
        let mut monitor = DataHealthMonitor::new(3, 3);

        assert!(monitor.record_data_failure("SBIN", at()).is_none());
        assert!(monitor.record_data_failure("TCS", at()).is_none());
        let alert = monitor.record_data_failure("INFY", at()).unwrap();
        assert!(matches!(
            alert.issue,
            HealthIssue::RepeatedDataUnavailable { consecutive: 3, .. }
        ));
        assert!(monitor.needs_attention());

        // no repeat while the same outage continues
        assert!(monitor.record_data_failure("INFY", at()).is_none());
        assert_eq!(monitor.alerts().len(), 1);

        monitor.record_data_success();
        assert_eq!(monitor.consecutive_data_failures(), 0);
        assert!(!monitor.needs_attention());
    }

    #[test]
    fn test_order_failures_per_symbol() {
        let mut monitor = DataHealthMonitor::new(5, 2);

        assert!(monitor.record_order_failure("SBIN", at()).is_none());
        assert!(monitor.record_order_failure("TCS", at()).is_none());
        assert!(monitor.record_order_failure("SBIN", at()).is_some());

        monitor.record_order_success("TCS");
        assert!(monitor.record_order_failure("TCS", at()).is_none());

        monitor.reset();
        assert!(monitor.alerts().is_empty());
    }
}
