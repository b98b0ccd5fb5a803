//! Error types for the breakout engine.
//!
//! Every variant degrades to "no trade this cycle" for the instrument it
//! names. None of them is fatal to the process.

use thiserror::Error;

/// Errors raised by the signal, sizing and lifecycle core and by the
/// market-data / broker collaborators at their boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrbError {
    /// The opening window produced no bars for the instrument.
    #[error("no opening-range data for {symbol}")]
    NoOpeningData { symbol: String },

    /// Quote or bar history could not be fetched.
    #[error("market data unavailable for {symbol}: {reason}")]
    DataUnavailable { symbol: String, reason: String },

    /// Entry/stop/target ordering invariant violated for a side.
    #[error("invalid {side} levels for {symbol}: {reason}")]
    InvalidLevels {
        symbol: String,
        side: String,
        reason: String,
    },

    /// Risk per share or computed quantity is not positive.
    #[error("zero position size for {symbol}: {reason}")]
    ZeroSizing { symbol: String, reason: String },

    /// Broker refused the order.
    #[error("order rejected for {symbol}: {reason}")]
    OrderRejected { symbol: String, reason: String },

    /// Broker did not confirm the order in time. `order_id` is set when the
    /// broker accepted the order, which may still be open.
    #[error("order timed out for {symbol} after {waited_secs}s")]
    OrderTimeout {
        symbol: String,
        order_id: Option<String>,
        waited_secs: u64,
    },

    /// An order may still be live at the broker and its final state could
    /// not be confirmed. Placing another order could double the position.
    #[error("order state unknown for {symbol} (order {}): {reason}", .order_id.as_deref().unwrap_or("unassigned"))]
    OrderUnresolved {
        symbol: String,
        order_id: Option<String>,
        reason: String,
    },

    /// Lifecycle operation invoked from a state that does not allow it.
    #[error("invalid transition for {symbol}: {from} -> {to}")]
    InvalidTransition {
        symbol: String,
        from: String,
        to: String,
    },

    /// Configuration rejected at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OrbError {
    /// Shorthand for a data failure.
    pub fn data_unavailable(symbol: impl Into<String>, reason: impl ToString) -> Self {
        Self::DataUnavailable {
            symbol: symbol.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a broker rejection.
    pub fn order_rejected(symbol: impl Into<String>, reason: impl ToString) -> Self {
        Self::OrderRejected {
            symbol: symbol.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the orchestrator may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DataUnavailable { .. } | Self::OrderRejected { .. } | Self::OrderTimeout { .. }
        )
    }

    /// Whether this is a broker-side order failure that left no live order
    /// behind. `OrderUnresolved` is not one.
    pub fn is_order_failure(&self) -> bool {
        matches!(self, Self::OrderRejected { .. } | Self::OrderTimeout { .. })
    }
}

/// Result alias for the core.
pub type OrbResult<T> = std::result::Result<T, OrbError>;
