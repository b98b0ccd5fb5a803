//! Collaborator contracts consumed by the engine.
//!
//! Implementations normalise whatever their venue returns into the fixed
//! types of this module before anything reaches the core:
//! - bars arrive ordered by timestamp with no duplicates
//! - a non-positive quote price is reported as `DataUnavailable`
//! - order responses become `OrderFill { filled, fill_price, order_id }`

use super::types::{Bar, OrderFill, OrderRequest, Quote};
use crate::error::OrbResult;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Source of bar history and live quotes.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch the ordered bar series of one instrument for one trading day.
    async fn get_bars(&self, symbol: &str, date: NaiveDate, interval: &str)
        -> OrbResult<Vec<Bar>>;

    /// Fetch the latest quote.
    async fn get_quote(&self, symbol: &str) -> OrbResult<Quote>;
}

/// Broker order placement.
///
/// Fails with `OrderRejected` or `OrderTimeout`; retries are the caller's job.
/// A timed-out order must be cancelled and reconciled through
/// `cancel_order` before anything is placed in its place.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> OrbResult<OrderFill>;

    /// Cancel an order and report its final state. An order that filled
    /// before the cancel landed comes back with `filled: true`. An error
    /// means the final state is unknown.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> OrbResult<OrderFill>;
}
