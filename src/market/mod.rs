//! Market-data and broker integrations.
//!
//! ## OpenAlgo
//! REST connectivity for:
//! - Intraday bar history and live quotes
//! - Order placement with fill confirmation
//!
//! ## Paper
//! In-memory data feed and broker for paper sessions and tests.

mod client;
pub mod mock;
mod traits;
mod types;

pub use client::OpenAlgoClient;
pub use mock::{MockMarketData, PaperBroker, PaperOutcome};
pub use traits::{MarketDataProvider, OrderGateway};
#[cfg(test)]
pub use traits::MockOrderGateway;
pub use types::*;
