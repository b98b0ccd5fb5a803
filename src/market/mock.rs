//! In-memory market data feed and paper broker.
//!
//! `MockMarketData` serves scripted bars and quotes. `PaperBroker` fills every
//! order at its price hint and keeps a simulated position ledger, so a full
//! session can run without touching a real account.

use super::traits::{MarketDataProvider, OrderGateway};
use super::types::*;
use crate::error::{OrbError, OrbResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Scripted market data.
#[derive(Default)]
pub struct MockMarketData {
    bars: Arc<RwLock<HashMap<String, Vec<Bar>>>>,
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
    unavailable: Arc<RwLock<HashSet<String>>>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the bar series of a symbol.
    pub async fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.bars
            .write()
            .await
            .insert(symbol.to_string(), into_series(bars));
    }

    /// Set the quote of a symbol.
    pub async fn set_quote(&self, symbol: &str, price: Decimal, volume: Decimal) {
        self.quotes.write().await.insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                price,
                volume,
            },
        );
    }

    /// Move the last price of a symbol, keeping its volume.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let mut quotes = self.quotes.write().await;
        let quote = quotes.entry(symbol.to_string()).or_insert_with(|| Quote {
            symbol: symbol.to_string(),
            price,
            volume: Decimal::ZERO,
        });
        quote.price = price;
    }

    /// Make every request for `symbol` fail until cleared.
    pub async fn set_unavailable(&self, symbol: &str, unavailable: bool) {
        let mut set = self.unavailable.write().await;
        if unavailable {
            set.insert(symbol.to_string());
        } else {
            set.remove(symbol);
        }
    }

    async fn check_available(&self, symbol: &str) -> OrbResult<()> {
        if self.unavailable.read().await.contains(symbol) {
            return Err(OrbError::data_unavailable(symbol, "provider did not respond"));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketData {
    async fn get_bars(&self, symbol: &str, date: NaiveDate, _interval: &str) -> OrbResult<Vec<Bar>> {
        self.check_available(symbol).await?;
        let bars = self.bars.read().await;
        let series = bars
            .get(symbol)
            .ok_or_else(|| OrbError::data_unavailable(symbol, "no history"))?;

        Ok(series
            .iter()
            .filter(|b| b.timestamp.date() == date)
            .cloned()
            .collect())
    }

    async fn get_quote(&self, symbol: &str) -> OrbResult<Quote> {
        self.check_available(symbol).await?;
        let quote = self
            .quotes
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| OrbError::data_unavailable(symbol, "no quote"))?;

        if quote.price <= Decimal::ZERO {
            return Err(OrbError::data_unavailable(symbol, "non-positive price"));
        }
        Ok(quote)
    }
}

/// Scripted outcome for the next order.
#[derive(Debug, Clone)]
pub enum PaperOutcome {
    Reject(String),
    /// Confirmation times out; the order rests until cancelled
    Timeout,
    /// Confirmation times out but the order fills before the cancel lands
    LateFill,
    Unfilled,
}

/// Simulated net position for one symbol.
#[derive(Debug, Clone, Default)]
pub struct PaperPosition {
    /// Signed quantity (negative = short)
    pub quantity: i64,
    pub avg_price: Decimal,
}

/// Paper account state.
#[derive(Debug, Clone, Default)]
pub struct PaperState {
    pub positions: HashMap<String, PaperPosition>,
    pub realized_pnl: Decimal,
    pub orders: Vec<OrderRequest>,
}

/// Order left at the paper venue after an unconfirmed placement.
#[derive(Debug, Clone)]
struct RestingOrder {
    request: OrderRequest,
    filled: bool,
}

/// Broker that fills orders at their price hint.
pub struct PaperBroker {
    state: Arc<RwLock<PaperState>>,
    scripted: Arc<RwLock<VecDeque<PaperOutcome>>>,
    resting: Arc<RwLock<HashMap<String, RestingOrder>>>,
    order_id_counter: AtomicU64,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperState::default())),
            scripted: Arc::new(RwLock::new(VecDeque::new())),
            resting: Arc::new(RwLock::new(HashMap::new())),
            order_id_counter: AtomicU64::new(1),
        }
    }

    /// Queue an outcome for the next order instead of a fill.
    pub async fn script(&self, outcome: PaperOutcome) {
        self.scripted.write().await.push_back(outcome);
    }

    /// Snapshot of the paper account.
    pub async fn get_state(&self) -> PaperState {
        self.state.read().await.clone()
    }

    /// Orders placed so far.
    pub async fn orders(&self) -> Vec<OrderRequest> {
        self.state.read().await.orders.clone()
    }

    /// Orders still resting after an unconfirmed placement.
    pub async fn resting_orders(&self) -> usize {
        self.resting.read().await.len()
    }

    async fn rest(&self, order_id: &str, request: &OrderRequest, filled: bool) {
        if filled {
            Self::apply_fill(&mut *self.state.write().await, request, request.price);
        }
        self.resting.write().await.insert(
            order_id.to_string(),
            RestingOrder {
                request: request.clone(),
                filled,
            },
        );
    }

    fn apply_fill(state: &mut PaperState, request: &OrderRequest, price: Decimal) {
        let signed = match request.action {
            OrderAction::Buy => request.quantity as i64,
            OrderAction::Sell => -(request.quantity as i64),
        };
        let position = state.positions.entry(request.symbol.clone()).or_default();
        let before = position.quantity;
        let after = before + signed;

        if before == 0 || before.signum() == signed.signum() {
            // Opening or adding: blend average price
            let total = Decimal::from(before.abs()) * position.avg_price
                + Decimal::from(signed.abs()) * price;
            position.avg_price = total / Decimal::from(after.abs());
        } else {
            // Reducing: realise PnL on the closed quantity
            let closed = before.abs().min(signed.abs());
            let per_unit = if before > 0 {
                price - position.avg_price
            } else {
                position.avg_price - price
            };
            state.realized_pnl += per_unit * Decimal::from(closed);
            if after != 0 && after.signum() != before.signum() {
                position.avg_price = price;
            }
        }

        position.quantity = after;
        if after == 0 {
            position.avg_price = Decimal::ZERO;
        }
    }
}

#[async_trait]
impl OrderGateway for PaperBroker {
    async fn place_order(&self, request: &OrderRequest) -> OrbResult<OrderFill> {
        let order_id = self.order_id_counter.fetch_add(1, Ordering::SeqCst).to_string();
        self.state.write().await.orders.push(request.clone());

        if let Some(outcome) = self.scripted.write().await.pop_front() {
            debug!(symbol = %request.symbol, ?outcome, "Scripted paper outcome");
            let timeout = |order_id: String| OrbError::OrderTimeout {
                symbol: request.symbol.clone(),
                order_id: Some(order_id),
                waited_secs: 0,
            };
            return match outcome {
                PaperOutcome::Reject(reason) => Err(OrbError::order_rejected(&request.symbol, reason)),
                PaperOutcome::Timeout => {
                    self.rest(&order_id, request, false).await;
                    Err(timeout(order_id))
                }
                PaperOutcome::LateFill => {
                    self.rest(&order_id, request, true).await;
                    Err(timeout(order_id))
                }
                PaperOutcome::Unfilled => {
                    self.rest(&order_id, request, false).await;
                    Ok(OrderFill {
                        filled: false,
                        fill_price: Decimal::ZERO,
                        order_id,
                    })
                }
            };
        }

        if request.quantity == 0 || request.price <= Decimal::ZERO {
            return Err(OrbError::order_rejected(
                &request.symbol,
                "paper orders need a quantity and a price hint",
            ));
        }

        let mut state = self.state.write().await;
        Self::apply_fill(&mut state, request, request.price);

        info!(
            symbol = %request.symbol,
            action = request.action.as_str(),
            quantity = request.quantity,
            price = %request.price,
            %order_id,
            "[PAPER] Order filled"
        );

        Ok(OrderFill {
            filled: true,
            fill_price: request.price,
            order_id,
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> OrbResult<OrderFill> {
        let resting = self
            .resting
            .write()
            .await
            .remove(order_id)
            .ok_or_else(|| OrbError::OrderUnresolved {
                symbol: symbol.to_string(),
                order_id: Some(order_id.to_string()),
                reason: "unknown paper order".to_string(),
            })?;

        info!(%symbol, order_id, filled = resting.filled, "[PAPER] Order cancel");
        Ok(OrderFill {
            filled: resting.filled,
            fill_price: if resting.filled {
                resting.request.price
            } else {
                Decimal::ZERO
            },
            order_id: order_id.to_string(),
        })
    }
}
