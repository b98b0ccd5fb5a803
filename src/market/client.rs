//! OpenAlgo REST API client.
//!
//! Every endpoint is a JSON `POST` carrying the API key in the body. Responses
//! are normalised into the engine's fixed types before they leave this module.

use crate::config::BrokerConfig;
use crate::error::{OrbError, OrbResult};
use crate::market::traits::{MarketDataProvider, OrderGateway};
use crate::market::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1000);
const CANCEL_CONFIRM_POLLS: u32 = 5;

/// OpenAlgo client for history, quotes and order placement.
pub struct OpenAlgoClient {
    http: Client,
    base_url: String,
    api_key: String,
    exchange: String,
    product: String,
    strategy_tag: String,
    offset: FixedOffset,
    order_timeout: Duration,
    poll_interval: Duration,
}

impl OpenAlgoClient {
    /// Create a new client from configuration.
    ///
    /// `offset` converts epoch timestamps to exchange-local time.
    pub fn new(config: &BrokerConfig, offset: FixedOffset, order_timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: config.host.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            exchange: config.exchange.clone(),
            product: config.product.clone(),
            strategy_tag: config.strategy_tag.clone(),
            offset,
            order_timeout: Duration::from_secs(order_timeout_secs),
            poll_interval: STATUS_POLL_INTERVAL,
        })
    }

    /// Override the fill confirmation polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> reqwest::Result<T> {
        let url = format!("{}/api/v1/{}", self.base_url, path);
        self.http.post(&url).json(body).send().await?.json().await
    }

    fn order_body(&self, order_id: &str) -> Value {
        json!({
            "apikey": self.api_key,
            "strategy": self.strategy_tag,
            "orderid": order_id,
        })
    }

    /// One `orderstatus` lookup. `None` when the broker gave no usable answer.
    async fn fetch_status(&self, symbol: &str, order_id: &str, price_hint: Decimal) -> Option<OrderState> {
        match self
            .post::<ApiEnvelope<OrderStatusData>>("orderstatus", &self.order_body(order_id))
            .await
        {
            Ok(env) if env.is_success() => env.data.map(|data| {
                match data.order_status.to_ascii_lowercase().as_str() {
                    "complete" | "completed" => {
                        let fill_price = [data.average_price, data.price, price_hint]
                            .into_iter()
                            .find(|p| *p > Decimal::ZERO)
                            .unwrap_or(price_hint);
                        OrderState::Filled(OrderFill {
                            filled: true,
                            fill_price,
                            order_id: order_id.to_string(),
                        })
                    }
                    "rejected" | "cancelled" | "canceled" => OrderState::Dead(data.order_status),
                    _ => OrderState::Working(data.order_status),
                }
            }),
            Ok(env) => {
                debug!(%symbol, order_id, reason = %env.reason(), "Order status unavailable");
                None
            }
            Err(e) => {
                warn!(%symbol, order_id, error = %e, "Order status request failed");
                None
            }
        }
    }

    /// Confirm a placed order by polling its status until complete.
    async fn await_fill(&self, symbol: &str, order_id: &str, price_hint: Decimal) -> OrbResult<OrderFill> {
        let deadline = Instant::now() + self.order_timeout;

        loop {
            match self.fetch_status(symbol, order_id, price_hint).await {
                Some(OrderState::Filled(fill)) => return Ok(fill),
                Some(OrderState::Dead(status)) => {
                    return Err(OrbError::order_rejected(
                        symbol,
                        format!("order {} {}", order_id, status),
                    ));
                }
                Some(OrderState::Working(status)) => {
                    debug!(%symbol, order_id, %status, "Order pending")
                }
                None => {}
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(OrbError::OrderTimeout {
                    symbol: symbol.to_string(),
                    order_id: Some(order_id.to_string()),
                    waited_secs: self.order_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Broker-side state of one order.
#[derive(Debug)]
enum OrderState {
    Filled(OrderFill),
    /// Rejected or cancelled, nothing executed
    Dead(String),
    Working(String),
}

/// Order ids come back either as strings or as bare numbers.
fn normalize_order_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl MarketDataProvider for OpenAlgoClient {
    #[instrument(skip(self))]
    async fn get_bars(&self, symbol: &str, date: NaiveDate, interval: &str) -> OrbResult<Vec<Bar>> {
        let day = date.format("%Y-%m-%d").to_string();
        let body = json!({
            "apikey": self.api_key,
            "symbol": symbol,
            "exchange": self.exchange,
            "interval": interval,
            "start_date": day,
            "end_date": day,
        });

        let env: ApiEnvelope<Vec<HistoryCandle>> = self
            .post("history", &body)
            .await
            .map_err(|e| OrbError::data_unavailable(symbol, e))?;

        if !env.is_success() {
            return Err(OrbError::data_unavailable(symbol, env.reason()));
        }

        let bars = env
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| {
                let local = DateTime::from_timestamp(c.timestamp, 0)?.with_timezone(&self.offset);
                Some(Bar::new(
                    local.naive_local(),
                    c.open,
                    c.high,
                    c.low,
                    c.close,
                    c.volume,
                ))
            })
            .collect();

        Ok(into_series(bars))
    }

    #[instrument(skip(self))]
    async fn get_quote(&self, symbol: &str) -> OrbResult<Quote> {
        let body = json!({
            "apikey": self.api_key,
            "symbol": symbol,
            "exchange": self.exchange,
        });

        let env: ApiEnvelope<QuoteData> = self
            .post("quotes", &body)
            .await
            .map_err(|e| OrbError::data_unavailable(symbol, e))?;

        if !env.is_success() {
            return Err(OrbError::data_unavailable(symbol, env.reason()));
        }

        let data = env
            .data
            .ok_or_else(|| OrbError::data_unavailable(symbol, "quote response without data"))?;

        if data.ltp <= Decimal::ZERO {
            return Err(OrbError::data_unavailable(
                symbol,
                format!("non-positive ltp {}", data.ltp),
            ));
        }

        Ok(Quote {
            symbol: symbol.to_string(),
            price: data.ltp,
            volume: data.volume,
        })
    }
}

#[async_trait]
impl OrderGateway for OpenAlgoClient {
    #[instrument(skip(self), fields(symbol = %request.symbol))]
    async fn place_order(&self, request: &OrderRequest) -> OrbResult<OrderFill> {
        let symbol = request.symbol.as_str();
        let price = match request.price_type {
            PriceType::Limit => request.price.to_string(),
            PriceType::Market => "0".to_string(),
        };
        let body = json!({
            "apikey": self.api_key,
            "strategy": self.strategy_tag,
            "symbol": symbol,
            "action": request.action.as_str(),
            "exchange": self.exchange,
            "pricetype": request.price_type.as_str(),
            "product": self.product,
            "quantity": request.quantity.to_string(),
            "price": price,
        });

        let response: Value = self.post("placeorder", &body).await.map_err(|e| {
            if e.is_timeout() {
                OrbError::OrderTimeout {
                    symbol: symbol.to_string(),
                    order_id: None,
                    waited_secs: self.order_timeout.as_secs(),
                }
            } else {
                OrbError::order_rejected(symbol, e)
            }
        })?;

        let status = response.get("status").and_then(Value::as_str).unwrap_or("");
        if !status.eq_ignore_ascii_case("success") {
            let reason = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("broker returned no message");
            return Err(OrbError::order_rejected(symbol, reason));
        }

        let order_id = normalize_order_id(response.get("orderid"))
            .ok_or_else(|| OrbError::order_rejected(symbol, "response without order id"))?;

        debug!(%symbol, %order_id, "Order accepted, awaiting fill");
        self.await_fill(symbol, &order_id, request.price).await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> OrbResult<OrderFill> {
        match self.post::<Value>("cancelorder", &self.order_body(order_id)).await {
            Ok(response) => {
                let status = response.get("status").and_then(Value::as_str).unwrap_or("");
                if status.eq_ignore_ascii_case("success") {
                    info!(%symbol, order_id, "Cancel accepted");
                } else {
                    // Usually the order already completed or died
                    let reason = response
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("broker returned no message");
                    debug!(%symbol, order_id, %reason, "Cancel refused, checking order status");
                }
            }
            Err(e) => warn!(%symbol, order_id, error = %e, "Cancel request failed, checking order status"),
        }

        for poll in 0..CANCEL_CONFIRM_POLLS {
            match self.fetch_status(symbol, order_id, Decimal::ZERO).await {
                Some(OrderState::Filled(fill)) => return Ok(fill),
                Some(OrderState::Dead(_)) => {
                    return Ok(OrderFill {
                        filled: false,
                        fill_price: Decimal::ZERO,
                        order_id: order_id.to_string(),
                    });
                }
                Some(OrderState::Working(status)) => {
                    debug!(%symbol, order_id, %status, "Order still working after cancel")
                }
                None => {}
            }
            if poll + 1 < CANCEL_CONFIRM_POLLS {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(OrbError::OrderUnresolved {
            symbol: symbol.to_string(),
            order_id: Some(order_id.to_string()),
            reason: "order still working after cancel".to_string(),
        })
    }
}
