//! Order placement with buffered limit prices and retries.

use crate::config::ExecutionConfig;
use crate::error::{OrbError, OrbResult};
use crate::market::{OrderAction, OrderFill, OrderGateway, OrderRequest, PriceType};
use crate::strategy::TickRounder;
use crate::utils::apply_buffer;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{error, info, warn};

/// Turns order intents into broker orders.
pub struct OrderExecutor {
    config: ExecutionConfig,
    ticks: TickRounder,
}

impl OrderExecutor {
    pub fn new(config: ExecutionConfig, ticks: TickRounder) -> Self {
        Self { config, ticks }
    }

    /// Limit price `ltp * (1 ± buffer)`, above the market for buys and
    /// below it for sells, tick-rounded.
    pub fn limit_price(&self, action: OrderAction, ltp: Decimal, buffer: Decimal) -> Decimal {
        self.ticks
            .round(apply_buffer(ltp, buffer, action == OrderAction::Buy))
    }

    /// Enter with a limit order around `ltp`.
    ///
    /// The first attempt uses `limit_buffer`; retries use the wider
    /// `retry_buffer`. Gives up after `max_retries` retries.
    pub async fn enter(
        &self,
        gateway: &dyn OrderGateway,
        symbol: &str,
        action: OrderAction,
        quantity: u64,
        ltp: Decimal,
    ) -> OrbResult<OrderFill> {
        let mut attempt = 0u8;
        loop {
            let buffer = if attempt == 0 {
                self.config.limit_buffer
            } else {
                self.config.retry_buffer
            };
            let request = OrderRequest {
                symbol: symbol.to_string(),
                action,
                quantity,
                price_type: PriceType::Limit,
                price: self.limit_price(action, ltp, buffer),
            };

            info!(
                %symbol,
                action = action.as_str(),
                quantity,
                price = %request.price,
                attempt,
                "Placing entry order"
            );

            match self.place(gateway, &request).await {
                Ok(fill) => return Ok(fill),
                Err(e) if e.is_order_failure() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        %symbol,
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Entry order failed, retrying with wider buffer"
                    );
                    self.backoff(attempt).await;
                }
                Err(e) => {
                    warn!(%symbol, error = %e, "Entry abandoned");
                    return Err(e);
                }
            }
        }
    }

    /// Close with a market order. `reference_price` is passed as the price
    /// hint for brokers that need one; without a quote the hint is zero and
    /// the fill price comes from the broker alone.
    pub async fn exit(
        &self,
        gateway: &dyn OrderGateway,
        symbol: &str,
        action: OrderAction,
        quantity: u64,
        reference_price: Option<Decimal>,
    ) -> OrbResult<OrderFill> {
        let request = OrderRequest {
            symbol: symbol.to_string(),
            action,
            quantity,
            price_type: PriceType::Market,
            price: reference_price.unwrap_or(Decimal::ZERO),
        };

        let mut attempt = 0u8;
        loop {
            info!(
                %symbol,
                action = action.as_str(),
                quantity,
                attempt,
                "Placing exit order"
            );

            match self.place(gateway, &request).await {
                Ok(fill) => return Ok(fill),
                Err(e) if e.is_order_failure() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(%symbol, attempt, error = %e, "Exit order failed, retrying");
                    self.backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Place once. An order that was not confirmed filled is cancelled
    /// and reconciled before the caller may retry: a late fill is kept,
    /// a confirmed cancel becomes a retryable failure, and anything else
    /// is `OrderUnresolved`.
    async fn place(&self, gateway: &dyn OrderGateway, request: &OrderRequest) -> OrbResult<OrderFill> {
        let symbol = request.symbol.as_str();
        match gateway.place_order(request).await {
            Ok(fill) if fill.filled => Ok(fill),
            Ok(fill) => {
                let failure =
                    OrbError::order_rejected(symbol, format!("order {} not filled", fill.order_id));
                self.reconcile(gateway, request, &fill.order_id, failure).await
            }
            Err(OrbError::OrderTimeout {
                order_id: Some(order_id),
                waited_secs,
                ..
            }) => {
                let failure = OrbError::OrderTimeout {
                    symbol: symbol.to_string(),
                    order_id: Some(order_id.clone()),
                    waited_secs,
                };
                self.reconcile(gateway, request, &order_id, failure).await
            }
            Err(OrbError::OrderTimeout { order_id: None, .. }) => {
                error!(%symbol, "Order placement timed out without an order id, not retrying");
                Err(OrbError::OrderUnresolved {
                    symbol: symbol.to_string(),
                    order_id: None,
                    reason: "placement timed out before the broker returned an order id".into(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn reconcile(
        &self,
        gateway: &dyn OrderGateway,
        request: &OrderRequest,
        order_id: &str,
        failure: OrbError,
    ) -> OrbResult<OrderFill> {
        let symbol = request.symbol.as_str();
        warn!(%symbol, order_id, error = %failure, "Order not confirmed, cancelling");

        match gateway.cancel_order(symbol, order_id).await {
            Ok(mut fill) if fill.filled => {
                if fill.fill_price <= Decimal::ZERO {
                    fill.fill_price = request.price;
                }
                info!(%symbol, order_id, price = %fill.fill_price, "Order filled before cancel, keeping fill");
                Ok(fill)
            }
            Ok(_) => {
                info!(%symbol, order_id, "Order cancelled");
                Err(failure)
            }
            Err(e) => {
                error!(%symbol, order_id, error = %e, "Order state unknown after cancel, not retrying");
                Err(OrbError::OrderUnresolved {
                    symbol: symbol.to_string(),
                    order_id: Some(order_id.to_string()),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Settle an order left unresolved by an earlier attempt. `Ok(None)`
    /// when the broker confirms nothing executed, so a fresh order is safe.
    pub async fn resolve(
        &self,
        gateway: &dyn OrderGateway,
        symbol: &str,
        order_id: &str,
    ) -> OrbResult<Option<OrderFill>> {
        match gateway.cancel_order(symbol, order_id).await {
            Ok(fill) if fill.filled => {
                info!(%symbol, order_id, price = %fill.fill_price, "Unresolved order had filled");
                Ok(Some(fill))
            }
            Ok(_) => {
                info!(%symbol, order_id, "Unresolved order cancelled");
                Ok(None)
            }
            Err(e) => Err(OrbError::OrderUnresolved {
                symbol: symbol.to_string(),
                order_id: Some(order_id.to_string()),
                reason: e.to_string(),
            }),
        }
    }

    async fn backoff(&self, attempt: u8) {
        let delay = self.config.retry_backoff_ms * attempt as u64;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TickConfig;
    use crate::market::MockOrderGateway;
    use mockall::predicate::function;
    use mockall::Sequence;
    use rust_decimal_macros::dec;

    fn executor() -> OrderExecutor {
        OrderExecutor::new(
            ExecutionConfig {
                retry_backoff_ms: 0,
                ..Default::default()
            },
            TickRounder::uniform(dec!(0.05)),
        )
    }

    fn filled(price: Decimal) -> OrbResult<OrderFill> {
        Ok(OrderFill {
            filled: true,
            fill_price: price,
            order_id: "1".into(),
        })
    }

    fn cancelled(order_id: &str) -> OrbResult<OrderFill> {
        Ok(OrderFill {
            filled: false,
            fill_price: Decimal::ZERO,
            order_id: order_id.to_string(),
        })
    }

    fn timed_out(symbol: &str, order_id: Option<&str>) -> OrbError {
        OrbError::OrderTimeout {
            symbol: symbol.to_string(),
            order_id: order_id.map(str::to_string),
            waited_secs: 30,
        }
    }

    #[test]
    fn test_limit_price_direction_and_ticks() {
        let e = executor();
        // 801 * 1.001 = 801.801 -> 801.80
        assert_eq!(e.limit_price(OrderAction::Buy, dec!(801), dec!(0.001)), dec!(801.80));
        // 801 * 0.999 = 800.199 -> 800.20
        assert_eq!(e.limit_price(OrderAction::Sell, dec!(801), dec!(0.001)), dec!(800.20));

        let coarse = OrderExecutor::new(ExecutionConfig::default(), TickRounder::from(&TickConfig::default()));
        assert_eq!(coarse.limit_price(OrderAction::Buy, dec!(1000), dec!(0.001)), dec!(1002));
    }

    #[tokio::test]
    async fn test_enter_first_attempt() {
        let mut gateway = MockOrderGateway::new();
        gateway
            .expect_place_order()
            .with(function(|r: &OrderRequest| {
                r.price_type == PriceType::Limit && r.price == dec!(100.10) && r.quantity == 40
            }))
            .times(1)
            .returning(|r| filled(r.price));

        let fill = executor()
            .enter(&gateway, "SBIN", OrderAction::Buy, 40, dec!(100))
            .await
            .unwrap();
        assert_eq!(fill.fill_price, dec!(100.10));
    }

    #[tokio::test]
    async fn test_enter_retries_with_wider_buffer() {
        let mut gateway = MockOrderGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_place_order()
            .with(function(|r: &OrderRequest| r.price == dec!(99.90)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Err(OrbError::order_rejected(&r.symbol, "price band")));
        gateway
            .expect_place_order()
            .with(function(|r: &OrderRequest| r.price == dec!(99.80)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| filled(r.price));

        let fill = executor()
            .enter(&gateway, "SBIN", OrderAction::Sell, 10, dec!(100))
            .await
            .unwrap();
        assert_eq!(fill.fill_price, dec!(99.80));
    }

    #[tokio::test]
    async fn test_enter_abandons_after_max_retries() {
        let mut gateway = MockOrderGateway::new();
        // one attempt plus two retries, each cancelled before the next
        gateway
            .expect_place_order()
            .times(3)
            .returning(|r| Err(timed_out(&r.symbol, Some("5"))));
        gateway
            .expect_cancel_order()
            .withf(|symbol, order_id| symbol == "SBIN" && order_id == "5")
            .times(3)
            .returning(|_, id| cancelled(id));

        let err = executor()
            .enter(&gateway, "SBIN", OrderAction::Buy, 10, dec!(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OrbError::OrderTimeout { .. }));
    }

    #[tokio::test]
    async fn test_unfilled_counts_as_failure() {
        let mut gateway = MockOrderGateway::new();
        gateway.expect_place_order().times(3).returning(|_| cancelled("9"));
        gateway
            .expect_cancel_order()
            .times(3)
            .returning(|_, id| cancelled(id));

        let err = executor()
            .enter(&gateway, "SBIN", OrderAction::Buy, 10, dec!(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OrbError::OrderRejected { .. }));
    }

    #[tokio::test]
    async fn test_exit_is_market_order() {
        let mut gateway = MockOrderGateway::new();
        gateway
            .expect_place_order()
            .with(function(|r: &OrderRequest| {
                r.price_type == PriceType::Market && r.action == OrderAction::Sell
            }))
            .times(1)
            .returning(|r| filled(r.price));

        let fill = executor()
            .exit(&gateway, "SBIN", OrderAction::Sell, 10, Some(dec!(103.8)))
            .await
            .unwrap();
        assert_eq!(fill.fill_price, dec!(103.8));
    }

    #[tokio::test]
    async fn test_timed_out_entry_is_cancelled_before_retry() {
        let mut gateway = MockOrderGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_place_order()
            .with(function(|r: &OrderRequest| r.price == dec!(100.10)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Err(timed_out(&r.symbol, Some("11"))));
        gateway
            .expect_cancel_order()
            .withf(|_, order_id| order_id == "11")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, id| cancelled(id));
        gateway
            .expect_place_order()
            .with(function(|r: &OrderRequest| r.price == dec!(100.20)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| filled(r.price));

        let fill = executor()
            .enter(&gateway, "SBIN", OrderAction::Buy, 10, dec!(100))
            .await
            .unwrap();
        assert_eq!(fill.fill_price, dec!(100.20));
    }

    #[tokio::test]
    async fn test_late_entry_fill_is_kept() {
        let mut gateway = MockOrderGateway::new();
        gateway
            .expect_place_order()
            .times(1)
            .returning(|r| Err(timed_out(&r.symbol, Some("12"))));
        gateway.expect_cancel_order().times(1).returning(|_, id| {
            Ok(OrderFill {
                filled: true,
                fill_price: dec!(100.05),
                order_id: id.to_string(),
            })
        });

        let fill = executor()
            .enter(&gateway, "SBIN", OrderAction::Buy, 10, dec!(100))
            .await
            .unwrap();
        assert!(fill.filled);
        assert_eq!(fill.fill_price, dec!(100.05));
        assert_eq!(fill.order_id, "12");
    }

    #[tokio::test]
    async fn test_timed_out_exit_that_filled_is_not_resent() {
        let mut gateway = MockOrderGateway::new();
        gateway
            .expect_place_order()
            .with(function(|r: &OrderRequest| r.price_type == PriceType::Market))
            .times(1)
            .returning(|r| Err(timed_out(&r.symbol, Some("13"))));
        // broker reports no average price: the reference stands in
        gateway.expect_cancel_order().times(1).returning(|_, id| {
            Ok(OrderFill {
                filled: true,
                fill_price: Decimal::ZERO,
                order_id: id.to_string(),
            })
        });

        let fill = executor()
            .exit(&gateway, "SBIN", OrderAction::Sell, 10, Some(dec!(101.5)))
            .await
            .unwrap();
        assert_eq!(fill.fill_price, dec!(101.5));
        assert_eq!(fill.order_id, "13");
    }

    #[tokio::test]
    async fn test_unconfirmed_cancel_stops_retries() {
        let mut gateway = MockOrderGateway::new();
        gateway
            .expect_place_order()
            .times(1)
            .returning(|r| Err(timed_out(&r.symbol, Some("14"))));
        gateway.expect_cancel_order().times(1).returning(|symbol, id| {
            Err(OrbError::OrderUnresolved {
                symbol: symbol.to_string(),
                order_id: Some(id.to_string()),
                reason: "still open".into(),
            })
        });

        let err = executor()
            .exit(&gateway, "SBIN", OrderAction::Sell, 10, Some(dec!(101)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrbError::OrderUnresolved { order_id: Some(ref id), .. } if id == "14"
        ));
    }

    #[tokio::test]
    async fn test_placement_timeout_without_id_is_not_retried() {
        let mut gateway = MockOrderGateway::new();
        gateway
            .expect_place_order()
            .times(1)
            .returning(|r| Err(timed_out(&r.symbol, None)));
        gateway.expect_cancel_order().never();

        let err = executor()
            .enter(&gateway, "SBIN", OrderAction::Buy, 10, dec!(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OrbError::OrderUnresolved { order_id: None, .. }));
    }

    #[tokio::test]
    async fn test_resolve_reports_fill_or_cancel() {
        let mut gateway = MockOrderGateway::new();
        let mut seq = Sequence::new();
        gateway
            .expect_cancel_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, id| cancelled(id));
        gateway
            .expect_cancel_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| filled(dec!(99)));

        let e = executor();
        assert_eq!(e.resolve(&gateway, "SBIN", "15").await.unwrap(), None);
        let fill = e.resolve(&gateway, "SBIN", "16").await.unwrap().unwrap();
        assert_eq!(fill.fill_price, dec!(99));
    }

    #[tokio::test]
    async fn test_open_order_at_broker_blocks_second_placement() {
        use crate::config::BrokerConfig;
        use crate::market::OpenAlgoClient;
        use chrono::FixedOffset;
        use serde_json::json;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/placeorder"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "orderid": "250106000777"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/orderstatus"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"order_status": "open", "average_price": 0, "price": 100.1}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/cancelorder"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "orderid": "250106000777"
            })))
            .mount(&server)
            .await;

        let config = BrokerConfig {
            host: server.uri(),
            api_key: "test-key".to_string(),
            ..BrokerConfig::default()
        };
        let client = OpenAlgoClient::new(&config, FixedOffset::east_opt(330 * 60).unwrap(), 0)
            .unwrap()
            .with_poll_interval(std::time::Duration::from_millis(5));

        let err = executor()
            .enter(&client, "SBIN", OrderAction::Buy, 10, dec!(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OrbError::OrderUnresolved { .. }));

        let requests = server.received_requests().await.unwrap();
        let calls = |endpoint: &str| {
            requests
                .iter()
                .filter(|r| r.url.path() == format!("/api/v1/{}", endpoint))
                .count()
        };
        assert_eq!(calls("placeorder"), 1);
        assert_eq!(calls("cancelorder"), 1);
    }
}
