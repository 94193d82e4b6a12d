//! Exchange-product seam
//!
//! The narrow interface the loop engine trades through. Request signing,
//! rate limiting and wire formats belong to implementations, not here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use super::errors::GridResult;
use super::order::Order;

/// One observation from the price feed.
#[derive(Debug, Clone)]
pub struct PriceTick {
    pub product: String,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

/// One tradable product on one exchange.
#[async_trait]
pub trait ExchangeProduct: Send + Sync {
    /// Place a limit buy; returns the server-assigned order id.
    async fn limit_buy(&self, client_id: Uuid, size: Decimal, price: Decimal)
        -> GridResult<String>;

    /// Place a limit sell; returns the server-assigned order id.
    async fn limit_sell(
        &self,
        client_id: Uuid,
        size: Decimal,
        price: Decimal,
    ) -> GridResult<String>;

    /// Cancel a resting order by server id. The terminal update arrives on
    /// the order feed like any other.
    async fn cancel(&self, server_id: &str) -> GridResult<()>;

    /// Live price ticks for this product.
    async fn subscribe_prices(&self) -> GridResult<UnboundedReceiver<PriceTick>>;

    /// Updates for orders this client placed.
    async fn subscribe_orders(&self) -> GridResult<UnboundedReceiver<Order>>;

    /// Close both subscriptions.
    async fn unsubscribe(&self) -> GridResult<()>;

    fn product_id(&self) -> &str;

    fn currency(&self) -> &str;

    /// Smallest order size the exchange accepts.
    fn base_min_size(&self) -> Decimal;
}

/// Paper implementation: resting limit orders fill in full as soon as a
/// pushed price crosses their limit. Used by the daemon's paper mode and
/// by loop-runner tests.
pub mod paper {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use log::debug;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use tokio::sync::Mutex;

    use super::*;
    use crate::grid::errors::GridError;
    use crate::grid::order::OrderStatus;
    use crate::grid::types::Side;

    pub struct PaperProduct {
        product: String,
        currency: String,
        min_size: Decimal,
        /// Fee percentage charged per fill
        fee_percent: Decimal,
        next_oid: AtomicU64,
        inner: Arc<Mutex<Inner>>,
    }

    #[derive(Default)]
    struct Inner {
        resting: HashMap<String, Order>,
        price_tx: Option<UnboundedSender<PriceTick>>,
        order_tx: Option<UnboundedSender<Order>>,
    }

    impl PaperProduct {
        pub fn new(
            product: impl Into<String>,
            currency: impl Into<String>,
            min_size: Decimal,
            fee_percent: Decimal,
        ) -> Self {
            Self {
                product: product.into(),
                currency: currency.into(),
                min_size,
                fee_percent,
                next_oid: AtomicU64::new(1),
                inner: Arc::new(Mutex::new(Inner::default())),
            }
        }

        /// Drive the simulation: broadcast the tick, then report a full
        /// fill for every resting order whose limit the price crossed.
        pub async fn push_price(&self, price: Decimal) {
            let now = Utc::now();
            let mut inner = self.inner.lock().await;

            if let Some(tx) = &inner.price_tx {
                let _ = tx.send(PriceTick {
                    product: self.product.clone(),
                    price,
                    time: now,
                });
            }

            let crossed: Vec<String> = inner
                .resting
                .iter()
                .filter(|(_, o)| match o.side {
                    Side::Buy => price <= o.price,
                    Side::Sell => price >= o.price,
                })
                .map(|(sid, _)| sid.clone())
                .collect();

            for sid in crossed {
                if let Some(mut order) = inner.resting.remove(&sid) {
                    order.filled_size = order.size;
                    order.filled_value = order.size * order.price;
                    order.filled_fee =
                        order.filled_value * self.fee_percent / Decimal::ONE_HUNDRED;
                    order.remaining = Decimal::ZERO;
                    order.last_fill_size = order.size;
                    order.last_fill_price = order.price;
                    order.updated_at = now;
                    order.status = OrderStatus::Filled;
                    order.done = true;
                    order.done_reason = Some("filled".into());

                    debug!("paper fill: {} {} @ {}", order.side.as_str(), order.size, order.price);
                    if let Some(tx) = &inner.order_tx {
                        let _ = tx.send(order);
                    }
                }
            }
        }

        async fn place(
            &self,
            side: Side,
            client_id: Uuid,
            size: Decimal,
            price: Decimal,
        ) -> GridResult<String> {
            let mut inner = self.inner.lock().await;

            // the same client id resubmitted is the same order, not a new one
            if inner.resting.values().any(|o| o.client_id == client_id) {
                return Err(GridError::Exchange(format!(
                    "duplicate client order id {client_id}"
                )));
            }

            let now = Utc::now();
            let sid = format!("P-{}", self.next_oid.fetch_add(1, Ordering::SeqCst));
            let mut order = Order::new_limit(
                sid.clone(),
                client_id,
                self.product.clone(),
                self.currency.clone(),
                side,
                price,
                size,
                now,
            );
            // the exchange side knows the authoritative creation time
            order.created_at = Some(now);
            inner.resting.insert(sid.clone(), order);
            Ok(sid)
        }
    }

    #[async_trait]
    impl ExchangeProduct for PaperProduct {
        async fn limit_buy(
            &self,
            client_id: Uuid,
            size: Decimal,
            price: Decimal,
        ) -> GridResult<String> {
            self.place(Side::Buy, client_id, size, price).await
        }

        async fn limit_sell(
            &self,
            client_id: Uuid,
            size: Decimal,
            price: Decimal,
        ) -> GridResult<String> {
            self.place(Side::Sell, client_id, size, price).await
        }

        async fn cancel(&self, server_id: &str) -> GridResult<()> {
            let mut inner = self.inner.lock().await;
            let mut order = inner
                .resting
                .remove(server_id)
                .ok_or_else(|| GridError::OrderNotFound(server_id.to_string()))?;

            order.remaining = Decimal::ZERO;
            order.updated_at = Utc::now();
            order.status = OrderStatus::Canceled;
            order.done = true;
            order.done_reason = Some("canceled".into());
            if let Some(tx) = &inner.order_tx {
                let _ = tx.send(order);
            }
            Ok(())
        }

        async fn subscribe_prices(&self) -> GridResult<UnboundedReceiver<PriceTick>> {
            let (tx, rx) = unbounded_channel();
            self.inner.lock().await.price_tx = Some(tx);
            Ok(rx)
        }

        async fn subscribe_orders(&self) -> GridResult<UnboundedReceiver<Order>> {
            let (tx, rx) = unbounded_channel();
            self.inner.lock().await.order_tx = Some(tx);
            Ok(rx)
        }

        async fn unsubscribe(&self) -> GridResult<()> {
            let mut inner = self.inner.lock().await;
            // dropping the senders closes both receivers
            inner.price_tx = None;
            inner.order_tx = None;
            Ok(())
        }

        fn product_id(&self) -> &str {
            &self.product
        }

        fn currency(&self) -> &str {
            &self.currency
        }

        fn base_min_size(&self) -> Decimal {
            self.min_size
        }
    }
}

/// Scripted test double: records calls, never fills anything on its own.
/// Tests push ticks and order updates explicitly.
pub mod mock {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use tokio::sync::Mutex;

    use super::*;
    use crate::grid::errors::GridError;
    use crate::grid::types::Side;

    #[derive(Debug, Clone)]
    pub struct PlacedOrder {
        pub server_id: String,
        pub client_id: Uuid,
        pub side: Side,
        pub size: Decimal,
        pub price: Decimal,
    }

    pub struct MockProduct {
        product: String,
        currency: String,
        min_size: Decimal,
        next_oid: AtomicU64,
        pub placed: Arc<Mutex<Vec<PlacedOrder>>>,
        pub canceled: Arc<Mutex<Vec<String>>>,
        pub fail_placement: Arc<Mutex<bool>>,
        feeds: Arc<Mutex<Feeds>>,
    }

    #[derive(Default)]
    struct Feeds {
        price_tx: Option<UnboundedSender<PriceTick>>,
        order_tx: Option<UnboundedSender<Order>>,
    }

    impl MockProduct {
        pub fn new(product: impl Into<String>, currency: impl Into<String>) -> Self {
            Self {
                product: product.into(),
                currency: currency.into(),
                min_size: Decimal::new(1, 4),
                next_oid: AtomicU64::new(1),
                placed: Arc::new(Mutex::new(Vec::new())),
                canceled: Arc::new(Mutex::new(Vec::new())),
                fail_placement: Arc::new(Mutex::new(false)),
                feeds: Arc::new(Mutex::new(Feeds::default())),
            }
        }

        pub async fn set_fail_placement(&self, fail: bool) {
            *self.fail_placement.lock().await = fail;
        }

        pub async fn push_tick(&self, price: Decimal) {
            if let Some(tx) = &self.feeds.lock().await.price_tx {
                let _ = tx.send(PriceTick {
                    product: self.product.clone(),
                    price,
                    time: Utc::now(),
                });
            }
        }

        pub async fn push_order_update(&self, order: Order) {
            if let Some(tx) = &self.feeds.lock().await.order_tx {
                let _ = tx.send(order);
            }
        }

        pub async fn has_subscribers(&self) -> bool {
            let feeds = self.feeds.lock().await;
            feeds.price_tx.is_some() || feeds.order_tx.is_some()
        }

        async fn place(
            &self,
            side: Side,
            client_id: Uuid,
            size: Decimal,
            price: Decimal,
        ) -> GridResult<String> {
            if *self.fail_placement.lock().await {
                return Err(GridError::Exchange("mock placement failure".into()));
            }
            let server_id = format!("M-{}", self.next_oid.fetch_add(1, Ordering::SeqCst));
            self.placed.lock().await.push(PlacedOrder {
                server_id: server_id.clone(),
                client_id,
                side,
                size,
                price,
            });
            Ok(server_id)
        }
    }

    #[async_trait]
    impl ExchangeProduct for MockProduct {
        async fn limit_buy(
            &self,
            client_id: Uuid,
            size: Decimal,
            price: Decimal,
        ) -> GridResult<String> {
            self.place(Side::Buy, client_id, size, price).await
        }

        async fn limit_sell(
            &self,
            client_id: Uuid,
            size: Decimal,
            price: Decimal,
        ) -> GridResult<String> {
            self.place(Side::Sell, client_id, size, price).await
        }

        async fn cancel(&self, server_id: &str) -> GridResult<()> {
            self.canceled.lock().await.push(server_id.to_string());
            Ok(())
        }

        async fn subscribe_prices(&self) -> GridResult<UnboundedReceiver<PriceTick>> {
            let (tx, rx) = unbounded_channel();
            self.feeds.lock().await.price_tx = Some(tx);
            Ok(rx)
        }

        async fn subscribe_orders(&self) -> GridResult<UnboundedReceiver<Order>> {
            let (tx, rx) = unbounded_channel();
            self.feeds.lock().await.order_tx = Some(tx);
            Ok(rx)
        }

        async fn unsubscribe(&self) -> GridResult<()> {
            let mut feeds = self.feeds.lock().await;
            feeds.price_tx = None;
            feeds.order_tx = None;
            Ok(())
        }

        fn product_id(&self) -> &str {
            &self.product
        }

        fn currency(&self) -> &str {
            &self.currency
        }

        fn base_min_size(&self) -> Decimal {
            self.min_size
        }
    }
}
