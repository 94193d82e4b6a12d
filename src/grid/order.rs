//! Exchange order records and update reconciliation
//!
//! Order updates arrive over two independent channels (a push stream and a
//! polling re-fetch) with no ordering guarantee between them, so the merge
//! below must converge regardless of arrival order or duplication.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{GridError, GridResult};
use super::types::Side;

/// Normalized order status. Exchange vocabularies vary; `Done` is the
/// ambiguous terminal state an exchange reports without saying how the
/// order ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Resting on the book, possibly partially filled
    Open,
    /// Terminal, outcome unknown
    Done,
    /// Terminal, fully executed
    Filled,
    /// Terminal, canceled before completion
    Canceled,
}

impl OrderStatus {
    /// Whether the order will never change again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }

    /// Ranking used when two terminal statuses disagree: a definite outcome
    /// beats the ambiguous done flag.
    fn authority(&self) -> u8 {
        match self {
            OrderStatus::Open => 0,
            OrderStatus::Done => 1,
            OrderStatus::Filled | OrderStatus::Canceled => 2,
        }
    }
}

/// The loop engine only ever places limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
}

/// One exchange order known to the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned identifier, authoritative once accepted
    pub server_id: String,
    /// Locally generated identifier used for idempotent resubmission
    pub client_id: Uuid,
    pub product: String,
    pub currency: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Requested limit price
    pub price: Decimal,
    /// Requested amount
    pub size: Decimal,
    /// Unfilled remainder; only ever shrinks
    pub remaining: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub status: OrderStatus,
    /// Cumulative executed size; only ever grows
    pub filled_size: Decimal,
    pub filled_value: Decimal,
    pub filled_fee: Decimal,
    /// Size and price of the most recent execution
    pub last_fill_size: Decimal,
    pub last_fill_price: Decimal,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_reason: Option<String>,
}

impl Order {
    /// Fresh limit order record as submitted to the exchange. The
    /// exchange's authoritative creation time arrives with the first
    /// update; until then it stays unset.
    #[allow(clippy::too_many_arguments)]
    pub fn new_limit(
        server_id: String,
        client_id: Uuid,
        product: String,
        currency: String,
        side: Side,
        price: Decimal,
        size: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            server_id,
            client_id,
            product,
            currency,
            side,
            order_type: OrderType::Limit,
            price,
            size,
            remaining: size,
            created_at: None,
            updated_at: at,
            status: OrderStatus::Open,
            filled_size: Decimal::ZERO,
            filled_value: Decimal::ZERO,
            filled_fee: Decimal::ZERO,
            last_fill_size: Decimal::ZERO,
            last_fill_price: Decimal::ZERO,
            done: false,
            done_reason: None,
        }
    }

    /// Whether the requested amount executed in full.
    pub fn is_complete(&self) -> bool {
        self.filled_size >= self.size
    }

    /// Fold `update` into this record.
    ///
    /// Fails without mutating anything when an immutable identifying field
    /// disagrees. On success the record only moves forward: remaining
    /// shrinks, fills grow, a newer update time brings its last-fill
    /// snapshot, and terminal status is adopted by authority. Applying the
    /// same update twice, or two updates in either order, converges.
    pub fn merge(&mut self, update: &Order) -> GridResult<()> {
        check_match("server id", &self.server_id, &update.server_id)?;
        check_match("client id", &self.client_id, &update.client_id)?;
        check_match("product", &self.product, &update.product)?;
        check_match("currency", &self.currency, &update.currency)?;
        check_match("side", &self.side, &update.side)?;
        check_match("order type", &self.order_type, &update.order_type)?;
        check_match("size", &self.size, &update.size)?;
        check_match("price", &self.price, &update.price)?;
        if let (Some(known), Some(upd)) = (self.created_at, update.created_at) {
            check_match("created at", &known, &upd)?;
        }

        self.remaining = self.remaining.min(update.remaining);
        self.filled_size = self.filled_size.max(update.filled_size);
        self.filled_value = self.filled_value.max(update.filled_value);
        self.filled_fee = self.filled_fee.max(update.filled_fee);

        if self.created_at.is_none() {
            self.created_at = update.created_at;
        }
        if update.updated_at > self.updated_at {
            self.updated_at = update.updated_at;
            self.last_fill_size = update.last_fill_size;
            self.last_fill_price = update.last_fill_price;
        }

        if !self.status.is_terminal() {
            if update.status.is_terminal() {
                self.status = update.status;
                self.done = true;
                self.done_reason = update.done_reason.clone();
            }
        } else if update.status.authority() > self.status.authority() {
            self.status = update.status;
            if update.done_reason.is_some() {
                self.done_reason = update.done_reason.clone();
            }
        }

        Ok(())
    }
}

fn check_match<T: PartialEq + std::fmt::Debug>(
    field: &'static str,
    known: &T,
    update: &T,
) -> GridResult<()> {
    if known != update {
        return Err(GridError::OrderMismatch {
            field,
            known: format!("{known:?}"),
            update: format!("{update:?}"),
        });
    }
    Ok(())
}
