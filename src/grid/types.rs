//! Core data types for trade loops

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::{GridError, GridResult};
use super::order::Order;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// One intended trade: a limit price, a size, and the distance the ticker
/// may gap past the price before a resting order is canceled rather than
/// left to fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: Decimal,
    pub size: Decimal,
    #[serde(default)]
    pub cancel_distance: Decimal,
}

impl PricePoint {
    pub fn new(price: Decimal, size: Decimal, cancel_distance: Decimal) -> Self {
        Self {
            price,
            size,
            cancel_distance,
        }
    }

    pub fn validate(&self) -> GridResult<()> {
        if self.price <= Decimal::ZERO {
            return Err(GridError::InvalidPoint(format!(
                "non-positive price {}",
                self.price
            )));
        }
        if self.size <= Decimal::ZERO {
            return Err(GridError::InvalidPoint(format!(
                "non-positive size {}",
                self.size
            )));
        }
        if self.cancel_distance < Decimal::ZERO {
            return Err(GridError::InvalidPoint(format!(
                "negative cancel distance {}",
                self.cancel_distance
            )));
        }
        Ok(())
    }
}

/// A buy point and a sell point forming one repeating trade cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pair {
    pub buy: PricePoint,
    pub sell: PricePoint,
}

impl Pair {
    /// Validated pair; the cell must be profitable before fees.
    pub fn new(buy: PricePoint, sell: PricePoint) -> GridResult<Self> {
        buy.validate()?;
        sell.validate()?;
        if buy.price >= sell.price {
            return Err(GridError::InvalidPoint(format!(
                "buy price {} must be below sell price {}",
                buy.price, sell.price
            )));
        }
        Ok(Self { buy, sell })
    }

    pub fn point(&self, side: Side) -> &PricePoint {
        match side {
            Side::Buy => &self.buy,
            Side::Sell => &self.sell,
        }
    }
}

/// One pair plus its accumulated trade history.
///
/// At most one unmatched buy may await its paired sell, so for every
/// reachable loop `sells.len() <= buys.len() <= sells.len() + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLoop {
    pub pair: Pair,
    /// Completion timestamps, oldest first
    pub buys: Vec<DateTime<Utc>>,
    pub sells: Vec<DateTime<Utc>>,
    pub bought_size: Decimal,
    pub bought_value: Decimal,
    pub bought_fee: Decimal,
    pub sold_size: Decimal,
    pub sold_value: Decimal,
    pub sold_fee: Decimal,
    /// Currently resting exchange order, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resting: Option<Order>,
}

impl TradeLoop {
    pub fn new(pair: Pair) -> Self {
        Self {
            pair,
            buys: Vec::new(),
            sells: Vec::new(),
            bought_size: Decimal::ZERO,
            bought_value: Decimal::ZERO,
            bought_fee: Decimal::ZERO,
            sold_size: Decimal::ZERO,
            sold_value: Decimal::ZERO,
            sold_fee: Decimal::ZERO,
            resting: None,
        }
    }

    pub fn nbuys(&self) -> usize {
        self.buys.len()
    }

    pub fn nsells(&self) -> usize {
        self.sells.len()
    }

    /// Net inventory: bought size minus sold size.
    pub fn holdings(&self) -> Decimal {
        self.bought_size - self.sold_size
    }

    /// Fold a terminal order into the loop history. Fill counters always
    /// accumulate; a completion timestamp is recorded only when the
    /// requested amount executed in full.
    pub fn record_fill(&mut self, order: &Order) {
        match order.side {
            Side::Buy => {
                self.bought_size += order.filled_size;
                self.bought_value += order.filled_value;
                self.bought_fee += order.filled_fee;
                if order.is_complete() {
                    self.buys.push(order.updated_at);
                }
            }
            Side::Sell => {
                self.sold_size += order.filled_size;
                self.sold_value += order.filled_value;
                self.sold_fee += order.filled_fee;
                if order.is_complete() {
                    self.sells.push(order.updated_at);
                }
            }
        }
    }

    /// Record a watch-only crossing as a completed trade at the point's
    /// price and size, with no exchange interaction.
    pub fn record_crossing(&mut self, side: Side, at: DateTime<Utc>) {
        let point = self.pair.point(side).clone();
        match side {
            Side::Buy => {
                self.bought_size += point.size;
                self.bought_value += point.size * point.price;
                self.buys.push(at);
            }
            Side::Sell => {
                self.sold_size += point.size;
                self.sold_value += point.size * point.price;
                self.sells.push(at);
            }
        }
    }
}
