//! Derived trade summaries
//!
//! A summary is a pure function of loop history and an optional time
//! window. The persisted copy is only a cache; it can always be recomputed.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::TradeLoop;

/// Aggregated view of loop history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub num_buys: u64,
    pub num_sells: u64,
    pub bought_size: Decimal,
    pub bought_value: Decimal,
    pub sold_size: Decimal,
    pub sold_value: Decimal,
    pub fees: Decimal,
    /// Inventory bought in the window and not yet sold
    pub unsold_size: Decimal,
    /// Inventory sold in the window beyond what was bought in it
    pub oversold_size: Decimal,
    /// Capital needed to fund every buy point once
    pub budget: Decimal,
    /// Matched-cycle profit net of fees on the matched legs
    pub profit: Decimal,
}

impl Summary {
    /// Aggregate `loops`, counting only completions inside `range` when one
    /// is given. `fee_percent` is the per-leg fee in percent.
    pub fn over(
        loops: &[TradeLoop],
        fee_percent: Decimal,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Summary {
        let mut summary = Summary::default();
        let within = |t: &&DateTime<Utc>| match range {
            Some((from, to)) => **t >= from && **t <= to,
            None => true,
        };

        for lp in loops {
            summary.budget += lp.pair.buy.price * lp.pair.buy.size;

            let buys = lp.buys.iter().filter(within).count() as u64;
            let sells = lp.sells.iter().filter(within).count() as u64;
            summary.num_buys += buys;
            summary.num_sells += sells;
            let nbuys = Decimal::from(buys);
            let nsells = Decimal::from(sells);

            let buy_value = lp.pair.buy.price * lp.pair.buy.size;
            let sell_value = lp.pair.sell.price * lp.pair.sell.size;

            summary.bought_size += lp.pair.buy.size * nbuys;
            summary.bought_value += buy_value * nbuys;
            summary.sold_size += lp.pair.sell.size * nsells;
            summary.sold_value += sell_value * nsells;
            summary.fees +=
                (buy_value * nbuys + sell_value * nsells) * fee_percent / Decimal::ONE_HUNDRED;

            let matched = nbuys.min(nsells);
            let matched_fees =
                matched * (buy_value + sell_value) * fee_percent / Decimal::ONE_HUNDRED;
            summary.profit += matched * (sell_value - buy_value) - matched_fees;
        }

        let net = summary.bought_size - summary.sold_size;
        summary.unsold_size = net.max(Decimal::ZERO);
        summary.oversold_size = (-net).max(Decimal::ZERO);
        summary
    }

    /// Profit as a fraction of the budget.
    pub fn return_fraction(&self) -> Decimal {
        if self.budget.is_zero() {
            Decimal::ZERO
        } else {
            self.profit / self.budget
        }
    }

    /// Return over `window`, compounded to a yearly rate. Reporting-edge
    /// arithmetic only, so floating point is acceptable here.
    pub fn annualized_return(&self, window: Duration) -> f64 {
        let days = window.num_seconds() as f64 / 86_400.0;
        if days <= 0.0 || self.budget.is_zero() {
            return 0.0;
        }
        let rate = self.return_fraction().to_f64().unwrap_or(0.0);
        (1.0 + rate).powf(365.0 / days) - 1.0
    }
}
