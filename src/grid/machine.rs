//! Per-loop trading decisions
//!
//! The action to take next is recomputed from the persisted counters every
//! time it is needed, so restart-and-resume requires no separate record of
//! what the loop was doing.

use rust_decimal::Decimal;

use super::types::{Side, TradeLoop};

/// What a loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LoopAction {
    Buy,
    Sell,
    /// Counters are in a state trading can never reach; halt the loop
    /// instead of guessing
    Stop,
}

/// Decide the next action from completed-trade counts, net holdings, and
/// the partial-fill state of the live order on each side.
pub fn next_action(
    nbuys: usize,
    nsells: usize,
    holdings: Decimal,
    partial_buy: bool,
    partial_sell: bool,
) -> LoopAction {
    // more sells than buys is never valid
    if nbuys < nsells {
        return LoopAction::Stop;
    }
    if holdings < Decimal::ZERO {
        return LoopAction::Stop;
    }
    // unsold inventory from a completed buy
    if nbuys > nsells {
        return LoopAction::Sell;
    }
    match (partial_buy, partial_sell) {
        // both sides part-filled at once is a reconciliation bug
        (true, true) => LoopAction::Stop,
        (false, true) => LoopAction::Sell,
        // finish the in-progress buy, or start a new cycle
        _ => LoopAction::Buy,
    }
}

impl TradeLoop {
    fn partial(&self, side: Side) -> bool {
        self.resting.as_ref().is_some_and(|o| {
            o.side == side
                && !o.done
                && o.filled_size > Decimal::ZERO
                && o.filled_size < o.size
        })
    }

    /// Next action for this loop, derived from its counters.
    pub fn next_action(&self) -> LoopAction {
        next_action(
            self.nbuys(),
            self.nsells(),
            self.holdings(),
            self.partial(Side::Buy),
            self.partial(Side::Sell),
        )
    }

    /// Size still to trade on `side`: the point size minus what the live
    /// order already executed, floored at the exchange minimum.
    pub fn pending_size(&self, side: Side, min_size: Decimal) -> Decimal {
        let filled = self
            .resting
            .as_ref()
            .filter(|o| o.side == side)
            .map_or(Decimal::ZERO, |o| o.filled_size);
        (self.pair.point(side).size - filled).max(min_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::order::Order;
    use crate::grid::types::{Pair, PricePoint};
    use chrono::Utc;
    use uuid::Uuid;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn test_loop() -> TradeLoop {
        TradeLoop::new(
            Pair::new(
                PricePoint::new(dec("100"), dec("1"), dec("5")),
                PricePoint::new(dec("110"), dec("1"), dec("5")),
            )
            .unwrap(),
        )
    }

    fn resting(side: Side, filled: &str) -> Order {
        let mut order = Order::new_limit(
            "srv-1".into(),
            Uuid::from_u128(1),
            "BTC-EUR".into(),
            "EUR".into(),
            side,
            dec("100"),
            dec("1"),
            Utc::now(),
        );
        order.filled_size = dec(filled);
        order
    }

    #[test]
    fn test_fresh_loop_buys() {
        assert_eq!(next_action(0, 0, Decimal::ZERO, false, false), LoopAction::Buy);
    }

    #[test]
    fn test_unmatched_buy_sells() {
        assert_eq!(next_action(1, 0, dec("1"), false, false), LoopAction::Sell);
        assert_eq!(next_action(4, 3, dec("1"), false, false), LoopAction::Sell);
    }

    #[test]
    fn test_more_sells_than_buys_stops() {
        assert_eq!(next_action(0, 1, Decimal::ZERO, false, false), LoopAction::Stop);
    }

    #[test]
    fn test_negative_holdings_stops() {
        assert_eq!(next_action(1, 1, dec("-0.5"), false, false), LoopAction::Stop);
    }

    #[test]
    fn test_dual_partial_fill_stops() {
        assert_eq!(next_action(2, 2, dec("0.5"), true, true), LoopAction::Stop);
    }

    #[test]
    fn test_partial_sell_finishes_first() {
        assert_eq!(next_action(2, 2, dec("0.5"), false, true), LoopAction::Sell);
    }

    #[test]
    fn test_partial_buy_finishes_first() {
        assert_eq!(next_action(2, 2, dec("0.5"), true, false), LoopAction::Buy);
    }

    #[test]
    fn test_loop_derives_partial_flags_from_resting_order() {
        let mut lp = test_loop();
        assert_eq!(lp.next_action(), LoopAction::Buy);

        lp.resting = Some(resting(Side::Buy, "0.4"));
        assert_eq!(lp.next_action(), LoopAction::Buy);

        lp.resting = Some(resting(Side::Sell, "0.4"));
        assert_eq!(lp.next_action(), LoopAction::Sell);

        // untouched resting order carries no partial flag
        lp.resting = Some(resting(Side::Buy, "0"));
        assert_eq!(lp.next_action(), LoopAction::Buy);
    }

    #[test]
    fn test_pending_size_subtracts_live_fill() {
        let mut lp = test_loop();
        lp.resting = Some(resting(Side::Buy, "0.4"));

        assert_eq!(lp.pending_size(Side::Buy, dec("0.0001")), dec("0.6"));
        // the other side's point is untouched by the buy-side fill
        assert_eq!(lp.pending_size(Side::Sell, dec("0.0001")), dec("1"));
    }

    #[test]
    fn test_pending_size_floors_at_exchange_minimum() {
        let mut lp = test_loop();
        lp.resting = Some(resting(Side::Buy, "0.9999"));

        assert_eq!(lp.pending_size(Side::Buy, dec("0.01")), dec("0.01"));
    }
}
