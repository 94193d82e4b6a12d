//! Runtime event loop
//!
//! One runner owns the single mutable copy of one job's loops and is the
//! only writer to it. Everything dispatches through one select over the
//! shutdown signal, the price feed, the order feed and the flush timer, so
//! no two timers ever race on shared state. Persistence is synchronous:
//! the loop does not process the next event while a flush is outstanding,
//! which makes a slow store a natural backpressure mechanism.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::interval;
use uuid::Uuid;

use crate::store::Store;

use super::errors::{GridError, GridResult};
use super::idgen::OrderIdGenerator;
use super::machine::LoopAction;
use super::order::Order;
use super::product::{ExchangeProduct, PriceTick};
use super::state::JobState;
use super::types::{PricePoint, Side};

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Forced persistence cadence while changes are pending
    pub flush_interval: Duration,
    /// Record crossings directly instead of placing live orders
    pub watch_only: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(60),
            watch_only: false,
        }
    }
}

/// Per-loop status for job-level commands.
#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    pub index: usize,
    pub action: LoopAction,
    pub buys: usize,
    pub sells: usize,
    pub holdings: Decimal,
    /// Counters that triggered a halt, when the loop is halted
    pub halted: Option<String>,
}

/// Drives one job against one exchange product.
pub struct LoopRunner<P, S> {
    job: JobState,
    product: Arc<P>,
    store: Arc<S>,
    ids: OrderIdGenerator,
    config: RunnerConfig,
    /// server id -> loop index, for routing order updates
    routes: HashMap<String, usize>,
    /// Loops halted on an inconsistency detection, with the report
    halted: HashMap<usize, String>,
    dirty: bool,
}

impl<P: ExchangeProduct, S: Store> LoopRunner<P, S> {
    pub fn new(
        job: JobState,
        seed: &str,
        product: Arc<P>,
        store: Arc<S>,
        config: RunnerConfig,
    ) -> Self {
        let ids = OrderIdGenerator::new(seed, job.id_offset);
        let routes = job
            .loops
            .iter()
            .enumerate()
            .filter_map(|(i, lp)| lp.resting.as_ref().map(|o| (o.server_id.clone(), i)))
            .collect();

        Self {
            job,
            product,
            store,
            ids,
            config,
            routes,
            halted: HashMap::new(),
            dirty: false,
        }
    }

    /// Crash recovery: rebuild the runner from the persisted record. The
    /// loops, counters, resting-order routes and generator offset come
    /// straight from the record; no exchange history is replayed.
    pub async fn resume(
        id: Uuid,
        seed: &str,
        product: Arc<P>,
        store: Arc<S>,
        config: RunnerConfig,
    ) -> GridResult<Self> {
        let mut txn = store.begin(false).await?;
        let job = JobState::load(id, txn.as_mut()).await?;
        Ok(Self::new(job, seed, product, store, config))
    }

    pub fn job(&self) -> &JobState {
        &self.job
    }

    /// Status of every loop, including halt reports for operators.
    pub fn report(&self) -> Vec<LoopReport> {
        self.job
            .loops
            .iter()
            .enumerate()
            .map(|(i, lp)| LoopReport {
                index: i,
                action: lp.next_action(),
                buys: lp.nbuys(),
                sells: lp.nsells(),
                holdings: lp.holdings(),
                halted: self.halted.get(&i).cloned(),
            })
            .collect()
    }

    /// Run until the shutdown signal flips. The final flush result is
    /// surfaced: it is the last chance to save state.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> GridResult<()> {
        info!(
            "job {}: starting runner for {} with {} loops",
            self.job.id,
            self.job.product,
            self.job.loops.len()
        );

        let mut prices = self.product.subscribe_prices().await?;
        let mut updates = self.product.subscribe_orders().await?;
        let mut flush = interval(self.config.flush_interval);
        flush.tick().await; // the first tick fires immediately

        let outcome = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break Ok(());
                    }
                }
                tick = prices.recv() => match tick {
                    Some(tick) => {
                        if let Err(e) = self.on_tick(&tick).await {
                            error!("job {}: tick handling failed: {}", self.job.id, e);
                        }
                    }
                    None => break Err(GridError::Exchange("price feed closed".into())),
                },
                update = updates.recv() => match update {
                    Some(update) => {
                        if let Err(e) = self.on_order_update(update).await {
                            error!("job {}: order update failed: {}", self.job.id, e);
                        }
                    }
                    None => break Err(GridError::Exchange("order feed closed".into())),
                },
                _ = flush.tick() => {
                    if self.dirty {
                        if let Err(e) = self.persist().await {
                            warn!("job {}: flush failed, will retry: {}", self.job.id, e);
                        }
                    }
                }
            }
        };

        let flushed = self.persist().await;
        if let Err(e) = self.product.unsubscribe().await {
            warn!("job {}: unsubscribe failed: {}", self.job.id, e);
        }
        info!("job {}: runner stopped", self.job.id);
        outcome.and(flushed)
    }

    async fn on_tick(&mut self, tick: &PriceTick) -> GridResult<()> {
        if tick.product != self.job.product {
            return Ok(());
        }
        for i in 0..self.job.loops.len() {
            if self.halted.contains_key(&i) {
                continue;
            }
            match self.job.loops[i].next_action() {
                LoopAction::Stop => self.halt(i),
                LoopAction::Buy => self.step(i, Side::Buy, tick).await?,
                LoopAction::Sell => self.step(i, Side::Sell, tick).await?,
            }
        }
        Ok(())
    }

    /// Inconsistent counters mean a reconciliation bug somewhere; stop
    /// trading this loop and leave the rest of the job running so an
    /// operator can inspect and repair.
    fn halt(&mut self, i: usize) {
        let lp = &self.job.loops[i];
        let report = format!(
            "{} buys / {} sells, holdings {}",
            lp.nbuys(),
            lp.nsells(),
            lp.holdings()
        );
        error!("job {}: loop {} halted: {}", self.job.id, i, report);
        self.halted.insert(i, report);
    }

    async fn step(&mut self, i: usize, side: Side, tick: &PriceTick) -> GridResult<()> {
        if self.config.watch_only {
            let crossed = {
                let lp = &mut self.job.loops[i];
                let point = lp.pair.point(side);
                let crossed = match side {
                    Side::Buy => tick.price <= point.price,
                    Side::Sell => tick.price >= point.price,
                };
                if crossed {
                    lp.record_crossing(side, tick.time);
                }
                crossed
            };
            if crossed {
                info!(
                    "job {}: loop {} recorded {} crossing at {}",
                    self.job.id,
                    i,
                    side.as_str(),
                    tick.price
                );
                self.persist_now().await;
            }
            return Ok(());
        }

        let point = self.job.loops[i].pair.point(side).clone();
        let gapped = beyond_cancel_band(side, &point, tick.price);

        match self.job.loops[i].resting.as_ref().map(|o| o.side) {
            Some(s) if s == side => {
                if gapped {
                    self.cancel_resting(i, tick.price).await;
                }
            }
            Some(_) => {
                // the action flipped while an order rests on the other side
                self.cancel_resting(i, tick.price).await;
            }
            None => {
                if !gapped {
                    self.place(i, side, &point).await;
                }
            }
        }
        Ok(())
    }

    async fn place(&mut self, i: usize, side: Side, point: &PricePoint) {
        let size = self.job.loops[i].pending_size(side, self.product.base_min_size());
        let client_id = self.ids.next_id();

        let placed = match side {
            Side::Buy => self.product.limit_buy(client_id, size, point.price).await,
            Side::Sell => self.product.limit_sell(client_id, size, point.price).await,
        };

        let server_id = match placed {
            Ok(server_id) => server_id,
            Err(e) => {
                // never reached the book; reuse the identifier next time
                self.ids.revert_id();
                warn!(
                    "job {}: loop {} {} placement failed: {}",
                    self.job.id,
                    i,
                    side.as_str(),
                    e
                );
                return;
            }
        };

        info!(
            "job {}: loop {} resting {} {} @ {} ({})",
            self.job.id,
            i,
            side.as_str(),
            size,
            point.price,
            server_id
        );

        let order = Order::new_limit(
            server_id.clone(),
            client_id,
            self.job.product.clone(),
            self.job.currency.clone(),
            side,
            point.price,
            size,
            Utc::now(),
        );
        self.routes.insert(server_id, i);
        self.job.loops[i].resting = Some(order);
        self.persist_now().await;
    }

    async fn cancel_resting(&mut self, i: usize, at_price: Decimal) {
        let Some(order) = self.job.loops[i].resting.as_ref() else {
            return;
        };
        let server_id = order.server_id.clone();

        if let Err(e) = self.product.cancel(&server_id).await {
            warn!(
                "job {}: cancel of {} failed, will retry: {}",
                self.job.id, server_id, e
            );
            return;
        }
        // the terminal update arriving on the order feed settles the record
        info!(
            "job {}: loop {} canceled {} at ticker {}",
            self.job.id, i, server_id, at_price
        );
    }

    async fn on_order_update(&mut self, update: Order) -> GridResult<()> {
        let Some(&i) = self.routes.get(&update.server_id) else {
            // late duplicate for an order already compacted away
            debug!(
                "job {}: ignoring update for unknown order {}",
                self.job.id, update.server_id
            );
            return Ok(());
        };

        let became_terminal = {
            let Some(known) = self.job.loops[i].resting.as_mut() else {
                self.routes.remove(&update.server_id);
                return Ok(());
            };
            let was_done = known.done;
            known.merge(&update)?;
            known.done && !was_done
        };
        self.dirty = true;

        if became_terminal {
            self.routes.remove(&update.server_id);
            if let Some(order) = self.job.loops[i].resting.take() {
                info!(
                    "job {}: loop {} order {} terminal ({:?}, filled {})",
                    self.job.id, i, order.server_id, order.status, order.filled_size
                );
                if order.filled_size > Decimal::ZERO {
                    self.job.loops[i].record_fill(&order);
                }
                // zero-fill terminal orders contributed nothing; forgotten
            }
            self.persist_now().await;
        }
        Ok(())
    }

    /// Persist after a significant event; a failure is logged and the
    /// dirty flag keeps the retry armed for the next trigger.
    async fn persist_now(&mut self) {
        self.dirty = true;
        if let Err(e) = self.persist().await {
            warn!(
                "job {}: persist failed, will retry on next trigger: {}",
                self.job.id, e
            );
        }
    }

    async fn persist(&mut self) -> GridResult<()> {
        self.job.id_offset = self.ids.offset();
        let mut txn = self.store.begin(true).await?;
        self.job.save(txn.as_mut()).await?;
        txn.commit().await?;
        self.dirty = false;
        debug!("job {}: state persisted", self.job.id);
        Ok(())
    }
}

/// Whether the ticker has gapped past the point on the adverse side by
/// more than the point's cancel distance.
fn beyond_cancel_band(side: Side, point: &PricePoint, price: Decimal) -> bool {
    match side {
        Side::Buy => price < point.price - point.cancel_distance,
        Side::Sell => price > point.price + point.cancel_distance,
    }
}
