//! Versioned job state persistence
//!
//! Durable records carry an explicit version tag in a closed enum; loading
//! an old record composes upgrade steps left-to-right until it is current.
//! Upgrades are pure and fabricate nothing: fields with no prior
//! equivalent get documented defaults.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::StoreTxn;

use super::errors::{GridError, GridResult};
use super::summary::Summary;
use super::types::TradeLoop;

/// Exchange assumed for records persisted before the field existed.
pub const DEFAULT_EXCHANGE: &str = "hyperliquid";

fn job_key(id: Uuid) -> Vec<u8> {
    [b"job/".as_slice(), id.as_bytes()].concat()
}

/// In-memory state of one running strategy instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub id: Uuid,
    pub exchange: String,
    pub product: String,
    pub currency: String,
    /// Fee percentage per trade leg
    pub fee_percent: Decimal,
    pub loops: Vec<TradeLoop>,
    /// Identifier-generator position; persisting it is what makes order
    /// placement resumable after a crash
    pub id_offset: u64,
    /// Cached lifetime summary, recomputable from the loops
    pub summary: Summary,
}

impl JobState {
    pub fn new(
        exchange: String,
        product: String,
        currency: String,
        fee_percent: Decimal,
        loops: Vec<TradeLoop>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exchange,
            product,
            currency,
            fee_percent,
            loops,
            id_offset: 0,
            summary: Summary::default(),
        }
    }

    /// Recompute the cached summary from loop history.
    pub fn refresh_summary(&mut self) {
        self.summary = Summary::over(&self.loops, self.fee_percent, None);
    }

    /// Write the current-version record under the job key.
    pub async fn save(&mut self, txn: &mut dyn StoreTxn) -> GridResult<()> {
        self.refresh_summary();
        let record = JobRecord::V2(JobRecordV2::from(&*self));
        let raw = rmp_serde::to_vec_named(&record)?;
        txn.set(&job_key(self.id), raw).await?;
        Ok(())
    }

    /// Load the record stored under `id`, upgrading it if it predates the
    /// current version.
    pub async fn load(id: Uuid, txn: &mut dyn StoreTxn) -> GridResult<JobState> {
        let raw = txn
            .get(&job_key(id))
            .await?
            .ok_or(GridError::JobNotFound(id))?;
        let record: JobRecord = rmp_serde::from_slice(&raw)?;
        Ok(record.upgrade().into_state(id))
    }

    /// Remove the record stored under `id`.
    pub async fn delete(id: Uuid, txn: &mut dyn StoreTxn) -> GridResult<()> {
        txn.delete(&job_key(id)).await?;
        Ok(())
    }
}

/// Closed set of persisted record versions. Deserialization dispatches on
/// the variant tag; there is no runtime registry to extend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobRecord {
    V1(JobRecordV1),
    V2(JobRecordV2),
}

impl JobRecord {
    /// Compose upgrade steps until the record is current. A current record
    /// passes through unchanged.
    pub fn upgrade(self) -> JobRecordV2 {
        match self {
            JobRecord::V1(v1) => JobRecord::V2(v1.upgrade()).upgrade(),
            JobRecord::V2(v2) => v2,
        }
    }
}

/// First persisted shape: single-exchange, no cached summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecordV1 {
    pub product: String,
    pub currency: String,
    pub fee_percent: Decimal,
    pub loops: Vec<TradeLoop>,
    pub id_offset: u64,
}

impl JobRecordV1 {
    /// V1 predates multi-exchange support: the exchange defaults, and the
    /// summary cache is rebuilt from the loops it summarizes.
    fn upgrade(self) -> JobRecordV2 {
        let summary = Summary::over(&self.loops, self.fee_percent, None);
        JobRecordV2 {
            exchange: DEFAULT_EXCHANGE.to_string(),
            product: self.product,
            currency: self.currency,
            fee_percent: self.fee_percent,
            loops: self.loops,
            id_offset: self.id_offset,
            summary,
        }
    }
}

/// Current persisted shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecordV2 {
    pub exchange: String,
    pub product: String,
    pub currency: String,
    pub fee_percent: Decimal,
    pub loops: Vec<TradeLoop>,
    pub id_offset: u64,
    pub summary: Summary,
}

impl JobRecordV2 {
    fn into_state(self, id: Uuid) -> JobState {
        JobState {
            id,
            exchange: self.exchange,
            product: self.product,
            currency: self.currency,
            fee_percent: self.fee_percent,
            loops: self.loops,
            id_offset: self.id_offset,
            summary: self.summary,
        }
    }
}

impl From<&JobState> for JobRecordV2 {
    fn from(state: &JobState) -> Self {
        Self {
            exchange: state.exchange.clone(),
            product: state.product.clone(),
            currency: state.currency.clone(),
            fee_percent: state.fee_percent,
            loops: state.loops.clone(),
            id_offset: state.id_offset,
            summary: state.summary.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::types::{Pair, PricePoint, Side};
    use crate::store::{MemoryStore, Store};
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn test_loops() -> Vec<TradeLoop> {
        let mut lp = TradeLoop::new(
            Pair::new(
                PricePoint::new(dec("100"), dec("1"), dec("5")),
                PricePoint::new(dec("110"), dec("1"), dec("5")),
            )
            .unwrap(),
        );
        lp.record_crossing(
            Side::Buy,
            chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        );
        vec![lp]
    }

    fn test_state() -> JobState {
        JobState::new(
            "hyperliquid".into(),
            "BTC-EUR".into(),
            "EUR".into(),
            dec("0.25"),
            test_loops(),
        )
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let store = MemoryStore::new();
        let mut state = test_state();
        state.id_offset = 17;

        let mut txn = store.begin(true).await.unwrap();
        state.save(txn.as_mut()).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin(false).await.unwrap();
        let loaded = JobState::load(state.id, txn.as_mut()).await.unwrap();

        assert_eq!(loaded, state);
        assert_eq!(loaded.id_offset, 17);
        assert_eq!(loaded.loops[0].nbuys(), 1);
        // the cache was refreshed on save
        assert_eq!(loaded.summary.num_buys, 1);
    }

    #[tokio::test]
    async fn test_load_missing_job() {
        let store = MemoryStore::new();
        let mut txn = store.begin(false).await.unwrap();

        let err = JobState::load(Uuid::from_u128(1), txn.as_mut())
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let store = MemoryStore::new();
        let mut state = test_state();

        let mut txn = store.begin(true).await.unwrap();
        state.save(txn.as_mut()).await.unwrap();
        JobState::delete(state.id, txn.as_mut()).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin(false).await.unwrap();
        assert!(JobState::load(state.id, txn.as_mut()).await.is_err());
    }

    #[tokio::test]
    async fn test_v1_record_upgrades_on_load() {
        let store = MemoryStore::new();
        let id = Uuid::from_u128(9);
        let v1 = JobRecord::V1(JobRecordV1 {
            product: "BTC-EUR".into(),
            currency: "EUR".into(),
            fee_percent: dec("0.25"),
            loops: test_loops(),
            id_offset: 5,
        });

        let mut txn = store.begin(true).await.unwrap();
        txn.set(&job_key(id), rmp_serde::to_vec_named(&v1).unwrap())
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin(false).await.unwrap();
        let loaded = JobState::load(id, txn.as_mut()).await.unwrap();

        assert_eq!(loaded.exchange, DEFAULT_EXCHANGE);
        assert_eq!(loaded.id_offset, 5);
        // the summary cache is rebuilt, never fabricated
        assert_eq!(loaded.summary.num_buys, 1);
    }

    #[test]
    fn test_upgrade_is_idempotent() {
        let v1 = JobRecordV1 {
            product: "BTC-EUR".into(),
            currency: "EUR".into(),
            fee_percent: dec("0.25"),
            loops: test_loops(),
            id_offset: 5,
        };

        let once = JobRecord::V1(v1).upgrade();
        let twice = JobRecord::V2(once.clone()).upgrade();
        assert_eq!(once, twice);
    }
}
