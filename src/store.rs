//! Transactional key-value seam
//!
//! The storage engine itself is a collaborator; the loop engine only needs
//! get/set/delete and an ascending prefix scan inside a transaction whose
//! writes commit together or not at all. `MemoryStore` implements the seam
//! for tests and paper trading.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors surfaced by a store implementation
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("transaction is read-only")]
    ReadOnly,

    #[error("storage error: {0}")]
    Io(String),
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One read or read-write transaction.
///
/// Writes are buffered until `commit`; dropping a transaction without
/// committing discards them.
#[async_trait]
pub trait StoreTxn: Send {
    async fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    async fn set(&mut self, key: &[u8], value: Vec<u8>) -> StoreResult<()>;

    async fn delete(&mut self, key: &[u8]) -> StoreResult<()>;

    /// All pairs whose key starts with `prefix`, in ascending key order.
    async fn scan_prefix(&mut self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Atomically apply every buffered write.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Handle to a transactional key-value store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self, write: bool) -> StoreResult<Box<dyn StoreTxn>>;
}

/// In-memory store over a BTreeMap.
#[derive(Default, Clone)]
pub struct MemoryStore {
    data: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, write: bool) -> StoreResult<Box<dyn StoreTxn>> {
        Ok(Box::new(MemoryTxn {
            data: self.data.clone(),
            write,
            ops: Vec::new(),
        }))
    }
}

enum Op {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

struct MemoryTxn {
    data: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
    write: bool,
    ops: Vec<Op>,
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    async fn get(&mut self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        // read-your-writes: the latest buffered op for the key wins
        for op in self.ops.iter().rev() {
            match op {
                Op::Set(k, v) if k == key => return Ok(Some(v.clone())),
                Op::Delete(k) if k == key => return Ok(None),
                _ => {}
            }
        }
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&mut self, key: &[u8], value: Vec<u8>) -> StoreResult<()> {
        if !self.write {
            return Err(StoreError::ReadOnly);
        }
        self.ops.push(Op::Set(key.to_vec(), value));
        Ok(())
    }

    async fn delete(&mut self, key: &[u8]) -> StoreResult<()> {
        if !self.write {
            return Err(StoreError::ReadOnly);
        }
        self.ops.push(Op::Delete(key.to_vec()));
        Ok(())
    }

    async fn scan_prefix(&mut self, prefix: &[u8]) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .data
            .lock()
            .await
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for op in &self.ops {
            match op {
                Op::Set(k, v) if k.starts_with(prefix) => {
                    merged.insert(k.clone(), v.clone());
                }
                Op::Delete(k) => {
                    merged.remove(k);
                }
                _ => {}
            }
        }
        Ok(merged.into_iter().collect())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.ops.is_empty() {
            return Ok(());
        }
        let mut data = self.data.lock().await;
        for op in self.ops {
            match op {
                Op::Set(k, v) => {
                    data.insert(k, v);
                }
                Op::Delete(k) => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }
}

/// Job-name resolution: maps a human-assigned name to a durable job id.
/// Consumed at job lookup time only, never inside the event loop.
pub mod names {
    use uuid::Uuid;

    use super::{StoreError, StoreResult, StoreTxn};

    fn key(name: &str) -> Vec<u8> {
        [b"name/".as_slice(), name.as_bytes()].concat()
    }

    /// Bind `name` to `id`, replacing any previous binding.
    pub async fn bind(txn: &mut dyn StoreTxn, name: &str, id: Uuid) -> StoreResult<()> {
        txn.set(&key(name), id.as_bytes().to_vec()).await
    }

    /// Look up the job id bound to `name`.
    pub async fn resolve(txn: &mut dyn StoreTxn, name: &str) -> StoreResult<Option<Uuid>> {
        match txn.get(&key(name)).await? {
            Some(raw) => {
                let bytes: [u8; 16] = raw
                    .try_into()
                    .map_err(|_| StoreError::Io("malformed job id".into()))?;
                Ok(Some(Uuid::from_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Remove the binding for `name`.
    pub async fn unbind(txn: &mut dyn StoreTxn, name: &str) -> StoreResult<()> {
        txn.delete(&key(name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();

        let mut txn = store.begin(true).await.unwrap();
        txn.set(b"a", b"1".to_vec()).await.unwrap();
        drop(txn);

        let mut reader = store.begin(false).await.unwrap();
        assert_eq!(reader.get(b"a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_applies_all_writes_together() {
        let store = MemoryStore::new();

        let mut txn = store.begin(true).await.unwrap();
        txn.set(b"a", b"1".to_vec()).await.unwrap();
        txn.set(b"b", b"2".to_vec()).await.unwrap();
        txn.delete(b"a").await.unwrap();
        txn.commit().await.unwrap();

        let mut reader = store.begin(false).await.unwrap();
        assert_eq!(reader.get(b"a").await.unwrap(), None);
        assert_eq!(reader.get(b"b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_read_your_writes() {
        let store = MemoryStore::new();

        let mut txn = store.begin(true).await.unwrap();
        txn.set(b"a", b"1".to_vec()).await.unwrap();
        assert_eq!(txn.get(b"a").await.unwrap(), Some(b"1".to_vec()));

        txn.delete(b"a").await.unwrap();
        assert_eq!(txn.get(b"a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let store = MemoryStore::new();

        let mut txn = store.begin(false).await.unwrap();
        assert!(matches!(
            txn.set(b"a", b"1".to_vec()).await,
            Err(StoreError::ReadOnly)
        ));
        assert!(matches!(txn.delete(b"a").await, Err(StoreError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_scan_prefix_ascending() {
        let store = MemoryStore::new();

        let mut txn = store.begin(true).await.unwrap();
        txn.set(b"job/b", b"2".to_vec()).await.unwrap();
        txn.set(b"job/a", b"1".to_vec()).await.unwrap();
        txn.set(b"name/x", b"9".to_vec()).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin(true).await.unwrap();
        txn.set(b"job/c", b"3".to_vec()).await.unwrap();
        txn.delete(b"job/a").await.unwrap();

        let pairs = txn.scan_prefix(b"job/").await.unwrap();
        let keys: Vec<&[u8]> = pairs.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"job/b".as_slice(), b"job/c".as_slice()]);
    }

    #[tokio::test]
    async fn test_name_binding_roundtrip() {
        let store = MemoryStore::new();
        let id = Uuid::from_u128(7);

        let mut txn = store.begin(true).await.unwrap();
        names::bind(txn.as_mut(), "btc-loops", id).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin(false).await.unwrap();
        assert_eq!(names::resolve(txn.as_mut(), "btc-loops").await.unwrap(), Some(id));
        assert_eq!(names::resolve(txn.as_mut(), "missing").await.unwrap(), None);

        let mut txn = store.begin(true).await.unwrap();
        names::unbind(txn.as_mut(), "btc-loops").await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin(false).await.unwrap();
        assert_eq!(names::resolve(txn.as_mut(), "btc-loops").await.unwrap(), None);
    }
}
