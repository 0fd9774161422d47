//! Durable launch log records and their lifecycle transitions
//!
//! Records live in a sled tree keyed by big-endian id. Two index trees sit
//! beside it: hash -> id (which also enforces global hash uniqueness) and a
//! composite (itemType, itemId, id) key for correlation lookups.
//!
//! A status change is one multi-tree sled transaction whose precondition is
//! the record's current status. Racing updates on the same record are
//! serialised by that check; a rejected update leaves every tree untouched.

use crate::errors::{LaunchError, LaunchResult};
use crate::types::{LaunchLog, LaunchLogStatus, NewLaunchLog};
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use tracing::{debug, info};

const LOGS_TREE: &str = "launch_logs";
const HASH_TREE: &str = "launch_log_hashes";
const ITEM_TREE: &str = "launch_log_items";

/// A requested lifecycle transition
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub id: u64,
    pub status: LaunchLogStatus,
    pub hash: Option<String>,
    pub nonce: Option<u64>,
}

impl StatusUpdate {
    /// CREATED -> PENDING once the transaction is signed, ahead of broadcast
    pub fn dispatched(id: u64, hash: String, nonce: u64) -> Self {
        Self {
            id,
            status: LaunchLogStatus::Pending,
            hash: Some(hash),
            nonce: Some(nonce),
        }
    }

    /// Any transition that carries no side effect
    pub fn to(id: u64, status: LaunchLogStatus) -> Self {
        Self {
            id,
            status,
            hash: None,
            nonce: None,
        }
    }
}

/// Persistent store of launch logs
#[async_trait]
pub trait LaunchLogStore: Send + Sync {
    /// Assign identity and persist with status CREATED
    async fn create(&self, log: NewLaunchLog) -> LaunchResult<LaunchLog>;

    async fn get(&self, id: u64) -> LaunchResult<Option<LaunchLog>>;

    /// Zero or one record; never an error on a miss
    async fn find_by_hash(&self, hash: &str) -> LaunchResult<Vec<LaunchLog>>;

    /// Every record sharing the correlation pair, oldest first
    async fn find_by_item(&self, item_type: &str, item_id: &str) -> LaunchResult<Vec<LaunchLog>>;

    async fn find_all_with_status(&self, status: LaunchLogStatus) -> LaunchResult<Vec<LaunchLog>>;

    /// Apply a transition from the state-machine table
    async fn update_status(&self, update: StatusUpdate) -> LaunchResult<LaunchLog>;
}

/// sled-backed launch log store
#[derive(Clone)]
pub struct SledLaunchLogStore {
    db: sled::Db,
    logs: sled::Tree,
    hashes: sled::Tree,
    items: sled::Tree,
}

impl SledLaunchLogStore {
    pub fn open(db: &sled::Db) -> LaunchResult<Self> {
        Ok(Self {
            db: db.clone(),
            logs: db.open_tree(LOGS_TREE)?,
            hashes: db.open_tree(HASH_TREE)?,
            items: db.open_tree(ITEM_TREE)?,
        })
    }

    async fn blocking<T, F>(&self, op: F) -> LaunchResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SledLaunchLogStore) -> LaunchResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(store)).await?
    }

    fn load(&self, id: u64) -> LaunchResult<Option<LaunchLog>> {
        match self.logs.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn load_many(&self, ids: impl IntoIterator<Item = u64>) -> LaunchResult<Vec<LaunchLog>> {
        let mut out = Vec::new();
        for id in ids {
            if let Some(log) = self.load(id)? {
                out.push(log);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl LaunchLogStore for SledLaunchLogStore {
    async fn create(&self, new: NewLaunchLog) -> LaunchResult<LaunchLog> {
        self.blocking(move |store| {
            let id = store.db.generate_id()?;
            let log = new.into_log(id);
            let record = serde_json::to_vec(&log)?;
            let item_key = item_key(&log.item_type, &log.item_id, id);

            (&store.logs, &store.items)
                .transaction(|(logs, items)| {
                    logs.insert(&id.to_be_bytes()[..], record.as_slice())?;
                    items.insert(item_key.as_slice(), sled::IVec::default())?;
                    Ok::<_, ConflictableTransactionError<LaunchError>>(())
                })
                .map_err(flatten)?;
            store.db.flush()?;

            info!(
                log_id = id,
                item_type = %log.item_type,
                item_id = %log.item_id,
                "launch log created"
            );
            Ok(log)
        })
        .await
    }

    async fn get(&self, id: u64) -> LaunchResult<Option<LaunchLog>> {
        self.blocking(move |store| store.load(id)).await
    }

    async fn find_by_hash(&self, hash: &str) -> LaunchResult<Vec<LaunchLog>> {
        let hash = hash.to_string();
        self.blocking(move |store| {
            let id = match store.hashes.get(hash.as_bytes())? {
                Some(raw) => decode_id(&raw)?,
                None => return Ok(Vec::new()),
            };
            store.load_many([id])
        })
        .await
    }

    async fn find_by_item(&self, item_type: &str, item_id: &str) -> LaunchResult<Vec<LaunchLog>> {
        let prefix = item_prefix(item_type, item_id);
        self.blocking(move |store| {
            let mut ids = Vec::new();
            for entry in store.items.scan_prefix(&prefix) {
                let (key, _) = entry?;
                ids.push(decode_id(&key[prefix.len()..])?);
            }
            store.load_many(ids)
        })
        .await
    }

    async fn find_all_with_status(&self, status: LaunchLogStatus) -> LaunchResult<Vec<LaunchLog>> {
        self.blocking(move |store| {
            let mut out = Vec::new();
            for entry in store.logs.iter() {
                let (_, raw) = entry?;
                let log: LaunchLog = serde_json::from_slice(&raw)?;
                if log.status == status {
                    out.push(log);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn update_status(&self, update: StatusUpdate) -> LaunchResult<LaunchLog> {
        self.blocking(move |store| {
            let key = update.id.to_be_bytes();
            let updated = (&store.logs, &store.hashes)
                .transaction(|(logs, hashes)| {
                    let raw = logs
                        .get(&key[..])?
                        .ok_or_else(|| abort(LaunchError::NotFound(format!("launch log {}", update.id))))?;
                    let mut log: LaunchLog = serde_json::from_slice(&raw)
                        .map_err(|e| abort(LaunchError::from(e)))?;

                    if !log.status.can_transition_to(update.status) {
                        return Err(abort(LaunchError::InvalidTransition {
                            id: log.id,
                            from: log.status.to_string(),
                            to: update.status.to_string(),
                        }));
                    }

                    match (update.status, &update.hash, update.nonce) {
                        (LaunchLogStatus::Pending, Some(hash), Some(nonce)) => {
                            if hashes.get(hash.as_bytes())?.is_some() {
                                return Err(abort(LaunchError::invalid_argument(format!(
                                    "hash {} is already recorded",
                                    hash
                                ))));
                            }
                            hashes.insert(hash.as_bytes(), &log.id.to_be_bytes()[..])?;
                            log.hash = Some(hash.clone());
                            log.nonce = Some(nonce);
                        }
                        (LaunchLogStatus::Pending, _, _) => {
                            return Err(abort(LaunchError::invalid_argument(
                                "PENDING requires both hash and nonce",
                            )));
                        }
                        (_, None, None) => {}
                        (other, _, _) => {
                            return Err(abort(LaunchError::invalid_argument(format!(
                                "hash and nonce can only be set on the way to PENDING, not {}",
                                other
                            ))));
                        }
                    }

                    let from = log.status;
                    log.status = update.status;
                    let record = serde_json::to_vec(&log).map_err(|e| abort(LaunchError::from(e)))?;
                    logs.insert(&key[..], record)?;
                    debug!(log_id = log.id, from = %from, to = %log.status, "transition staged");
                    Ok(log)
                })
                .map_err(flatten)?;
            store.db.flush()?;

            info!(
                log_id = updated.id,
                status = %updated.status,
                hash = ?updated.hash,
                nonce = ?updated.nonce,
                "launch log status updated"
            );
            Ok(updated)
        })
        .await
    }
}

fn abort(err: LaunchError) -> ConflictableTransactionError<LaunchError> {
    ConflictableTransactionError::Abort(err)
}

fn flatten(err: TransactionError<LaunchError>) -> LaunchError {
    match err {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(e) => LaunchError::from(e),
    }
}

fn decode_id(raw: &[u8]) -> LaunchResult<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| LaunchError::persistence(format!("corrupt id ({} bytes)", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Length-prefixed so that distinct pairs never share a prefix
fn item_prefix(item_type: &str, item_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + item_type.len() + item_id.len());
    key.extend_from_slice(&(item_type.len() as u32).to_be_bytes());
    key.extend_from_slice(item_type.as_bytes());
    key.extend_from_slice(&(item_id.len() as u32).to_be_bytes());
    key.extend_from_slice(item_id.as_bytes());
    key
}

fn item_key(item_type: &str, item_id: &str, id: u64) -> Vec<u8> {
    let mut key = item_prefix(item_type, item_id);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn store() -> SledLaunchLogStore {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledLaunchLogStore::open(&db).unwrap()
    }

    fn new_log(item_type: &str, item_id: &str) -> NewLaunchLog {
        NewLaunchLog {
            from: format!("0x{}", "a".repeat(40)),
            to: format!("0x{}", "b".repeat(40)),
            value: Decimal::from_str("1.5").unwrap(),
            gas_price: Decimal::from_str("20").unwrap(),
            data: vec![0xde, 0xad],
            item_id: item_id.to_string(),
            item_type: item_type.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_starts_in_created() {
        let store = store();
        let log = store.create(new_log("order", "1")).await.unwrap();
        assert_eq!(log.status, LaunchLogStatus::Created);
        assert!(log.hash.is_none());
        assert!(log.nonce.is_none());

        let loaded = store.get(log.id).await.unwrap().unwrap();
        assert_eq!(loaded, log);
        assert_eq!(loaded.value.to_string(), "1.5");
        assert_eq!(loaded.data, vec![0xde, 0xad]);
    }

    #[tokio::test]
    async fn test_ids_are_distinct() {
        let store = store();
        let a = store.create(new_log("order", "1")).await.unwrap();
        let b = store.create(new_log("order", "1")).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_find_by_item_returns_all_sharing_pair() {
        let store = store();
        let a = store.create(new_log("order", "1")).await.unwrap();
        let b = store.create(new_log("order", "1")).await.unwrap();
        store.create(new_log("order", "10")).await.unwrap();
        store.create(new_log("orde", "r1")).await.unwrap();

        let found = store.find_by_item("order", "1").await.unwrap();
        let ids: Vec<u64> = found.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);

        assert!(store.find_by_item("order", "2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_misses_are_empty() {
        let store = store();
        assert!(store.find_by_hash("0xdead").await.unwrap().is_empty());
        assert!(store.get(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = store();
        let log = store.create(new_log("order", "1")).await.unwrap();

        let pending = store
            .update_status(StatusUpdate::dispatched(log.id, "0xabc".into(), 7))
            .await
            .unwrap();
        assert_eq!(pending.status, LaunchLogStatus::Pending);
        assert_eq!(pending.hash.as_deref(), Some("0xabc"));
        assert_eq!(pending.nonce, Some(7));

        let by_hash = store.find_by_hash("0xabc").await.unwrap();
        assert_eq!(by_hash, vec![pending.clone()]);

        let done = store
            .update_status(StatusUpdate::to(log.id, LaunchLogStatus::Successful))
            .await
            .unwrap();
        assert_eq!(done.status, LaunchLogStatus::Successful);
        assert_eq!(done.hash.as_deref(), Some("0xabc"));
        assert_eq!(done.nonce, Some(7));
    }

    #[tokio::test]
    async fn test_rejected_before_broadcast() {
        let store = store();
        let log = store.create(new_log("order", "1")).await.unwrap();
        let failed = store
            .update_status(StatusUpdate::to(log.id, LaunchLogStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.status, LaunchLogStatus::Failed);
        assert!(failed.hash.is_none());
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_record_untouched() {
        let store = store();
        let log = store.create(new_log("order", "1")).await.unwrap();

        let err = store
            .update_status(StatusUpdate::to(log.id, LaunchLogStatus::Successful))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::InvalidTransition { .. }));
        assert_eq!(store.get(log.id).await.unwrap().unwrap(), log);

        store
            .update_status(StatusUpdate::to(log.id, LaunchLogStatus::Failed))
            .await
            .unwrap();
        let err = store
            .update_status(StatusUpdate::dispatched(log.id, "0x01".into(), 1))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::InvalidTransition { .. }));
        assert!(store.find_by_hash("0x01").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = store();
        let err = store
            .update_status(StatusUpdate::to(42, LaunchLogStatus::Failed))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_pending_requires_hash_and_nonce() {
        let store = store();
        let log = store.create(new_log("order", "1")).await.unwrap();
        let err = store
            .update_status(StatusUpdate::to(log.id, LaunchLogStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArgument(_)));
        assert_eq!(store.get(log.id).await.unwrap().unwrap().status, LaunchLogStatus::Created);
    }

    #[tokio::test]
    async fn test_hash_is_globally_unique() {
        let store = store();
        let a = store.create(new_log("order", "1")).await.unwrap();
        let b = store.create(new_log("order", "2")).await.unwrap();
        store
            .update_status(StatusUpdate::dispatched(a.id, "0xsame".into(), 1))
            .await
            .unwrap();
        let err = store
            .update_status(StatusUpdate::dispatched(b.id, "0xsame".into(), 2))
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::InvalidArgument(_)));
        assert_eq!(store.get(b.id).await.unwrap().unwrap(), b);
    }

    #[tokio::test]
    async fn test_find_all_with_status() {
        let store = store();
        let a = store.create(new_log("order", "1")).await.unwrap();
        store.create(new_log("order", "2")).await.unwrap();
        store
            .update_status(StatusUpdate::dispatched(a.id, "0x1".into(), 1))
            .await
            .unwrap();

        assert_eq!(store.find_all_with_status(LaunchLogStatus::Pending).await.unwrap().len(), 1);
        assert_eq!(store.find_all_with_status(LaunchLogStatus::Created).await.unwrap().len(), 1);
        assert!(store
            .find_all_with_status(LaunchLogStatus::Successful)
            .await
            .unwrap()
            .is_empty());
    }
}
