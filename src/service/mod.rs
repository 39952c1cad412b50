//! Top-level storage service: public operations, store lifecycle, and
//! the cross-store transaction protocol.
//!
//! Both engines are owned exclusively by the service; every mutation
//! routes through it. Mutating operations take `&mut self`, which is
//! also the single-writer guarantee.

mod apply;
mod revert;

use log::{debug, trace, warn};
use serde_json::Value;
use sqlx::{Sqlite, Transaction};

use crate::config::{
    StorageConfig, EMPTY_COMMIT_ID, ROOT_STATE_HASH_KEY, TOP_ROOT_STATE_HASH_KEY,
};
use crate::entity::{ContractBalance, ContractChanges, ContractCommitInfo, ContractEventInfo, ContractInfo};
use crate::error::{ContractStorageError, Result};
use crate::hash::ContractCommitId;
use crate::store::{kv, CommitLog, KvSnapshot, KvStore};

/// The two backing stores behind one service instance.
pub(crate) struct StoreBackend {
    pub(crate) kv: KvStore,
    pub(crate) log: CommitLog,
}

impl StoreBackend {
    async fn open(config: &StorageConfig) -> Result<Self> {
        debug!(
            "opening contract storage (kv: {}, commit log: {})",
            config.kv_path.display(),
            config.commit_log_path.display()
        );
        let kv = KvStore::open(&config.kv_path)?;
        let log = CommitLog::open(&config.commit_log_path).await?;
        Ok(Self { kv, log })
    }

    pub(crate) fn current_root_state_hash(&self) -> Result<String> {
        Ok(self
            .kv
            .get_string(ROOT_STATE_HASH_KEY)?
            .unwrap_or_else(|| EMPTY_COMMIT_ID.to_owned()))
    }

    pub(crate) fn top_root_state_hash(&self) -> Result<String> {
        Ok(self
            .kv
            .get_string(TOP_ROOT_STATE_HASH_KEY)?
            .unwrap_or_else(|| EMPTY_COMMIT_ID.to_owned()))
    }

    pub(crate) fn load_contract_info(&self, contract_id: &str) -> Result<Option<ContractInfo>> {
        let key = kv::contract_info_key(contract_id);
        match self.kv.get_json(&key)? {
            Some(json) => ContractInfo::from_json(&json)
                .map(Some)
                .ok_or_else(|| ContractStorageError::corrupted(key, "contract info is not decodable")),
            None => Ok(None),
        }
    }
}

/// Versioned contract state store.
///
/// Holds contract records, named storage slots, per-asset balances and
/// event logs, with every committed change chained into a root state
/// hash that identifies the whole contract-storage world.
pub struct ContractStorageService {
    config: StorageConfig,
    backend: Option<StoreBackend>,
    current_block_height: u64,
}

impl ContractStorageService {
    /// Open both backing stores and return a ready service.
    pub async fn open(config: StorageConfig) -> Result<Self> {
        let backend = StoreBackend::open(&config).await?;
        Ok(Self {
            config,
            backend: Some(backend),
            current_block_height: 0,
        })
    }

    /// Flush and release both stores. Idempotent; any later operation
    /// fails with [`ContractStorageError::StoreNotOpen`].
    pub async fn close(&mut self) {
        if let Some(backend) = self.backend.take() {
            if let Err(err) = backend.kv.flush() {
                warn!("failed to flush key-value store on close: {}", err);
            }
            backend.log.close().await;
            debug!("contract storage closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn magic_number(&self) -> u32 {
        self.config.magic_number
    }

    pub fn current_block_height(&self) -> u64 {
        self.current_block_height
    }

    /// Set the block height mixed into the next commit id.
    pub fn set_current_block_height(&mut self, block_height: u64) {
        self.current_block_height = block_height;
    }

    fn backend(&self) -> Result<&StoreBackend> {
        self.backend.as_ref().ok_or(ContractStorageError::StoreNotOpen)
    }

    // ---- queries ----

    pub async fn get_contract_info(&self, contract_id: &str) -> Result<Option<ContractInfo>> {
        trace!("get contract info {}", contract_id);
        self.backend()?.load_contract_info(contract_id)
    }

    /// Contract id registered under `name`, if any.
    pub async fn find_contract_id_by_name(&self, name: &str) -> Result<Option<String>> {
        trace!("find contract id by name {}", name);
        self.backend()?.kv.get_string(&kv::contract_name_key(name))
    }

    /// Value of one named storage slot; `Null` when the slot is unset.
    pub async fn get_contract_storage(
        &self,
        contract_id: &str,
        storage_name: &str,
    ) -> Result<Value> {
        trace!("get contract storage {} / {}", contract_id, storage_name);
        Ok(self
            .backend()?
            .kv
            .get_json(&kv::contract_storage_key(contract_id, storage_name))?
            .unwrap_or(Value::Null))
    }

    /// Balances of a contract; empty when the contract does not exist.
    pub async fn get_contract_balances(&self, contract_id: &str) -> Result<Vec<ContractBalance>> {
        trace!("get contract balances {}", contract_id);
        Ok(self
            .backend()?
            .load_contract_info(contract_id)?
            .map(|info| info.balances)
            .unwrap_or_default())
    }

    pub async fn get_commit_events(&self, commit_id: &str) -> Result<Vec<ContractEventInfo>> {
        trace!("get commit events {}", commit_id);
        self.load_events(&kv::commit_events_key(commit_id)).await
    }

    pub async fn get_transaction_events(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<ContractEventInfo>> {
        trace!("get transaction events {}", transaction_id);
        self.load_events(&kv::transaction_events_key(transaction_id))
            .await
    }

    async fn load_events(&self, key: &str) -> Result<Vec<ContractEventInfo>> {
        match self.backend()?.kv.get_json(key)? {
            Some(json) => ContractChanges::events_from_json(&json)
                .ok_or_else(|| ContractStorageError::corrupted(key, "event list is not decodable")),
            None => Ok(Vec::new()),
        }
    }

    /// Currently active commit id (the cursor).
    pub async fn current_root_state_hash(&self) -> Result<String> {
        self.backend()?.current_root_state_hash()
    }

    /// Latest committed commit id (the tip).
    pub async fn top_root_state_hash(&self) -> Result<String> {
        self.backend()?.top_root_state_hash()
    }

    /// Newest commit id recorded in the commit log.
    pub async fn top_commit_id(&self) -> Result<ContractCommitId> {
        Ok(self
            .backend()?
            .log
            .tip()
            .await?
            .map(|row| row.commit_id)
            .unwrap_or_else(|| EMPTY_COMMIT_ID.to_owned()))
    }

    pub async fn get_commit_info(&self, commit_id: &str) -> Result<Option<ContractCommitInfo>> {
        self.backend()?.log.find(commit_id).await
    }

    /// Delete every commit-log row. Test tooling only; the key-value
    /// store is left untouched.
    pub async fn clear_commit_log(&self) -> Result<()> {
        warn!("clearing the commit log");
        self.backend()?.log.clear().await
    }

    // ---- mutations ----

    /// Register or fully replace a contract record, producing a new
    /// commit on the chain.
    pub async fn save_contract_info(&mut self, info: &ContractInfo) -> Result<ContractCommitId> {
        trace!("save contract info {}", info.id);
        let block_height = self.current_block_height;
        let backend = self.backend()?;
        let mut snapshot = KvSnapshot::default();
        let mut tx = backend.log.begin().await?;
        let result = backend
            .save_contract_info_in_tx(&mut tx, &mut snapshot, info, block_height)
            .await;
        Self::finish(backend, tx, snapshot, result).await
    }

    /// Commit a bundle of balance, storage, event and upgrade changes
    /// as one atomic unit.
    pub async fn commit_contract_changes(
        &mut self,
        changes: &ContractChanges,
    ) -> Result<ContractCommitId> {
        trace!("commit contract changes");
        if changes.is_empty() {
            debug!("committing an empty change bundle");
        }
        let block_height = self.current_block_height;
        let backend = self.backend()?;
        let mut snapshot = KvSnapshot::default();
        let mut tx = backend.log.begin().await?;
        let result = backend
            .commit_contract_changes_in_tx(&mut tx, &mut snapshot, changes, block_height)
            .await;
        Self::finish(backend, tx, snapshot, result).await
    }

    /// Destructively roll the store back to `dest_commit_id`, removing
    /// every later commit from both stores.
    pub async fn rollback_contract_state(&mut self, dest_commit_id: &str) -> Result<()> {
        trace!("rollback contract state to {:?}", dest_commit_id);
        let backend = self.backend()?;
        let dest_seq = if dest_commit_id == EMPTY_COMMIT_ID {
            None
        } else {
            let row = backend
                .log
                .find(dest_commit_id)
                .await?
                .ok_or_else(|| ContractStorageError::UnknownCommit(dest_commit_id.to_owned()))?;
            Some(row.seq)
        };
        let mut snapshot = KvSnapshot::default();
        let mut tx = backend.log.begin().await?;
        let result = backend
            .rollback_in_tx(&mut tx, &mut snapshot, dest_commit_id, dest_seq)
            .await;
        Self::finish(backend, tx, snapshot, result).await
    }

    /// Move only the cursor to `dest_commit_id`, leaving the tip and all
    /// later commits in place. Re-committing the same bundle from that
    /// cursor reproduces the identical commit id, which makes replay
    /// after a reset safe.
    pub async fn reset_root_state_hash(&mut self, dest_commit_id: &str) -> Result<()> {
        trace!("reset root state hash to {:?}", dest_commit_id);
        let backend = self.backend()?;
        if dest_commit_id != EMPTY_COMMIT_ID && backend.log.find(dest_commit_id).await?.is_none() {
            return Err(ContractStorageError::UnknownCommit(dest_commit_id.to_owned()));
        }
        backend
            .kv
            .insert(None, ROOT_STATE_HASH_KEY, dest_commit_id.as_bytes())?;
        Ok(())
    }

    /// Commit or unwind one cross-store transaction: on success the
    /// commit-log transaction commits and the before-images are dropped;
    /// on any failure the log rolls back and every touched key-value
    /// entry is restored.
    async fn finish<T>(
        backend: &StoreBackend,
        tx: Transaction<'static, Sqlite>,
        snapshot: KvSnapshot,
        result: Result<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => match tx.commit().await {
                Ok(()) => Ok(value),
                Err(err) => {
                    backend.kv.restore(snapshot)?;
                    Err(err.into())
                }
            },
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("commit log rollback failed: {}", rollback_err);
                }
                backend.kv.restore(snapshot)?;
                Err(err)
            }
        }
    }
}
