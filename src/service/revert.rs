//! Reverse application of commits: walks the commit log newest-first,
//! undoing each commit from its stored reverse-diff blob and removing
//! the commit from both stores.

use log::{debug, trace};
use serde_json::Value;
use sqlx::{Sqlite, Transaction};

use crate::config::{ROOT_STATE_HASH_KEY, TOP_ROOT_STATE_HASH_KEY};
use crate::entity::{ChangeType, ContractBalance, ContractChanges, ContractCommitInfo, ContractInfo};
use crate::error::{ContractStorageError, Result};
use crate::jsondiff::{self, DiffResult};
use crate::store::{kv, CommitLog, KvSnapshot};

use super::StoreBackend;

impl StoreBackend {
    pub(crate) async fn rollback_in_tx(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        snapshot: &mut KvSnapshot,
        dest_commit_id: &str,
        dest_seq: Option<i64>,
    ) -> Result<()> {
        self.revert_commits_after(tx, snapshot, dest_seq).await?;
        self.kv.insert(
            Some(&mut *snapshot),
            ROOT_STATE_HASH_KEY,
            dest_commit_id.as_bytes(),
        )?;
        self.kv.insert(
            Some(&mut *snapshot),
            TOP_ROOT_STATE_HASH_KEY,
            dest_commit_id.as_bytes(),
        )?;
        debug!("rolled back contract state to {:?}", dest_commit_id);
        Ok(())
    }

    /// Reverse and delete every commit after `dest_seq` (all commits when
    /// `None`), newest first.
    pub(crate) async fn revert_commits_after(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        snapshot: &mut KvSnapshot,
        dest_seq: Option<i64>,
    ) -> Result<()> {
        let rows = CommitLog::rows_after(tx, dest_seq).await?;
        for row in &rows {
            trace!("reverting commit {} ({})", row.commit_id, row.change_type);
            match row.change_type {
                ChangeType::ContractInfo => self.revert_contract_info_commit(snapshot, row)?,
                ChangeType::StorageChange => self.revert_storage_change_commit(snapshot, row)?,
            }
            self.kv.remove(Some(&mut *snapshot), &row.commit_id)?;
            CommitLog::delete(tx, &row.commit_id).await?;
        }
        Ok(())
    }

    fn revert_contract_info_commit(
        &self,
        snapshot: &mut KvSnapshot,
        row: &ContractCommitInfo,
    ) -> Result<()> {
        let blob = self.kv.get_json(&row.commit_id)?.ok_or_else(|| {
            ContractStorageError::corrupted(row.commit_id.as_str(), "missing reverse diff blob")
        })?;
        let diff = DiffResult::from_json(&blob).ok_or_else(|| {
            ContractStorageError::corrupted(row.commit_id.as_str(), "reverse diff blob is not decodable")
        })?;

        let info_key = kv::contract_info_key(&row.contract_id);
        let current_json = self
            .kv
            .get_json(&info_key)?
            .unwrap_or_else(|| Value::Object(Default::default()));
        let current_name = ContractInfo::from_json(&current_json)
            .map(|info| info.name)
            .unwrap_or_default();

        let previous_json = jsondiff::rollback(&current_json, &diff)?;
        match ContractInfo::from_json(&previous_json) {
            // Reversing across the creation commit: the contract did not
            // exist before.
            None => {
                self.kv.remove(Some(&mut *snapshot), &info_key)?;
                if !current_name.is_empty() {
                    self.kv
                        .remove(Some(&mut *snapshot), &kv::contract_name_key(&current_name))?;
                }
            }
            Some(previous) => {
                self.kv
                    .insert_json(Some(&mut *snapshot), &info_key, &previous_json)?;
                if previous.name != current_name {
                    if !current_name.is_empty() {
                        self.kv.remove(
                            Some(&mut *snapshot),
                            &kv::contract_name_key(&current_name),
                        )?;
                    }
                    if !previous.name.is_empty() {
                        self.kv.insert(
                            Some(&mut *snapshot),
                            &kv::contract_name_key(&previous.name),
                            row.contract_id.as_bytes(),
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn revert_storage_change_commit(
        &self,
        snapshot: &mut KvSnapshot,
        row: &ContractCommitInfo,
    ) -> Result<()> {
        let blob = self.kv.get_json(&row.commit_id)?.ok_or_else(|| {
            ContractStorageError::corrupted(row.commit_id.as_str(), "missing change bundle blob")
        })?;
        let changes = ContractChanges::from_json(&blob).ok_or_else(|| {
            ContractStorageError::corrupted(row.commit_id.as_str(), "change bundle blob is not decodable")
        })?;

        for change in &changes.balance_changes {
            if !change.is_contract {
                continue;
            }
            let key = kv::contract_info_key(&change.address);
            let json = self
                .kv
                .get_json(&key)?
                .ok_or_else(|| ContractStorageError::ContractNotFound(change.address.clone()))?;
            let mut info = ContractInfo::from_json(&json).ok_or_else(|| {
                ContractStorageError::corrupted(key.as_str(), "contract info is not decodable")
            })?;

            match info
                .balances
                .iter_mut()
                .find(|balance| balance.asset_id == change.asset_id)
            {
                Some(balance) => {
                    balance.amount = if change.add {
                        balance.amount.checked_sub(change.amount)
                    } else {
                        balance.amount.checked_add(change.amount)
                    }
                    .ok_or_else(|| {
                        ContractStorageError::corrupted(
                            key.as_str(),
                            "balance does not invert; history is inconsistent",
                        )
                    })?;
                }
                None => {
                    info.balances.push(ContractBalance {
                        asset_id: change.asset_id,
                        amount: if change.add { 0 } else { change.amount },
                    });
                }
            }
            self.kv.insert_json(Some(&mut *snapshot), &key, &info.to_json())?;
        }

        for change in &changes.storage_changes {
            for item in &change.items {
                let key = kv::contract_storage_key(&change.contract_id, &item.name);
                let current = self.kv.get_json(&key)?.unwrap_or(Value::Null);
                let previous = jsondiff::rollback(&current, &item.diff)?;
                if previous.is_null() {
                    self.kv.remove(Some(&mut *snapshot), &key)?;
                } else {
                    self.kv.insert_json(Some(&mut *snapshot), &key, &previous)?;
                }
            }
        }

        for upgrade in &changes.upgrade_infos {
            let key = kv::contract_info_key(&upgrade.contract_id);
            let json = self.kv.get_json(&key)?.ok_or_else(|| {
                ContractStorageError::ContractNotFound(upgrade.contract_id.clone())
            })?;
            let mut info = ContractInfo::from_json(&json).ok_or_else(|| {
                ContractStorageError::corrupted(key.as_str(), "contract info is not decodable")
            })?;
            let current_name = info.name.clone();
            if let Some(diff) = &upgrade.name_diff {
                let reverted = jsondiff::rollback(&Value::String(info.name.clone()), diff)?;
                info.name = reverted.as_str().map(str::to_owned).ok_or_else(|| {
                    ContractStorageError::corrupted(key.as_str(), "reverted name is not a string")
                })?;
            }
            if let Some(diff) = &upgrade.description_diff {
                let reverted =
                    jsondiff::rollback(&Value::String(info.description.clone()), diff)?;
                info.description = reverted.as_str().map(str::to_owned).ok_or_else(|| {
                    ContractStorageError::corrupted(key.as_str(), "reverted description is not a string")
                })?;
            }
            self.kv.insert_json(Some(&mut *snapshot), &key, &info.to_json())?;
            if info.name != current_name {
                if !current_name.is_empty() {
                    self.kv
                        .remove(Some(&mut *snapshot), &kv::contract_name_key(&current_name))?;
                }
                if !info.name.is_empty() {
                    self.kv.insert(
                        Some(&mut *snapshot),
                        &kv::contract_name_key(&info.name),
                        upgrade.contract_id.as_bytes(),
                    )?;
                }
            }
        }

        for (index, event) in changes.events.iter().enumerate() {
            let event_id = kv::event_id(&row.commit_id, index);
            self.kv
                .remove(Some(&mut *snapshot), &kv::event_key(&row.commit_id, index))?;
            self.kv.remove(
                Some(&mut *snapshot),
                &kv::commit_event_key(&row.commit_id, &event_id),
            )?;
            if !event.transaction_id.is_empty() {
                self.kv.remove(
                    Some(&mut *snapshot),
                    &kv::transaction_event_key(&event.transaction_id, &event_id),
                )?;
                self.kv.remove(
                    Some(&mut *snapshot),
                    &kv::transaction_events_key(&event.transaction_id),
                )?;
            }
        }
        if !changes.events.is_empty() {
            self.kv
                .remove(Some(&mut *snapshot), &kv::commit_events_key(&row.commit_id))?;
        }
        Ok(())
    }
}
