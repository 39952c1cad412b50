//! Forward application of commits: contract-info saves and change
//! bundles. Always runs inside the service's cross-store transaction.

use std::collections::BTreeMap;

use log::{debug, trace};
use serde_json::Value;
use sqlx::{Sqlite, Transaction};

use crate::config::{EMPTY_COMMIT_ID, ROOT_STATE_HASH_KEY, TOP_ROOT_STATE_HASH_KEY};
use crate::entity::{
    ChangeType, ContractBalance, ContractBalanceChange, ContractChanges, ContractEventInfo,
    ContractInfo, ContractStorageChange, ContractUpgradeInfo,
};
use crate::error::{ContractStorageError, Result};
use crate::hash::{next_root_state_hash, ordered_json_digest, ContractCommitId};
use crate::jsondiff;
use crate::store::{kv, CommitLog, KvSnapshot};

use super::StoreBackend;

impl StoreBackend {
    pub(crate) async fn save_contract_info_in_tx(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        snapshot: &mut KvSnapshot,
        info: &ContractInfo,
        block_height: u64,
    ) -> Result<ContractCommitId> {
        self.catch_up_to_cursor(tx, snapshot).await?;

        let key = kv::contract_info_key(&info.id);
        let old_json = self
            .kv
            .get_json(&key)?
            .unwrap_or_else(|| Value::Object(Default::default()));
        let old_name = ContractInfo::from_json(&old_json)
            .map(|old| old.name)
            .unwrap_or_default();

        if info.name != old_name && !info.name.is_empty() {
            self.check_name_available(&info.name, &info.id)?;
        }

        let new_json = info.to_json();
        self.kv.insert_json(Some(&mut *snapshot), &key, &new_json)?;
        if info.name != old_name {
            if !old_name.is_empty() {
                self.kv
                    .remove(Some(&mut *snapshot), &kv::contract_name_key(&old_name))?;
            }
            if !info.name.is_empty() {
                self.kv.insert(
                    Some(&mut *snapshot),
                    &kv::contract_name_key(&info.name),
                    info.id.as_bytes(),
                )?;
            }
        }

        let diff = jsondiff::diff(&old_json, &new_json);
        let cursor = self.current_root_state_hash()?;
        let commit_id =
            next_root_state_hash(&cursor, &ordered_json_digest(&new_json), block_height);
        if CommitLog::find_with(tx, &commit_id).await?.is_some() {
            return Err(ContractStorageError::DuplicateCommit(commit_id));
        }
        self.kv
            .insert_json(Some(&mut *snapshot), &commit_id, &diff.to_json())?;
        CommitLog::append(tx, &commit_id, ChangeType::ContractInfo, &info.id).await?;
        self.advance_cursor(snapshot, &commit_id)?;
        debug!("saved contract info {} as commit {}", info.id, commit_id);
        Ok(commit_id)
    }

    pub(crate) async fn commit_contract_changes_in_tx(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        snapshot: &mut KvSnapshot,
        changes: &ContractChanges,
        block_height: u64,
    ) -> Result<ContractCommitId> {
        self.catch_up_to_cursor(tx, snapshot).await?;

        let cursor = self.current_root_state_hash()?;
        let bundle_json = changes.to_json();
        let commit_id =
            next_root_state_hash(&cursor, &ordered_json_digest(&bundle_json), block_height);
        if CommitLog::find_with(tx, &commit_id).await?.is_some() {
            return Err(ContractStorageError::DuplicateCommit(commit_id));
        }

        self.apply_balance_changes(snapshot, &changes.balance_changes)?;
        self.apply_storage_changes(snapshot, &changes.storage_changes)?;
        self.apply_events(snapshot, &commit_id, &changes.events)?;
        self.apply_upgrades(snapshot, &changes.upgrade_infos)?;

        self.kv
            .insert_json(Some(&mut *snapshot), &commit_id, &bundle_json)?;
        CommitLog::append(tx, &commit_id, ChangeType::StorageChange, "").await?;
        self.advance_cursor(snapshot, &commit_id)?;
        debug!("committed contract changes as {}", commit_id);
        Ok(commit_id)
    }

    /// When the cursor lags behind the tip (after `reset_root_state_hash`),
    /// reverse every commit after the cursor before applying on top of it.
    /// Runs inside the caller's transaction, so a later failure unwinds
    /// the reversal too.
    async fn catch_up_to_cursor(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        snapshot: &mut KvSnapshot,
    ) -> Result<()> {
        let cursor = self.current_root_state_hash()?;
        let top = self.top_root_state_hash()?;
        if cursor == top {
            return Ok(());
        }
        debug!("cursor {} behind tip {}, reversing later commits", cursor, top);
        let dest_seq = if cursor == EMPTY_COMMIT_ID {
            None
        } else {
            let row = CommitLog::find_with(tx, &cursor)
                .await?
                .ok_or_else(|| ContractStorageError::UnknownCommit(cursor.clone()))?;
            Some(row.seq)
        };
        self.revert_commits_after(tx, snapshot, dest_seq).await?;
        self.kv
            .insert(Some(&mut *snapshot), TOP_ROOT_STATE_HASH_KEY, cursor.as_bytes())?;
        Ok(())
    }

    fn apply_balance_changes(
        &self,
        snapshot: &mut KvSnapshot,
        changes: &[ContractBalanceChange],
    ) -> Result<()> {
        for change in changes {
            if !change.is_contract {
                continue;
            }
            trace!(
                "apply balance change: {} asset {} on {}",
                if change.add { "+" } else { "-" },
                change.asset_id,
                change.address
            );
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
                    if change.add {
                        balance.amount = balance.amount.checked_add(change.amount).ok_or(
                            ContractStorageError::BalanceOverflow {
                                contract_id: change.address.clone(),
                                asset_id: change.asset_id,
                            },
                        )?;
                    } else {
                        if balance.amount < change.amount {
                            return Err(ContractStorageError::NegativeBalance {
                                contract_id: change.address.clone(),
                                asset_id: change.asset_id,
                                amount: balance.amount,
                                change: change.amount,
                            });
                        }
                        balance.amount -= change.amount;
                    }
                }
                None => {
                    if !change.add && change.amount > 0 {
                        return Err(ContractStorageError::NegativeBalance {
                            contract_id: change.address.clone(),
                            asset_id: change.asset_id,
                            amount: 0,
                            change: change.amount,
                        });
                    }
                    info.balances.push(ContractBalance {
                        asset_id: change.asset_id,
                        amount: if change.add { change.amount } else { 0 },
                    });
                }
            }
            self.kv.insert_json(Some(&mut *snapshot), &key, &info.to_json())?;
        }
        Ok(())
    }

    fn apply_storage_changes(
        &self,
        snapshot: &mut KvSnapshot,
        changes: &[ContractStorageChange],
    ) -> Result<()> {
        for change in changes {
            for item in &change.items {
                let key = kv::contract_storage_key(&change.contract_id, &item.name);
                let old_value = self.kv.get_json(&key)?.unwrap_or(Value::Null);
                let new_value = jsondiff::patch(&old_value, &item.diff)?;
                if new_value.is_null() {
                    self.kv.remove(Some(&mut *snapshot), &key)?;
                } else {
                    self.kv.insert_json(Some(&mut *snapshot), &key, &new_value)?;
                }
            }
        }
        Ok(())
    }

    fn apply_events(
        &self,
        snapshot: &mut KvSnapshot,
        commit_id: &str,
        events: &[ContractEventInfo],
    ) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut by_transaction: BTreeMap<&str, Vec<&ContractEventInfo>> = BTreeMap::new();
        for (index, event) in events.iter().enumerate() {
            let event_id = kv::event_id(commit_id, index);
            self.kv.insert_json(
                Some(&mut *snapshot),
                &kv::event_key(commit_id, index),
                &event.to_json(),
            )?;
            self.kv.insert(
                Some(&mut *snapshot),
                &kv::commit_event_key(commit_id, &event_id),
                event_id.as_bytes(),
            )?;
            if !event.transaction_id.is_empty() {
                self.kv.insert(
                    Some(&mut *snapshot),
                    &kv::transaction_event_key(&event.transaction_id, &event_id),
                    event_id.as_bytes(),
                )?;
                by_transaction
                    .entry(event.transaction_id.as_str())
                    .or_default()
                    .push(event);
            }
        }
        self.kv.insert_json(
            Some(&mut *snapshot),
            &kv::commit_events_key(commit_id),
            &ContractChanges::events_to_json(events),
        )?;
        for (transaction_id, transaction_events) in by_transaction {
            let json = Value::Array(
                transaction_events
                    .iter()
                    .map(|event| event.to_json())
                    .collect(),
            );
            self.kv.insert_json(
                Some(&mut *snapshot),
                &kv::transaction_events_key(transaction_id),
                &json,
            )?;
        }
        Ok(())
    }

    fn apply_upgrades(
        &self,
        snapshot: &mut KvSnapshot,
        upgrades: &[ContractUpgradeInfo],
    ) -> Result<()> {
        for upgrade in upgrades {
            trace!("apply upgrade of contract {}", upgrade.contract_id);
            let key = kv::contract_info_key(&upgrade.contract_id);
            let json = self.kv.get_json(&key)?.ok_or_else(|| {
                ContractStorageError::ContractNotFound(upgrade.contract_id.clone())
            })?;
            let mut info = ContractInfo::from_json(&json).ok_or_else(|| {
                ContractStorageError::corrupted(key.as_str(), "contract info is not decodable")
            })?;

            // An upgrade may only be applied while the contract still has
            // an empty name.
            if !info.name.is_empty() {
                return Err(ContractStorageError::AlreadyUpgraded(
                    upgrade.contract_id.clone(),
                ));
            }

            if let Some(diff) = &upgrade.name_diff {
                info.name = patch_string_field(&info.name, diff, &key, "name")?;
            }
            if let Some(diff) = &upgrade.description_diff {
                info.description = patch_string_field(&info.description, diff, &key, "description")?;
            }

            if !info.name.is_empty() {
                self.check_name_available(&info.name, &upgrade.contract_id)?;
            }
            self.kv.insert_json(Some(&mut *snapshot), &key, &info.to_json())?;
            if !info.name.is_empty() {
                self.kv.insert(
                    Some(&mut *snapshot),
                    &kv::contract_name_key(&info.name),
                    upgrade.contract_id.as_bytes(),
                )?;
            }
        }
        Ok(())
    }

    /// Fail with `NameCollision` when `name` already maps to another id.
    pub(crate) fn check_name_available(&self, name: &str, contract_id: &str) -> Result<()> {
        if let Some(existing_id) = self.kv.get_string(&kv::contract_name_key(name))? {
            if existing_id != contract_id {
                return Err(ContractStorageError::NameCollision {
                    name: name.to_owned(),
                    existing_id,
                });
            }
        }
        Ok(())
    }

    /// Point both the cursor and the tip at the freshly applied commit.
    pub(crate) fn advance_cursor(
        &self,
        snapshot: &mut KvSnapshot,
        commit_id: &str,
    ) -> Result<()> {
        self.kv
            .insert(Some(&mut *snapshot), ROOT_STATE_HASH_KEY, commit_id.as_bytes())?;
        self.kv
            .insert(Some(&mut *snapshot), TOP_ROOT_STATE_HASH_KEY, commit_id.as_bytes())?;
        Ok(())
    }
}

fn patch_string_field(
    current: &str,
    diff: &crate::jsondiff::DiffResult,
    key: &str,
    field: &str,
) -> Result<String> {
    let patched = jsondiff::patch(&Value::String(current.to_owned()), diff)?;
    patched
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| ContractStorageError::corrupted(key, format!("upgraded {field} is not a string")))
}
