//! Typed adapter over the ordered key-value engine.
//!
//! Every mutating storage operation runs under a [`KvSnapshot`]: the
//! first time a key is touched its prior value is recorded, and
//! [`KvStore::restore`] rewrites or deletes each touched key to bring
//! the store back to its exact pre-operation state. Combined with the
//! commit-log transaction this gives all-or-nothing semantics across
//! the two engines.

use std::collections::HashMap;
use std::path::Path;

use log::trace;
use serde_json::Value;
use sled::IVec;

use crate::config::{
    COMMIT_EVENTS_KEY_PREFIX, COMMIT_EVENT_KEY_PREFIX, CONTRACT_INFO_KEY_PREFIX,
    CONTRACT_NAME_KEY_PREFIX, CONTRACT_STORAGE_KEY_PREFIX, EVENT_KEY_PREFIX,
    TRANSACTION_EVENTS_KEY_PREFIX, TRANSACTION_EVENT_KEY_PREFIX,
};
use crate::error::{ContractStorageError, Result};

pub fn contract_info_key(contract_id: &str) -> String {
    format!("{CONTRACT_INFO_KEY_PREFIX}{contract_id}")
}

pub fn contract_storage_key(contract_id: &str, storage_name: &str) -> String {
    format!("{CONTRACT_STORAGE_KEY_PREFIX}{contract_id}_{storage_name}")
}

pub fn contract_name_key(name: &str) -> String {
    format!("{CONTRACT_NAME_KEY_PREFIX}{name}")
}

pub fn commit_events_key(commit_id: &str) -> String {
    format!("{COMMIT_EVENTS_KEY_PREFIX}{commit_id}")
}

pub fn commit_event_key(commit_id: &str, event_id: &str) -> String {
    format!("{COMMIT_EVENT_KEY_PREFIX}{commit_id}${event_id}")
}

pub fn transaction_events_key(transaction_id: &str) -> String {
    format!("{TRANSACTION_EVENTS_KEY_PREFIX}{transaction_id}")
}

pub fn transaction_event_key(transaction_id: &str, event_id: &str) -> String {
    format!("{TRANSACTION_EVENT_KEY_PREFIX}{transaction_id}${event_id}")
}

pub fn event_key(commit_id: &str, index: usize) -> String {
    format!("{EVENT_KEY_PREFIX}{commit_id}{index}")
}

pub fn event_id(commit_id: &str, index: usize) -> String {
    format!("{commit_id}{index}")
}

/// Before-images of every key touched by one mutating operation.
#[derive(Debug, Default)]
pub struct KvSnapshot {
    before: HashMap<String, Option<IVec>>,
}

impl KvSnapshot {
    pub fn touched_keys(&self) -> impl Iterator<Item = &str> {
        self.before.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty()
    }
}

/// Thin wrapper over the sled tree holding all contract state.
pub struct KvStore {
    db: sled::Db,
}

impl KvStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn get(&self, key: &str) -> Result<Option<IVec>> {
        Ok(self.db.get(key.as_bytes())?)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.db.contains_key(key.as_bytes())?)
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key)? {
            Some(raw) => String::from_utf8(raw.to_vec())
                .map(Some)
                .map_err(|_| ContractStorageError::corrupted(key, "value is not utf-8")),
            None => Ok(None),
        }
    }

    pub fn get_json(&self, key: &str) -> Result<Option<Value>> {
        match self.get(key)? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|err| ContractStorageError::corrupted(key, err.to_string())),
            None => Ok(None),
        }
    }

    /// Store a value, recording the key's prior state in `snapshot` the
    /// first time it is touched.
    pub fn insert(
        &self,
        snapshot: Option<&mut KvSnapshot>,
        key: &str,
        value: &[u8],
    ) -> Result<()> {
        self.record_before_image(snapshot, key)?;
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    pub fn insert_json(
        &self,
        snapshot: Option<&mut KvSnapshot>,
        key: &str,
        value: &Value,
    ) -> Result<()> {
        self.insert(snapshot, key, &serde_json::to_vec(value)?)
    }

    /// Delete a key, recording its prior state like [`Self::insert`].
    pub fn remove(&self, snapshot: Option<&mut KvSnapshot>, key: &str) -> Result<()> {
        self.record_before_image(snapshot, key)?;
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    fn record_before_image(&self, snapshot: Option<&mut KvSnapshot>, key: &str) -> Result<()> {
        if let Some(snapshot) = snapshot {
            if !snapshot.before.contains_key(key) {
                let prior = self.db.get(key.as_bytes())?;
                snapshot.before.insert(key.to_owned(), prior);
            }
        }
        Ok(())
    }

    /// Rewrite every touched key back to its before-image.
    pub fn restore(&self, snapshot: KvSnapshot) -> Result<()> {
        trace!("restoring {} touched keys", snapshot.before.len());
        for (key, prior) in snapshot.before {
            match prior {
                Some(value) => {
                    self.db.insert(key.as_bytes(), value)?;
                }
                None => {
                    self.db.remove(key.as_bytes())?;
                }
            }
        }
        self.db.flush()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, KvStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = KvStore::open(&dir.path().join("kv")).expect("open kv");
        (dir, store)
    }

    #[test]
    fn restore_rewrites_touched_keys_exactly() {
        let (_dir, store) = open_store();
        store.insert(None, "a", b"1").unwrap();
        store.insert(None, "b", b"2").unwrap();

        let mut snapshot = KvSnapshot::default();
        // overwrite twice, delete, and create under the snapshot
        store.insert(Some(&mut snapshot), "a", b"changed").unwrap();
        store.insert(Some(&mut snapshot), "a", b"changed again").unwrap();
        store.remove(Some(&mut snapshot), "b").unwrap();
        store.insert(Some(&mut snapshot), "c", b"3").unwrap();

        assert_eq!(store.get("a").unwrap().unwrap().as_ref(), b"changed again");
        assert!(store.get("b").unwrap().is_none());

        store.restore(snapshot).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().as_ref(), b"1");
        assert_eq!(store.get("b").unwrap().unwrap().as_ref(), b"2");
        assert!(store.get("c").unwrap().is_none());
    }

    #[test]
    fn untracked_writes_skip_the_snapshot() {
        let (_dir, store) = open_store();
        let mut snapshot = KvSnapshot::default();
        store.insert(None, "a", b"1").unwrap();
        assert!(snapshot.is_empty());
        store.insert(Some(&mut snapshot), "a", b"2").unwrap();
        assert_eq!(snapshot.touched_keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn json_helpers_roundtrip() {
        let (_dir, store) = open_store();
        let value = serde_json::json!({"k": [1, 2, 3]});
        store.insert_json(None, "doc", &value).unwrap();
        assert_eq!(store.get_json("doc").unwrap().unwrap(), value);
        assert!(store.get_json("missing").unwrap().is_none());
    }

    #[test]
    fn corrupt_json_is_reported() {
        let (_dir, store) = open_store();
        store.insert(None, "doc", b"{not json").unwrap();
        assert!(matches!(
            store.get_json("doc"),
            Err(ContractStorageError::DataCorruption { .. })
        ));
    }
}
