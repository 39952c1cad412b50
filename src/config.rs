use std::path::PathBuf;

/// Sentinel commit id of the empty store, before any commit.
pub const EMPTY_COMMIT_ID: &str = "";

/// Cursor key: the currently active commit id.
pub const ROOT_STATE_HASH_KEY: &str = "ROOT_STATE_HASH";
/// Tip key: the latest committed commit id.
pub const TOP_ROOT_STATE_HASH_KEY: &str = "TOP_ROOT_STATE_HASH";

// Commit-log change type tags
pub const CONTRACT_INFO_CHANGE_TYPE: &str = "contract_info";
pub const CONTRACT_STORAGE_CHANGE_TYPE: &str = "storage_change";

// Key-value store namespaces
pub const CONTRACT_INFO_KEY_PREFIX: &str = "contract_info_key_";
pub const CONTRACT_STORAGE_KEY_PREFIX: &str = "contract_storage_key_";
pub const CONTRACT_NAME_KEY_PREFIX: &str = "contract_name_id_mapping_";
pub const COMMIT_EVENTS_KEY_PREFIX: &str = "commit_events$";
pub const COMMIT_EVENT_KEY_PREFIX: &str = "commit_event$";
pub const TRANSACTION_EVENTS_KEY_PREFIX: &str = "transaction_events$";
pub const TRANSACTION_EVENT_KEY_PREFIX: &str = "transaction_event$";
pub const EVENT_KEY_PREFIX: &str = "event$";

/// Storage service configuration.
///
/// `magic_number` is caller-defined metadata identifying the chain the
/// store belongs to; it never participates in commit hashing.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub magic_number: u32,
    /// Directory for the ordered key-value store.
    pub kv_path: PathBuf,
    /// File path for the SQLite commit log.
    pub commit_log_path: PathBuf,
}

impl StorageConfig {
    pub fn new(
        magic_number: u32,
        kv_path: impl Into<PathBuf>,
        commit_log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            magic_number,
            kv_path: kv_path.into(),
            commit_log_path: commit_log_path.into(),
        }
    }
}
