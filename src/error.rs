use thiserror::Error;

pub type Result<T, E = ContractStorageError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ContractStorageError {
    #[error("contract storage is not open")]
    StoreNotOpen,

    #[error("key-value store error: {0}")]
    Store(#[from] sled::Error),

    #[error("commit log error: {0}")]
    CommitLog(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("diff application error: {0}")]
    Diff(#[from] json_patch::PatchError),

    #[error("corrupted record under key {key}: {reason}")]
    DataCorruption { key: String, reason: String },

    #[error("unknown commit {0}")]
    UnknownCommit(String),

    #[error("commit {0} already exists")]
    DuplicateCommit(String),

    #[error("contract {0} not found")]
    ContractNotFound(String),

    #[error(
        "balance of asset {asset_id} on contract {contract_id} would go negative ({amount} < {change})"
    )]
    NegativeBalance {
        contract_id: String,
        asset_id: u32,
        amount: u64,
        change: u64,
    },

    #[error("balance of asset {asset_id} on contract {contract_id} overflows")]
    BalanceOverflow { contract_id: String, asset_id: u32 },

    #[error("contract name {name} is already mapped to {existing_id}")]
    NameCollision { name: String, existing_id: String },

    #[error("contract {0} has already been upgraded")]
    AlreadyUpgraded(String),
}

impl ContractStorageError {
    pub(crate) fn corrupted(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DataCorruption {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
