//! Versioned state store for smart-contract execution.
//!
//! Every committed block of changes produces a new root state hash that
//! chains from the previous one, so the whole contract-storage world has
//! a single evolving fingerprint. The store holds, per contract:
//! immutable metadata, named storage slots with JSON-shaped values,
//! per-asset balances and an append-only event log. Three primitive
//! operations drive it: register/replace a contract, commit a change
//! bundle, and roll back to any prior commit.
//!
//! State lives in two engines that do not share transactions: an ordered
//! key-value store for records and a SQLite table for the ordered commit
//! log. Mutations keep both consistent through a commit-log transaction
//! paired with key-value before-images that are restored on failure.

pub mod config;
pub mod entity;
pub mod error;
pub mod hash;
pub mod jsondiff;
pub mod store;

mod service;

pub use config::{StorageConfig, EMPTY_COMMIT_ID};
pub use entity::{
    ChangeType, ContractBalance, ContractBalanceChange, ContractChanges, ContractCommitInfo,
    ContractEventInfo, ContractInfo, ContractStorageChange, ContractStorageItemChange,
    ContractUpgradeInfo,
};
pub use error::ContractStorageError;
pub use hash::ContractCommitId;
pub use jsondiff::DiffResult;
pub use service::ContractStorageService;
