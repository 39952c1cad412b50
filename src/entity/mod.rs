mod change;
mod commit;
mod contract_info;

pub use change::{
    ContractBalanceChange, ContractChanges, ContractEventInfo, ContractStorageChange,
    ContractStorageItemChange, ContractUpgradeInfo,
};
pub use commit::{ChangeType, ContractCommitInfo};
pub use contract_info::{ContractBalance, ContractInfo};
