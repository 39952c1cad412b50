use serde_json::{json, Value};

use crate::jsondiff::DiffResult;

/// Single balance delta against a contract or external address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractBalanceChange {
    pub asset_id: u32,
    pub address: String,
    pub amount: u64,
    /// true adds to the balance, false subtracts.
    pub add: bool,
    /// Only changes targeting a contract are applied by this store.
    pub is_contract: bool,
    pub memo: String,
}

impl ContractBalanceChange {
    pub fn to_json(&self) -> Value {
        json!({
            "asset_id": self.asset_id,
            "address": self.address,
            "amount": self.amount,
            "add": self.add,
            "is_contract": self.is_contract,
            "memo": self.memo,
        })
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            asset_id: obj.get("asset_id").and_then(Value::as_u64).unwrap_or(0) as u32,
            address: obj
                .get("address")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            amount: obj.get("amount").and_then(Value::as_u64).unwrap_or(0),
            add: obj.get("add").and_then(Value::as_bool).unwrap_or(false),
            is_contract: obj
                .get("is_contract")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            memo: obj
                .get("memo")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

/// Reversible change of one named storage slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractStorageItemChange {
    pub name: String,
    pub diff: DiffResult,
}

/// All slot changes of one contract within a bundle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractStorageChange {
    pub contract_id: String,
    pub items: Vec<ContractStorageItemChange>,
}

impl ContractStorageChange {
    pub fn to_json(&self) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|item| {
                json!({
                    "name": item.name,
                    "diff": item.diff.to_json(),
                })
            })
            .collect();
        json!({
            "contract_id": self.contract_id,
            "items": items,
        })
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut items = Vec::new();
        if let Some(entries) = obj.get("items").and_then(Value::as_array) {
            for entry in entries {
                let item = entry.as_object()?;
                items.push(ContractStorageItemChange {
                    name: item
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    diff: item
                        .get("diff")
                        .map_or_else(|| Some(DiffResult::empty()), DiffResult::from_json)?,
                });
            }
        }
        Some(Self {
            contract_id: obj
                .get("contract_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            items,
        })
    }
}

/// Event emitted by a contract during execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractEventInfo {
    /// May be empty for events outside any transaction.
    pub transaction_id: String,
    pub contract_id: String,
    pub event_name: String,
    pub event_arg: String,
}

impl ContractEventInfo {
    pub fn to_json(&self) -> Value {
        json!({
            "tx_id": self.transaction_id,
            "contract_id": self.contract_id,
            "name": self.event_name,
            "arg": self.event_arg,
        })
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let field = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        Some(Self {
            transaction_id: field("tx_id"),
            contract_id: field("contract_id"),
            event_name: field("name"),
            event_arg: field("arg"),
        })
    }
}

/// One-shot name/description upgrade of a contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractUpgradeInfo {
    pub contract_id: String,
    pub name_diff: Option<DiffResult>,
    pub description_diff: Option<DiffResult>,
}

impl ContractUpgradeInfo {
    pub fn to_json(&self) -> Value {
        let mut obj = json!({ "contract_id": self.contract_id });
        if let Some(diff) = &self.name_diff {
            obj["name_diff"] = diff.to_json();
        }
        if let Some(diff) = &self.description_diff {
            obj["description_diff"] = diff.to_json();
        }
        obj
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let diff_field = |key: &str| match obj.get(key) {
            Some(value) => DiffResult::from_json(value).map(Some),
            None => Some(None),
        };
        Some(Self {
            contract_id: obj
                .get("contract_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            name_diff: diff_field("name_diff")?,
            description_diff: diff_field("description_diff")?,
        })
    }
}

/// Atomic bundle of balance, storage, event and upgrade deltas.
///
/// The bundle is ephemeral input; once committed, its JSON serialization
/// is stored under the commit id as the reverse-diff blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractChanges {
    pub balance_changes: Vec<ContractBalanceChange>,
    pub storage_changes: Vec<ContractStorageChange>,
    pub events: Vec<ContractEventInfo>,
    pub upgrade_infos: Vec<ContractUpgradeInfo>,
}

impl ContractChanges {
    pub fn is_empty(&self) -> bool {
        self.balance_changes.is_empty()
            && self.storage_changes.is_empty()
            && self.events.is_empty()
            && self.upgrade_infos.is_empty()
    }

    pub fn events_to_json(events: &[ContractEventInfo]) -> Value {
        Value::Array(events.iter().map(ContractEventInfo::to_json).collect())
    }

    pub fn events_from_json(value: &Value) -> Option<Vec<ContractEventInfo>> {
        value
            .as_array()?
            .iter()
            .map(ContractEventInfo::from_json)
            .collect()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "balance_changes": self
                .balance_changes
                .iter()
                .map(ContractBalanceChange::to_json)
                .collect::<Vec<_>>(),
            "storage_changes": self
                .storage_changes
                .iter()
                .map(ContractStorageChange::to_json)
                .collect::<Vec<_>>(),
            "events": Self::events_to_json(&self.events),
            "upgrade_infos": self
                .upgrade_infos
                .iter()
                .map(ContractUpgradeInfo::to_json)
                .collect::<Vec<_>>(),
        })
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let section = |key: &str| obj.get(key).and_then(Value::as_array);
        let mut changes = Self::default();
        if let Some(entries) = section("balance_changes") {
            changes.balance_changes = entries
                .iter()
                .map(ContractBalanceChange::from_json)
                .collect::<Option<_>>()?;
        }
        if let Some(entries) = section("storage_changes") {
            changes.storage_changes = entries
                .iter()
                .map(ContractStorageChange::from_json)
                .collect::<Option<_>>()?;
        }
        if let Some(events) = obj.get("events") {
            changes.events = Self::events_from_json(events)?;
        }
        if let Some(entries) = section("upgrade_infos") {
            changes.upgrade_infos = entries
                .iter()
                .map(ContractUpgradeInfo::from_json)
                .collect::<Option<_>>()?;
        }
        Some(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsondiff;

    fn sample_changes() -> ContractChanges {
        ContractChanges {
            balance_changes: vec![ContractBalanceChange {
                asset_id: 0,
                address: "c1".to_owned(),
                amount: 100,
                add: true,
                is_contract: true,
                memo: "test memo".to_owned(),
            }],
            storage_changes: vec![ContractStorageChange {
                contract_id: "c1".to_owned(),
                items: vec![ContractStorageItemChange {
                    name: "name".to_owned(),
                    diff: jsondiff::diff(&json!(null), &json!("China")),
                }],
            }],
            events: vec![ContractEventInfo {
                transaction_id: "tx1".to_owned(),
                contract_id: "contract1".to_owned(),
                event_name: "hello".to_owned(),
                event_arg: "world123".to_owned(),
            }],
            upgrade_infos: vec![ContractUpgradeInfo {
                contract_id: "c1".to_owned(),
                name_diff: None,
                description_diff: Some(jsondiff::diff(&json!(""), &json!("demo"))),
            }],
        }
    }

    #[test]
    fn bundle_roundtrips_through_json() {
        let changes = sample_changes();
        let decoded = ContractChanges::from_json(&changes.to_json()).unwrap();
        assert_eq!(decoded, changes);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let decoded = ContractChanges::from_json(&json!({})).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn non_object_root_is_rejected() {
        assert!(ContractChanges::from_json(&json!([])).is_none());
        assert!(ContractChanges::from_json(&json!(null)).is_none());
    }

    #[test]
    fn upgrade_without_diffs_roundtrips() {
        let upgrade = ContractUpgradeInfo {
            contract_id: "c1".to_owned(),
            name_diff: None,
            description_diff: None,
        };
        let decoded = ContractUpgradeInfo::from_json(&upgrade.to_json()).unwrap();
        assert_eq!(decoded, upgrade);
        assert!(!upgrade.to_json().as_object().unwrap().contains_key("name_diff"));
    }

    #[test]
    fn storage_item_without_diff_defaults_to_empty() {
        let decoded = ContractStorageChange::from_json(&json!({
            "contract_id": "c1",
            "items": [{"name": "slot"}],
        }))
        .unwrap();
        assert!(decoded.items[0].diff.is_empty());
    }
}
