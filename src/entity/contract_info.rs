use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Map, Value};

/// Per-asset balance held by a contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContractBalance {
    pub asset_id: u32,
    pub amount: u64,
}

impl ContractBalance {
    pub fn to_json(&self) -> Value {
        json!({
            "asset_id": self.asset_id,
            "amount": self.amount,
        })
    }

    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        Some(Self {
            asset_id: obj.get("asset_id").and_then(Value::as_u64).unwrap_or(0) as u32,
            amount: obj.get("amount").and_then(Value::as_u64).unwrap_or(0),
        })
    }
}

/// Immutable metadata and mutable balances of a registered contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractInfo {
    pub id: String,
    pub name: String,
    pub creator_address: String,
    pub txid: String,
    pub is_native: bool,
    pub contract_template_key: String,
    pub version: u64,
    pub description: String,
    pub bytecode: Vec<u8>,
    pub apis: Vec<String>,
    pub offline_apis: Vec<String>,
    pub storage_types: BTreeMap<String, u64>,
    pub balances: Vec<ContractBalance>,
}

impl ContractInfo {
    /// Canonical JSON form: `apis` and `offline_apis` sorted ascending,
    /// `storage_types` as key-sorted `[name, type]` pairs, `balances`
    /// sorted by asset id with zero-amount entries omitted. Two logically
    /// equal records always serialize to identical bytes, which the hash
    /// chain and the diff blobs depend on.
    pub fn to_json(&self) -> Value {
        let mut apis = self.apis.clone();
        apis.sort_unstable();
        let mut offline_apis = self.offline_apis.clone();
        offline_apis.sort_unstable();

        let storage_types: Vec<Value> = self
            .storage_types
            .iter()
            .map(|(name, type_code)| json!([name, type_code]))
            .collect();

        let mut balances: Vec<&ContractBalance> =
            self.balances.iter().filter(|b| b.amount > 0).collect();
        balances.sort_unstable_by_key(|b| b.asset_id);
        let balances: Vec<Value> = balances.into_iter().map(ContractBalance::to_json).collect();

        json!({
            "id": self.id,
            "name": self.name,
            "creator_address": self.creator_address,
            "txid": self.txid,
            "is_native": self.is_native,
            "contract_template_key": self.contract_template_key,
            "version": self.version,
            "description": self.description,
            "bytecode": BASE64.encode(&self.bytecode),
            "apis": apis,
            "offline_apis": offline_apis,
            "storage_types": storage_types,
            "balances": balances,
        })
    }

    /// Decode a record. `id`, `name`, `bytecode`, `apis` and
    /// `offline_apis` are required; everything else defaults when absent.
    /// A non-object or empty-object root yields `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.is_empty() {
            return None;
        }

        let id = obj.get("id")?.as_str()?.to_owned();
        let name = obj.get("name")?.as_str()?.to_owned();
        let bytecode = BASE64.decode(obj.get("bytecode")?.as_str()?).ok()?;
        let apis = string_array(obj.get("apis")?)?;
        let offline_apis = string_array(obj.get("offline_apis")?)?;

        let mut storage_types = BTreeMap::new();
        if let Some(entries) = obj.get("storage_types").and_then(Value::as_array) {
            for entry in entries {
                let pair = entry.as_array()?;
                if pair.len() < 2 {
                    return None;
                }
                storage_types.insert(pair[0].as_str()?.to_owned(), pair[1].as_u64()?);
            }
        }

        let balances = obj
            .get("balances")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(ContractBalance::from_json)
                    .filter(|b| b.amount > 0)
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            id,
            name,
            creator_address: string_field(obj, "creator_address"),
            txid: string_field(obj, "txid"),
            is_native: obj.get("is_native").and_then(Value::as_bool).unwrap_or(false),
            contract_template_key: string_field(obj, "contract_template_key"),
            version: obj.get("version").and_then(Value::as_u64).unwrap_or(0),
            description: string_field(obj, "description"),
            bytecode,
            apis,
            offline_apis,
            storage_types,
            balances,
        })
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_owned))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ContractInfo {
        ContractInfo {
            id: "c1".to_owned(),
            name: "hello1".to_owned(),
            creator_address: "addr1".to_owned(),
            version: 1,
            bytecode: vec![123],
            apis: vec!["say".to_owned(), "init".to_owned()],
            offline_apis: vec!["query1".to_owned(), "name".to_owned()],
            ..Default::default()
        }
    }

    #[test]
    fn to_json_sorts_api_lists() {
        let json = sample().to_json();
        assert_eq!(json["apis"], json!(["init", "say"]));
        assert_eq!(json["offline_apis"], json!(["name", "query1"]));
    }

    #[test]
    fn to_json_prunes_and_sorts_balances() {
        let mut info = sample();
        info.balances = vec![
            ContractBalance { asset_id: 7, amount: 5 },
            ContractBalance { asset_id: 0, amount: 0 },
            ContractBalance { asset_id: 2, amount: 1 },
        ];
        let json = info.to_json();
        assert_eq!(
            json["balances"],
            json!([
                {"asset_id": 2, "amount": 1},
                {"asset_id": 7, "amount": 5},
            ])
        );
    }

    #[test]
    fn to_json_sorts_storage_types() {
        let mut info = sample();
        info.storage_types.insert("zz".to_owned(), 2);
        info.storage_types.insert("aa".to_owned(), 1);
        assert_eq!(info.to_json()["storage_types"], json!([["aa", 1], ["zz", 2]]));
    }

    #[test]
    fn roundtrips_through_json() {
        let mut info = sample();
        info.apis.sort_unstable();
        info.offline_apis.sort_unstable();
        info.storage_types.insert("counter".to_owned(), 3);
        info.balances = vec![ContractBalance { asset_id: 0, amount: 100 }];
        let decoded = ContractInfo::from_json(&info.to_json()).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn from_json_defaults_optional_fields() {
        let json = json!({
            "id": "c1",
            "name": "",
            "bytecode": "",
            "apis": [],
            "offline_apis": [],
        });
        let info = ContractInfo::from_json(&json).unwrap();
        assert_eq!(info.version, 0);
        assert!(!info.is_native);
        assert!(info.description.is_empty());
        assert!(info.storage_types.is_empty());
        assert!(info.balances.is_empty());
    }

    #[test]
    fn from_json_rejects_malformed_roots() {
        assert!(ContractInfo::from_json(&json!(null)).is_none());
        assert!(ContractInfo::from_json(&json!("text")).is_none());
        assert!(ContractInfo::from_json(&json!({})).is_none());
        assert!(ContractInfo::from_json(&json!({"id": "c1"})).is_none());
    }

    #[test]
    fn balance_from_json_rejects_non_objects() {
        assert!(ContractBalance::from_json(&json!(null)).is_none());
        assert!(ContractBalance::from_json(&json!([1, 2])).is_none());
    }
}
