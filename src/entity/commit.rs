use std::fmt;

use sqlx::{sqlite::SqliteRow, FromRow, Row};

use crate::config::{CONTRACT_INFO_CHANGE_TYPE, CONTRACT_STORAGE_CHANGE_TYPE};

/// Kind of change recorded by a commit-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Full replace of a contract record via `save_contract_info`.
    ContractInfo,
    /// A `ContractChanges` bundle.
    StorageChange,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContractInfo => CONTRACT_INFO_CHANGE_TYPE,
            Self::StorageChange => CONTRACT_STORAGE_CHANGE_TYPE,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            CONTRACT_INFO_CHANGE_TYPE => Some(Self::ContractInfo),
            CONTRACT_STORAGE_CHANGE_TYPE => Some(Self::StorageChange),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only commit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCommitInfo {
    pub seq: i64,
    pub commit_id: String,
    pub change_type: ChangeType,
    pub contract_id: String,
}

impl<'r> FromRow<'r, SqliteRow> for ContractCommitInfo {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let tag: String = row.try_get("change_type")?;
        let change_type = ChangeType::from_tag(&tag).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "change_type".to_owned(),
            source: format!("unknown change type {tag}").into(),
        })?;
        Ok(Self {
            seq: row.try_get("seq")?,
            commit_id: row.try_get("commit_id")?,
            change_type,
            contract_id: row
                .try_get::<Option<String>, _>("contract_id")?
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_type_tags_roundtrip() {
        for change_type in [ChangeType::ContractInfo, ChangeType::StorageChange] {
            assert_eq!(ChangeType::from_tag(change_type.as_str()), Some(change_type));
        }
        assert_eq!(ChangeType::from_tag("unknown"), None);
    }
}
