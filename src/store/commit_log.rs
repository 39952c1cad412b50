//! Append-only commit log backed by SQLite.
//!
//! The log is the ordered side of the store: rows carry an autoincrement
//! sequence so history can be walked backwards for rollback. Mutations
//! always run inside a transaction owned by the storage service; the
//! pool is capped at a single connection, which also serializes writers.

use std::path::Path;

use log::{debug, trace};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Sqlite, SqliteConnection, Transaction,
};

use crate::entity::{ChangeType, ContractCommitInfo};
use crate::error::Result;

const CREATE_COMMIT_INFO_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS commit_info (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    commit_id TEXT NOT NULL,
    change_type TEXT NOT NULL,
    contract_id TEXT
)";

const SELECT_COLUMNS: &str = "SELECT seq, commit_id, change_type, contract_id FROM commit_info";

pub struct CommitLog {
    pool: SqlitePool,
}

impl CommitLog {
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(CREATE_COMMIT_INFO_TABLE).execute(&pool).await?;
        debug!("commit log opened at {}", path.display());
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Look up a commit row outside of any transaction.
    pub async fn find(&self, commit_id: &str) -> Result<Option<ContractCommitInfo>> {
        trace!("find commit {}", commit_id);
        let row = sqlx::query_as::<_, ContractCommitInfo>(
            "SELECT seq, commit_id, change_type, contract_id FROM commit_info WHERE commit_id = ?",
        )
        .bind(commit_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Latest commit row, if the log is non-empty.
    pub async fn tip(&self) -> Result<Option<ContractCommitInfo>> {
        let row = sqlx::query_as::<_, ContractCommitInfo>(
            "SELECT seq, commit_id, change_type, contract_id FROM commit_info \
             ORDER BY seq DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Delete every row. Test tooling only; leaves the key-value store
    /// untouched and therefore out of sync.
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM commit_info")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn find_with(
        conn: &mut SqliteConnection,
        commit_id: &str,
    ) -> Result<Option<ContractCommitInfo>> {
        let row = sqlx::query_as::<_, ContractCommitInfo>(
            "SELECT seq, commit_id, change_type, contract_id FROM commit_info WHERE commit_id = ?",
        )
        .bind(commit_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn append(
        conn: &mut SqliteConnection,
        commit_id: &str,
        change_type: ChangeType,
        contract_id: &str,
    ) -> Result<()> {
        trace!("append commit {} ({})", commit_id, change_type);
        sqlx::query("INSERT INTO commit_info (commit_id, change_type, contract_id) VALUES (?, ?, ?)")
            .bind(commit_id)
            .bind(change_type.as_str())
            .bind(contract_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Rows after `seq` (all rows when `None`), newest first, ready for
    /// reverse application.
    pub async fn rows_after(
        conn: &mut SqliteConnection,
        seq: Option<i64>,
    ) -> Result<Vec<ContractCommitInfo>> {
        let rows = match seq {
            Some(seq) => {
                sqlx::query_as::<_, ContractCommitInfo>(&format!(
                    "{SELECT_COLUMNS} WHERE seq > ? ORDER BY seq DESC"
                ))
                .bind(seq)
                .fetch_all(&mut *conn)
                .await?
            }
            None => {
                sqlx::query_as::<_, ContractCommitInfo>(&format!(
                    "{SELECT_COLUMNS} ORDER BY seq DESC"
                ))
                .fetch_all(&mut *conn)
                .await?
            }
        };
        Ok(rows)
    }

    pub async fn delete(conn: &mut SqliteConnection, commit_id: &str) -> Result<()> {
        trace!("delete commit {}", commit_id);
        sqlx::query("DELETE FROM commit_info WHERE commit_id = ?")
            .bind(commit_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_log() -> (TempDir, CommitLog) {
        let dir = TempDir::new().expect("tempdir");
        let log = CommitLog::open(&dir.path().join("commit_log.db"))
            .await
            .expect("open commit log");
        (dir, log)
    }

    #[tokio::test]
    async fn append_find_and_tip() {
        let (_dir, log) = open_log().await;
        let mut tx = log.begin().await.unwrap();
        CommitLog::append(&mut tx, "h1", ChangeType::ContractInfo, "c1")
            .await
            .unwrap();
        CommitLog::append(&mut tx, "h2", ChangeType::StorageChange, "")
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let found = log.find("h1").await.unwrap().unwrap();
        assert_eq!(found.change_type, ChangeType::ContractInfo);
        assert_eq!(found.contract_id, "c1");

        let tip = log.tip().await.unwrap().unwrap();
        assert_eq!(tip.commit_id, "h2");
        assert!(tip.seq > found.seq);
        assert!(log.find("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rows_after_returns_newest_first() {
        let (_dir, log) = open_log().await;
        let mut tx = log.begin().await.unwrap();
        for id in ["h1", "h2", "h3"] {
            CommitLog::append(&mut tx, id, ChangeType::StorageChange, "")
                .await
                .unwrap();
        }
        let first_seq = CommitLog::find_with(&mut tx, "h1").await.unwrap().unwrap().seq;
        let rows = CommitLog::rows_after(&mut tx, Some(first_seq)).await.unwrap();
        assert_eq!(
            rows.iter().map(|r| r.commit_id.as_str()).collect::<Vec<_>>(),
            vec!["h3", "h2"]
        );
        let all = CommitLog::rows_after(&mut tx, None).await.unwrap();
        assert_eq!(all.len(), 3);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn rolled_back_transaction_leaves_no_rows() {
        let (_dir, log) = open_log().await;
        let mut tx = log.begin().await.unwrap();
        CommitLog::append(&mut tx, "h1", ChangeType::ContractInfo, "c1")
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert!(log.find("h1").await.unwrap().is_none());
        assert!(log.tip().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_removes_a_row() {
        let (_dir, log) = open_log().await;
        let mut tx = log.begin().await.unwrap();
        CommitLog::append(&mut tx, "h1", ChangeType::StorageChange, "")
            .await
            .unwrap();
        CommitLog::delete(&mut tx, "h1").await.unwrap();
        tx.commit().await.unwrap();
        assert!(log.find("h1").await.unwrap().is_none());
    }
}
