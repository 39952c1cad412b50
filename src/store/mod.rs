pub mod commit_log;
pub mod kv;

pub use commit_log::CommitLog;
pub use kv::{KvSnapshot, KvStore};
