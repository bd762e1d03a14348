//! Storage layer for the Dopel indexer.
//!
//! This module provides one interface over two backends:
//! - SQLite (durable, connection pooled, migrations embedded)
//! - Memory (bounded ring buffers, used when no database is usable)
//!
//! The backend is chosen once by [`open_store`] and never swapped.

use async_trait::async_trait;
use dopel_core::{
    LeaderboardEntry, RewardAggregates, StoredBlock, TransactionRecord, ValidatorRewardRecord,
    VirtualBlock,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{DatabaseConfig, MemoryConfig};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Query or connection failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Event payload could not be encoded.
    #[error("failed to encode events: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which backend is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Durable SQLite database.
    Sqlite,
    /// Process-local ring buffers.
    Memory,
}

impl StoreKind {
    /// Short name for logs and `status` output.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Sqlite => "sqlite",
            StoreKind::Memory => "memory",
        }
    }
}

/// Result of a signature lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureMatch {
    /// A record stored under exactly this signature.
    Exact(TransactionRecord),
    /// Records derived from this source signature, oldest first.
    Derived(Vec<TransactionRecord>),
}

/// Row counts reported by `dopel-indexer status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of stored blocks
    pub block_count: u64,

    /// Highest stored block number
    pub max_block_number: Option<u64>,

    /// Number of stored transaction records
    pub transaction_count: u64,

    /// Number of stored reward records
    pub reward_count: u64,
}

/// Read/write interface shared by both backends.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Backend in use.
    fn kind(&self) -> StoreKind;

    /// Persist one block.
    async fn insert_block(&self, block: &VirtualBlock) -> StoreResult<()>;

    /// Persist transaction records as one group. Signatures already stored are skipped.
    async fn insert_transactions(&self, records: &[TransactionRecord]) -> StoreResult<()>;

    /// Persist reward records as one group.
    async fn insert_rewards(&self, records: &[ValidatorRewardRecord]) -> StoreResult<()>;

    /// Newest blocks first.
    async fn recent_blocks(&self, limit: usize) -> StoreResult<Vec<StoredBlock>>;

    /// A single block by number.
    async fn block(&self, number: u64) -> StoreResult<Option<StoredBlock>>;

    /// Newest transaction records first.
    async fn recent_transactions(&self, limit: usize) -> StoreResult<Vec<TransactionRecord>>;

    /// Totals over every stored reward.
    async fn reward_aggregates(&self) -> StoreResult<RewardAggregates>;

    /// Whether any transaction signature starts with `prefix` (case-sensitive).
    async fn has_signature_prefix(&self, prefix: &str) -> StoreResult<bool>;

    /// Highest stored block number.
    async fn max_block_number(&self) -> StoreResult<Option<u64>>;

    /// The record stored under exactly `signature`.
    async fn transaction(&self, signature: &str) -> StoreResult<Option<TransactionRecord>>;

    /// Records whose signature starts with `prefix`, oldest first.
    async fn transactions_with_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> StoreResult<Vec<TransactionRecord>>;

    /// Records sent or received by `address`, newest first.
    async fn transactions_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> StoreResult<Vec<TransactionRecord>>;

    /// Newest reward records first.
    async fn recent_rewards(&self, limit: usize) -> StoreResult<Vec<ValidatorRewardRecord>>;

    /// Validators ranked by summed rewards.
    async fn reward_leaderboard(&self, limit: usize) -> StoreResult<Vec<LeaderboardEntry>>;

    /// Cheap reachability probe.
    async fn ping(&self) -> StoreResult<()>;

    /// Row counts.
    async fn stats(&self) -> StoreResult<StoreStats>;

    /// Exact lookup, falling back to the records derived from `signature`.
    async fn transactions_by_signature(
        &self,
        signature: &str,
    ) -> StoreResult<Option<SignatureMatch>> {
        if let Some(record) = self.transaction(signature).await? {
            return Ok(Some(SignatureMatch::Exact(record)));
        }

        let derived = self
            .transactions_with_prefix(
                &dopel_core::signature_prefix(signature),
                dopel_core::SIGNATURE_LOOKUP_LIMIT,
            )
            .await?;
        if derived.is_empty() {
            Ok(None)
        } else {
            Ok(Some(SignatureMatch::Derived(derived)))
        }
    }
}

/// Open the configured backend, falling back to memory mode.
///
/// No URL, a failed connection or a failed migration all select the memory
/// store. The decision is final for the life of the process.
pub async fn open_store(database: &DatabaseConfig, memory: &MemoryConfig) -> Arc<dyn Store> {
    let Some(url) = database.url.as_deref() else {
        info!("No database configured, running in memory mode");
        return Arc::new(MemoryStore::new(memory));
    };

    let store = match SqliteStore::connect(url, database).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Database unavailable, running in memory mode");
            return Arc::new(MemoryStore::new(memory));
        }
    };

    if let Err(e) = store.run_migrations().await {
        warn!(error = %e, "Database migrations failed, running in memory mode");
        store.close().await;
        return Arc::new(MemoryStore::new(memory));
    }

    Arc::new(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_store_without_url_is_memory() {
        let store = open_store(&DatabaseConfig::default(), &MemoryConfig::default()).await;
        assert_eq!(store.kind(), StoreKind::Memory);
    }

    #[tokio::test]
    async fn test_open_store_unreachable_falls_back() {
        let config = DatabaseConfig {
            url: Some("sqlite:///nonexistent-dir/deeper/dopel.db".to_string()),
            connect_timeout_secs: 1,
            ..Default::default()
        };
        let store = open_store(&config, &MemoryConfig::default()).await;
        assert_eq!(store.kind(), StoreKind::Memory);
    }

    #[tokio::test]
    async fn test_open_store_sqlite() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig {
            url: Some(format!("sqlite://{}", dir.path().join("dopel.db").display())),
            ..Default::default()
        };
        let store = open_store(&config, &MemoryConfig::default()).await;
        assert_eq!(store.kind(), StoreKind::Sqlite);
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_signature_lookup_exact_then_derived() {
        let store = MemoryStore::new(&MemoryConfig::default());
        let record = |signature: &str| TransactionRecord {
            signature: signature.to_string(),
            kind: "Transfer".to_string(),
            amount: 1,
            from: None,
            to: None,
            timestamp: 0,
        };
        store
            .insert_transactions(&[record("SIG1-0"), record("SIG1-1"), record("SIG2-0")])
            .await
            .unwrap();

        match store.transactions_by_signature("SIG1-1").await.unwrap() {
            Some(SignatureMatch::Exact(found)) => assert_eq!(found.signature, "SIG1-1"),
            other => panic!("expected exact match, got {:?}", other),
        }

        match store.transactions_by_signature("SIG1").await.unwrap() {
            Some(SignatureMatch::Derived(found)) => {
                let signatures: Vec<_> = found.iter().map(|r| r.signature.as_str()).collect();
                assert_eq!(signatures, vec!["SIG1-0", "SIG1-1"]);
            }
            other => panic!("expected derived match, got {:?}", other),
        }

        assert!(store.transactions_by_signature("SIG3").await.unwrap().is_none());
    }
}
