//! Same-session duplicate detection by derived signature prefix.

use dopel_core::signature_prefix;
use std::sync::Arc;
use std::time::Duration;

use crate::storage::Store;

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupVerdict {
    /// No record derived from this signature exists.
    Fresh,
    /// Records derived from this signature already exist.
    Duplicate,
    /// The check failed or timed out; ingestion proceeds.
    Unchecked(String),
}

/// Looks up `<signature>-*` records before a block number is allocated.
#[derive(Debug, Clone)]
pub struct DedupGuard {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl DedupGuard {
    /// Create a guard with an upper bound on each lookup.
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Check whether `source_signature` was already materialized.
    pub async fn check(&self, source_signature: &str) -> DedupVerdict {
        let prefix = signature_prefix(source_signature);
        match tokio::time::timeout(self.timeout, self.store.has_signature_prefix(&prefix)).await {
            Ok(Ok(true)) => DedupVerdict::Duplicate,
            Ok(Ok(false)) => DedupVerdict::Fresh,
            Ok(Err(e)) => DedupVerdict::Unchecked(format!("duplicate check failed: {}", e)),
            Err(_) => DedupVerdict::Unchecked(format!(
                "duplicate check timed out after {}ms",
                self.timeout.as_millis()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::health::HealthMonitor;
    use crate::ledger::{AssembleOutcome, LedgerAssembler, RecentBlocks, Sequencer};
    use crate::listener::LogNotification;
    use crate::storage::{MemoryStore, SqliteStore, StoreKind, StoreResult, StoreStats};
    use async_trait::async_trait;
    use dopel_core::{
        LeaderboardEntry, RewardAggregates, StoredBlock, TransactionRecord,
        ValidatorRewardRecord, VirtualBlock,
    };

    /// Memory store whose prefix lookup stalls for `delay`.
    #[derive(Debug)]
    struct StalledLookupStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl StalledLookupStore {
        fn new(delay: Duration) -> Self {
            Self {
                inner: MemoryStore::new(&MemoryConfig::default()),
                delay,
            }
        }
    }

    #[async_trait]
    impl Store for StalledLookupStore {
        fn kind(&self) -> StoreKind {
            self.inner.kind()
        }

        async fn insert_block(&self, block: &VirtualBlock) -> StoreResult<()> {
            self.inner.insert_block(block).await
        }

        async fn insert_transactions(&self, records: &[TransactionRecord]) -> StoreResult<()> {
            self.inner.insert_transactions(records).await
        }

        async fn insert_rewards(&self, records: &[ValidatorRewardRecord]) -> StoreResult<()> {
            self.inner.insert_rewards(records).await
        }

        async fn recent_blocks(&self, limit: usize) -> StoreResult<Vec<StoredBlock>> {
            self.inner.recent_blocks(limit).await
        }

        async fn block(&self, number: u64) -> StoreResult<Option<StoredBlock>> {
            self.inner.block(number).await
        }

        async fn recent_transactions(&self, limit: usize) -> StoreResult<Vec<TransactionRecord>> {
            self.inner.recent_transactions(limit).await
        }

        async fn reward_aggregates(&self) -> StoreResult<RewardAggregates> {
            self.inner.reward_aggregates().await
        }

        async fn has_signature_prefix(&self, prefix: &str) -> StoreResult<bool> {
            tokio::time::sleep(self.delay).await;
            self.inner.has_signature_prefix(prefix).await
        }

        async fn max_block_number(&self) -> StoreResult<Option<u64>> {
            self.inner.max_block_number().await
        }

        async fn transaction(&self, signature: &str) -> StoreResult<Option<TransactionRecord>> {
            self.inner.transaction(signature).await
        }

        async fn transactions_with_prefix(
            &self,
            prefix: &str,
            limit: usize,
        ) -> StoreResult<Vec<TransactionRecord>> {
            self.inner.transactions_with_prefix(prefix, limit).await
        }

        async fn transactions_for_address(
            &self,
            address: &str,
            limit: usize,
        ) -> StoreResult<Vec<TransactionRecord>> {
            self.inner.transactions_for_address(address, limit).await
        }

        async fn recent_rewards(&self, limit: usize) -> StoreResult<Vec<ValidatorRewardRecord>> {
            self.inner.recent_rewards(limit).await
        }

        async fn reward_leaderboard(&self, limit: usize) -> StoreResult<Vec<LeaderboardEntry>> {
            self.inner.reward_leaderboard(limit).await
        }

        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }

        async fn stats(&self) -> StoreResult<StoreStats> {
            self.inner.stats().await
        }
    }

    fn record(signature: &str) -> TransactionRecord {
        TransactionRecord {
            signature: signature.to_string(),
            kind: "Mint".to_string(),
            amount: 100,
            from: None,
            to: Some("C".to_string()),
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_fresh_and_duplicate() {
        let store = Arc::new(MemoryStore::new(&MemoryConfig::default()));
        let guard = DedupGuard::new(store.clone(), Duration::from_secs(1));

        assert_eq!(guard.check("SIG1").await, DedupVerdict::Fresh);

        store.insert_transactions(&[record("SIG1-0")]).await.unwrap();
        assert_eq!(guard.check("SIG1").await, DedupVerdict::Duplicate);

        // Prefix includes the separator, so SIG10 is unrelated.
        store.insert_transactions(&[record("SIG10-0")]).await.unwrap();
        assert_eq!(guard.check("SIG").await, DedupVerdict::Fresh);
    }

    #[tokio::test]
    async fn test_failed_check_is_unchecked() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = SqliteStore::new_with_path(dir.path().join("dopel.db"))
            .await
            .unwrap();
        // Without migrations the table does not exist.
        let guard = DedupGuard::new(Arc::new(store), Duration::from_secs(1));

        assert!(matches!(
            guard.check("SIG1").await,
            DedupVerdict::Unchecked(_)
        ));
    }

    #[tokio::test]
    async fn test_slow_check_times_out_as_unchecked() {
        let store = Arc::new(StalledLookupStore::new(Duration::from_millis(500)));
        let guard = DedupGuard::new(store, Duration::from_millis(20));

        match guard.check("SIG1").await {
            DedupVerdict::Unchecked(reason) => assert!(reason.contains("timed out")),
            other => panic!("expected unchecked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timed_out_check_still_allocates_block() {
        let store: Arc<dyn Store> = Arc::new(StalledLookupStore::new(Duration::from_millis(500)));
        let health = Arc::new(HealthMonitor::new(false));
        let mut assembler = LedgerAssembler::new(
            Sequencer::new(),
            store,
            RecentBlocks::new(10),
            health.clone(),
            Duration::from_millis(20),
        );

        let notification = LogNotification {
            signature: "SIG1".to_string(),
            slot: None,
            err: None,
            logs: vec![r#"Program log: {"type":"Mint","to":"C","amount":100}"#.to_string()],
        };

        match assembler.assemble(&notification).await {
            AssembleOutcome::Assembled(assembled) => {
                assert_eq!(assembled.block.block_number.value(), 1);
            }
            other => panic!("expected a block, got {:?}", other),
        }

        let snapshot = health.snapshot().await;
        assert_eq!(snapshot.dedup_check_failures, 1);
        assert_eq!(snapshot.last_block_number, Some(1));
    }
}
