//! Ledger assembler: notifications in, numbered blocks and records out.

use dopel_core::{
    now_millis, BlockNumber, Event, StoredBlock, TransactionRecord, ValidatorRewardRecord,
    VirtualBlock, FALLBACK_VALIDATOR,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::cache::RecentBlocks;
use super::dedup::{DedupGuard, DedupVerdict};
use super::sequencer::Sequencer;
use crate::health::{HealthMonitor, WriteGroup};
use crate::listener::LogNotification;
use crate::storage::Store;

/// A numbered block with the records derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledBlock {
    /// Signature of the source transaction.
    pub source_signature: String,
    /// The block.
    pub block: VirtualBlock,
    /// One record per event.
    pub transactions: Vec<TransactionRecord>,
    /// One record per reward event.
    pub rewards: Vec<ValidatorRewardRecord>,
}

/// What became of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleOutcome {
    /// No program log lines; nothing allocated.
    Empty,
    /// Already indexed; nothing allocated.
    Duplicate,
    /// A new block was allocated.
    Assembled(AssembledBlock),
}

/// Build a block and its records. Pure; numbering is the caller's job.
pub fn build_block(
    block_number: BlockNumber,
    timestamp: i64,
    source_signature: &str,
    events: Vec<Event>,
) -> AssembledBlock {
    let transactions = events
        .iter()
        .enumerate()
        .map(|(index, event)| TransactionRecord::from_event(source_signature, index, event, timestamp))
        .collect();

    let rewards = events
        .iter()
        .filter_map(|event| match event {
            Event::ValidatorReward {
                block,
                validator,
                amount,
                timestamp: reported_at,
            } => Some(ValidatorRewardRecord {
                block: block.unwrap_or(block_number.value()),
                validator: validator
                    .clone()
                    .unwrap_or_else(|| FALLBACK_VALIDATOR.to_string()),
                amount: *amount,
                timestamp: reported_at.unwrap_or(timestamp),
            }),
            _ => None,
        })
        .collect();

    AssembledBlock {
        source_signature: source_signature.to_string(),
        block: VirtualBlock {
            block_number,
            timestamp,
            events,
        },
        transactions,
        rewards,
    }
}

/// Turns notifications into numbered blocks. Owns the sequencer, so it must
/// be driven by one task.
#[derive(Debug)]
pub struct LedgerAssembler {
    sequencer: Sequencer,
    dedup: DedupGuard,
    store: Arc<dyn Store>,
    cache: RecentBlocks,
    health: Arc<HealthMonitor>,
}

impl LedgerAssembler {
    /// Create an assembler.
    pub fn new(
        sequencer: Sequencer,
        store: Arc<dyn Store>,
        cache: RecentBlocks,
        health: Arc<HealthMonitor>,
        dedup_timeout: Duration,
    ) -> Self {
        Self {
            sequencer,
            dedup: DedupGuard::new(store.clone(), dedup_timeout),
            store,
            cache,
            health,
        }
    }

    /// Store the assembler writes to.
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Health monitor the assembler reports to.
    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    /// Decode, dedup and number one notification.
    ///
    /// The assembled block is already visible in the recent cache when this
    /// returns; persisting it is left to [`persist`].
    pub async fn assemble(&mut self, notification: &LogNotification) -> AssembleOutcome {
        let events = notification.events();
        if events.is_empty() {
            debug!(signature = %notification.signature, "No program logs in notification");
            return AssembleOutcome::Empty;
        }

        match self.dedup.check(&notification.signature).await {
            DedupVerdict::Fresh => {}
            DedupVerdict::Duplicate => {
                info!(signature = %notification.signature, "Skipping already indexed notification");
                self.health.record_duplicate().await;
                return AssembleOutcome::Duplicate;
            }
            DedupVerdict::Unchecked(reason) => {
                warn!(signature = %notification.signature, "{}, indexing anyway", reason);
                self.health.record_dedup_failure(reason).await;
            }
        }

        let block_number = self.sequencer.next_block();
        let assembled = build_block(block_number, now_millis(), &notification.signature, events);

        self.cache.push(StoredBlock::from(&assembled.block)).await;
        self.health
            .record_block(block_number.value(), &notification.signature)
            .await;

        info!(
            block_number = %block_number,
            signature = %notification.signature,
            events = assembled.block.events.len(),
            rewards = assembled.rewards.len(),
            "Assembled virtual block"
        );

        AssembleOutcome::Assembled(assembled)
    }
}

/// Write one assembled block. Each group is attempted independently and
/// failures are counted, never retried.
pub async fn persist(store: Arc<dyn Store>, health: Arc<HealthMonitor>, assembled: AssembledBlock) {
    let block_number = assembled.block.block_number;

    let (block, transactions, rewards) = tokio::join!(
        store.insert_block(&assembled.block),
        store.insert_transactions(&assembled.transactions),
        store.insert_rewards(&assembled.rewards),
    );

    match block {
        Ok(()) => health.record_insert().await,
        Err(e) => report_failure(&health, WriteGroup::Block, block_number, e.to_string()).await,
    }
    if let Err(e) = transactions {
        report_failure(&health, WriteGroup::Transactions, block_number, e.to_string()).await;
    }
    if let Err(e) = rewards {
        report_failure(&health, WriteGroup::Rewards, block_number, e.to_string()).await;
    }
}

async fn report_failure(
    health: &HealthMonitor,
    group: WriteGroup,
    block_number: BlockNumber,
    error: String,
) {
    warn!(
        block_number = %block_number,
        group = group.as_str(),
        error = %error,
        "Failed to persist write group"
    );
    health
        .record_write_failure(group, format!("{} write for block {}: {}", group.as_str(), block_number, error))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::storage::{MemoryStore, SqliteStore};
    use tempfile::TempDir;

    fn notification(signature: &str, lines: &[&str]) -> LogNotification {
        LogNotification {
            signature: signature.to_string(),
            slot: None,
            err: None,
            logs: lines.iter().map(|line| line.to_string()).collect(),
        }
    }

    fn assembler(store: Arc<dyn Store>) -> (LedgerAssembler, RecentBlocks, Arc<HealthMonitor>) {
        let cache = RecentBlocks::new(100);
        let health = Arc::new(HealthMonitor::new(store.kind() == crate::storage::StoreKind::Sqlite));
        let assembler = LedgerAssembler::new(
            Sequencer::new(),
            store,
            cache.clone(),
            health.clone(),
            Duration::from_secs(1),
        );
        (assembler, cache, health)
    }

    async fn assemble_and_persist(assembler: &mut LedgerAssembler, n: &LogNotification) -> AssembleOutcome {
        let outcome = assembler.assemble(n).await;
        if let AssembleOutcome::Assembled(assembled) = &outcome {
            persist(assembler.store(), assembler.health(), assembled.clone()).await;
        }
        outcome
    }

    #[test]
    fn test_build_block_records() {
        let events = vec![
            Event::decode(r#"{"type":"Transfer","from":"A","to":"B","amount":50}"#),
            Event::decode(r#"{"type":"ValidatorReward","validator":"V1","amount":25}"#),
            Event::decode("garbage"),
        ];
        let number = BlockNumber::new(3).unwrap();
        let assembled = build_block(number, 1_000, "SIG1", events);

        let signatures: Vec<_> = assembled
            .transactions
            .iter()
            .map(|r| r.signature.as_str())
            .collect();
        assert_eq!(signatures, vec!["SIG1-0", "SIG1-1", "SIG1-2"]);
        assert_eq!(assembled.transactions[1].kind, "ValidatorReward");
        assert_eq!(assembled.transactions[1].from, None);
        assert_eq!(assembled.transactions[2].amount, 0);

        assert_eq!(
            assembled.rewards,
            vec![ValidatorRewardRecord {
                block: 3,
                validator: "V1".to_string(),
                amount: 25,
                timestamp: 1_000,
            }]
        );
    }

    #[test]
    fn test_reward_fallback_validator() {
        let events = vec![Event::decode(
            r#"{"type":"ValidatorReward","block":7,"amount":5,"timestamp":42}"#,
        )];
        let assembled = build_block(BlockNumber::GENESIS, 1_000, "SIG1", events);
        assert_eq!(assembled.rewards[0].validator, "unknown");
        assert_eq!(assembled.rewards[0].block, 7);
        assert_eq!(assembled.rewards[0].timestamp, 42);
    }

    #[test]
    fn test_unrecognised_events_keep_amounts() {
        let n = notification(
            "SIG1",
            &[
                r#"Program log: {"type":"ReferralReward","from":"A","to":"B","amount":500}"#,
                r#"Program log: {"from":"A","to":"B","amount":7}"#,
            ],
        );
        let assembled = build_block(BlockNumber::GENESIS, 1_000, "SIG1", n.events());

        let referral = &assembled.transactions[0];
        assert_eq!(referral.signature, "SIG1-0");
        assert_eq!(referral.kind, "ReferralReward");
        assert_eq!(referral.amount, 500);
        assert_eq!(referral.from.as_deref(), Some("A"));
        assert_eq!(referral.to.as_deref(), Some("B"));

        let untagged = &assembled.transactions[1];
        assert_eq!(untagged.kind, "Unknown");
        assert_eq!(untagged.amount, 7);
        assert!(assembled.rewards.is_empty());

        let served = StoredBlock::from(&assembled.block);
        assert_eq!(served.events[0].kind, "ReferralReward");
        assert_eq!(served.events[0].amount, 500);
        assert_eq!(served.events[0].from.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_mint_notification() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&MemoryConfig::default()));
        let (mut assembler, cache, _health) = assembler(store.clone());

        let n = notification("SIG1", &[r#"Program log: {"type":"Mint","to":"C","amount":100}"#]);
        let outcome = assemble_and_persist(&mut assembler, &n).await;
        assert!(matches!(outcome, AssembleOutcome::Assembled(_)));

        let record = store.transaction("SIG1-0").await.unwrap().unwrap();
        assert_eq!(record.kind, "Mint");
        assert_eq!(record.to.as_deref(), Some("C"));
        assert_eq!(record.amount, 100);
        assert_eq!(record.from, None);
        assert_eq!(store.stats().await.unwrap().transaction_count, 1);

        assert_eq!(cache.max_block_number().await, Some(1));
        assert_eq!(store.block(1).await.unwrap().unwrap().events[0].kind, "Mint");
    }

    #[tokio::test]
    async fn test_redelivery_is_skipped() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&MemoryConfig::default()));
        let (mut assembler, _cache, health) = assembler(store.clone());

        let n = notification("SIG1", &[r#"Program log: {"type":"Mint","to":"C","amount":100}"#]);
        assemble_and_persist(&mut assembler, &n).await;
        let outcome = assemble_and_persist(&mut assembler, &n).await;

        assert_eq!(outcome, AssembleOutcome::Duplicate);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.block_count, 1);
        assert_eq!(stats.transaction_count, 1);
        assert_eq!(health.snapshot().await.duplicates_skipped, 1);

        // The duplicate consumed no block number.
        let next = notification("SIG2", &["Program log: garbage"]);
        match assemble_and_persist(&mut assembler, &next).await {
            AssembleOutcome::Assembled(assembled) => {
                assert_eq!(assembled.block.block_number.value(), 2)
            }
            other => panic!("expected a block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_notification_allocates_nothing() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&MemoryConfig::default()));
        let (mut assembler, cache, _health) = assembler(store);

        let n = notification("SIG1", &["Program 11111111111111111111111111111111 invoke [1]"]);
        assert_eq!(assembler.assemble(&n).await, AssembleOutcome::Empty);
        assert_eq!(cache.max_block_number().await, None);
    }

    #[tokio::test]
    async fn test_arrival_order_numbering() {
        let dir = TempDir::new().unwrap();
        let sqlite = SqliteStore::new_with_path(dir.path().join("dopel.db"))
            .await
            .unwrap();
        sqlite.run_migrations().await.unwrap();
        let store: Arc<dyn Store> = Arc::new(sqlite);
        let (mut assembler, _cache, _health) = assembler(store.clone());

        for (i, signature) in ["A", "B", "C", "D"].iter().enumerate() {
            let n = notification(signature, &["Program log: garbage"]);
            match assemble_and_persist(&mut assembler, &n).await {
                AssembleOutcome::Assembled(assembled) => {
                    assert_eq!(assembled.block.block_number.value(), i as u64 + 1)
                }
                other => panic!("expected a block, got {:?}", other),
            }
        }

        let numbers: Vec<u64> = store
            .recent_blocks(10)
            .await
            .unwrap()
            .iter()
            .map(|b| b.block_number)
            .collect();
        assert_eq!(numbers, vec![4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_failed_writes_are_counted_per_group() {
        let dir = TempDir::new().unwrap();
        // No migrations: every write group fails.
        let sqlite = SqliteStore::new_with_path(dir.path().join("dopel.db"))
            .await
            .unwrap();
        let store: Arc<dyn Store> = Arc::new(sqlite);
        let (mut assembler, cache, health) = assembler(store);

        let n = notification(
            "SIG1",
            &[r#"Program log: {"type":"ValidatorReward","validator":"V1","amount":1}"#],
        );
        assemble_and_persist(&mut assembler, &n).await;

        let snapshot = health.snapshot().await;
        assert_eq!(snapshot.dedup_check_failures, 1);
        assert_eq!(snapshot.block_write_failures, 1);
        assert_eq!(snapshot.transaction_write_failures, 1);
        assert_eq!(snapshot.reward_write_failures, 1);
        assert_eq!(snapshot.last_insert_ts, None);

        // Still served from the cache.
        assert_eq!(cache.get(1).await.map(|b| b.block_number), Some(1));
    }
}
