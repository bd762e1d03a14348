//! In-memory store of bounded ring buffers.
//!
//! Used when no database is configured or reachable. Reward totals are kept
//! as running sums so `/stats` stays exact after old rows are evicted.

use async_trait::async_trait;
use dopel_core::{
    LeaderboardEntry, RewardAggregates, StoredBlock, TransactionRecord, ValidatorRewardRecord,
    VirtualBlock,
};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use super::{Store, StoreKind, StoreResult, StoreStats};
use crate::config::MemoryConfig;

#[derive(Debug, Default)]
struct Buffers {
    blocks: VecDeque<StoredBlock>,
    transactions: VecDeque<TransactionRecord>,
    rewards: VecDeque<ValidatorRewardRecord>,
    reward_totals: HashMap<String, u64>,
    aggregates: RewardAggregates,
}

/// Process-local store; contents are lost on restart.
#[derive(Debug)]
pub struct MemoryStore {
    max_blocks: usize,
    max_transactions: usize,
    max_rewards: usize,
    buffers: RwLock<Buffers>,
}

impl MemoryStore {
    /// Create an empty store with the configured capacities.
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            max_blocks: config.max_blocks.max(1),
            max_transactions: config.max_transactions.max(1),
            max_rewards: config.max_rewards.max(1),
            buffers: RwLock::new(Buffers::default()),
        }
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, capacity: usize) {
    if buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

#[async_trait]
impl Store for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }

    async fn insert_block(&self, block: &VirtualBlock) -> StoreResult<()> {
        let mut buffers = self.buffers.write().await;
        push_bounded(&mut buffers.blocks, StoredBlock::from(block), self.max_blocks);
        Ok(())
    }

    async fn insert_transactions(&self, records: &[TransactionRecord]) -> StoreResult<()> {
        let mut buffers = self.buffers.write().await;
        for record in records {
            if buffers
                .transactions
                .iter()
                .any(|existing| existing.signature == record.signature)
            {
                continue;
            }
            push_bounded(
                &mut buffers.transactions,
                record.clone(),
                self.max_transactions,
            );
        }
        Ok(())
    }

    async fn insert_rewards(&self, records: &[ValidatorRewardRecord]) -> StoreResult<()> {
        let mut guard = self.buffers.write().await;
        let buffers = &mut *guard;
        for record in records {
            let total = buffers
                .reward_totals
                .entry(record.validator.clone())
                .or_insert(0);
            *total = total.saturating_add(record.amount);
            buffers.aggregates.total = buffers.aggregates.total.saturating_add(record.amount);
            buffers.aggregates.count += 1;
            buffers.aggregates.last_amount = Some(record.amount);
            push_bounded(&mut buffers.rewards, record.clone(), self.max_rewards);
        }
        Ok(())
    }

    async fn recent_blocks(&self, limit: usize) -> StoreResult<Vec<StoredBlock>> {
        let buffers = self.buffers.read().await;
        let mut blocks: Vec<StoredBlock> = buffers.blocks.iter().cloned().collect();
        // Writes may land out of order.
        blocks.sort_by(|a, b| b.block_number.cmp(&a.block_number));
        blocks.truncate(limit);
        Ok(blocks)
    }

    async fn block(&self, number: u64) -> StoreResult<Option<StoredBlock>> {
        let buffers = self.buffers.read().await;
        Ok(buffers
            .blocks
            .iter()
            .find(|block| block.block_number == number)
            .cloned())
    }

    async fn recent_transactions(&self, limit: usize) -> StoreResult<Vec<TransactionRecord>> {
        let buffers = self.buffers.read().await;
        Ok(buffers.transactions.iter().rev().take(limit).cloned().collect())
    }

    async fn reward_aggregates(&self) -> StoreResult<RewardAggregates> {
        Ok(self.buffers.read().await.aggregates)
    }

    async fn has_signature_prefix(&self, prefix: &str) -> StoreResult<bool> {
        let buffers = self.buffers.read().await;
        Ok(buffers
            .transactions
            .iter()
            .any(|record| record.signature.starts_with(prefix)))
    }

    async fn max_block_number(&self) -> StoreResult<Option<u64>> {
        let buffers = self.buffers.read().await;
        Ok(buffers.blocks.iter().map(|block| block.block_number).max())
    }

    async fn transaction(&self, signature: &str) -> StoreResult<Option<TransactionRecord>> {
        let buffers = self.buffers.read().await;
        Ok(buffers
            .transactions
            .iter()
            .find(|record| record.signature == signature)
            .cloned())
    }

    async fn transactions_with_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> StoreResult<Vec<TransactionRecord>> {
        let buffers = self.buffers.read().await;
        Ok(buffers
            .transactions
            .iter()
            .filter(|record| record.signature.starts_with(prefix))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn transactions_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> StoreResult<Vec<TransactionRecord>> {
        let buffers = self.buffers.read().await;
        Ok(buffers
            .transactions
            .iter()
            .rev()
            .filter(|record| record.involves(address))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_rewards(&self, limit: usize) -> StoreResult<Vec<ValidatorRewardRecord>> {
        let buffers = self.buffers.read().await;
        Ok(buffers.rewards.iter().rev().take(limit).cloned().collect())
    }

    async fn reward_leaderboard(&self, limit: usize) -> StoreResult<Vec<LeaderboardEntry>> {
        let buffers = self.buffers.read().await;
        let mut entries: Vec<LeaderboardEntry> = buffers
            .reward_totals
            .iter()
            .map(|(validator, total)| LeaderboardEntry {
                validator: validator.clone(),
                total_rewards: *total,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.total_rewards
                .cmp(&a.total_rewards)
                .then_with(|| a.validator.cmp(&b.validator))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let buffers = self.buffers.read().await;
        Ok(StoreStats {
            block_count: buffers.blocks.len() as u64,
            max_block_number: buffers.blocks.iter().map(|block| block.block_number).max(),
            transaction_count: buffers.transactions.len() as u64,
            reward_count: buffers.rewards.len() as u64,
        })
    }
}
