//! Recently assembled blocks, kept independent of the store.

use dopel_core::StoredBlock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bounded cache of the newest assembled blocks.
#[derive(Debug, Clone)]
pub struct RecentBlocks {
    capacity: usize,
    blocks: Arc<RwLock<VecDeque<StoredBlock>>>,
}

impl RecentBlocks {
    /// Create an empty cache.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            blocks: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Append a block, evicting the oldest when full.
    pub async fn push(&self, block: StoredBlock) {
        let mut blocks = self.blocks.write().await;
        if blocks.len() >= self.capacity {
            blocks.pop_front();
        }
        blocks.push_back(block);
    }

    /// Newest blocks first.
    pub async fn recent(&self, limit: usize) -> Vec<StoredBlock> {
        let blocks = self.blocks.read().await;
        blocks.iter().rev().take(limit).cloned().collect()
    }

    /// A cached block by number.
    pub async fn get(&self, number: u64) -> Option<StoredBlock> {
        let blocks = self.blocks.read().await;
        blocks
            .iter()
            .rev()
            .find(|block| block.block_number == number)
            .cloned()
    }

    /// Highest cached block number.
    pub async fn max_block_number(&self) -> Option<u64> {
        self.blocks.read().await.back().map(|block| block.block_number)
    }
}

/// Union of cached and stored blocks, deduplicated by number, newest first.
pub fn merge_blocks(
    cached: Vec<StoredBlock>,
    stored: Vec<StoredBlock>,
    limit: usize,
) -> Vec<StoredBlock> {
    let mut merged: Vec<StoredBlock> = stored;
    for block in cached {
        if !merged
            .iter()
            .any(|existing| existing.block_number == block.block_number)
        {
            merged.push(block);
        }
    }
    merged.sort_by(|a, b| b.block_number.cmp(&a.block_number));
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64) -> StoredBlock {
        StoredBlock {
            block_number: number,
            timestamp: number as i64,
            events: Vec::new(),
        }
    }

    fn numbers(blocks: &[StoredBlock]) -> Vec<u64> {
        blocks.iter().map(|b| b.block_number).collect()
    }

    #[tokio::test]
    async fn test_bounded_newest_first() {
        let cache = RecentBlocks::new(3);
        for n in 1..=5 {
            cache.push(block(n)).await;
        }

        assert_eq!(numbers(&cache.recent(10).await), vec![5, 4, 3]);
        assert_eq!(numbers(&cache.recent(1).await), vec![5]);
        assert!(cache.get(2).await.is_none());
        assert_eq!(cache.get(4).await.map(|b| b.block_number), Some(4));
        assert_eq!(cache.max_block_number().await, Some(5));
    }

    #[test]
    fn test_merge_prefers_store_and_orders() {
        let mut stored_two = block(2);
        stored_two.timestamp = 200;

        let merged = merge_blocks(
            vec![block(4), block(3), block(2)],
            vec![stored_two, block(1)],
            3,
        );
        assert_eq!(numbers(&merged), vec![4, 3, 2]);
        assert_eq!(merged[2].timestamp, 200);
    }
}
