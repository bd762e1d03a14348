//! Virtual block numbering.

use dopel_core::BlockNumber;
use tracing::{info, warn};

use crate::storage::Store;

/// Allocates gapless block numbers. Owned by a single task.
#[derive(Debug, Clone)]
pub struct Sequencer {
    next: BlockNumber,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sequencer {
    /// Start at the genesis number.
    pub fn new() -> Self {
        Self {
            next: BlockNumber::GENESIS,
        }
    }

    /// Continue after the highest persisted number, if any.
    pub fn seeded(max_persisted: Option<u64>) -> Self {
        match max_persisted.and_then(|max| BlockNumber::new(max).ok()) {
            Some(max) => Self { next: max.next() },
            None => Self::new(),
        }
    }

    /// Seed from the store; an unreadable store starts at genesis.
    pub async fn from_store(store: &dyn Store) -> Self {
        match store.max_block_number().await {
            Ok(max) => {
                let sequencer = Self::seeded(max);
                info!(next_block = %sequencer.peek(), "Block sequencer seeded");
                sequencer
            }
            Err(e) => {
                warn!(error = %e, "Failed to read max block number, starting at genesis");
                Self::new()
            }
        }
    }

    /// Number the next allocation will return.
    pub fn peek(&self) -> BlockNumber {
        self.next
    }

    /// Allocate the next number.
    pub fn next_block(&mut self) -> BlockNumber {
        let allocated = self.next;
        self.next = allocated.next();
        allocated
    }
}
