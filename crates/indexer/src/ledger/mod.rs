//! Ledger assembly: numbering, duplicate detection and block construction.

pub mod assembler;
pub mod cache;
pub mod dedup;
pub mod sequencer;

pub use assembler::{build_block, persist, AssembleOutcome, AssembledBlock, LedgerAssembler};
pub use cache::{merge_blocks, RecentBlocks};
pub use dedup::{DedupGuard, DedupVerdict};
pub use sequencer::Sequencer;
