//! Core ledger types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{DERIVED_SIGNATURE_SEPARATOR, GENESIS_BLOCK_NUMBER, PROGRAM_ID_LEN};
use crate::error::{self, CoreError};
use crate::event::Event;

/// Process-local virtual block number (starts at 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockNumber(u64);

impl BlockNumber {
    /// The first block number of an empty ledger.
    pub const GENESIS: BlockNumber = BlockNumber(GENESIS_BLOCK_NUMBER);

    /// Create a block number, rejecting 0.
    pub fn new(value: u64) -> error::Result<Self> {
        if value < GENESIS_BLOCK_NUMBER {
            return Err(CoreError::InvalidBlockNumber(value));
        }
        Ok(BlockNumber(value))
    }

    /// Get the raw value.
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// The number following this one.
    pub const fn next(&self) -> Self {
        BlockNumber(self.0 + 1)
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base58 program id of the indexed on-chain program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProgramId(String);

impl ProgramId {
    /// Borrow the base58 text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProgramId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bytes = bs58::decode(trimmed)
            .into_vec()
            .map_err(|e| CoreError::InvalidProgramId(format!("{}: {}", trimmed, e)))?;
        if bytes.len() != PROGRAM_ID_LEN {
            return Err(CoreError::InvalidProgramIdLength(bytes.len()));
        }
        Ok(ProgramId(trimmed.to_string()))
    }
}

impl<'de> Deserialize<'de> for ProgramId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A synthetic block grouping the events of one log notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualBlock {
    /// Sequencer-assigned number.
    pub block_number: BlockNumber,
    /// Assembly time (milliseconds since epoch).
    pub timestamp: i64,
    /// Events in log-line order; never empty.
    pub events: Vec<Event>,
}

/// One persisted record per decoded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Derived signature `<source>-<index>`.
    pub signature: String,
    /// Event type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Amount (0 when the event carries none).
    pub amount: u64,
    /// Sender account.
    pub from: Option<String>,
    /// Recipient account.
    pub to: Option<String>,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

impl TransactionRecord {
    /// Derive the record for event `index` of a notification.
    pub fn from_event(source_signature: &str, index: usize, event: &Event, timestamp: i64) -> Self {
        Self {
            signature: derived_signature(source_signature, index),
            kind: event.type_tag().to_string(),
            amount: event.amount(),
            from: event.from_account().map(str::to_string),
            to: event.to_account().map(str::to_string),
            timestamp,
        }
    }

    /// Whether `address` is the sender or the recipient.
    pub fn involves(&self, address: &str) -> bool {
        self.from.as_deref() == Some(address) || self.to.as_deref() == Some(address)
    }
}

/// A reward paid to a validator, stored apart from generic transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRewardRecord {
    /// Block the reward refers to.
    pub block: u64,
    /// Rewarded validator.
    pub validator: String,
    /// Reward amount.
    pub amount: u64,
    /// Milliseconds since epoch.
    pub timestamp: i64,
}

/// Totals over all stored validator rewards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardAggregates {
    /// Sum of all reward amounts.
    pub total: u64,
    /// Number of reward rows.
    pub count: u64,
    /// Amount of the most recently stored reward.
    pub last_amount: Option<u64>,
}

/// Per-validator reward total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Validator account.
    pub validator: String,
    /// Sum of its rewards.
    pub total_rewards: u64,
}

/// Record key for event `index` of source transaction `source_signature`.
pub fn derived_signature(source_signature: &str, index: usize) -> String {
    format!("{}{}{}", source_signature, DERIVED_SIGNATURE_SEPARATOR, index)
}

/// Prefix shared by every record derived from `source_signature`.
pub fn signature_prefix(source_signature: &str) -> String {
    format!("{}{}", source_signature, DERIVED_SIGNATURE_SEPARATOR)
}

/// Current time in milliseconds since epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render a millisecond timestamp as ISO-8601 with millisecond precision.
pub fn iso_time(timestamp_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
