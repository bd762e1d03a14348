//! Canonical constants for the Dopel indexer.

/// Marker carried by every program log line emitted through `msg!`.
pub const LOG_MARKER: &str = "Program log:";

/// Delimiter used to derive a type tag from a non-JSON log line.
pub const TYPE_DELIMITER: char = ':';

/// Type tag given to events whose kind cannot be determined.
pub const UNKNOWN_EVENT_TYPE: &str = "Unknown";

/// Type tag of a token transfer event.
pub const TRANSFER_EVENT_TYPE: &str = "Transfer";

/// Type tag of a mint event.
pub const MINT_EVENT_TYPE: &str = "Mint";

/// Legacy mint tag emitted by early program versions.
pub const LEGACY_MINT_EVENT_TYPE: &str = "MintDopel";

/// Type tag of a validator reward event.
pub const VALIDATOR_REWARD_EVENT_TYPE: &str = "ValidatorReward";

/// Validator recorded for reward events that do not name one.
pub const FALLBACK_VALIDATOR: &str = "unknown";

/// Separator between a source signature and the event index.
pub const DERIVED_SIGNATURE_SEPARATOR: char = '-';

/// First block number handed out on an empty ledger.
pub const GENESIS_BLOCK_NUMBER: u64 = 1;

/// Default page size for list queries.
pub const DEFAULT_QUERY_LIMIT: usize = 20;

/// Maximum derived records returned for one source signature lookup.
pub const SIGNATURE_LOOKUP_LIMIT: usize = 50;

/// Page size of address activity and recent reward listings.
pub const ACTIVITY_LIMIT: usize = 20;

/// Number of validators listed on the reward leaderboard.
pub const LEADERBOARD_LIMIT: usize = 10;

/// Length in bytes of a decoded program id.
pub const PROGRAM_ID_LEN: usize = 32;
