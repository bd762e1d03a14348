//! SQLite-backed store.

use async_trait::async_trait;
use dopel_core::{
    LeaderboardEntry, RewardAggregates, StoredBlock, TransactionRecord, ValidatorRewardRecord,
    VirtualBlock,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{Store, StoreKind, StoreResult, StoreStats};
use crate::config::DatabaseConfig;

/// Durable store with async access to a pooled SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store with default pool settings.
    ///
    /// This will create the database file if it doesn't exist. Migrations are
    /// not applied; call [`SqliteStore::run_migrations`].
    ///
    /// # Example
    /// ```no_run
    /// # use dopel_indexer::storage::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("sqlite://dopel.db").await?;
    /// store.run_migrations().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::connect(database_url, &DatabaseConfig::default()).await
    }

    /// Create a store for a database file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url).await
    }

    /// Connect using the configured pool settings.
    pub async fn connect(database_url: &str, config: &DatabaseConfig) -> StoreResult<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }
}

// Amounts are u64 in the domain and INTEGER (i64) in SQLite.
fn to_db(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

// `TOTAL` sums as REAL, so totals past i64 do not raise an overflow error.
// The cast saturates at u64::MAX.
fn total_from_db(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Smallest string greater than every string starting with `prefix`.
///
/// Used for range scans so prefix matching stays case-sensitive and can use
/// the signature index (SQLite `LIKE` is case-insensitive for ASCII).
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(u32::from(last) + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

fn transaction_from_row(row: &SqliteRow) -> StoreResult<TransactionRecord> {
    Ok(TransactionRecord {
        signature: row.try_get("signature")?,
        kind: row.try_get("type")?,
        amount: from_db(row.try_get("amount")?),
        from: row.try_get("from_addr")?,
        to: row.try_get("to_addr")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn reward_from_row(row: &SqliteRow) -> StoreResult<ValidatorRewardRecord> {
    Ok(ValidatorRewardRecord {
        block: from_db(row.try_get("block")?),
        validator: row.try_get("validator")?,
        amount: from_db(row.try_get("amount")?),
        timestamp: row.try_get("timestamp")?,
    })
}

fn block_from_row(row: &SqliteRow) -> StoreResult<StoredBlock> {
    let block_number: i64 = row.try_get("block_number")?;
    let timestamp: i64 = row.try_get("timestamp")?;
    let events_json: String = row.try_get("events_json")?;

    // Unparseable payloads are served as blocks without events.
    let events = serde_json::from_str(&events_json).unwrap_or(serde_json::Value::Null);

    Ok(StoredBlock::from_stored(
        from_db(block_number),
        timestamp,
        &events,
    ))
}

const TRANSACTION_COLUMNS: &str = "signature, type, amount, from_addr, to_addr, timestamp";

#[async_trait]
impl Store for SqliteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Sqlite
    }

    async fn insert_block(&self, block: &VirtualBlock) -> StoreResult<()> {
        let events_json = serde_json::to_string(&block.events)?;

        sqlx::query(
            r#"
            INSERT INTO virtual_blocks (block_number, timestamp, events_json)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(to_db(block.block_number.value()))
        .bind(block.timestamp)
        .bind(events_json)
        .execute(&self.pool)
        .await?;

        debug!(block_number = %block.block_number, "Stored block");
        Ok(())
    }

    async fn insert_transactions(&self, records: &[TransactionRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO transactions (signature, type, amount, from_addr, to_addr, timestamp)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(signature) DO NOTHING
                "#,
            )
            .bind(&record.signature)
            .bind(&record.kind)
            .bind(to_db(record.amount))
            .bind(record.from.as_deref())
            .bind(record.to.as_deref())
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn insert_rewards(&self, records: &[ValidatorRewardRecord]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO validator_rewards (block, validator, amount, timestamp)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(to_db(record.block))
            .bind(&record.validator)
            .bind(to_db(record.amount))
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn recent_blocks(&self, limit: usize) -> StoreResult<Vec<StoredBlock>> {
        let rows = sqlx::query(
            r#"
            SELECT block_number, timestamp, events_json
            FROM virtual_blocks
            ORDER BY block_number DESC
            LIMIT ?
            "#,
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(block_from_row).collect()
    }

    async fn block(&self, number: u64) -> StoreResult<Option<StoredBlock>> {
        let row = sqlx::query(
            r#"
            SELECT block_number, timestamp, events_json
            FROM virtual_blocks
            WHERE block_number = ?
            "#,
        )
        .bind(to_db(number))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(block_from_row).transpose()
    }

    async fn recent_transactions(&self, limit: usize) -> StoreResult<Vec<TransactionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY id DESC LIMIT ?"
        ))
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn reward_aggregates(&self) -> StoreResult<RewardAggregates> {
        let row = sqlx::query(
            "SELECT TOTAL(amount) AS total, COUNT(*) AS count FROM validator_rewards",
        )
        .fetch_one(&self.pool)
        .await?;

        let last_amount: Option<i64> =
            sqlx::query_scalar("SELECT amount FROM validator_rewards ORDER BY id DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(RewardAggregates {
            total: total_from_db(row.try_get("total")?),
            count: from_db(row.try_get("count")?),
            last_amount: last_amount.map(from_db),
        })
    }

    async fn has_signature_prefix(&self, prefix: &str) -> StoreResult<bool> {
        let found: Option<i64> = match prefix_upper_bound(prefix) {
            Some(upper) => {
                sqlx::query_scalar(
                    "SELECT 1 FROM transactions WHERE signature >= ? AND signature < ? LIMIT 1",
                )
                .bind(prefix)
                .bind(upper)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar(
                    "SELECT 1 FROM transactions WHERE substr(signature, 1, length(?1)) = ?1 LIMIT 1",
                )
                .bind(prefix)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        Ok(found.is_some())
    }

    async fn max_block_number(&self) -> StoreResult<Option<u64>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(block_number) FROM virtual_blocks")
            .fetch_one(&self.pool)
            .await?;

        Ok(max.map(from_db))
    }

    async fn transaction(&self, signature: &str) -> StoreResult<Option<TransactionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE signature = ?"
        ))
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn transactions_with_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> StoreResult<Vec<TransactionRecord>> {
        let rows = match prefix_upper_bound(prefix) {
            Some(upper) => {
                sqlx::query(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                     WHERE signature >= ? AND signature < ? ORDER BY id ASC LIMIT ?"
                ))
                .bind(prefix)
                .bind(upper)
                .bind(limit_param(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                     WHERE substr(signature, 1, length(?1)) = ?1 ORDER BY id ASC LIMIT ?2"
                ))
                .bind(prefix)
                .bind(limit_param(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(transaction_from_row).collect()
    }

    async fn transactions_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> StoreResult<Vec<TransactionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE from_addr = ?1 OR to_addr = ?1 ORDER BY id DESC LIMIT ?2"
        ))
        .bind(address)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn recent_rewards(&self, limit: usize) -> StoreResult<Vec<ValidatorRewardRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT block, validator, amount, timestamp
            FROM validator_rewards
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(reward_from_row).collect()
    }

    async fn reward_leaderboard(&self, limit: usize) -> StoreResult<Vec<LeaderboardEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT validator, TOTAL(amount) AS total_rewards
            FROM validator_rewards
            GROUP BY validator
            ORDER BY total_rewards DESC, validator ASC
            LIMIT ?
            "#,
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LeaderboardEntry {
                    validator: row.try_get("validator")?,
                    total_rewards: total_from_db(row.try_get("total_rewards")?),
                })
            })
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let block_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM virtual_blocks")
            .fetch_one(&self.pool)
            .await?;

        let transaction_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;

        let reward_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM validator_rewards")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            block_count: from_db(block_count),
            max_block_number: self.max_block_number().await?,
            transaction_count: from_db(transaction_count),
            reward_count: from_db(reward_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dopel_core::{BlockNumber, Event};
    use tempfile::TempDir;

    async fn setup_store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new_with_path(dir.path().join("dopel.db"))
            .await
            .unwrap();
        store.run_migrations().await.unwrap();
        (store, dir)
    }

    fn record(signature: &str, from: Option<&str>, to: Option<&str>, amount: u64) -> TransactionRecord {
        TransactionRecord {
            signature: signature.to_string(),
            kind: "Transfer".to_string(),
            amount,
            from: from.map(str::to_string),
            to: to.map(str::to_string),
            timestamp: 1_700_000_000_000,
        }
    }

    fn reward(validator: &str, amount: u64) -> ValidatorRewardRecord {
        ValidatorRewardRecord {
            block: 1,
            validator: validator.to_string(),
            amount,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound("SIG1-").as_deref(), Some("SIG1."));
        assert_eq!(prefix_upper_bound("").as_deref(), None);
    }

    #[tokio::test]
    async fn test_block_round_trip() {
        let (store, _dir) = setup_store().await;

        let block = VirtualBlock {
            block_number: BlockNumber::new(1).unwrap(),
            timestamp: 1_700_000_000_000,
            events: vec![Event::decode(
                r#"{"type":"Transfer","from":"A","to":"B","amount":50}"#,
            )],
        };
        store.insert_block(&block).await.unwrap();

        let stored = store.block(1).await.unwrap().unwrap();
        assert_eq!(stored.block_number, 1);
        assert_eq!(stored.events.len(), 1);
        assert_eq!(stored.events[0].kind, "Transfer");
        assert_eq!(stored.events[0].from.as_deref(), Some("A"));
        assert_eq!(stored.events[0].to.as_deref(), Some("B"));
        assert_eq!(stored.events[0].amount, 50);

        assert!(store.block(2).await.unwrap().is_none());
        assert_eq!(store.max_block_number().await.unwrap(), Some(1));

        // Block numbers are unique.
        assert!(store.insert_block(&block).await.is_err());
    }

    #[tokio::test]
    async fn test_legacy_string_events_are_normalized() {
        let (store, _dir) = setup_store().await;

        sqlx::query("INSERT INTO virtual_blocks (block_number, timestamp, events_json) VALUES (7, 0, ?)")
            .bind(r#"["Transfer: 10 from A", "garbage"]"#)
            .execute(store.pool())
            .await
            .unwrap();

        let stored = store.block(7).await.unwrap().unwrap();
        assert_eq!(stored.events[0].kind, "Transfer");
        assert_eq!(stored.events[1].kind, "Unknown");
        assert_eq!(stored.events[1].raw.as_deref(), Some("garbage"));
    }

    #[tokio::test]
    async fn test_recent_blocks_newest_first() {
        let (store, _dir) = setup_store().await;
        assert_eq!(store.max_block_number().await.unwrap(), None);

        for n in 1..=3 {
            let block = VirtualBlock {
                block_number: BlockNumber::new(n).unwrap(),
                timestamp: n as i64,
                events: vec![Event::decode("garbage")],
            };
            store.insert_block(&block).await.unwrap();
        }

        let blocks = store.recent_blocks(2).await.unwrap();
        let numbers: Vec<u64> = blocks.iter().map(|b| b.block_number).collect();
        assert_eq!(numbers, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_signature_prefix_is_case_sensitive() {
        let (store, _dir) = setup_store().await;
        store
            .insert_transactions(&[record("SIG1-0", Some("A"), Some("B"), 5)])
            .await
            .unwrap();

        assert!(store.has_signature_prefix("SIG1-").await.unwrap());
        assert!(!store.has_signature_prefix("sig1-").await.unwrap());
        assert!(!store.has_signature_prefix("SIG10-").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_signatures_are_skipped() {
        let (store, _dir) = setup_store().await;
        store
            .insert_transactions(&[record("SIG1-0", None, Some("C"), 100)])
            .await
            .unwrap();
        store
            .insert_transactions(&[
                record("SIG1-0", None, Some("C"), 999),
                record("SIG2-0", None, Some("C"), 1),
            ])
            .await
            .unwrap();

        let found = store.transaction("SIG1-0").await.unwrap().unwrap();
        assert_eq!(found.amount, 100);
        assert_eq!(store.stats().await.unwrap().transaction_count, 2);
    }

    #[tokio::test]
    async fn test_transactions_queries() {
        let (store, _dir) = setup_store().await;
        store
            .insert_transactions(&[
                record("SIG1-0", Some("A"), Some("B"), 1),
                record("SIG1-1", Some("B"), Some("C"), 2),
                record("SIG2-0", None, Some("A"), 3),
            ])
            .await
            .unwrap();

        let recent = store.recent_transactions(2).await.unwrap();
        assert_eq!(recent[0].signature, "SIG2-0");
        assert_eq!(recent[1].signature, "SIG1-1");

        let derived = store.transactions_with_prefix("SIG1-", 50).await.unwrap();
        let signatures: Vec<_> = derived.iter().map(|r| r.signature.as_str()).collect();
        assert_eq!(signatures, vec!["SIG1-0", "SIG1-1"]);

        let activity = store.transactions_for_address("A", 20).await.unwrap();
        let signatures: Vec<_> = activity.iter().map(|r| r.signature.as_str()).collect();
        assert_eq!(signatures, vec!["SIG2-0", "SIG1-0"]);

        let mint = store.transaction("SIG2-0").await.unwrap().unwrap();
        assert_eq!(mint.from, None);
    }

    #[tokio::test]
    async fn test_reward_aggregates_and_leaderboard() {
        let (store, _dir) = setup_store().await;

        let empty = store.reward_aggregates().await.unwrap();
        assert_eq!(empty, RewardAggregates::default());

        store
            .insert_rewards(&[reward("V1", 10), reward("V2", 25), reward("V1", 20)])
            .await
            .unwrap();

        let aggregates = store.reward_aggregates().await.unwrap();
        assert_eq!(aggregates.total, 55);
        assert_eq!(aggregates.count, 3);
        assert_eq!(aggregates.last_amount, Some(20));

        let leaders = store.reward_leaderboard(10).await.unwrap();
        assert_eq!(leaders[0].validator, "V1");
        assert_eq!(leaders[0].total_rewards, 30);
        assert_eq!(leaders[1].validator, "V2");

        let recent = store.recent_rewards(1).await.unwrap();
        assert_eq!(recent[0].amount, 20);
    }

    #[tokio::test]
    async fn test_reward_totals_past_i64_stay_readable() {
        let (store, _dir) = setup_store().await;
        store
            .insert_rewards(&[reward("V1", u64::MAX), reward("V1", 5), reward("V2", 3)])
            .await
            .unwrap();

        let aggregates = store.reward_aggregates().await.unwrap();
        assert!(aggregates.total >= i64::MAX as u64);
        assert_eq!(aggregates.count, 3);
        assert_eq!(aggregates.last_amount, Some(3));

        let leaders = store.reward_leaderboard(10).await.unwrap();
        assert_eq!(leaders.len(), 2);
        assert_eq!(leaders[0].validator, "V1");
        assert!(leaders[0].total_rewards >= i64::MAX as u64);
        assert_eq!(leaders[1].total_rewards, 3);
    }

    #[tokio::test]
    async fn test_stats() {
        let (store, _dir) = setup_store().await;

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.block_count, 0);
        assert_eq!(stats.max_block_number, None);
        assert_eq!(stats.transaction_count, 0);
        assert_eq!(stats.reward_count, 0);

        store.ping().await.unwrap();
        store.close().await;
    }
}
