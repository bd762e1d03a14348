//! Health monitor: connectivity flags, ingestion progress and failure counters.
//!
//! Liveness always succeeds. Readiness requires a reachable RPC node, a
//! reachable durable store and a live subscription.

use dopel_core::{iso_time, now_millis};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::listener::SolanaRpc;
use crate::storage::{Store, StoreKind};

/// Write groups of one assembled block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGroup {
    /// The block row.
    Block,
    /// The transaction records.
    Transactions,
    /// The validator reward records.
    Rewards,
}

impl WriteGroup {
    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteGroup::Block => "block",
            WriteGroup::Transactions => "transactions",
            WriteGroup::Rewards => "rewards",
        }
    }
}

/// Point-in-time view served by `/health` and `/ready`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// Last RPC probe succeeded
    pub rpc_ok: bool,
    /// Last store probe succeeded (always false in memory mode)
    pub db_ok: bool,
    /// A durable store is in use
    pub db_enabled: bool,
    /// Log subscription is live
    pub subscribed: bool,
    /// Number of the last assembled block
    pub last_block_number: Option<u64>,
    /// Source signature of the last assembled block
    pub last_signature: Option<String>,
    /// Time of the last successful block write (ms)
    pub last_insert_ts: Option<i64>,
    /// Notifications skipped as already indexed
    pub duplicates_skipped: u64,
    /// Duplicate checks that failed or timed out
    pub dedup_check_failures: u64,
    /// Failed block writes
    pub block_write_failures: u64,
    /// Failed transaction group writes
    pub transaction_write_failures: u64,
    /// Failed reward group writes
    pub reward_write_failures: u64,
    /// Most recent error text
    pub last_error: Option<String>,
    /// Process start time (ISO-8601)
    pub started_at: String,
    /// Crate version
    pub version: &'static str,
}

impl HealthSnapshot {
    /// Readiness verdict.
    pub fn is_ready(&self) -> bool {
        self.rpc_ok && self.db_ok && self.subscribed
    }
}

#[derive(Debug, Default)]
struct HealthState {
    rpc_ok: bool,
    db_ok: bool,
    subscribed: bool,
    last_block_number: Option<u64>,
    last_signature: Option<String>,
    last_insert_ts: Option<i64>,
    duplicates_skipped: u64,
    dedup_check_failures: u64,
    block_write_failures: u64,
    transaction_write_failures: u64,
    reward_write_failures: u64,
    last_error: Option<String>,
}

/// Shared health state, updated by every pipeline stage.
#[derive(Debug)]
pub struct HealthMonitor {
    db_enabled: bool,
    started_at: i64,
    state: RwLock<HealthState>,
}

impl HealthMonitor {
    /// Create a monitor; `db_enabled` is fixed for the process lifetime.
    pub fn new(db_enabled: bool) -> Self {
        Self {
            db_enabled,
            started_at: now_millis(),
            state: RwLock::new(HealthState::default()),
        }
    }

    /// Whether a durable store is in use.
    pub fn db_enabled(&self) -> bool {
        self.db_enabled
    }

    /// Current state.
    pub async fn snapshot(&self) -> HealthSnapshot {
        let state = self.state.read().await;
        HealthSnapshot {
            rpc_ok: state.rpc_ok,
            db_ok: self.db_enabled && state.db_ok,
            db_enabled: self.db_enabled,
            subscribed: state.subscribed,
            last_block_number: state.last_block_number,
            last_signature: state.last_signature.clone(),
            last_insert_ts: state.last_insert_ts,
            duplicates_skipped: state.duplicates_skipped,
            dedup_check_failures: state.dedup_check_failures,
            block_write_failures: state.block_write_failures,
            transaction_write_failures: state.transaction_write_failures,
            reward_write_failures: state.reward_write_failures,
            last_error: state.last_error.clone(),
            started_at: iso_time(self.started_at),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Record the RPC probe result.
    pub async fn set_rpc_ok(&self, ok: bool) {
        self.state.write().await.rpc_ok = ok;
    }

    /// Record the store probe result.
    pub async fn set_db_ok(&self, ok: bool) {
        self.state.write().await.db_ok = ok;
    }

    /// Record subscription state.
    pub async fn set_subscribed(&self, subscribed: bool) {
        self.state.write().await.subscribed = subscribed;
    }

    /// Record an error without touching any counter.
    pub async fn record_error(&self, error: impl Into<String>) {
        self.state.write().await.last_error = Some(error.into());
    }

    /// Record an assembled block.
    pub async fn record_block(&self, block_number: u64, signature: &str) {
        let mut state = self.state.write().await;
        state.last_block_number = Some(block_number);
        state.last_signature = Some(signature.to_string());
    }

    /// Record a successful block write.
    pub async fn record_insert(&self) {
        self.state.write().await.last_insert_ts = Some(now_millis());
    }

    /// Record a notification skipped as duplicate.
    pub async fn record_duplicate(&self) {
        self.state.write().await.duplicates_skipped += 1;
    }

    /// Record a failed or timed-out duplicate check.
    pub async fn record_dedup_failure(&self, error: impl Into<String>) {
        let mut state = self.state.write().await;
        state.dedup_check_failures += 1;
        state.last_error = Some(error.into());
    }

    /// Record a failed write group.
    pub async fn record_write_failure(&self, group: WriteGroup, error: impl Into<String>) {
        let mut state = self.state.write().await;
        match group {
            WriteGroup::Block => state.block_write_failures += 1,
            WriteGroup::Transactions => state.transaction_write_failures += 1,
            WriteGroup::Rewards => state.reward_write_failures += 1,
        }
        state.last_error = Some(error.into());
    }

    /// Run both probes once and store the results.
    pub async fn probe_once(&self, rpc: &SolanaRpc, store: &dyn Store) {
        match rpc.probe().await {
            Ok(()) => self.set_rpc_ok(true).await,
            Err(e) => {
                warn!(error = %e, "RPC probe failed");
                self.set_rpc_ok(false).await;
                self.record_error(e.to_string()).await;
            }
        }

        if store.kind() == StoreKind::Memory {
            self.set_db_ok(false).await;
            return;
        }

        match store.ping().await {
            Ok(()) => self.set_db_ok(true).await,
            Err(e) => {
                warn!(error = %e, "Database probe failed");
                self.set_db_ok(false).await;
                self.record_error(e.to_string()).await;
            }
        }
    }
}

/// Spawn the periodic prober. The first probe runs immediately.
pub fn spawn_prober(
    monitor: Arc<HealthMonitor>,
    rpc: SolanaRpc,
    store: Arc<dyn Store>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            monitor.probe_once(&rpc, store.as_ref()).await;
            debug!("Health probe completed");
        }
    })
}
