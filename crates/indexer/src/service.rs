//! Process wiring: store selection, shared state and task lifecycle.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::health::{spawn_prober, HealthMonitor};
use crate::ledger::{LedgerAssembler, RecentBlocks, Sequencer};
use crate::listener::{spawn_subscriber, SolanaRpc};
use crate::server::{self, AppState, QuerySettings};
use crate::storage::{open_store, Store, StoreKind};

/// A configured indexer with its store chosen.
#[derive(Debug)]
pub struct Indexer {
    config: Config,
    store: Arc<dyn Store>,
    cache: RecentBlocks,
    health: Arc<HealthMonitor>,
}

impl Indexer {
    /// Open the store (falling back to memory mode) and build shared state.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let store = open_store(&config.database, &config.memory).await;
        let db_enabled = store.kind() == StoreKind::Sqlite;
        info!(mode = store.kind().as_str(), "Storage ready");

        Ok(Self {
            cache: RecentBlocks::new(config.memory.max_blocks),
            health: Arc::new(HealthMonitor::new(db_enabled)),
            store,
            config,
        })
    }

    /// Store in use.
    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Health monitor.
    pub fn health(&self) -> Arc<HealthMonitor> {
        self.health.clone()
    }

    /// Handler state for the query surface.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.store.clone(),
            self.cache.clone(),
            self.health.clone(),
            QuerySettings::from(&self.config),
        )
    }

    /// Assembler with its sequencer seeded from the store.
    pub async fn assembler(&self) -> LedgerAssembler {
        LedgerAssembler::new(
            Sequencer::from_store(self.store.as_ref()).await,
            self.store.clone(),
            self.cache.clone(),
            self.health.clone(),
            Duration::from_millis(self.config.ingest.dedup_timeout_ms),
        )
    }

    /// Run the subscriber, the health prober and the HTTP server until
    /// shutdown.
    pub async fn run(self) -> Result<()> {
        let rpc = SolanaRpc::new(self.config.network.rpc_url.clone(), self.config.ws_url());
        let program_id = self.config.program_id()?.clone();

        info!("  RPC URL: {}", rpc.rpc_url());
        info!("  WS URL: {}", rpc.ws_url());
        info!("  Program: {}", program_id);
        info!("  Storage: {}", self.store.kind().as_str());

        let prober = spawn_prober(
            self.health.clone(),
            rpc.clone(),
            self.store.clone(),
            Duration::from_secs(self.config.health.probe_interval_secs),
        );

        let subscriber = spawn_subscriber(
            rpc,
            program_id,
            self.config.network.commitment,
            self.assembler().await,
        );

        info!("Indexer is running. Press Ctrl+C to stop.");

        let result = server::serve(self.app_state(), self.config.server.port).await;

        // In-flight writes are dropped with the subscriber; nothing is retried.
        subscriber.abort();
        prober.abort();

        result.context("HTTP server failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.network.program_id =
            Some("HAzZhRcVrrFWYU9K4nWCSvpgLLcMSb9GZRfrcs3bYfDP".parse().unwrap());
        config
    }

    #[tokio::test]
    async fn test_open_memory_mode() {
        let indexer = Indexer::open(memory_config()).await.unwrap();
        assert_eq!(indexer.store().kind(), StoreKind::Memory);
        assert!(!indexer.health().db_enabled());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        assert!(Indexer::open(Config::default()).await.is_err());
    }
}
