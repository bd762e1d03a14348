//! Subscription task: drives the assembler from a notification source.

use dopel_core::ProgramId;
use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::provider::{NotificationSource, SolanaRpc};
use crate::config::Commitment;
use crate::health::HealthMonitor;
use crate::ledger::{persist, AssembleOutcome, LedgerAssembler};

/// Feeds notifications to the assembler in delivery order and spawns the
/// persistence writes.
#[derive(Debug)]
pub struct Subscriber {
    assembler: LedgerAssembler,
    health: Arc<HealthMonitor>,
    writes: JoinSet<()>,
}

impl Subscriber {
    /// Create a subscriber around an assembler.
    pub fn new(assembler: LedgerAssembler) -> Self {
        let health = assembler.health();
        Self {
            assembler,
            health,
            writes: JoinSet::new(),
        }
    }

    /// Consume `source` until it ends. Pending writes are awaited before
    /// returning.
    pub async fn run<S: NotificationSource>(mut self, mut source: S) {
        self.health.set_subscribed(true).await;

        while let Some(notification) = source.next_notification().await {
            if let Some(err) = &notification.err {
                debug!(signature = %notification.signature, err = %err, "Transaction failed, indexing its logs");
            }

            if let AssembleOutcome::Assembled(assembled) = self.assembler.assemble(&notification).await {
                self.writes.spawn(persist(
                    self.assembler.store(),
                    self.health.clone(),
                    assembled,
                ));
            }

            // Reap finished writes so the set stays small.
            while let Some(result) = self.writes.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "Persistence task panicked");
                }
            }
        }

        warn!("Log subscription ended");
        self.health.set_subscribed(false).await;
        self.health.record_error("log subscription ended").await;

        while let Some(result) = self.writes.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Persistence task panicked");
            }
        }
    }
}

/// Subscribe to the program's logs and run the subscriber in a task.
///
/// A failed subscription is recorded in the health monitor and the task
/// exits; the query surface keeps serving.
pub fn spawn_subscriber(
    rpc: SolanaRpc,
    program_id: ProgramId,
    commitment: Commitment,
    assembler: LedgerAssembler,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let health = assembler.health();
        match rpc.subscribe_logs(&program_id, commitment).await {
            Ok(stream) => {
                info!("Listening for program events");
                Subscriber::new(assembler).run(stream).await;
            }
            Err(e) => {
                error!(error = %e, "Log subscription failed, serving in degraded mode");
                health.set_subscribed(false).await;
                health.record_error(e.to_string()).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::ledger::{RecentBlocks, Sequencer};
    use crate::listener::LogNotification;
    use crate::storage::{MemoryStore, Store};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedSource(VecDeque<LogNotification>);

    #[async_trait]
    impl NotificationSource for ScriptedSource {
        async fn next_notification(&mut self) -> Option<LogNotification> {
            self.0.pop_front()
        }
    }

    fn notification(signature: &str, line: &str) -> LogNotification {
        LogNotification {
            signature: signature.to_string(),
            slot: Some(1),
            err: None,
            logs: vec![line.to_string()],
        }
    }

    #[tokio::test]
    async fn test_run_indexes_in_order() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&MemoryConfig::default()));
        let health = Arc::new(HealthMonitor::new(false));
        let assembler = LedgerAssembler::new(
            Sequencer::new(),
            store.clone(),
            RecentBlocks::new(10),
            health.clone(),
            Duration::from_secs(1),
        );

        let source = ScriptedSource(VecDeque::from(vec![
            notification("SIG1", r#"Program log: {"type":"Transfer","from":"A","to":"B","amount":50}"#),
            notification("SIG2", "Program consumed 10 units"),
            notification("SIG3", "Program log: garbage"),
        ]));
        Subscriber::new(assembler).run(source).await;

        let blocks = store.recent_blocks(10).await.unwrap();
        let numbers: Vec<u64> = blocks.iter().map(|b| b.block_number).collect();
        assert_eq!(numbers, vec![2, 1]);
        assert_eq!(blocks[0].events[0].kind, "Unknown");
        assert_eq!(blocks[0].events[0].raw.as_deref(), Some("garbage"));

        let snapshot = health.snapshot().await;
        assert!(!snapshot.subscribed);
        assert_eq!(snapshot.last_block_number, Some(2));
        assert_eq!(snapshot.last_signature.as_deref(), Some("SIG3"));
    }

    #[tokio::test]
    async fn test_failed_subscription_is_recorded() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(&MemoryConfig::default()));
        let health = Arc::new(HealthMonitor::new(false));
        let assembler = LedgerAssembler::new(
            Sequencer::new(),
            store,
            RecentBlocks::new(10),
            health.clone(),
            Duration::from_secs(1),
        );

        let rpc = SolanaRpc::new("http://127.0.0.1:9", "ws://127.0.0.1:9");
        let program_id: ProgramId = "HAzZhRcVrrFWYU9K4nWCSvpgLLcMSb9GZRfrcs3bYfDP".parse().unwrap();
        spawn_subscriber(rpc, program_id, Commitment::Confirmed, assembler)
            .await
            .unwrap();

        let snapshot = health.snapshot().await;
        assert!(!snapshot.subscribed);
        assert!(snapshot.last_error.is_some());
    }
}
