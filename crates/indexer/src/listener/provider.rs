//! JSON-RPC transport for Solana: log subscriptions and the health probe.

use async_trait::async_trait;
use dopel_core::ProgramId;
use jsonrpsee::core::client::{ClientT, Subscription, SubscriptionClientT};
use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::HttpClientBuilder;
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use super::events::{LogNotification, RpcLogsNotification};
use crate::config::Commitment;

/// Timeout for the HTTP health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport errors.
#[derive(Debug, Error)]
pub enum SubscribeError {
    /// Websocket or HTTP connection could not be established.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// Endpoint URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: ClientError,
    },

    /// The node rejected `logsSubscribe`.
    #[error("logsSubscribe failed: {0}")]
    Subscribe(#[source] ClientError),

    /// `getHealth` request failed.
    #[error("getHealth failed: {0}")]
    Probe(#[source] ClientError),

    /// `getHealth` answered something other than "ok".
    #[error("node reported unhealthy: {0}")]
    Unhealthy(String),
}

/// A source of log notifications, in delivery order.
#[async_trait]
pub trait NotificationSource: Send {
    /// Next notification; `None` once the stream has ended.
    async fn next_notification(&mut self) -> Option<LogNotification>;
}

/// Live `logsSubscribe` stream. Dropping it sends `logsUnsubscribe`.
pub struct LogStream {
    // Keeps the connection open for the subscription's lifetime.
    _client: WsClient,
    subscription: Subscription<RpcLogsNotification>,
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream").finish_non_exhaustive()
    }
}

#[async_trait]
impl NotificationSource for LogStream {
    async fn next_notification(&mut self) -> Option<LogNotification> {
        loop {
            match self.subscription.next().await {
                Some(Ok(notification)) => return Some(notification.into()),
                Some(Err(e)) => {
                    // Malformed payloads are skipped, the stream stays open.
                    warn!(error = %e, "Dropping undecodable logs notification");
                }
                None => return None,
            }
        }
    }
}

/// RPC endpoints of one Solana cluster.
#[derive(Debug, Clone)]
pub struct SolanaRpc {
    rpc_url: String,
    ws_url: String,
}

impl SolanaRpc {
    /// Create a transport for the given endpoints.
    pub fn new(rpc_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ws_url: ws_url.into(),
        }
    }

    /// HTTP endpoint.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Websocket endpoint.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open a websocket and subscribe to logs mentioning `program_id`.
    pub async fn subscribe_logs(
        &self,
        program_id: &ProgramId,
        commitment: Commitment,
    ) -> Result<LogStream, SubscribeError> {
        info!("Connecting to WebSocket at {}", self.ws_url);

        let client = WsClientBuilder::default()
            .build(&self.ws_url)
            .await
            .map_err(|source| SubscribeError::Connect {
                url: self.ws_url.clone(),
                source,
            })?;

        let filter = json!({ "mentions": [program_id.as_str()] });
        let options = json!({ "commitment": commitment.as_str() });

        let subscription: Subscription<RpcLogsNotification> = client
            .subscribe("logsSubscribe", rpc_params![filter, options], "logsUnsubscribe")
            .await
            .map_err(SubscribeError::Subscribe)?;

        info!(
            program_id = %program_id,
            commitment = commitment.as_str(),
            "Subscribed to program logs"
        );

        Ok(LogStream {
            _client: client,
            subscription,
        })
    }

    /// Probe the HTTP endpoint with `getHealth`.
    pub async fn probe(&self) -> Result<(), SubscribeError> {
        let client = HttpClientBuilder::default()
            .request_timeout(PROBE_TIMEOUT)
            .build(&self.rpc_url)
            .map_err(|source| SubscribeError::Connect {
                url: self.rpc_url.clone(),
                source,
            })?;

        let status: String = client
            .request("getHealth", rpc_params![])
            .await
            .map_err(SubscribeError::Probe)?;

        if status == "ok" {
            Ok(())
        } else {
            Err(SubscribeError::Unhealthy(status))
        }
    }
}
