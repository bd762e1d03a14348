//! Read-only HTTP query surface.
//!
//! Store failures never surface as errors: blocks fall back to the recent
//! cache and other reads answer with empty results in the same shape.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use dopel_core::{
    iso_time, LeaderboardEntry, StoredBlock, TransactionRecord, ValidatorRewardRecord,
    ACTIVITY_LIMIT, DEFAULT_QUERY_LIMIT, LEADERBOARD_LIMIT,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::health::HealthMonitor;
use crate::ledger::{merge_blocks, RecentBlocks};
use crate::storage::{SignatureMatch, Store};

/// Paging and stats settings for the handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySettings {
    /// Page size when `limit` is absent or unparseable
    pub default_limit: usize,
    /// Upper bound for `limit`
    pub max_limit: usize,
    /// Supply before indexed rewards
    pub base_supply: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_QUERY_LIMIT,
            max_limit: 100,
            base_supply: 7_000_000_000,
        }
    }
}

impl From<&Config> for QuerySettings {
    fn from(config: &Config) -> Self {
        Self {
            default_limit: config.server.default_limit,
            max_limit: config.server.max_limit,
            base_supply: config.stats.base_supply,
        }
    }
}

impl QuerySettings {
    /// Resolve a raw `limit` parameter.
    pub fn limit(&self, raw: Option<&str>) -> usize {
        match raw.and_then(|raw| raw.trim().parse::<i64>().ok()) {
            Some(requested) => usize::try_from(requested.max(1))
                .unwrap_or(self.max_limit)
                .min(self.max_limit),
            None => self.default_limit.min(self.max_limit),
        }
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
    cache: RecentBlocks,
    health: Arc<HealthMonitor>,
    settings: QuerySettings,
}

impl AppState {
    /// Assemble handler state.
    pub fn new(
        store: Arc<dyn Store>,
        cache: RecentBlocks,
        health: Arc<HealthMonitor>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            store,
            cache,
            health,
            settings,
        }
    }
}

/// Build the router with CORS and request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/blocks", get(list_blocks))
        .route("/blocks/:number", get(get_block))
        .route("/transactions", get(list_transactions))
        .route("/stats", get(stats))
        .route("/tx/:signature", get(get_transaction))
        .route("/address/:address", get(address_activity))
        .route("/rewards/recent", get(recent_rewards))
        .route("/rewards/leaderboard", get(reward_leaderboard))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Indexer API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Indexer API shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

const ERROR_CODE_INVALID_REQUEST: &str = "invalid_request";
const ERROR_CODE_NOT_FOUND: &str = "not_found";

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorInfo,
}

#[derive(Serialize)]
struct ErrorInfo {
    code: &'static str,
    message: String,
}

fn api_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: ErrorInfo {
                code,
                message: message.into(),
            },
        }),
    )
}

fn bad_request(msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    api_error(StatusCode::BAD_REQUEST, ERROR_CODE_INVALID_REQUEST, msg)
}

fn not_found(msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    api_error(StatusCode::NOT_FOUND, ERROR_CODE_NOT_FOUND, msg)
}

/// Degrade a failed store read to `fallback`.
fn or_degraded<T>(result: crate::storage::StoreResult<T>, what: &str, fallback: T) -> T {
    result.unwrap_or_else(|e| {
        warn!(error = %e, "Store read failed ({}), serving degraded result", what);
        fallback
    })
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
struct TransactionView {
    signature: String,
    #[serde(rename = "type")]
    kind: String,
    amount: u64,
    from: Option<String>,
    to: Option<String>,
    time: String,
}

impl From<TransactionRecord> for TransactionView {
    fn from(record: TransactionRecord) -> Self {
        Self {
            time: iso_time(record.timestamp),
            signature: record.signature,
            kind: record.kind,
            amount: record.amount,
            from: record.from,
            to: record.to,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    dopel_supply: u64,
    block_height: u64,
    reward_total: u64,
    reward_count: u64,
    last_reward_amount: Option<u64>,
    db_enabled: bool,
}

#[derive(Debug, Serialize)]
struct AddressActivity {
    address: String,
    txs: Vec<TransactionView>,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.health.snapshot().await)
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot().await;
    let status = if snapshot.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

async fn list_blocks(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<StoredBlock>> {
    let limit = state.settings.limit(params.limit.as_deref());

    let cached = state.cache.recent(limit).await;
    let stored = or_degraded(state.store.recent_blocks(limit).await, "blocks", Vec::new());

    Json(merge_blocks(cached, stored, limit))
}

async fn get_block(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Result<Json<StoredBlock>, (StatusCode, Json<ErrorResponse>)> {
    let number: u64 = number
        .trim()
        .parse()
        .map_err(|_| bad_request(format!("Invalid block number: {}", number)))?;

    if let Some(block) = or_degraded(state.store.block(number).await, "block", None) {
        return Ok(Json(block));
    }

    // Blocks whose write failed or is still in flight.
    state
        .cache
        .get(number)
        .await
        .map(Json)
        .ok_or_else(|| not_found("Block not found"))
}

async fn list_transactions(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<TransactionView>> {
    let limit = state.settings.limit(params.limit.as_deref());
    let records = or_degraded(
        state.store.recent_transactions(limit).await,
        "transactions",
        Vec::new(),
    );

    Json(records.into_iter().map(TransactionView::from).collect())
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let aggregates = or_degraded(
        state.store.reward_aggregates().await,
        "reward aggregates",
        Default::default(),
    );
    let stored_height = or_degraded(state.store.max_block_number().await, "block height", None);
    let cached_height = state.cache.max_block_number().await;

    Json(StatsResponse {
        dopel_supply: state.settings.base_supply.saturating_add(aggregates.total),
        block_height: stored_height.max(cached_height).unwrap_or(0),
        reward_total: aggregates.total,
        reward_count: aggregates.count,
        last_reward_amount: aggregates.last_amount,
        db_enabled: state.health.db_enabled(),
    })
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(signature): Path<String>,
) -> Result<axum::response::Response, (StatusCode, Json<ErrorResponse>)> {
    let found = or_degraded(
        state.store.transactions_by_signature(&signature).await,
        "transaction",
        None,
    );

    match found {
        Some(SignatureMatch::Exact(record)) => Ok(Json(TransactionView::from(record)).into_response()),
        Some(SignatureMatch::Derived(records)) => Ok(Json(
            records
                .into_iter()
                .map(TransactionView::from)
                .collect::<Vec<_>>(),
        )
        .into_response()),
        None => Err(not_found("Transaction not found")),
    }
}

async fn address_activity(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<AddressActivity> {
    let records = or_degraded(
        state
            .store
            .transactions_for_address(&address, ACTIVITY_LIMIT)
            .await,
        "address activity",
        Vec::new(),
    );

    Json(AddressActivity {
        address,
        txs: records.into_iter().map(TransactionView::from).collect(),
    })
}

async fn recent_rewards(State(state): State<AppState>) -> Json<Vec<ValidatorRewardRecord>> {
    Json(or_degraded(
        state.store.recent_rewards(DEFAULT_QUERY_LIMIT).await,
        "recent rewards",
        Vec::new(),
    ))
}

async fn reward_leaderboard(State(state): State<AppState>) -> Json<Vec<LeaderboardEntry>> {
    Json(or_degraded(
        state.store.reward_leaderboard(LEADERBOARD_LIMIT).await,
        "reward leaderboard",
        Vec::new(),
    ))
}
