//! Program log indexer for the Dopel explorer.
//!
//! This crate provides:
//! - A websocket subscriber for one program's log notifications
//! - Decoding of program log lines into typed events
//! - Virtual block assembly with gapless numbering and same-session dedup
//! - Persistence to SQLite, or to bounded memory buffers when no database is usable
//! - Health and readiness reporting
//! - A read-only HTTP query surface
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  dopel-indexer                                │
//! │                                               │
//! │  ┌──────────────────┐                         │
//! │  │  Log Subscriber  │ ← Solana WS             │
//! │  │  (tokio task)    │   logsSubscribe         │
//! │  └────────┬─────────┘                         │
//! │           │ notifications, in order           │
//! │  ┌────────▼─────────┐   ┌──────────────────┐  │
//! │  │ Ledger Assembler │──▶│  Recent cache    │  │
//! │  │ decode → dedup → │   └────────┬─────────┘  │
//! │  │ number → build   │            │            │
//! │  └────────┬─────────┘            │            │
//! │           │ spawned writes       │            │
//! │  ┌────────▼─────────┐            │            │
//! │  │      Store       │ SQLite or memory        │
//! │  └────────┬─────────┘            │            │
//! │           │                      │            │
//! │  ┌────────▼──────────────────────▼─────────┐  │
//! │  │  Query Surface (axum)                   │  │
//! │  │  /health /ready /blocks /transactions   │  │
//! │  │  /stats /tx /address /rewards           │  │
//! │  └─────────────────────────────────────────┘  │
//! │                                               │
//! │  Health Monitor ← every stage + prober task   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Failure model
//!
//! - Undecodable log lines become `Unknown` events
//! - A failed duplicate check is logged and ingestion proceeds
//! - Write failures are counted per group and never retried
//! - An unusable database at startup selects memory mode for the process lifetime

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod health;
pub mod ledger;
pub mod listener;
pub mod server;
pub mod service;
pub mod storage;

// Re-export common types
pub use dopel_core::*;
