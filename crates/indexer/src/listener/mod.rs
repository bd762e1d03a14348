//! Program log listener.
//!
//! This module provides:
//! - Notification types and the log line decoder
//! - JSON-RPC transport (websocket subscription, HTTP health probe)
//! - The subscriber task feeding the ledger assembler

pub mod events;
pub mod provider;
pub mod subscriber;

pub use events::{decode_logs, LogNotification};
pub use provider::{LogStream, NotificationSource, SolanaRpc, SubscribeError};
pub use subscriber::{spawn_subscriber, Subscriber};
